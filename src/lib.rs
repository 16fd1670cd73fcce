//! Locate, repair and validate UK NMC PINs in uploaded documents, then hand
//! them to a register-check driver.

pub mod config;
pub mod driver;
pub mod extraction;
pub mod extractor;
pub mod heuristics;
pub mod llm_extract;
pub mod pdf_extract;
pub mod pin;
pub mod report;
pub mod server;

pub use extraction::{PinExtraction, Tier};
pub use extractor::Extractor;
pub use pin::Pin;
