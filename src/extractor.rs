// src/extractor.rs

use crate::config::ExtractSection;
use crate::extraction::{PinExtraction, Tier};
use crate::heuristics;
use crate::llm_extract::VisionTiers;
use crate::pdf_extract::{self, DocumentKind, PdfContent};
use crate::pin::Pin;
use std::path::Path;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Turns an uploaded document into a validated PIN, or a negative result.
///
/// Holds no per-call state; one instance can serve concurrent requests.
pub struct Extractor {
    settings: ExtractSection,
    vision: Option<VisionTiers>,
}

impl Extractor {
    pub fn new(settings: ExtractSection, vision: Option<VisionTiers>) -> Self {
        Self { settings, vision }
    }

    /// Text strategies only, no vision fallback.
    pub fn text_only(settings: ExtractSection) -> Self {
        Self::new(settings, None)
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some()
    }

    /// Best-effort extraction. Never fails: a miss is `ok == false`.
    pub async fn extract_pin(&self, path: &Path) -> PinExtraction {
        let span = info_span!("extract", file = %path.display());
        let hit = async {
            match DocumentKind::detect(path) {
                DocumentKind::Pdf => self.from_pdf(path).await,
                DocumentKind::Image(_) => self.from_image(path).await,
                DocumentKind::Text => self.from_text_file(path).await,
            }
        }
        .instrument(span)
        .await;

        match &hit {
            Some((pin, tier)) => info!(pin = %pin, ?tier, file = %path.display(), "PIN extracted"),
            None => info!(file = %path.display(), "No PIN found"),
        }
        PinExtraction::from(hit)
    }

    /// Text strategy on a string already in memory.
    pub fn extract_from_text(&self, text: &str) -> PinExtraction {
        PinExtraction::from(heuristics::extract_from_text(text))
    }

    async fn from_pdf(&self, path: &Path) -> Option<(Pin, Tier)> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let text_pages = self.settings.text_pages.max(1);
                let span = Span::current();
                let scan = tokio::task::spawn_blocking(move || {
                    span.in_scope(|| pdf_text(&bytes, text_pages))
                });
                match scan.await {
                    Ok(Some(hit)) => return Some(hit),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "PDF text task failed"),
                }
            }
            Err(e) => warn!(error = %e, "Failed to read PDF"),
        }

        let vision = self.vision.as_ref()?;
        let pages = self.settings.image_pages.max(1);
        match pdf_extract::render_pages(path, pages, self.settings.render_dpi).await {
            Ok(images) => vision.extract(&images).await,
            Err(e) => {
                warn!(error = %e, "Failed to render PDF for vision fallback");
                None
            }
        }
    }

    async fn from_image(&self, path: &Path) -> Option<(Pin, Tier)> {
        let vision = self.vision.as_ref()?;
        let image = pdf_extract::load_image(path).await?;
        vision.extract(std::slice::from_ref(&image)).await
    }

    async fn from_text_file(&self, path: &Path) -> Option<(Pin, Tier)> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                // undecodable bytes are dropped, not replaced
                let text = String::from_utf8_lossy(&bytes).replace(char::REPLACEMENT_CHARACTER, "");
                heuristics::extract_from_text(&text)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read text file");
                None
            }
        }
    }
}

/// Text pass over a PDF. Blocking; run it off the async workers.
fn pdf_text(bytes: &[u8], text_pages: usize) -> Option<(Pin, Tier)> {
    let doc = match pdf_extract::open_pdf(bytes) {
        PdfContent::Text(doc) => doc,
        PdfContent::ScannedImage(doc) => {
            debug!("Mostly image pages; reading whatever text layer there is");
            doc
        }
        PdfContent::Error(e) => {
            warn!(error = %e, "PDF unreadable, no text available");
            return None;
        }
    };

    scan_pages(pdf_extract::page_texts(&doc, text_pages), || {
        pdf_extract::combined_text(bytes)
    })
}

/// Page by page, stopping at the first page that yields a PIN. Then the
/// pages joined, then `combined` when no page had any text at all.
fn scan_pages(
    pages: impl IntoIterator<Item = String>,
    combined: impl FnOnce() -> Option<String>,
) -> Option<(Pin, Tier)> {
    let mut seen = Vec::new();
    for (page, text) in pages.into_iter().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        if let Some(hit) = heuristics::extract_from_text(&text) {
            debug!(page = page + 1, "PIN found on page");
            return Some(hit);
        }
        seen.push(text);
    }

    // A label and its value can sit on either side of a page break
    if seen.len() > 1 {
        return heuristics::extract_from_text(&seen.join("\n"));
    }

    if seen.is_empty() {
        let text = combined()?;
        return heuristics::extract_from_text(&text);
    }

    None
}
