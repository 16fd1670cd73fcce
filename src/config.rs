use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{var} must be a positive integer, got {value:?}")]
    BadEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub vision: VisionSection,
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractSection {
    /// PDF pages read for text before giving up on the text strategy.
    #[serde(default = "default_text_pages")]
    pub text_pages: usize,
    /// PDF pages rendered for the vision fallback.
    #[serde(default = "default_image_pages")]
    pub image_pages: usize,
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
}

fn default_text_pages() -> usize {
    8
}

fn default_image_pages() -> usize {
    4
}

fn default_render_dpi() -> u32 {
    200
}

impl Default for ExtractSection {
    fn default() -> Self {
        Self {
            text_pages: default_text_pages(),
            image_pages: default_image_pages(),
            render_dpi: default_render_dpi(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionBackend {
    Gemini,
    /// Any OpenAI-compatible `/chat/completions` server (OpenAI, Ollama, ...).
    Openai,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    #[serde(default = "default_backend")]
    pub backend: VisionBackend,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_fast")]
    pub model_fast: String,
    #[serde(default = "default_model_strong")]
    pub model_strong: String,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
    /// Never read from the file; filled from `GEMINI_API_KEY` / `LLM_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_backend() -> VisionBackend {
    VisionBackend::Gemini
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model_fast() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_model_strong() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_vision_timeout() -> u64 {
    60
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            model_fast: default_model_fast(),
            model_strong: default_model_strong(),
            timeout_secs: default_vision_timeout(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverSection {
    /// External automation program. Unset means checks always fail.
    pub program: Option<String>,
    /// Arguments; `{pin}` and `{out_dir}` are substituted.
    #[serde(default = "default_driver_args")]
    pub args: Vec<String>,
    #[serde(default = "default_driver_timeout")]
    pub timeout_secs: u64,
}

fn default_driver_args() -> Vec<String> {
    vec!["{pin}".to_string(), "{out_dir}".to_string()]
}

fn default_driver_timeout() -> u64 {
    180
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            program: None,
            args: default_driver_args(),
            timeout_secs: default_driver_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
}

fn default_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            data_root: default_data_root(),
        }
    }
}

impl Config {
    /// Load from TOML, then apply environment overrides.
    /// A missing file is not an error; defaults are used.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), "Loaded config file");
            Self::from_toml(&content)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.vision.api_key = api_key(|var| env::var(var).ok());

        if let Ok(model) = env::var("GEMINI_MODEL_FAST") {
            self.vision.model_fast = model;
        }
        if let Ok(model) = env::var("GEMINI_MODEL_STRONG") {
            self.vision.model_strong = model;
        }
        if let Some(n) = env_usize("NMC_PDF_TEXT_PAGES")? {
            self.extract.text_pages = n;
        }
        if let Some(n) = env_usize("NMC_PDF_IMAGE_PAGES")? {
            self.extract.image_pages = n;
        }
        Ok(())
    }
}

/// First non-blank of `GEMINI_API_KEY`, `LLM_API_KEY`.
fn api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["GEMINI_API_KEY", "LLM_API_KEY"]
        .into_iter()
        .filter_map(|var| lookup(var))
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
}

fn env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadEnv { var, value }),
        Err(_) => Ok(None),
    }
}
