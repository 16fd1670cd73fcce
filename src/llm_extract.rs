// src/llm_extract.rs

use crate::config::{VisionBackend, VisionSection};
use crate::extraction::Tier;
use crate::pdf_extract::PageImage;
use crate::pin::{self, Pin};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Instruction sent with every image batch.
pub const VISION_PROMPT: &str = "Extract the NMC PIN from the document image (it may be on an application form). \
Look for labels like 'NMC PIN', 'PIN number', or 'Registration number'. \
Return ONLY the PIN value, nothing else.
Valid format:
- 2 digits (year)
- 1 letter A to L (month code)
- 4 digits
- 1 letter (country code: E, S, W, N, or O)
Example: 12A3456S";

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty response from vision model")]
    EmptyResponse,
    #[error("vision call timed out after {0:?}")]
    Timeout(Duration),
}

/// A model that reads images and answers in free text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, VisionError>;
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    Image { inline_data: GeminiBlob<'a> },
}

#[derive(Serialize)]
struct GeminiBlob<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

/// Google Generative Language API (`generateContent`).
pub struct GeminiVision {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiVision {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl VisionModel for GeminiVision {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, VisionError> {
        let mut parts = vec![GeminiPart::Text { text: prompt }];
        parts.extend(images.iter().map(|img| GeminiPart::Image {
            inline_data: GeminiBlob {
                mime_type: img.mime,
                data: BASE64.encode(&img.bytes),
            },
        }));
        let request = GeminiRequest {
            contents: vec![GeminiContent { role: "user", parts }],
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(model)
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api { status, body });
        }

        let body: GeminiResponse = response.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        non_empty(text)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions (OpenAI, Ollama, vLLM, ...)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ChatPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct OpenAiVision {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiVision {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, VisionError> {
        let mut content = vec![ChatPart::Text { text: prompt }];
        content.extend(images.iter().map(|img| ChatPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", img.mime, BASE64.encode(&img.bytes)),
            },
        }));
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api { status, body });
        }

        let chat: ChatResponse = response.json().await?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        non_empty(text)
    }
}

fn non_empty(text: String) -> Result<String, VisionError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        Err(VisionError::EmptyResponse)
    } else {
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tiered fallback
// ---------------------------------------------------------------------------

/// Fast-then-strong vision fallback over one client.
pub struct VisionTiers {
    client: Box<dyn VisionModel>,
    fast_model: String,
    strong_model: String,
    timeout: Duration,
}

impl VisionTiers {
    pub fn new(
        client: Box<dyn VisionModel>,
        fast_model: impl Into<String>,
        strong_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            fast_model: fast_model.into(),
            strong_model: strong_model.into(),
            timeout,
        }
    }

    /// Build from config. `None` when no backend is usable, in which case
    /// the vision tier is skipped entirely.
    pub fn from_config(section: &VisionSection) -> Option<Self> {
        let client: Box<dyn VisionModel> = match section.backend {
            VisionBackend::None => {
                info!("Vision backend disabled");
                return None;
            }
            VisionBackend::Gemini => {
                let Some(key) = section.api_key.clone() else {
                    info!("GEMINI_API_KEY not set; vision fallback disabled");
                    return None;
                };
                info!(url = %section.base_url, "Using Gemini vision backend");
                Box::new(GeminiVision::new(section.base_url.clone(), key))
            }
            VisionBackend::Openai => {
                info!(url = %section.base_url, "Using OpenAI-compatible vision backend");
                Box::new(OpenAiVision::new(
                    section.base_url.clone(),
                    section.api_key.clone(),
                ))
            }
        };

        Some(Self::new(
            client,
            section.model_fast.clone(),
            section.model_strong.clone(),
            Duration::from_secs(section.timeout_secs),
        ))
    }

    /// Ask each tier in turn; the reply is validated like any other
    /// candidate. Failures of any kind mean "found nothing" for that tier.
    pub async fn extract(&self, images: &[PageImage]) -> Option<(Pin, Tier)> {
        if images.is_empty() {
            return None;
        }

        let tiers = [
            (self.fast_model.as_str(), Tier::VisionFast),
            (self.strong_model.as_str(), Tier::VisionStrong),
        ];

        for (model, tier) in tiers {
            let call = self.client.describe(model, VISION_PROMPT, images);
            let reply = match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(model, error = %e, "Vision call failed");
                    continue;
                }
                Err(_) => {
                    warn!(model, error = %VisionError::Timeout(self.timeout), "Vision call failed");
                    continue;
                }
            };

            match pin::clean_and_validate(&reply) {
                Some(pin) => {
                    info!(model, pin = %pin, "Vision model returned a valid PIN");
                    return Some((pin, tier));
                }
                None => warn!(model, reply = %reply, "Vision reply is not a valid PIN"),
            }
        }

        None
    }
}
