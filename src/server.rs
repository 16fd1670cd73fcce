// src/server.rs

use crate::driver::RegisterCheck;
use crate::extractor::Extractor;
use crate::pin::{self, Pin};
use crate::report;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

const EXTRACTION_FAILED: &str = "Unable to extract NMC PIN from the uploaded document.";
const REPORT_TITLE: &str = "NMC check failed";
const UPLOAD_LIMIT: usize = 50 * 1024 * 1024;

/// Shared state for all handlers.
pub struct AppState {
    pub extractor: Extractor,
    pub driver: Box<dyn RegisterCheck>,
    /// Each run gets a fresh `nmc_<hex>` directory under here.
    pub data_root: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract))
        .route("/run-pin", post(run_pin))
        .route("/run", post(run))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(state)).await
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn extract(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let upload = match save_upload(multipart).await {
        Ok(u) => u,
        Err(msg) => {
            warn!(error = %msg, "Bad upload");
            let body = json!({ "ok": false, "error": msg });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let result = state.extractor.extract_pin(upload.path()).await;
    let body = match result.pin() {
        Some(pin) => json!({ "ok": true, "nmc_pin": pin, "raw": result }),
        None => json!({ "ok": false, "error": EXTRACTION_FAILED }),
    };
    Json(body).into_response()
}

#[derive(Debug, Deserialize)]
struct RunPinRequest {
    #[serde(default)]
    nmc_pin: Option<String>,
}

async fn run_pin(State(state): State<Arc<AppState>>, Json(req): Json<RunPinRequest>) -> Response {
    let job = match JobDir::create(&state.data_root).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    match manual_pin(req.nmc_pin.as_deref()) {
        Ok(pin) => run_check(&state, &job, &pin).await,
        Err(lines) => job.error_pdf("NMC-Error-Missing-PIN.pdf", &lines),
    }
}

async fn run(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let job = match JobDir::create(&state.data_root).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    let upload = match save_upload(multipart).await {
        Ok(u) => u,
        Err(msg) => {
            warn!(error = %msg, "Bad upload");
            return job.error_pdf("NMC-Error-Extraction.pdf", &[msg]);
        }
    };

    let result = state.extractor.extract_pin(upload.path()).await;
    match result.pin() {
        Some(pin) => run_check(&state, &job, pin).await,
        None => job.error_pdf("NMC-Error-Extraction.pdf", &[EXTRACTION_FAILED.to_string()]),
    }
}

async fn run_check(state: &AppState, job: &JobDir, pin: &Pin) -> Response {
    let outcome = state.driver.check(pin, &job.0).await;

    if let Some(pdf) = &outcome.pdf_path {
        match tokio::fs::read(pdf).await {
            Ok(bytes) => {
                let name = pdf
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("NMC-{pin}.pdf"));
                return pdf_response(&name, bytes);
            }
            Err(e) => error!(path = %pdf.display(), error = %e, "Driver PDF unreadable"),
        }
    }

    let mut lines = vec![format!("NMC PIN: {pin}")];
    lines.push(
        outcome
            .message
            .unwrap_or_else(|| "The register check did not produce a PDF.".to_string()),
    );
    job.error_pdf("NMC-Error-Internal.pdf", &lines)
}

/// Normalize and validate a PIN typed in by a user. `Err` carries the
/// lines for the missing-PIN report.
fn manual_pin(raw: Option<&str>) -> Result<Pin, Vec<String>> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if pin::normalize(raw).is_empty() {
        return Err(vec!["No NMC PIN was provided.".to_string()]);
    }
    Pin::parse(raw).map_err(|_| {
        vec![
            "No valid NMC PIN was provided.".to_string(),
            format!("{raw:?} does not look like an NMC PIN (expected e.g. 23B0365O)."),
        ]
    })
}

struct JobDir(PathBuf);

impl JobDir {
    async fn create(data_root: &Path) -> Result<Self, Response> {
        let dir = data_root.join(format!("nmc_{}", uuid::Uuid::new_v4().simple()));
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => Ok(Self(dir)),
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Cannot create job directory");
                Err((StatusCode::INTERNAL_SERVER_ERROR, "cannot create job directory")
                    .into_response())
            }
        }
    }

    fn error_pdf(&self, file_name: &str, lines: &[String]) -> Response {
        let path = self.0.join(file_name);
        let written = report::write_error_pdf(&path, REPORT_TITLE, lines)
            .map_err(|e| e.to_string())
            .and_then(|()| std::fs::read(&path).map_err(|e| e.to_string()));
        match written {
            Ok(bytes) => pdf_response(file_name, bytes),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write error report");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to write report").into_response()
            }
        }
    }
}

fn pdf_response(file_name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Store the multipart `file` field in a temp file that keeps the upload's
/// extension, since routing is by extension. Removed on drop.
async fn save_upload(mut multipart: Multipart) -> Result<NamedTempFile, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Failed to read form field: {e}"))?
    {
        if field.name() != Some("file") {
            let _ = field.bytes().await;
            continue;
        }

        let suffix = upload_suffix(field.file_name().unwrap_or_default());
        let data = field
            .bytes()
            .await
            .map_err(|e| format!("Failed to read file data: {e}"))?;

        let mut tmp = tempfile::Builder::new()
            .prefix("nmc_upload_")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| format!("Failed to store upload: {e}"))?;
        tmp.write_all(&data)
            .and_then(|()| tmp.flush())
            .map_err(|e| format!("Failed to store upload: {e}"))?;

        info!(bytes = data.len(), suffix = %suffix, "Upload received");
        return Ok(tmp);
    }

    Err("No file uploaded".to_string())
}

fn upload_suffix(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}
