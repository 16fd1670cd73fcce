// src/pdf_extract.rs

use lopdf::{Dictionary, Document};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("pdftoppm failed: {0}")]
    Render(String),
}

/// How an input file is routed through extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(&'static str),
    Text,
}

impl DocumentKind {
    /// Classify by extension (case-insensitive).
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => DocumentKind::Pdf,
            Some(ext) => image_mime(ext).map_or(DocumentKind::Text, DocumentKind::Image),
            None => DocumentKind::Text,
        }
    }
}

fn image_mime(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// An in-memory raster image handed to the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Result of opening a PDF for text extraction.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF has a text layer worth reading.
    Text(Document),
    /// Mostly image-only pages. Text pages may still be mixed in, so the
    /// document is kept for a text pass.
    ScannedImage(Document),
    /// The bytes are not a readable PDF.
    Error(IngestError),
}

/// Parse PDF bytes and decide whether the text layer is worth reading.
pub fn open_pdf(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(e.into()),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage(doc);
    }

    PdfContent::Text(doc)
}

/// Heuristic: inspect the PDF object tree for signs that every page
/// is just a single image with no text operators.
///
/// We look at each page's `Resources` dictionary. If a page has
/// XObject images but **no** Font resources, it's almost certainly
/// a scanned page.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_dict) = doc.get_dictionary(*object_id) else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let has_images = non_empty_entry(doc, resources, b"XObject");
        let has_fonts = non_empty_entry(doc, resources, b"Font");

        if has_images && !has_fonts {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= 0.8
}

fn non_empty_entry(doc: &Document, resources: Option<&Dictionary>, key: &[u8]) -> bool {
    resources
        .and_then(|res| res.get(key).ok())
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|d| !d.is_empty())
}

/// Lazily extract text page by page, at most `max_pages` pages.
///
/// A page that fails to decode yields an empty string so callers can
/// keep going.
pub fn page_texts(doc: &Document, max_pages: usize) -> impl Iterator<Item = String> + '_ {
    doc.get_pages()
        .into_keys()
        .take(max_pages)
        .map(move |page_no| match doc.extract_text(&[page_no]) {
            Ok(text) => text,
            Err(e) => {
                debug!(page = page_no, error = %e, "Page text extraction failed");
                String::new()
            }
        })
}

/// Whole-document text via `pdf-extract`.
///
/// `pdf-extract` can panic on odd fonts, so the call is isolated.
pub fn combined_text(pdf_bytes: &[u8]) -> Option<String> {
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(pdf_bytes));
    match result {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed");
            None
        }
        Err(_) => {
            warn!("pdf-extract panicked");
            None
        }
    }
}

/// Rasterize the first `max_pages` pages to PNG with `pdftoppm`.
///
/// Images are read into memory; the scratch directory is removed before
/// returning.
pub async fn render_pages(
    path: &Path,
    max_pages: usize,
    dpi: u32,
) -> Result<Vec<PageImage>, IngestError> {
    let scratch = tempfile::Builder::new()
        .prefix("nmc_render_")
        .tempdir()
        .map_err(|source| IngestError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
    let prefix = scratch.path().join("page");

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg("1")
        .arg("-l")
        .arg(max_pages.to_string())
        .arg(path)
        .arg(&prefix)
        .output()
        .await
        .map_err(|e| IngestError::Render(e.to_string()))?;

    if !output.status.success() {
        return Err(IngestError::Render(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    // pdftoppm names pages page-1.png / page-01.png depending on page count
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(scratch.path())
        .await
        .map_err(|source| IngestError::Io {
            path: scratch.path().to_path_buf(),
            source,
        })?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file = entry.path();
        if let Some(num) = rendered_page_number(&file) {
            files.push((num, file));
        }
    }
    files.sort_by_key(|(num, _)| *num);

    let mut images = Vec::with_capacity(files.len());
    for (_, file) in files.into_iter().take(max_pages) {
        let read = tokio::fs::read(&file).await;
        let bytes = read.map_err(|source| IngestError::Io { path: file, source })?;
        images.push(PageImage {
            bytes,
            mime: "image/png",
        });
    }

    info!(pages = images.len(), dpi, "Rendered PDF pages");
    Ok(images)
}

fn rendered_page_number(file: &Path) -> Option<usize> {
    if file.extension().and_then(|e| e.to_str()) != Some("png") {
        return None;
    }
    let stem = file.file_stem()?.to_str()?;
    let (_, num) = stem.rsplit_once('-')?;
    num.parse().ok()
}

/// Read an image file as-is. `None` for unknown extensions or I/O errors.
pub async fn load_image(path: &Path) -> Option<PageImage> {
    let DocumentKind::Image(mime) = DocumentKind::detect(path) else {
        return None;
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(PageImage { bytes, mime }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read image");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{self, FixturePage};
    use super::*;
    use crate::report;

    #[test]
    fn test_mostly_scanned_pdf_keeps_text_pages() {
        let bytes = fixtures::build(&[
            FixturePage::Text(&["NMC PIN: 23B0365O"]),
            FixturePage::Image,
            FixturePage::Image,
            FixturePage::Image,
            FixturePage::Image,
        ]);
        let PdfContent::ScannedImage(doc) = open_pdf(&bytes) else {
            panic!("expected the scanned classification");
        };
        let pages: Vec<String> = page_texts(&doc, 8).collect();
        assert_eq!(pages.len(), 5);
        assert!(pages[0].contains("23B0365O"), "page text: {:?}", pages[0]);
        assert!(pages[1].trim().is_empty());
    }

    #[test]
    fn test_garbage_bytes() {
        let result = open_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(DocumentKind::detect(Path::new("a/form.PDF")), DocumentKind::Pdf);
        assert_eq!(
            DocumentKind::detect(Path::new("scan.JPEG")),
            DocumentKind::Image("image/jpeg")
        );
        assert_eq!(
            DocumentKind::detect(Path::new("scan.webp")),
            DocumentKind::Image("image/webp")
        );
        assert_eq!(DocumentKind::detect(Path::new("notes.txt")), DocumentKind::Text);
        assert_eq!(DocumentKind::detect(Path::new("README")), DocumentKind::Text);
        assert_eq!(DocumentKind::detect(Path::new("scan.gif")), DocumentKind::Text);
    }

    #[test]
    fn test_rendered_page_number() {
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page-1.png")), Some(1));
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page-07.png")), Some(7));
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page-1.ppm")), None);
        assert_eq!(rendered_page_number(Path::new("/tmp/x/page.png")), None);
    }

    #[test]
    fn test_text_pdf_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.pdf");
        report::write_error_pdf(&path, "Registration", &["NMC PIN: 23B0365O".to_string()])
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let PdfContent::Text(doc) = open_pdf(&bytes) else {
            panic!("expected a text PDF");
        };
        let pages: Vec<String> = page_texts(&doc, 8).collect();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("23B0365O"), "page text: {:?}", pages[0]);
    }

    #[test]
    fn test_page_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.pdf");
        let lines: Vec<String> = (0..120).map(|i| format!("line {i}")).collect();
        report::write_error_pdf(&path, "Long", &lines).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let PdfContent::Text(doc) = open_pdf(&bytes) else {
            panic!("expected a text PDF");
        };
        assert!(doc.get_pages().len() > 1);
        assert_eq!(page_texts(&doc, 1).count(), 1);
    }

    #[tokio::test]
    async fn test_load_image() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("scan.png");
        std::fs::write(&png, b"\x89PNG fake").unwrap();
        let img = load_image(&png).await.unwrap();
        assert_eq!(img.mime, "image/png");
        assert_eq!(img.bytes, b"\x89PNG fake");

        let txt = dir.path().join("scan.txt");
        std::fs::write(&txt, b"hello").unwrap();
        assert!(load_image(&txt).await.is_none());
        assert!(load_image(&dir.path().join("missing.png")).await.is_none());
    }
}
