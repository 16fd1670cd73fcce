// src/report.rs

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build report PDF: {0}")]
    Pdf(String),
}

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 72;
const TITLE_SIZE: i64 = 16;
const BODY_SIZE: i64 = 11;
const TITLE_GAP: i64 = 28;
const LEADING: i64 = 16;
const WRAP_CHARS: usize = 95;

/// Write a plain one-or-more page PDF with a bold title and wrapped lines.
pub fn write_error_pdf(out_path: &Path, title: &str, lines: &[String]) -> Result<(), ReportError> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut pages: Vec<Vec<Operation>> = Vec::new();
    let mut ops = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    draw_text(&mut ops, "F2", TITLE_SIZE, y, title);
    y -= TITLE_GAP;

    for line in lines {
        for wrapped in wrap(line, WRAP_CHARS) {
            draw_text(&mut ops, "F1", BODY_SIZE, y, &wrapped);
            y -= LEADING;
            if y < MARGIN {
                pages.push(std::mem::take(&mut ops));
                y = PAGE_HEIGHT - MARGIN;
            }
        }
    }
    if !ops.is_empty() || pages.is_empty() {
        pages.push(ops);
    }

    let mut doc = build_document(pages)?;
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| ReportError::Pdf(e.to_string()))?;
    fs::write(out_path, buf)?;

    info!(path = %out_path.display(), title, "Wrote report PDF");
    Ok(())
}

fn draw_text(ops: &mut Vec<Operation>, font: &str, size: i64, y: i64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), Object::Integer(size)]));
    ops.push(Operation::new(
        "Td",
        vec![Object::Integer(MARGIN), Object::Integer(y)],
    ));
    ops.push(Operation::new("Tj", vec![Object::string_literal(latin(text))]));
    ops.push(Operation::new("ET", vec![]));
}

/// Standard fonts only cover WinAnsi; anything else becomes '?'.
fn latin(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn build_document(pages: Vec<Vec<Operation>>) -> Result<Document, ReportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let body_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let title_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => body_font,
            "F2" => title_font,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .map_err(|e| ReportError::Pdf(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// Greedy word wrap. Text within `max_chars` comes back as a single line.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if cur.is_empty() {
            cur.push_str(word);
        } else if cur.chars().count() + 1 + word.chars().count() <= max_chars {
            cur.push(' ');
            cur.push_str(word);
        } else {
            out.push(std::mem::take(&mut cur));
            cur.push_str(word);
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_short_line_untouched() {
        assert_eq!(wrap("  keep   spacing ", 95), vec!["  keep   spacing "]);
        assert_eq!(wrap("", 10), vec![""]);
    }

    #[test]
    fn test_wrap_long_line() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 15);
        assert_eq!(lines, vec!["the quick brown", "fox jumps over", "the lazy dog"]);
        assert!(lines.iter().all(|l| l.len() <= 15));
    }

    #[test]
    fn test_wrap_overlong_word_kept_whole() {
        let lines = wrap("a supercalifragilistic b", 10);
        assert_eq!(lines, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn test_latin_replaces_non_ascii() {
        assert_eq!(latin("PIN – 23B0365O"), "PIN ? 23B0365O");
    }

    #[test]
    fn test_writes_loadable_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("NMC-Error-Extraction.pdf");
        write_error_pdf(
            &out,
            "NMC check failed",
            &["Unable to extract NMC PIN from the uploaded document.".to_string()],
        )
        .unwrap();

        let bytes = fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_long_report_spans_pages() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("long.pdf");
        let lines: Vec<String> = (0..100).map(|i| format!("step {i}")).collect();
        write_error_pdf(&out, "Trace", &lines).unwrap();

        let doc = Document::load_mem(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }
}
