// src/heuristics/mod.rs

mod anchored;
mod global;

use crate::extraction::Tier;
use crate::pin::Pin;

/// Extract a PIN from raw document text.
///
/// Label-anchored search runs first, then a scan of the whole text.
pub fn extract_from_text(text: &str) -> Option<(Pin, Tier)> {
    if text.trim().is_empty() {
        return None;
    }

    let upper = text.to_uppercase();
    anchored::extract(&upper).or_else(|| global::extract(&upper))
}

/// Slice of `text` spanning up to `before` chars before and `after` chars
/// from byte offset `at`. `at` must be a char boundary.
fn char_window(text: &str, at: usize, before: usize, after: usize) -> &str {
    let start = text[..at]
        .char_indices()
        .rev()
        .take(before)
        .last()
        .map_or(at, |(i, _)| i);
    let end = text[at..]
        .char_indices()
        .nth(after)
        .map_or(text.len(), |(i, _)| at + i);
    &text[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str) -> (String, f64) {
        let (pin, tier) = extract_from_text(text).expect("expected a PIN");
        (pin.to_string(), tier.confidence())
    }

    #[test]
    fn test_labelled_pin() {
        assert_eq!(
            hit("NMC PIN: 23B0365O additional text"),
            ("23B0365O".to_string(), 0.99)
        );
    }

    #[test]
    fn test_labelled_pin_with_ocr_noise() {
        let (pin, conf) = hit("Registration Number O9BO112E");
        assert_eq!(pin, "09B0112E");
        assert!(conf >= 0.96);
    }

    #[test]
    fn test_nothing_pin_shaped() {
        assert!(extract_from_text("Dear applicant, thank you for your letter.").is_none());
        assert!(extract_from_text("").is_none());
        assert!(extract_from_text("   \n\t").is_none());
    }

    #[test]
    fn test_direct_match_beats_repair() {
        // O9BO112E would repair to a valid PIN, but the strict match wins
        let (pin, conf) = hit("ref O9BO112E and later 23B0365O");
        assert_eq!(pin, "23B0365O");
        assert_eq!(conf, 0.95);
    }

    #[test]
    fn test_unlabelled_repair_near_keyword() {
        assert_eq!(
            hit("NMC record O9BO112E on file"),
            ("09B0112E".to_string(), 0.92)
        );
    }

    #[test]
    fn test_unlabelled_repair_without_keyword() {
        assert_eq!(
            hit("record O9BO112E on file"),
            ("09B0112E".to_string(), 0.88)
        );
    }

    #[test]
    fn test_anchor_beats_unlabelled_match() {
        let text = "Reference 16J0151E issued 2021.\n\
                    Your NMC PIN number is 23B0365O, keep it safe.";
        let (pin, conf) = hit(text);
        assert_eq!(pin, "23B0365O");
        assert!(conf >= 0.98);
    }

    #[test]
    fn test_label_is_case_insensitive() {
        let (pin, conf) = hit("personal identification number:\n09b0112e");
        assert_eq!(pin, "09B0112E");
        assert_eq!(conf, 0.99);
    }

    #[test]
    fn test_unlabelled_strict_match() {
        assert_eq!(hit("holder 16J0151E valid"), ("16J0151E".to_string(), 0.95));
    }

    #[test]
    fn test_char_window_multibyte() {
        let text = "ééé NMC ééé";
        let at = text.find("NMC").unwrap();
        assert_eq!(char_window(text, at, 2, 5), "é NMC é");
        assert_eq!(char_window(text, at, 100, 100), text);
        assert_eq!(char_window(text, 0, 5, 3), "ééé");
    }
}
