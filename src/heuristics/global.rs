use super::char_window;
use crate::extraction::Tier;
use crate::pin::{self, Pin};
use once_cell::sync::Lazy;
use regex::Regex;

/// Strict PIN as a standalone word.
pub(super) static STRICT_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9]{2}[A-L][0-9]{4}[ESWNO]\b").unwrap());

/// Loose 8-char word: digit slots may hold letters OCR confuses with
/// digits, letter slots may hold anything alphanumeric.
///
/// This is wider than the plain `\d{2}[A-Z]\d{4}[A-Z]` shape, which leaves
/// repair nothing to fix. As a result an unlabelled noisy token such as
/// `O9BO112E` is accepted here (0.92 near "NMC", 0.88 otherwise) instead
/// of being rejected.
pub(super) static CANDIDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9OILSB]{2}[A-Z0-9][0-9OILSB]{4}[A-Z0-9]\b").unwrap());

const KEYWORD: &str = "NMC";
const KEYWORD_RADIUS: usize = 80;

/// Whole-text scan, used once no label led anywhere.
pub fn extract(upper: &str) -> Option<(Pin, Tier)> {
    if let Some(m) = STRICT_WORD_RE.find(upper) {
        if let Ok(pin) = Pin::parse(m.as_str()) {
            return Some((pin, Tier::GlobalStrict));
        }
    }

    let candidates: Vec<_> = CANDIDATE_RE.find_iter(upper).collect();

    // Prefer candidates with the keyword close by
    for cand in &candidates {
        let vicinity = char_window(upper, cand.start(), KEYWORD_RADIUS, KEYWORD_RADIUS);
        if vicinity.contains(KEYWORD) {
            if let Some(pin) = pin::clean_and_validate(cand.as_str()) {
                return Some((pin, Tier::GlobalNearKeyword));
            }
        }
    }

    candidates
        .iter()
        .find_map(|cand| pin::clean_and_validate(cand.as_str()))
        .map(|pin| (pin, Tier::GlobalLoose))
}
