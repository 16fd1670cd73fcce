use super::global::{CANDIDATE_RE, STRICT_WORD_RE};
use crate::extraction::Tier;
use crate::pin::{self, Pin};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Labels that conventionally precede the PIN on forms and letters.
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(NMC\s*PIN|NMC\s*PIN\s*NUMBER|PIN\s*NUMBER|PIN\s*NO\.?|PIN\s*#|PIN\s*:|REGISTRATION\s*NUMBER|NMC\s*REGISTRATION\s*NUMBER|PERSONAL\s*IDENTIFICATION\s*NUMBER)",
    )
    .unwrap()
});

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z0-9]{7,12}").unwrap());

/// How far past a label we look for the value.
const WINDOW_CHARS: usize = 120;

const MAX_TOKENS: usize = 3;

/// Keyword-anchored search. `upper` is the uppercased document text.
pub fn extract(upper: &str) -> Option<(Pin, Tier)> {
    for label in ANCHOR_RE.find_iter(upper) {
        let window: String = upper[label.end()..].chars().take(WINDOW_CHARS).collect();

        if let Some(m) = STRICT_WORD_RE.find(&window) {
            if let Ok(pin) = Pin::parse(m.as_str()) {
                return Some((pin, Tier::AnchoredStrict));
            }
        }

        if let Some(m) = CANDIDATE_RE.find(&window) {
            if let Some(pin) = pin::clean_and_validate(m.as_str()) {
                return Some((pin, Tier::AnchoredLoose));
            }
        }

        for token in TOKEN_RE.find_iter(&window).take(MAX_TOKENS) {
            if let Some(pin) = pin::clean_and_validate(token.as_str()) {
                return Some((pin, Tier::AnchoredToken));
            }
        }

        debug!(label = label.as_str(), "Label found but no PIN followed it");
    }

    None
}
