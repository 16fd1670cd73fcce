// src/pin.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Official NMC PIN layout: `YY M #### C`.
///
/// - `YY`: 2 digits (year)
/// - `M`: month code `A`–`L`
/// - `####`: 4 digits
/// - `C`: region code, one of `E S W N O`
///
/// Examples seen in real documents: `23B0365O`, `09B0112E`, `16J0151E`.
pub(crate) static STRICT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}[A-L]\d{4}[ESWNO]").unwrap());

/// Same shape as [`STRICT_RE`] but any letter in the letter slots.
pub(crate) static LOOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}[A-Z]\d{4}[A-Z]").unwrap());

static FULL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}[A-L]\d{4}[ESWNO]$").unwrap());

pub const PIN_LEN: usize = 8;

/// Only the first few window starts are tried; the PIN usually leads the token.
const WINDOW_SCAN_LIMIT: usize = 16;

const DIGIT_POSITIONS: [usize; 6] = [0, 1, 3, 4, 5, 6];
const LETTER_POSITIONS: [usize; 2] = [2, 7];

/// Letters OCR commonly reads where a digit was printed.
fn digit_fix(c: char) -> char {
    match c {
        'O' => '0',
        'I' | 'L' => '1',
        'S' => '5',
        'B' => '8',
        other => other,
    }
}

/// Digits OCR commonly reads where a letter was printed.
fn letter_fix(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '5' => 'S',
        '8' => 'B',
        other => other,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a valid NMC PIN: {0:?}")]
pub struct InvalidPin(pub String);

/// A structurally valid NMC PIN. Only constructible through validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pin(String);

impl Pin {
    /// Normalize `raw` and accept it only if it is exactly a valid PIN.
    /// No OCR repair is attempted; see [`clean_and_validate`] for that.
    pub fn parse(raw: &str) -> Result<Self, InvalidPin> {
        let s = normalize(raw);
        if is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(InvalidPin(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Pin {
    type Err = InvalidPin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pin {
    type Error = InvalidPin;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.0
    }
}

impl AsRef<str> for Pin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uppercase and drop everything outside `[A-Z0-9]`.
pub fn normalize(token: &str) -> String {
    token
        .chars()
        .flat_map(char::to_uppercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Exact structural check. Callers normalize first.
pub fn is_valid(pin: &str) -> bool {
    FULL_RE.is_match(pin)
}

/// Apply positional OCR corrections to an 8-character window.
///
/// Digit slots get letter→digit fixes, letter slots get digit→letter fixes.
/// Anything that isn't exactly 8 characters is returned as-is.
pub fn repair(token8: &str) -> String {
    let mut chars: Vec<char> = token8.chars().collect();
    if chars.len() != PIN_LEN {
        return token8.to_string();
    }
    for i in DIGIT_POSITIONS {
        chars[i] = digit_fix(chars[i]);
    }
    for i in LETTER_POSITIONS {
        chars[i] = letter_fix(chars[i]);
    }
    chars.into_iter().collect()
}

/// Turn an arbitrary candidate string into a valid PIN, if possible.
///
/// Tries, in order: a direct strict match anywhere in the normalized
/// string, positional repair over the leading 8-char windows, and repair
/// of the first loose-shaped run. A repaired value is always re-validated.
pub fn clean_and_validate(raw: &str) -> Option<Pin> {
    let s = normalize(raw);
    if s.is_empty() {
        return None;
    }

    if let Some(m) = STRICT_RE.find(&s) {
        return Some(Pin(m.as_str().to_string()));
    }

    // normalized text is pure ASCII, byte slicing is safe
    if s.len() >= PIN_LEN {
        let starts = (s.len() - PIN_LEN + 1).min(WINDOW_SCAN_LIMIT);
        for start in 0..starts {
            let fixed = repair(&s[start..start + PIN_LEN]);
            if is_valid(&fixed) {
                return Some(Pin(fixed));
            }
        }
    }

    if let Some(m) = LOOSE_RE.find(&s) {
        let fixed = repair(m.as_str());
        if is_valid(&fixed) {
            return Some(Pin(fixed));
        }
    }

    debug!(candidate = %s, "Candidate rejected after repair");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["23b0365o", " 23-B0365 O ", "nmc pin: 09b0112e", "", "!!"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_normalize_canonical_form() {
        assert_eq!(normalize("23b-0365.o"), "23B0365O");
        assert_eq!(normalize(" 16 j 0151 e "), "16J0151E");
    }

    #[test]
    fn test_valid_pins() {
        for pin in ["23B0365O", "09B0112E", "16J0151E", "00A0000S", "99L9999W", "12C3456N"] {
            assert!(is_valid(pin), "{pin} should be valid");
        }
    }

    #[test]
    fn test_invalid_lengths() {
        for s in ["", "23B0365", "23B0365OO", "123B0365O"] {
            assert!(!is_valid(s), "{s:?} should be invalid");
        }
    }

    #[test]
    fn test_invalid_positions_and_codes() {
        // month letter outside A-L
        assert!(!is_valid("23M0365O"));
        assert!(!is_valid("23Z0365O"));
        // region letter outside ESWNO
        assert!(!is_valid("23B0365A"));
        assert!(!is_valid("23B0365X"));
        // letter in a digit slot
        assert!(!is_valid("2XB0365O"));
        assert!(!is_valid("23B03X5O"));
        // digit in a letter slot
        assert!(!is_valid("2320365O"));
        assert!(!is_valid("23B03650"));
        // lowercase is not normalized by the validator
        assert!(!is_valid("23b0365o"));
    }

    #[test]
    fn test_repair_single_substitutions() {
        assert_eq!(repair("O9B0112E"), "09B0112E");
        assert_eq!(repair("23B0I65O"), "23B0165O");
        assert_eq!(repair("16J01S1E"), "16J0151E");
        assert_eq!(repair("2380365O"), "23B0365O");
        assert_eq!(repair("23B03650"), "23B0365O");
        assert_eq!(repair("16J0151L"), "16J0151L");
    }

    #[test]
    fn test_repair_ignores_wrong_length() {
        assert_eq!(repair("O9B"), "O9B");
        assert_eq!(repair("O9BO112EXX"), "O9BO112EXX");
    }

    #[test]
    fn test_clean_and_validate_direct() {
        let pin = clean_and_validate("pin is 23b0365o").unwrap();
        assert_eq!(pin.as_str(), "23B0365O");
    }

    #[test]
    fn test_clean_and_validate_repairs_window() {
        let pin = clean_and_validate("O9BO112E").unwrap();
        assert_eq!(pin.as_str(), "09B0112E");
    }

    #[test]
    fn test_clean_and_validate_discards_unrepairable() {
        // month slot 'Z' has no repair, region 'X' has no repair
        assert!(clean_and_validate("23Z0365X").is_none());
        assert!(clean_and_validate("hello world").is_none());
        assert!(clean_and_validate("").is_none());
    }

    #[test]
    fn test_window_scan_is_bounded() {
        // a repairable token beyond the first 16 window starts is not found
        let noise = "X".repeat(20);
        let raw = format!("{noise}O9BO112E");
        assert!(clean_and_validate(&raw).is_none());
    }

    #[test]
    fn test_pin_parse_and_serde() {
        let pin: Pin = "16j-0151e".parse().unwrap();
        assert_eq!(pin.to_string(), "16J0151E");
        assert!(Pin::parse("O9BO112E").is_err());

        let json = serde_json::to_string(&pin).unwrap();
        assert_eq!(json, "\"16J0151E\"");
        let back: Pin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pin);
        assert!(serde_json::from_str::<Pin>("\"nope\"").is_err());
    }
}
