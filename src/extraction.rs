// src/extraction.rs

use crate::pin::Pin;
use serde::Serialize;

/// The strategy that produced a PIN. Each carries a fixed confidence:
/// a label right before the value is the strongest evidence, a nearby
/// "NMC" keyword is next, a bare structural match is weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Strict match in the window after a label.
    AnchoredStrict,
    /// Loose match in the label window, repaired.
    AnchoredLoose,
    /// Token-shaped substring in the label window, repaired.
    AnchoredToken,
    /// Strict match anywhere in the text.
    GlobalStrict,
    /// Loose match with "NMC" nearby, repaired.
    GlobalNearKeyword,
    /// Any loose match, repaired.
    GlobalLoose,
    /// Vision model, fast tier.
    VisionFast,
    /// Vision model, strong tier.
    VisionStrong,
}

impl Tier {
    pub fn confidence(self) -> f64 {
        match self {
            Tier::AnchoredStrict => 0.99,
            Tier::AnchoredLoose => 0.98,
            Tier::AnchoredToken => 0.96,
            Tier::GlobalStrict => 0.95,
            Tier::GlobalNearKeyword => 0.92,
            Tier::GlobalLoose => 0.88,
            Tier::VisionFast => 0.90,
            Tier::VisionStrong => 0.93,
        }
    }
}

/// Per-field confidence, keyed by field name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Confidence {
    pub nmc_pin: f64,
}

/// Result of one extraction call.
///
/// Serializes as `{ ok, nmc_pin, confidence: { nmc_pin } }`. Failure is a
/// normal value here, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinExtraction {
    pub ok: bool,
    pub nmc_pin: Option<Pin>,
    pub confidence: Confidence,
    #[serde(skip)]
    pub tier: Option<Tier>,
}

impl PinExtraction {
    pub fn found(pin: Pin, tier: Tier) -> Self {
        Self {
            ok: true,
            nmc_pin: Some(pin),
            confidence: Confidence {
                nmc_pin: tier.confidence(),
            },
            tier: Some(tier),
        }
    }

    pub fn not_found() -> Self {
        Self {
            ok: false,
            nmc_pin: None,
            confidence: Confidence { nmc_pin: 0.0 },
            tier: None,
        }
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.nmc_pin.as_ref()
    }
}

impl From<Option<(Pin, Tier)>> for PinExtraction {
    fn from(hit: Option<(Pin, Tier)>) -> Self {
        match hit {
            Some((pin, tier)) => Self::found(pin, tier),
            None => Self::not_found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_shape() {
        let r = PinExtraction::not_found();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "ok": false, "nmc_pin": null, "confidence": { "nmc_pin": 0.0 } })
        );
    }

    #[test]
    fn test_found_shape() {
        let pin = Pin::parse("23B0365O").unwrap();
        let r = PinExtraction::found(pin, Tier::AnchoredStrict);
        assert!(r.ok);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["nmc_pin"], "23B0365O");
        assert_eq!(json["confidence"]["nmc_pin"], 0.99);
        assert!(json.get("tier").is_none());
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Tier::AnchoredStrict.confidence() > Tier::AnchoredLoose.confidence());
        assert!(Tier::AnchoredToken.confidence() > Tier::GlobalStrict.confidence());
        assert!(Tier::GlobalNearKeyword.confidence() > Tier::GlobalLoose.confidence());
        assert!(Tier::VisionStrong.confidence() > Tier::VisionFast.confidence());
    }
}
