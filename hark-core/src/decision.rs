//! Decision gate: argmax plus confidence threshold.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::inference::ClassProbabilities;

/// A classification accepted for publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Local>,
    /// Label of the winning class.
    #[serde(rename = "class")]
    pub label: String,
    pub class_index: usize,
    /// Winning probability rounded to two decimals.
    pub confidence: f64,
}

/// Accept or reject the most likely class, stamped with the current local time.
///
/// Returns `None` when `threshold` is set and the top probability is below
/// it, or when the top probability is not a number. `labels` shorter than the probability vector yields a placeholder
/// label rather than a panic; the engine rejects that configuration up front.
pub fn decide(
    probabilities: &ClassProbabilities,
    threshold: Option<f32>,
    labels: &[String],
) -> Option<Decision> {
    decide_at(probabilities, threshold, labels, Local::now())
}

pub fn decide_at(
    probabilities: &ClassProbabilities,
    threshold: Option<f32>,
    labels: &[String],
    timestamp: DateTime<Local>,
) -> Option<Decision> {
    let (class_index, p) = probabilities.argmax()?;
    if !p.is_finite() {
        return None;
    }
    if threshold.is_some_and(|t| p < t) {
        return None;
    }
    let label = labels
        .get(class_index)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_index}"));
    Some(Decision {
        timestamp,
        label,
        class_index,
        confidence: round_confidence(p),
    })
}

/// Round to two decimals, half away from zero.
pub fn round_confidence(p: f32) -> f64 {
    (p as f64 * 100.0).round() / 100.0
}

mod timestamp_format {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        let naive = NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(de::Error::custom)?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| de::Error::custom(format!("nonexistent local time: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 4, 9, 30, 5).unwrap()
    }

    #[test]
    fn confident_class_is_accepted() {
        let probs = ClassProbabilities::from_probabilities(vec![0.1, 0.85, 0.05]);
        let decision = decide_at(&probs, Some(0.8), &labels(&["Bark", "Crash", "Door"]), at())
            .expect("accepted");
        assert_eq!(decision.class_index, 1);
        assert_eq!(decision.label, "Crash");
        assert_eq!(decision.confidence, 0.85);
    }

    #[test]
    fn tie_below_threshold_is_rejected() {
        let probs = ClassProbabilities::from_probabilities(vec![0.5, 0.5]);
        assert!(decide_at(&probs, Some(0.6), &labels(&["a", "b"]), at()).is_none());
    }

    #[test]
    fn threshold_is_inclusive() {
        let probs = ClassProbabilities::from_probabilities(vec![0.2, 0.8]);
        assert!(decide_at(&probs, Some(0.8), &labels(&["a", "b"]), at()).is_some());
    }

    #[test]
    fn no_threshold_always_publishes() {
        let probs = ClassProbabilities::from_probabilities(vec![0.34, 0.33, 0.33]);
        let decision = decide_at(&probs, None, &labels(&["a", "b", "c"]), at()).expect("published");
        assert_eq!(decision.class_index, 0);
    }

    #[test]
    fn nan_probabilities_never_pass_the_gate() {
        let probs = ClassProbabilities::from_probabilities(vec![f32::NAN, f32::NAN]);
        assert!(decide_at(&probs, Some(0.8), &labels(&["a", "b"]), at()).is_none());
        assert!(decide_at(&probs, None, &labels(&["a", "b"]), at()).is_none());
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        assert_eq!(round_confidence(0.8234), 0.82);
        assert_eq!(round_confidence(0.996), 1.0);
        let probs = ClassProbabilities::from_probabilities(vec![0.8234, 0.1766]);
        let decision = decide_at(&probs, Some(0.8), &labels(&["a", "b"]), at()).unwrap();
        assert_eq!(decision.confidence, 0.82);
    }

    #[test]
    fn serialises_with_published_keys() {
        let decision = Decision {
            timestamp: at(),
            label: "Doorbell".into(),
            class_index: 3,
            confidence: 0.91,
        };
        let json = serde_json::to_value(&decision).expect("serialize decision");
        assert_eq!(json["timestamp"], "07/04/2024, 09:30:05");
        assert_eq!(json["class"], "Doorbell");
        assert_eq!(json["classIndex"], 3);
        assert_eq!(json["confidence"], 0.91);

        let back: Decision = serde_json::from_value(json).expect("deserialize decision");
        assert_eq!(back, decision);
    }
}
