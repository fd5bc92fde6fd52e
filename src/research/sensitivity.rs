//! Sensitivity classification
//!
//! Public sources carry only sparse, oblique evidence on classified
//! programs; a run that keeps the normal acceptance bar for such a
//! question comes back empty. Questions matching the marker vocabulary
//! run with the threshold floored instead.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Threshold applied to sensitive runs
pub const SENSITIVE_THRESHOLD: u8 = 1;

/// Marker vocabulary. Multi-word markers match as substrings; short
/// acronyms match on word boundaries only, so "sap" never fires inside
/// "sapphire".
const PHRASE_MARKERS: &[&str] = &[
    "classified",
    "special access program",
    "special access required",
    "black program",
    "black budget",
    "covert",
    "clandestine",
    "code word",
    "codeword",
    "compartmented",
    "waived program",
    "unacknowledged",
    "special technical operations",
];

const ACRONYM_MARKERS: &[&str] = &["sap", "sar", "sci", "ts/sci", "noforn", "orcon"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityReport {
    pub sensitive: bool,
    pub matched_markers: Vec<String>,
}

/// Scan a question for sensitivity markers
pub fn classify(question: &str) -> SensitivityReport {
    let lower = question.to_lowercase();
    let mut matched: Vec<String> = PHRASE_MARKERS
        .iter()
        .filter(|marker| lower.contains(*marker))
        .map(|marker| marker.to_string())
        .collect();

    for acronym in ACRONYM_MARKERS {
        let pattern = format!(r"\b{}\b", regex::escape(acronym));
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(&lower) {
                matched.push(acronym.to_string());
            }
        }
    }

    SensitivityReport {
        sensitive: !matched.is_empty(),
        matched_markers: matched,
    }
}

/// Threshold to use for a run, given the configured public threshold
pub fn effective_threshold(public_threshold: u8, report: &SensitivityReport) -> u8 {
    if report.sensitive {
        SENSITIVE_THRESHOLD.min(public_threshold)
    } else {
        public_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_markers_match() {
        let report = classify("what classified programs involve hypersonics");
        assert!(report.sensitive);
        assert!(report.matched_markers.contains(&"classified".to_string()));
    }

    #[test]
    fn test_acronym_needs_word_boundary() {
        assert!(classify("any SAP billets at the site").sensitive);
        assert!(!classify("sapphire optics suppliers").sensitive);
        assert!(!classify("science topics").sensitive);
        assert!(classify("TS/SCI hiring trends").sensitive);
    }

    #[test]
    fn test_public_question_not_flagged() {
        let report = classify("what contracts mention foo");
        assert!(!report.sensitive);
        assert!(report.matched_markers.is_empty());
    }

    #[test]
    fn test_effective_threshold_floors_not_raises() {
        let sensitive = classify("classified program spending");
        assert_eq!(effective_threshold(3, &sensitive), 1);
        // Never raise an already-lower configured threshold
        assert_eq!(effective_threshold(0, &sensitive), 0);
        let public = classify("highway funding");
        assert_eq!(effective_threshold(3, &public), 3);
    }
}
