//! Fine-Kinney factor extraction and scoring.
//!
//! The risk analyst prompt asks the model for lines such as `P: 3`,
//! `E = 6`, `C: 15`, `R: 270` and `Hazard type: Fall from height`. The score
//! itself is always recomputed here; the model only supplies the factors.

use crate::models::RiskRecord;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Standard probability (P) values.
pub const PROBABILITY_SCALE: &[f64] = &[0.1, 0.2, 0.5, 1.0, 3.0, 6.0, 10.0];
/// Standard exposure (E) values.
pub const EXPOSURE_SCALE: &[f64] = &[0.5, 1.0, 2.0, 3.0, 6.0, 10.0];
/// Standard consequence (C) values.
pub const CONSEQUENCE_SCALE: &[f64] = &[1.0, 3.0, 7.0, 15.0, 40.0, 100.0];

/// Hazard type used when the model does not name one.
pub const DEFAULT_HAZARD: &str = "Composite hazard";

/// A stated R further than this from P × E × C is reported as a mismatch.
const STATED_SCORE_TOLERANCE: f64 = 0.5;

/// Failure to obtain a score from a model response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("risk factors missing from model response: {}", missing.join(", "))]
    MissingFactors { missing: Vec<&'static str> },
}

struct Patterns {
    probability: Regex,
    exposure: Regex,
    consequence: Regex,
    stated: Regex,
    hazard: Regex,
}

fn factor_pattern(label: &str) -> Regex {
    // `P: 3`, `- **P**: 3`, `2. P (Probability) = 0.5`. The label must open
    // its line, so a formula such as `R = P × E × C = 90` is never read as a factor.
    let pattern = format!(
        r"(?m)^[ \t>*+-]*(?:\d+[.)][ \t]+)?\**{}\b[^:=\n\d]{{0,30}}[:=][ \t]*\**[ \t]*(\d+(?:\.\d+)?)",
        label
    );
    Regex::new(&pattern).expect("factor pattern is valid")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        probability: factor_pattern("P"),
        exposure: factor_pattern("E"),
        consequence: factor_pattern("C"),
        stated: factor_pattern("R"),
        hazard: Regex::new(r"(?mi)hazard(?:[ _]type)?\**\s*[:=]\s*(.+)$")
            .expect("hazard pattern is valid"),
    })
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn capture_hazard(text: &str) -> Option<String> {
    let raw = patterns().hazard.captures(text)?.get(1)?.as_str();
    let cleaned = raw.trim().trim_matches('*').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn check_scale(name: &str, value: f64, scale: &[f64]) {
    if !scale.iter().any(|s| (s - value).abs() < f64::EPSILON) {
        warn!("{} = {} is not on the standard Fine-Kinney scale", name, value);
    }
}

/// Extract a risk record from the risk analyst's response.
pub fn extract_risk_record(response: &str) -> Result<RiskRecord, ExtractionError> {
    let p = patterns();
    let probability = capture_number(&p.probability, response);
    let exposure = capture_number(&p.exposure, response);
    let consequence = capture_number(&p.consequence, response);
    let stated = capture_number(&p.stated, response);
    let hazard = capture_hazard(response).unwrap_or_else(|| DEFAULT_HAZARD.to_string());

    debug!(
        "Extracted P={:?} E={:?} C={:?} R={:?} hazard={}",
        probability, exposure, consequence, stated, hazard
    );

    if let (Some(prob), Some(exp), Some(cons)) = (probability, exposure, consequence) {
        check_scale("P", prob, PROBABILITY_SCALE);
        check_scale("E", exp, EXPOSURE_SCALE);
        check_scale("C", cons, CONSEQUENCE_SCALE);

        let record = RiskRecord::compute(prob, exp, cons, hazard);
        if let Some(r) = stated {
            if (r - record.score).abs() > STATED_SCORE_TOLERANCE {
                warn!(
                    "Model stated R = {} but P x E x C = {}; using the computed score",
                    r, record.score
                );
            }
        }
        return Ok(record);
    }

    let mut missing = Vec::new();
    if probability.is_none() {
        missing.push("P");
    }
    if exposure.is_none() {
        missing.push("E");
    }
    if consequence.is_none() {
        missing.push("C");
    }

    match stated {
        Some(r) => {
            warn!(
                "Factors {} missing; falling back to the stated score R = {}",
                missing.join(", "),
                r
            );
            Ok(RiskRecord::stated(
                probability.unwrap_or(0.0),
                exposure.unwrap_or(0.0),
                consequence.unwrap_or(0.0),
                r,
                hazard,
            ))
        }
        None => {
            missing.push("R");
            Err(ExtractionError::MissingFactors { missing })
        }
    }
}

/// Markdown summary of an assessment, shown in the CLI and fed to the admin stage.
pub fn assessment_summary(record: &RiskRecord) -> String {
    let mut out = String::new();
    out.push_str("**🎯 Fine-Kinney risk assessment**\n");
    out.push_str(&format!("* **Hazard type:** {}\n", record.hazard_type));
    out.push_str("* **Formula:** Risk = P × E × C\n");
    out.push_str("* **Factors:**\n");
    out.push_str(&format!("    * Probability (P): **{}**\n", record.probability));
    out.push_str(&format!("    * Exposure (E): **{}**\n", record.exposure));
    out.push_str(&format!("    * Consequence (C): **{}**\n", record.consequence));
    out.push_str(&format!(
        "* **Final risk (R):** **{}** ({})\n",
        record.display_score(),
        record.band
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskBand, ScoreSource};

    #[test]
    fn test_extract_plain_lines() {
        let response = "P: 3\nE: 6\nC: 15\nR: 270\nHazard type: Fall from height";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.probability, 3.0);
        assert_eq!(record.exposure, 6.0);
        assert_eq!(record.consequence, 15.0);
        assert_eq!(record.score, 270.0);
        assert_eq!(record.band, RiskBand::High);
        assert_eq!(record.hazard_type, "Fall from height");
        assert_eq!(record.score_source, ScoreSource::Computed);
    }

    #[test]
    fn test_extract_markdown_and_equals() {
        let response = "Assessment:\n- **P** = 0.5\n- **E** = 2\n- **C** = 7\n- **Hazard type**: Cut / laceration";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 7.0);
        assert_eq!(record.band, RiskBand::Low);
        assert_eq!(record.hazard_type, "Cut / laceration");
    }

    #[test]
    fn test_computed_score_wins_over_stated() {
        let response = "P: 6\nE: 6\nC: 15\nR: 100";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 540.0);
        assert_eq!(record.band, RiskBand::VeryHigh);
    }

    #[test]
    fn test_stated_score_fallback() {
        let response = "P: 3\nC: 15\nR: 90";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 90.0);
        assert_eq!(record.exposure, 0.0);
        assert_eq!(record.band, RiskBand::Medium);
        assert_eq!(record.score_source, ScoreSource::Stated);
    }

    #[test]
    fn test_missing_everything() {
        let err = extract_risk_record("I cannot assess this task.").unwrap_err();
        assert_eq!(
            err,
            ExtractionError::MissingFactors {
                missing: vec!["P", "E", "C", "R"]
            }
        );
    }

    #[test]
    fn test_default_hazard() {
        let record = extract_risk_record("P: 1\nE: 1\nC: 1").unwrap();
        assert_eq!(record.hazard_type, DEFAULT_HAZARD);
    }

    #[test]
    fn test_labels_inside_words_are_ignored() {
        // "STEP: 9" and "TYPE: 4" must not be read as P or E
        let response = "STEP: 9\nTYPE: 4\nP: 1\nE: 3\nC: 40";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.probability, 1.0);
        assert_eq!(record.exposure, 3.0);
        assert_eq!(record.score, 120.0);
    }

    #[test]
    fn test_summary_line_before_factors() {
        let response = "Risk (P × E × C) = 90\nP: 1\nE: 6\nC: 15\nR: 90\nHazard type: Burn";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.probability, 1.0);
        assert_eq!(record.exposure, 6.0);
        assert_eq!(record.consequence, 15.0);
        assert_eq!(record.score, 90.0);
        assert_eq!(record.band, RiskBand::Medium);
    }

    #[test]
    fn test_worked_formula_line_is_not_a_factor() {
        let response = "R = P × E × C = 1 × 6 × 15 = 90\nP: 1\nE: 6\nC: 15\nR: 90";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 90.0);
        assert_eq!(record.decision(), crate::models::Decision::Conditional);

        let response = "R = P × E × C = 6 × 6 × 15 = 540\nP: 6\nE: 6\nC: 15";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 540.0);
        assert_eq!(record.band, RiskBand::VeryHigh);
    }

    #[test]
    fn test_value_must_be_on_label_line() {
        // A bare label cannot borrow the number from the next line.
        let response = "P:\n3\nE: 6\nC: 15\nR: 270";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score_source, ScoreSource::Stated);
        assert_eq!(record.score, 270.0);
    }

    #[test]
    fn test_numbered_list_factors() {
        let response = "1. P (Probability): 3\n2. E (Exposure): 2\n3. C (Consequence): 15";
        let record = extract_risk_record(response).unwrap();
        assert_eq!(record.score, 90.0);
    }

    #[test]
    fn test_assessment_summary() {
        let record = RiskRecord::compute(3.0, 6.0, 15.0, "Fall from height");
        let summary = assessment_summary(&record);
        assert!(summary.contains("Fine-Kinney"));
        assert!(summary.contains("Fall from height"));
        assert!(summary.contains("**270** (High)"));
    }
}
