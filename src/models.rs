//! Data models for permit issuance.
//!
//! This module contains the core data structures that flow through the
//! pipeline: the Fine-Kinney risk record, retrieved regulation excerpts,
//! and the issued permit document.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Score at or above which a task is rated Very High.
pub const VERY_HIGH_THRESHOLD: f64 = 320.0;
/// Score at or above which a task is rated High (and rejected).
pub const HIGH_THRESHOLD: f64 = 160.0;
/// Score at or above which a task is rated Medium (conditional approval).
pub const MEDIUM_THRESHOLD: f64 = 70.0;

/// Severity band derived from a Fine-Kinney score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    /// Below 70 - acceptable, standard permit
    Low,
    /// 70 to 159 - work allowed once measures are in place
    Medium,
    /// 160 to 319 - rejected
    High,
    /// 320 and above - rejected, critical
    VeryHigh,
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskBand::Low => write!(f, "Low"),
            RiskBand::Medium => write!(f, "Medium"),
            RiskBand::High => write!(f, "High"),
            RiskBand::VeryHigh => write!(f, "Very High"),
        }
    }
}

impl RiskBand {
    /// Map a score onto its band.
    pub fn from_score(score: f64) -> Self {
        if score >= VERY_HIGH_THRESHOLD {
            RiskBand::VeryHigh
        } else if score >= HIGH_THRESHOLD {
            RiskBand::High
        } else if score >= MEDIUM_THRESHOLD {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// Returns an emoji representation of the band.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskBand::Low => "🟢",
            RiskBand::Medium => "🟡",
            RiskBand::High => "🟠",
            RiskBand::VeryHigh => "🔴",
        }
    }

    /// The permit decision this band leads to.
    pub fn decision(&self) -> Decision {
        match self {
            RiskBand::Low => Decision::Approved,
            RiskBand::Medium => Decision::Conditional,
            RiskBand::High | RiskBand::VeryHigh => Decision::Rejected,
        }
    }
}

/// Outcome of a permit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Conditional,
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approved => write!(f, "Approved"),
            Decision::Conditional => write!(f, "Conditional approval"),
            Decision::Rejected => write!(f, "Rejected"),
        }
    }
}

impl Decision {
    /// Decide from an optional risk record. An unassessed request is rejected.
    pub fn from_risk(risk: Option<&RiskRecord>) -> Self {
        match risk {
            Some(record) => record.band.decision(),
            None => Decision::Rejected,
        }
    }

    /// Title printed in the document banner.
    pub fn title(&self) -> &'static str {
        match self {
            Decision::Approved => "Standard Work Permit (Low Risk)",
            Decision::Conditional => "Conditional Work Permit (Medium Risk)",
            Decision::Rejected => "Work Permit Rejection Notice (High Risk)",
        }
    }

    /// Subtitle printed under the banner title.
    pub fn subtitle(&self) -> &'static str {
        match self {
            Decision::Approved => "STANDARD WORK PERMIT",
            Decision::Conditional => "CONDITIONAL APPROVAL REQUIRED",
            Decision::Rejected => "CRITICAL RISK ALERT",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Decision::Approved => "✅",
            Decision::Conditional => "⚠️",
            Decision::Rejected => "🚨",
        }
    }
}

/// Where the score of a [`RiskRecord`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// P × E × C computed locally.
    Computed,
    /// A factor was missing; the score stated by the model was used.
    Stated,
}

/// Fine-Kinney risk record, produced once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    /// Probability factor (P).
    pub probability: f64,
    /// Exposure frequency factor (E).
    pub exposure: f64,
    /// Consequence severity factor (C).
    pub consequence: f64,
    /// Risk score (R).
    pub score: f64,
    /// Severity band of the score.
    pub band: RiskBand,
    /// Dominant hazard, e.g. "Fall from height".
    pub hazard_type: String,
    /// How the score was obtained.
    pub score_source: ScoreSource,
}

impl RiskRecord {
    /// Build a record whose score is the product of its factors.
    pub fn compute(
        probability: f64,
        exposure: f64,
        consequence: f64,
        hazard_type: impl Into<String>,
    ) -> Self {
        let score = probability * exposure * consequence;
        Self {
            probability,
            exposure,
            consequence,
            score,
            band: RiskBand::from_score(score),
            hazard_type: hazard_type.into(),
            score_source: ScoreSource::Computed,
        }
    }

    /// Build a record from a score stated by the model.
    pub fn stated(
        probability: f64,
        exposure: f64,
        consequence: f64,
        score: f64,
        hazard_type: impl Into<String>,
    ) -> Self {
        Self {
            probability,
            exposure,
            consequence,
            score,
            band: RiskBand::from_score(score),
            hazard_type: hazard_type.into(),
            score_source: ScoreSource::Stated,
        }
    }

    /// The score as displayed to users (integer part).
    pub fn display_score(&self) -> u64 {
        self.score.max(0.0).trunc() as u64
    }

    pub fn decision(&self) -> Decision {
        self.band.decision()
    }
}

/// A regulation excerpt returned by retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulationDoc {
    /// Path of the document the excerpt came from.
    pub source: String,
    /// Excerpt text.
    pub content: String,
    /// Similarity to the query (0.0 when unknown).
    #[serde(default)]
    pub score: f32,
}

impl RegulationDoc {
    pub fn new(source: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            score,
        }
    }

    /// File name of the source, without directories.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source)
    }

    /// The first `max_chars` characters of the content, with an ellipsis when cut.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let content = self.content.trim();
        if content.chars().count() <= max_chars {
            content.to_string()
        } else {
            let cut: String = content.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// Metadata about an issued permit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitMetadata {
    /// Identifier printed on the document.
    pub permit_id: String,
    /// Date and time of issuance.
    pub issued_at: DateTime<Utc>,
    /// Name of the LLM model used.
    pub model_used: String,
    /// Pipeline duration in seconds.
    pub duration_seconds: f64,
}

impl PermitMetadata {
    pub fn new(issued_at: DateTime<Utc>, model_used: impl Into<String>) -> Self {
        let local = issued_at.with_timezone(&Local);
        Self {
            permit_id: format!("SG-{}", local.format("%Y%m%d-%H%M%S")),
            issued_at,
            model_used: model_used.into(),
            duration_seconds: 0.0,
        }
    }

    /// Local issuance time as used in document file names.
    pub fn file_stamp(&self) -> String {
        self.issued_at
            .with_timezone(&Local)
            .format("%Y%m%d_%H%M%S")
            .to_string()
    }
}

/// The issued permit document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permit {
    pub metadata: PermitMetadata,
    pub decision: Decision,
    /// Consolidated one-sentence description of the requested work.
    pub work_summary: String,
    /// Risk record; `None` (serialized as `null`) when the factors could
    /// not be extracted.
    pub risk: Option<RiskRecord>,
    /// Detailed analysis and required safety measures.
    pub analysis: String,
    /// Regulations the decision is grounded on.
    pub regulations: Vec<RegulationDoc>,
    /// PPE and field verification items.
    pub checklist: Vec<String>,
}

impl Permit {
    /// Band label, "Unassessed" when there is no risk record.
    pub fn band_label(&self) -> String {
        self.risk
            .as_ref()
            .map(|r| r.band.to_string())
            .unwrap_or_else(|| "Unassessed".to_string())
    }

    /// Displayed score, 0 when there is no risk record.
    pub fn display_score(&self) -> u64 {
        self.risk.as_ref().map(RiskRecord::display_score).unwrap_or(0)
    }
}

/// PPE and field verification items filled in by the worker.
pub fn default_checklist() -> Vec<String> {
    [
        "Hard hat (chin strap fastened)",
        "Safety glasses / face shield",
        "Safety shoes",
        "Gas / dust mask",
        "Work gloves",
        "Other (           )",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_thresholds() {
        assert_eq!(RiskBand::from_score(0.0), RiskBand::Low);
        assert_eq!(RiskBand::from_score(69.9), RiskBand::Low);
        assert_eq!(RiskBand::from_score(70.0), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(159.0), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(160.0), RiskBand::High);
        assert_eq!(RiskBand::from_score(319.99), RiskBand::High);
        assert_eq!(RiskBand::from_score(320.0), RiskBand::VeryHigh);
        assert_eq!(RiskBand::from_score(1000.0), RiskBand::VeryHigh);
    }

    #[test]
    fn test_band_ordering() {
        assert!(RiskBand::Low < RiskBand::Medium);
        assert!(RiskBand::Medium < RiskBand::High);
        assert!(RiskBand::High < RiskBand::VeryHigh);
    }

    #[test]
    fn test_band_display() {
        assert_eq!(RiskBand::VeryHigh.to_string(), "Very High");
        assert_eq!(RiskBand::Medium.to_string(), "Medium");
    }

    #[test]
    fn test_decision_from_band() {
        assert_eq!(RiskBand::Low.decision(), Decision::Approved);
        assert_eq!(RiskBand::Medium.decision(), Decision::Conditional);
        assert_eq!(RiskBand::High.decision(), Decision::Rejected);
        assert_eq!(RiskBand::VeryHigh.decision(), Decision::Rejected);
    }

    #[test]
    fn test_unassessed_is_rejected() {
        assert_eq!(Decision::from_risk(None), Decision::Rejected);
    }

    #[test]
    fn test_compute_record() {
        let record = RiskRecord::compute(3.0, 6.0, 15.0, "Fall from height");
        assert_eq!(record.score, 270.0);
        assert_eq!(record.band, RiskBand::High);
        assert_eq!(record.decision(), Decision::Rejected);
        assert_eq!(record.score_source, ScoreSource::Computed);

        let small = RiskRecord::compute(0.5, 2.0, 7.0, "Cut");
        assert_eq!(small.display_score(), 7);
        assert_eq!(small.decision(), Decision::Approved);
    }

    #[test]
    fn test_display_score_truncates() {
        let record = RiskRecord::stated(0.0, 0.0, 0.0, 159.9, "Burn");
        assert_eq!(record.display_score(), 159);
        assert_eq!(record.band, RiskBand::Medium);
    }

    #[test]
    fn test_regulation_file_name_and_excerpt() {
        let doc = RegulationDoc::new("data/rules/hot_work.md", "가나다라마바사", 0.9);
        assert_eq!(doc.file_name(), "hot_work.md");
        assert_eq!(doc.excerpt(3), "가나다...");
        assert_eq!(doc.excerpt(50), "가나다라마바사");
    }

    #[test]
    fn test_permit_id_format() {
        let issued = DateTime::parse_from_rfc3339("2026-10-19T14:25:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let metadata = PermitMetadata::new(issued, "llama3.2:latest");

        // Identifier and file name share the same local clock.
        let local = issued.with_timezone(&Local);
        assert_eq!(
            metadata.permit_id,
            format!("SG-{}", local.format("%Y%m%d-%H%M%S"))
        );
        assert_eq!(metadata.file_stamp(), local.format("%Y%m%d_%H%M%S").to_string());
        assert_eq!(
            metadata.permit_id.replace('-', "_"),
            format!("SG_{}", metadata.file_stamp())
        );
    }
}
