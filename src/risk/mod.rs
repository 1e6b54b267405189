//! Quantitative risk assessment (Fine-Kinney method).

pub mod fine_kinney;

pub use fine_kinney::{assessment_summary, extract_risk_record, ExtractionError};
