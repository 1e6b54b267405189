//! Permit document generation.
//!
//! This module renders an issued [`Permit`] as a Markdown or JSON document
//! and writes it to the output directory.

use crate::cli::OutputFormat;
use crate::models::{Permit, PermitMetadata, RiskRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Characters of each regulation excerpt shown in the document.
const EXCERPT_CHARS: usize = 200;

/// Generate a complete Markdown permit document.
pub fn generate_markdown_permit(permit: &Permit) -> String {
    let mut output = String::new();

    output.push_str(&generate_banner(permit));
    output.push_str(&generate_issuance_section(permit));
    output.push_str(&generate_assessment_section(permit));
    output.push_str(&generate_analysis_section(&permit.analysis));
    output.push_str(&generate_checklist_section(&permit.checklist));
    output.push_str(&generate_regulations_section(permit));
    output.push_str(&generate_signature_block());
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON permit document.
///
/// `risk_band` and `risk_score` are always present, so an unassessed
/// permit reads "Unassessed" with score 0 next to a `null` risk record.
pub fn generate_json_permit(permit: &Permit) -> Result<String> {
    let mut value = serde_json::to_value(permit)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("risk_band".to_string(), json!(permit.band_label()));
        object.insert("risk_score".to_string(), json!(permit.display_score()));
    }
    serde_json::to_string_pretty(&value).map_err(Into::into)
}

/// Banner with the decision title.
fn generate_banner(permit: &Permit) -> String {
    format!(
        "# {} {}\n\n> **SafeGuard | {}**\n\n",
        permit.decision.emoji(),
        permit.decision.title(),
        permit.decision.subtitle()
    )
}

fn format_local(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Generate the issuance information section.
fn generate_issuance_section(permit: &Permit) -> String {
    let mut section = String::new();

    section.push_str("## Issuance\n\n");
    section.push_str(&format!("- **Permit ID:** {}\n", permit.metadata.permit_id));
    section.push_str(&format!(
        "- **Issued At:** {}\n",
        format_local(&permit.metadata.issued_at)
    ));
    section.push_str(&format!("- **Requested Work:** {}\n", permit.work_summary));
    section.push_str(&format!("- **Decision:** {}\n", permit.decision));
    section.push_str(&format!(
        "- **Model Used:** `{}`\n",
        permit.metadata.model_used
    ));
    section.push('\n');

    section
}

/// Generate the quantitative assessment section.
fn generate_assessment_section(permit: &Permit) -> String {
    let mut section = String::new();

    section.push_str("## 1. Quantitative Risk Assessment (Fine-Kinney)\n\n");

    match permit.risk {
        Some(ref risk) => section.push_str(&generate_factor_table(risk)),
        None => section.push_str(
            "The risk factors could not be extracted from the assessment. \
             The request is rejected until a manual assessment is made.\n\n",
        ),
    }

    section.push_str(&format!(
        "**Overall risk score: {}  |  Band: {}**\n\n",
        permit.display_score(),
        permit.band_label()
    ));

    section
}

fn generate_factor_table(risk: &RiskRecord) -> String {
    let mut table = String::new();

    table.push_str(&format!("*Hazard type: {}*\n\n", risk.hazard_type));
    table.push_str("| Probability (P) | Exposure (E) | Consequence (C) | Risk (R = P × E × C) |\n");
    table.push_str("|:---:|:---:|:---:|:---:|\n");
    table.push_str(&format!(
        "| {} | {} | {} | {} {} |\n\n",
        risk.probability,
        risk.exposure,
        risk.consequence,
        risk.band.emoji(),
        risk.display_score()
    ));

    table
}

/// Remove Markdown emphasis and heading markers from model output.
pub fn clean_analysis(text: &str) -> String {
    text.replace("**", "")
        .replace("##", "")
        .replace("__", "")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Generate the analysis and required measures section.
fn generate_analysis_section(analysis: &str) -> String {
    let mut section = String::new();

    section.push_str("## 2. Detailed Analysis and Required Safety Measures\n\n");

    let cleaned = clean_analysis(analysis);
    if cleaned.is_empty() {
        section.push_str("*No analysis was produced.*\n\n");
    } else {
        section.push_str(&cleaned);
        section.push_str("\n\n");
    }

    section
}

/// Generate the PPE checklist section.
fn generate_checklist_section(items: &[String]) -> String {
    let mut section = String::new();

    section.push_str("## 3. Required PPE and Field Verification (filled in by the worker)\n\n");
    for item in items {
        section.push_str(&format!("- [ ] {}\n", item));
    }
    section.push('\n');

    section
}

/// Generate the supporting regulations section.
fn generate_regulations_section(permit: &Permit) -> String {
    if permit.regulations.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Supporting Regulations\n\n");
    for (i, doc) in permit.regulations.iter().enumerate() {
        section.push_str(&format!("{}. **{}**\n", i + 1, doc.file_name()));
        let excerpt = doc.excerpt(EXCERPT_CHARS).replace('\n', " ");
        section.push_str(&format!("   > {}\n", excerpt));
    }
    section.push('\n');

    section
}

fn generate_signature_block() -> String {
    "**Field safety supervisor:** ______________________\n\n".to_string()
}

/// Generate the document footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(
        "*This document was generated by SafeGuard and takes effect once signed by the field safety supervisor.*\n",
    );

    footer
}

/// Pick a file name in `dir` that does not exist yet.
fn unique_path(dir: &Path, metadata: &PermitMetadata, extension: &str) -> PathBuf {
    let stem = format!("Permit_{}", metadata.file_stamp());
    let mut candidate = dir.join(format!("{}.{}", stem, extension));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.{}", stem, n, extension));
        n += 1;
    }
    candidate
}

/// Render the permit and write it into `dir`, returning the file path.
pub fn write_permit(permit: &Permit, dir: &Path, format: OutputFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let content = match format {
        OutputFormat::Markdown => generate_markdown_permit(permit),
        OutputFormat::Json => generate_json_permit(permit)?,
    };

    let path = unique_path(dir, &permit.metadata, format.extension());
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write permit to {}", path.display()))?;

    debug!("Permit written to {}", path.display());
    Ok(path)
}
