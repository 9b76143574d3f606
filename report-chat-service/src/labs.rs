use anyhow::anyhow;
use report_kit::{Annotator, LabFinding, Severity};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    llm::ChatModel,
    prompts::{EXTRACTION_PREAMBLE, lab_extraction_prompt},
};

const REQUIRED_KEYS: [&str; 5] = ["test", "value", "unit", "range", "status"];

/// Structured lab results for a report. Asks the model first and falls back
/// to scanning the text with the annotator when the model is unavailable,
/// fails, or finds nothing.
pub async fn extract_lab_findings(
    model: &dyn ChatModel,
    annotator: &Annotator,
    report_text: &str,
) -> Vec<LabFinding> {
    if model.is_configured() {
        match request_findings(model, report_text).await {
            Ok(findings) if !findings.is_empty() => {
                info!("Model extracted {} lab tests", findings.len());
                return findings;
            }
            Ok(_) => warn!("Model returned no lab tests, scanning text instead"),
            Err(e) => warn!("Lab extraction failed, scanning text instead: {}", e),
        }
    }

    let findings = annotator.findings(report_text);
    info!("Scanned {} lab values from report text", findings.len());
    findings
}

async fn request_findings(model: &dyn ChatModel, report_text: &str) -> anyhow::Result<Vec<LabFinding>> {
    let response = model
        .complete(EXTRACTION_PREAMBLE, &lab_extraction_prompt(report_text))
        .await?;
    parse_findings(&response)
}

/// Parse the model's JSON answer, tolerating code fences and prose around the
/// array. Items missing a required key or with a non-numeric value are dropped.
pub fn parse_findings(response: &str) -> anyhow::Result<Vec<LabFinding>> {
    let json = json_array_slice(response);
    let parsed: Value = serde_json::from_str(json)?;
    let items = parsed
        .as_array()
        .ok_or_else(|| anyhow!("Expected a JSON array of lab results"))?;

    Ok(items.iter().filter_map(finding_from_json).collect())
}

fn json_array_slice(response: &str) -> &str {
    let mut text = response.trim();

    if let Some(fence) = text.find("```") {
        let body = &text[fence + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        text = match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn finding_from_json(item: &Value) -> Option<LabFinding> {
    let object = item.as_object()?;
    if !REQUIRED_KEYS.iter().all(|key| object.contains_key(*key)) {
        return None;
    }

    let value = numeric_value(&object["value"])?;
    let status = object["status"].as_str().and_then(Severity::from_tag)?;
    let text = |key: &str| match &object[key] {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let mut finding = LabFinding::new(text("test"), value, text("unit"), status)
        .with_reference_range(text("range"));
    if let Some(explanation) = object.get("explanation").and_then(Value::as_str) {
        finding = finding.with_explanation(explanation.trim());
    }
    Some(finding)
}

fn numeric_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<f64>().ok().map(|_| trimmed.to_string())
        }
        _ => None,
    }
}
