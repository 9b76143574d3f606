use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification attached to a recognized lab value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Normal,
    SlightlyAbnormal,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [
        Severity::Normal,
        Severity::SlightlyAbnormal,
        Severity::Critical,
    ];

    /// Tag name as emitted by the language model, e.g. `SLIGHTLY_ABNORMAL`.
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Normal => "NORMAL",
            Severity::SlightlyAbnormal => "SLIGHTLY_ABNORMAL",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parse a tag or status label, ignoring ASCII case and surrounding whitespace.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL
            .into_iter()
            .find(|severity| severity.tag().eq_ignore_ascii_case(tag))
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Severity::Normal => "lab-normal",
            Severity::SlightlyAbnormal => "lab-slightly-abnormal",
            Severity::Critical => "lab-critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single lab result, either extracted by the language model or scanned from text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabFinding {
    #[serde(rename = "test")]
    pub test_name: String,
    pub value: String,
    pub unit: String,
    pub status: Severity,
    #[serde(rename = "range", default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl LabFinding {
    pub fn new(
        test_name: impl Into<String>,
        value: impl Into<String>,
        unit: impl Into<String>,
        status: Severity,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            value: value.into(),
            unit: unit.into(),
            status,
            reference_range: None,
            explanation: None,
        }
    }

    pub fn with_reference_range(mut self, range: impl Into<String>) -> Self {
        self.reference_range = Some(range.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

/// Per-severity counts over a set of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabSummary {
    pub total_tests: usize,
    pub normal: usize,
    pub slightly_abnormal: usize,
    pub critical: usize,
}

impl LabSummary {
    pub fn from_findings(findings: &[LabFinding]) -> Self {
        let mut summary = LabSummary {
            total_tests: findings.len(),
            ..Default::default()
        };

        for finding in findings {
            match finding.status {
                Severity::Normal => summary.normal += 1,
                Severity::SlightlyAbnormal => summary.slightly_abnormal += 1,
                Severity::Critical => summary.critical += 1,
            }
        }

        summary
    }
}

impl fmt::Display for LabSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total Tests: {} | Normal: {} | Slightly Abnormal: {} | Critical: {}",
            self.total_tests, self.normal, self.slightly_abnormal, self.critical
        )
    }
}
