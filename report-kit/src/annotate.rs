//! Lab-value annotation.
//!
//! Two passes run over the input, left to right and non-overlapping:
//!
//! 1. **Explicit tags** such as `[CRITICAL:120 mg/dL]`, usually emitted by the
//!    language model, lose their brackets and tag name and the inner value is
//!    marked with the tag's severity.
//! 2. **Natural language** such as `250 mg/dL (critical)`: a number followed by a
//!    known lab unit, optionally followed by a parenthesised status phrase. The
//!    status phrase is classified by an ordered rule list (first match wins) and
//!    stays in the output right after the marked value.
//!
//! Pass 2 only ever sees text that pass 1 left plain. Anything that matches
//! neither pattern passes through verbatim; annotation cannot fail.

use regex::Regex;
use std::sync::LazyLock;

use crate::lab::{LabFinding, Severity};

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<tag>NORMAL|SLIGHTLY_ABNORMAL|CRITICAL):(?P<inner>[^\[\]\n]*[^\[\]\s][^\[\]\n]*)\]")
        .expect("Invalid tag regex")
});

static DEFAULT_ANNOTATOR: LazyLock<Annotator> = LazyLock::new(Annotator::default);

const DEFAULT_UNITS: &[&str] = &[
    "mg/dL", "g/dL", "mg/L", "g/L", "µg/dL", "ug/dL", "mcg/dL", "µg/L", "ng/mL", "ng/dL",
    "pg/mL", "mmol/L", "µmol/L", "umol/L", "nmol/L", "pmol/L", "mEq/L", "IU/L", "U/L", "mU/L",
    "IU/mL", "mIU/L", "mIU/mL", "µIU/mL", "uIU/mL", "cells/µL", "cells/uL", "cells/mm3",
    "x10^9/L", "x10^12/L", "x10^3/µL", "10^3/µL", "10^6/µL", "K/µL", "M/µL", "fL", "pg",
    "mm/hr", "mL/min", "%",
];

const DEFAULT_STATUS_WORDS: &[&str] = &[
    "normal",
    "slightly abnormal",
    "abnormal",
    "critical",
    "elevated",
    "decreased",
    "low",
    "high",
];

/// Annotate `text` with the default unit list and status rules.
pub fn annotate(text: &str) -> String {
    DEFAULT_ANNOTATOR.annotate(text)
}

/// Scan `text` for lab values with the default configuration.
pub fn scan_findings(text: &str) -> Vec<LabFinding> {
    DEFAULT_ANNOTATOR.findings(text)
}

/// Maps a status phrase to a severity when it contains any of the keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityRule {
    pub severity: Severity,
    keywords: Vec<String>,
}

impl SeverityRule {
    pub fn new<I, S>(severity: Severity, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            severity,
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn matches(&self, phrase: &str) -> bool {
        self.keywords.iter().any(|k| phrase.contains(k.as_str()))
    }
}

/// Unit list, status vocabulary and classification rules for the natural-language pass.
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Matched exactly as spelled, so `fL` does not match `fl`.
    pub units: Vec<String>,
    pub status_words: Vec<String>,
    pub rules: Vec<SeverityRule>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            units: DEFAULT_UNITS.iter().map(|u| u.to_string()).collect(),
            status_words: DEFAULT_STATUS_WORDS.iter().map(|w| w.to_string()).collect(),
            rules: vec![
                SeverityRule::new(Severity::Critical, ["critical", "very high", "very low"]),
                SeverityRule::new(
                    Severity::SlightlyAbnormal,
                    ["abnormal", "elevated", "high", "low"],
                ),
            ],
        }
    }
}

impl AnnotatorConfig {
    pub fn with_extra_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units.extend(units.into_iter().map(Into::into));
        self
    }
}

/// Where a marked value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSource {
    Tag,
    NaturalLanguage,
}

/// A lab value recognised in the input, borrowed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark<'a> {
    /// Exact text wrapped by the marker.
    pub text: &'a str,
    pub value: &'a str,
    pub unit: &'a str,
    pub severity: Severity,
    pub source: MarkSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Plain(&'a str),
    Marked(Mark<'a>),
}

#[derive(Debug, Clone)]
pub struct Annotator {
    natural: Option<Regex>,
    rules: Vec<SeverityRule>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotatorConfig::default()).expect("Invalid default lab unit regex")
    }
}

impl Annotator {
    pub fn new(config: AnnotatorConfig) -> Result<Self, regex::Error> {
        let natural = match unit_alternation(&config.units) {
            Some(units) => Some(Regex::new(&natural_pattern(&units, &config.status_words))?),
            None => None,
        };

        Ok(Self {
            natural,
            rules: config.rules,
        })
    }

    /// Wrap every recognised lab value in a severity marker.
    pub fn annotate(&self, text: &str) -> String {
        let mut annotated = String::with_capacity(text.len());
        for segment in self.segments(text) {
            match segment {
                Segment::Plain(plain) => annotated.push_str(plain),
                Segment::Marked(mark) => annotated.push_str(&render_marker(&mark)),
            }
        }
        annotated
    }

    /// Split `text` into plain and marked segments. Concatenating the segment
    /// texts gives back the input minus tag brackets and tag names.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in TAG_PATTERN.captures_iter(text) {
            let (Some(whole), Some(tag), Some(inner)) = (caps.get(0), caps.name("tag"), caps.name("inner"))
            else {
                continue;
            };
            let Some(severity) = Severity::from_tag(tag.as_str()) else {
                continue;
            };

            self.scan_natural(&text[last..whole.start()], &mut segments);

            let (value, unit) = split_value_unit(inner.as_str());
            segments.push(Segment::Marked(Mark {
                text: inner.as_str(),
                value,
                unit,
                severity,
                source: MarkSource::Tag,
            }));
            last = whole.end();
        }

        self.scan_natural(&text[last..], &mut segments);
        segments
    }

    /// Collect a [`LabFinding`] for every marked value. The test name is the
    /// label preceding the value on the same line, or `Unknown`.
    pub fn findings(&self, text: &str) -> Vec<LabFinding> {
        let mut findings = Vec::new();
        let mut label = String::new();

        for segment in self.segments(text) {
            match segment {
                Segment::Plain(plain) => match plain.rfind('\n') {
                    Some(idx) => {
                        label.clear();
                        label.push_str(&plain[idx + 1..]);
                    }
                    None => label.push_str(plain),
                },
                Segment::Marked(mark) => {
                    findings.push(LabFinding::new(
                        test_name_from_label(&label),
                        mark.value,
                        mark.unit,
                        mark.severity,
                    ));
                    label.clear();
                }
            }
        }

        findings
    }

    /// Severity for a status phrase; `None` or an unmatched phrase is normal.
    pub fn classify(&self, phrase: Option<&str>) -> Severity {
        let Some(phrase) = phrase else {
            return Severity::Normal;
        };
        let phrase = phrase.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&phrase))
            .map(|rule| rule.severity)
            .unwrap_or(Severity::Normal)
    }

    fn scan_natural<'a>(&self, plain: &'a str, segments: &mut Vec<Segment<'a>>) {
        let Some(pattern) = &self.natural else {
            push_plain(plain, segments);
            return;
        };

        let mut last = 0;
        for caps in pattern.captures_iter(plain) {
            let (Some(value), Some(unit)) = (caps.name("value"), caps.name("unit")) else {
                continue;
            };

            push_plain(&plain[last..value.start()], segments);
            segments.push(Segment::Marked(Mark {
                text: &plain[value.start()..unit.end()],
                value: value.as_str(),
                unit: unit.as_str(),
                severity: self.classify(caps.name("phrase").map(|m| m.as_str())),
                source: MarkSource::NaturalLanguage,
            }));
            // the status phrase stays in the following plain segment
            last = unit.end();
        }

        push_plain(&plain[last..], segments);
    }
}

/// Severity marker as rendered for the chat frontend. The marked text is HTML-escaped.
pub fn render_marker(mark: &Mark<'_>) -> String {
    format!(
        r#"<span class="lab-value {}" data-severity="{}">{}</span>"#,
        mark.severity.css_class(),
        mark.severity.tag(),
        escape_html(mark.text)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn push_plain<'a>(text: &'a str, segments: &mut Vec<Segment<'a>>) {
    if !text.is_empty() {
        segments.push(Segment::Plain(text));
    }
}

fn unit_alternation(units: &[String]) -> Option<String> {
    let mut units: Vec<&str> = units
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    if units.is_empty() {
        return None;
    }

    // regex alternation is leftmost-first, so longer units must come first
    units.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    units.dedup();

    let alternation = units
        .iter()
        .map(|unit| {
            let escaped = regex::escape(unit);
            if unit.ends_with(|c: char| c.is_alphanumeric()) {
                format!(r"{escaped}\b")
            } else {
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join("|");

    Some(alternation)
}

fn natural_pattern(units: &str, status_words: &[String]) -> String {
    let words: Vec<String> = status_words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();

    let status = if words.is_empty() {
        String::new()
    } else {
        format!(
            r"(?:[ \t]*\((?P<phrase>[^()\n]*?(?i:{})[^()\n]*)\))?",
            words.join("|")
        )
    };

    // digit groups repeat so `4,500,000` stays whole; `.5` needs a non-word char before it
    format!(r"(?P<value>\b\d+(?:[.,]\d+)*|\B[.,]\d+)[ \t]*(?P<unit>{units}){status}")
}

fn split_value_unit(inner: &str) -> (&str, &str) {
    let trimmed = inner.trim();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | ',' | '<' | '>' | '-' | '+')))
        .unwrap_or(trimmed.len());

    if end == 0 {
        (trimmed, "")
    } else {
        (&trimmed[..end], trimmed[end..].trim())
    }
}

fn test_name_from_label(label: &str) -> String {
    let is_separator = |c: char| c.is_whitespace() || matches!(c, '*' | ':' | '-' | '=' | '#' | '_' | '>');

    let piece = label
        .rsplit(|c: char| matches!(c, ',' | ';' | '|' | '•'))
        .next()
        .unwrap_or_default()
        .trim_end_matches(is_separator);
    let piece = piece.rsplit(':').next().unwrap_or_default();
    let name = piece.trim_matches(is_separator);

    if name.is_empty() {
        "Unknown".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks<'a>(segments: &[Segment<'a>]) -> Vec<Mark<'a>> {
        segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Marked(mark) => Some(*mark),
                Segment::Plain(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let inputs = [
            "",
            "The patient reports mild headaches since Tuesday.",
            "Take 2 tablets daily (with food).",
            "Room 12, floor 3: results pending",
            "שלום, the report is in Hebrew and English",
        ];
        for input in inputs {
            assert_eq!(annotate(input), input);
        }
    }

    #[test]
    fn test_critical_tag_is_unwrapped() {
        let output = annotate("Cholesterol: **[CRITICAL:120 mg/dL]** see a doctor");
        assert_eq!(
            output,
            r#"Cholesterol: **<span class="lab-value lab-critical" data-severity="CRITICAL">120 mg/dL</span>** see a doctor"#
        );
        assert!(!output.contains("[CRITICAL"));
    }

    #[test]
    fn test_normal_tag_without_unit() {
        let annotator = Annotator::default();
        let segments = annotator.segments("Potassium [NORMAL:4.5]");
        let marks = marks(&segments);

        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].severity, Severity::Normal);
        assert_eq!(marks[0].text, "4.5");
        assert_eq!(marks[0].value, "4.5");
        assert_eq!(marks[0].unit, "");
        assert_eq!(marks[0].source, MarkSource::Tag);
    }

    #[test]
    fn test_natural_language_critical_keeps_status_phrase() {
        let output = annotate("Glucose: 250 mg/dL (critical)");
        assert_eq!(
            output,
            r#"Glucose: <span class="lab-value lab-critical" data-severity="CRITICAL">250 mg/dL</span> (critical)"#
        );
    }

    #[test]
    fn test_natural_language_low_is_slightly_abnormal() {
        let annotator = Annotator::default();
        let segments = annotator.segments("Hemoglobin: 11 g/dL (low)");
        let marks = marks(&segments);

        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].text, "11 g/dL");
        assert_eq!(marks[0].severity, Severity::SlightlyAbnormal);
        assert_eq!(segments.last(), Some(&Segment::Plain(" (low)")));
    }

    #[test]
    fn test_classification_precedence() {
        let annotator = Annotator::default();
        assert_eq!(annotator.classify(Some("critical, otherwise normal")), Severity::Critical);
        assert_eq!(annotator.classify(Some("Very High")), Severity::Critical);
        assert_eq!(annotator.classify(Some("very low")), Severity::Critical);
        assert_eq!(annotator.classify(Some("elevated")), Severity::SlightlyAbnormal);
        assert_eq!(annotator.classify(Some("slightly abnormal")), Severity::SlightlyAbnormal);
        assert_eq!(annotator.classify(Some("high")), Severity::SlightlyAbnormal);
        assert_eq!(annotator.classify(Some("normal")), Severity::Normal);
        assert_eq!(annotator.classify(Some("decreased")), Severity::Normal);
        assert_eq!(annotator.classify(None), Severity::Normal);
    }

    #[test]
    fn test_value_without_status_is_normal() {
        let output = annotate("Sodium 140 mmol/L today");
        assert_eq!(
            output,
            r#"Sodium <span class="lab-value lab-normal" data-severity="NORMAL">140 mmol/L</span> today"#
        );
    }

    #[test]
    fn test_percentage_and_exact_case_units() {
        let annotator = Annotator::default();
        let segments = annotator.segments("HbA1c 6.8% (elevated), glucose 99 MG/DL, MCV 88 fL");
        let marks = marks(&segments);

        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].text, "6.8%");
        assert_eq!(marks[0].severity, Severity::SlightlyAbnormal);
        assert_eq!(marks[1].text, "88 fL");
        assert_eq!(marks[1].severity, Severity::Normal);
    }

    #[test]
    fn test_unit_lookalikes_in_plain_text_are_unchanged() {
        for input in ["Drink 5 fl oz of water", "about 3 PG pages", "Order 2 G/L kits"] {
            assert_eq!(annotate(input), input);
        }
    }

    #[test]
    fn test_grouped_and_leading_decimal_values_stay_whole() {
        let output = annotate("RBC 4,500,000 cells/µL (high)");
        assert_eq!(
            output,
            r#"RBC <span class="lab-value lab-slightly-abnormal" data-severity="SLIGHTLY_ABNORMAL">4,500,000 cells/µL</span> (high)"#
        );

        let findings = scan_findings("RBC 4,500,000 cells/µL (high)
Level .5 mg/dL
WBC 7.200,50 cells/µL");
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].test_name, "RBC");
        assert_eq!(findings[0].value, "4,500,000");
        assert_eq!(findings[1].test_name, "Level");
        assert_eq!(findings[1].value, ".5");
        assert_eq!(findings[1].unit, "mg/dL");
        assert_eq!(findings[2].value, "7.200,50");
    }

    #[test]
    fn test_marked_text_is_html_escaped() {
        let output = annotate("LDL [CRITICAL:<b>190</b> & rising]");
        assert_eq!(
            output,
            r#"LDL <span class="lab-value lab-critical" data-severity="CRITICAL">&lt;b&gt;190&lt;/b&gt; &amp; rising</span>"#
        );
        assert_eq!(escape_html("plain 5 mg/dL"), "plain 5 mg/dL");
    }

    #[test]
    fn test_unit_prefix_of_longer_word_is_ignored() {
        assert_eq!(annotate("about 5 pgs of notes"), "about 5 pgs of notes");
    }

    #[test]
    fn test_tag_region_is_not_rescanned() {
        let annotator = Annotator::default();
        let segments = annotator.segments("[SLIGHTLY_ABNORMAL:110 mg/dL (high)]");
        let marks = marks(&segments);

        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].source, MarkSource::Tag);
        assert_eq!(marks[0].severity, Severity::SlightlyAbnormal);
        assert_eq!(marks[0].text, "110 mg/dL (high)");
        assert_eq!(marks[0].value, "110");
        assert_eq!(marks[0].unit, "mg/dL (high)");
    }

    #[test]
    fn test_malformed_tags_pass_through() {
        let inputs = [
            "[CRITICAL:abc",
            "[URGENT:120]",
            "[CRITICAL:]",
            "[critical:low]",
            "CRITICAL:4.5]",
        ];
        for input in inputs {
            assert_eq!(annotate(input), input);
        }
    }

    #[test]
    fn test_both_passes_in_one_text() {
        let text = "- **Glucose**: **[SLIGHTLY_ABNORMAL:110 mg/dL]**\nCreatinine 1.9 mg/dL (very high)";
        let annotator = Annotator::default();
        let marks = marks(&annotator.segments(text));

        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].source, MarkSource::Tag);
        assert_eq!(marks[1].source, MarkSource::NaturalLanguage);
        assert_eq!(marks[1].severity, Severity::Critical);
    }

    #[test]
    fn test_locale_decimal_passes_through_verbatim() {
        let annotator = Annotator::default();
        let marks = marks(&annotator.segments("Kreatinin 1,2 mg/dL (erhöht, high)"));
        assert_eq!(marks[0].value, "1,2");
        assert_eq!(marks[0].severity, Severity::SlightlyAbnormal);
    }

    #[test]
    fn test_findings_take_label_from_line() {
        let text = "## Results\n- **Glucose**: **[SLIGHTLY_ABNORMAL:110 mg/dL]**\n\
                    Hemoglobin: 11 g/dL (low), Platelets: 250 x10^9/L\n\
                    [NORMAL:4.5]";
        let findings = scan_findings(text);

        let names: Vec<&str> = findings.iter().map(|f| f.test_name.as_str()).collect();
        assert_eq!(names, vec!["Glucose", "Hemoglobin", "Platelets", "Unknown"]);

        assert_eq!(findings[0].value, "110");
        assert_eq!(findings[0].unit, "mg/dL");
        assert_eq!(findings[0].status, Severity::SlightlyAbnormal);
        assert_eq!(findings[1].status, Severity::SlightlyAbnormal);
        assert_eq!(findings[2].unit, "x10^9/L");
        assert_eq!(findings[2].status, Severity::Normal);
        assert_eq!(findings[3].value, "4.5");
    }

    #[test]
    fn test_extra_units_extend_the_pass() {
        let plain = Annotator::default();
        assert!(marks(&plain.segments("Lp(a) 75 nmol/min")).is_empty());

        let extended =
            Annotator::new(AnnotatorConfig::default().with_extra_units(["nmol/min"])).unwrap();
        let segments = extended.segments("Lp(a) 75 nmol/min");
        let marks = marks(&segments);
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].unit, "nmol/min");
    }

    #[test]
    fn test_empty_unit_list_disables_natural_pass() {
        let config = AnnotatorConfig {
            units: Vec::new(),
            ..AnnotatorConfig::default()
        };
        let annotator = Annotator::new(config).unwrap();

        assert_eq!(annotator.annotate("Glucose 250 mg/dL (critical)"), "Glucose 250 mg/dL (critical)");
        assert!(annotator.annotate("[CRITICAL:250]").contains("lab-critical"));
    }

    #[test]
    fn test_concurrent_annotation_is_order_independent() {
        let inputs: Vec<String> = (0..32)
            .map(|i| format!("Sample {i}: {} mg/dL (high) and [CRITICAL:{i}]", 100 + i))
            .collect();
        let expected: Vec<String> = inputs.iter().map(|input| annotate(input)).collect();

        let outputs: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = inputs
                .iter()
                .rev()
                .map(|input| scope.spawn(move || annotate(input)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut outputs = outputs;
        outputs.reverse();
        assert_eq!(outputs, expected);
    }
}
