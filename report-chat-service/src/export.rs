//! Downloadable documents: the conversation as PDF, lab results as PDF or CSV.

use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};
use report_kit::{Annotator, ChatTurn, LabFinding, LabSummary, MarkSource, ReportError, Result, Role, Segment};
use std::io::BufWriter;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TOP_MARGIN: f32 = 280.0;
const BOTTOM_MARGIN: f32 = 20.0;
const LEFT_MARGIN: f32 = 20.0;
const WRAP_CHARS: usize = 90;

pub const CSV_HEADER: [&str; 6] = [
    "Test Name",
    "Patient Value",
    "Unit",
    "Reference Range",
    "Status",
    "Explanation",
];

pub fn conversation_file_name(short_id: &str) -> String {
    format!("medical_conversation_{}.pdf", short_id)
}

pub fn results_file_name(short_id: &str, extension: &str) -> String {
    format!("lab_results_{}.{}", short_id, extension)
}

/// Render the chat history as a PDF.
pub fn conversation_pdf(annotator: &Annotator, history: &[ChatTurn]) -> Result<Vec<u8>> {
    let mut pdf = PdfWriter::new("Medical Report Conversation")?;
    pdf.heading("Medical Report Conversation", 16.0);
    pdf.gap(4.0);

    for turn in history {
        let speaker = match turn.role {
            Role::User => "You:",
            Role::Assistant => "Medical Assistant:",
        };
        pdf.heading(speaker, 11.0);
        pdf.paragraph(&plain_text(annotator, &turn.content), 9.0, 5.0);
        pdf.gap(4.0);
    }

    pdf.finish()
}

/// Render lab results with a per-severity summary as a PDF.
pub fn results_pdf(findings: &[LabFinding], filename: &str) -> Result<Vec<u8>> {
    let title = format!("Lab Results Analysis - {}", filename);
    let mut pdf = PdfWriter::new(&title)?;
    pdf.heading(&title, 16.0);
    pdf.gap(2.0);
    pdf.heading(&LabSummary::from_findings(findings).to_string(), 11.0);
    pdf.gap(4.0);

    for finding in findings {
        pdf.heading(&finding.test_name, 11.0);
        let details = format!(
            "Value: {} {}\nReference Range: {}\nStatus: {}\nExplanation: {}",
            finding.value,
            finding.unit,
            finding.reference_range.as_deref().unwrap_or("N/A"),
            finding.status,
            finding
                .explanation
                .as_deref()
                .unwrap_or("No explanation available"),
        );
        pdf.paragraph(&details, 9.0, 5.0);
        pdf.gap(4.0);
    }

    pdf.finish()
}

/// Lab results as CSV with RFC 4180 quoting.
pub fn results_csv(findings: &[LabFinding]) -> String {
    let mut csv = csv_row(CSV_HEADER.iter().copied());

    for finding in findings {
        let status = finding.status.to_string();
        csv.push_str(&csv_row([
            finding.test_name.as_str(),
            finding.value.as_str(),
            finding.unit.as_str(),
            finding.reference_range.as_deref().unwrap_or(""),
            status.as_str(),
            finding.explanation.as_deref().unwrap_or(""),
        ]));
    }

    csv
}

fn csv_row<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let mut row = fields
        .into_iter()
        .map(csv_field)
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Message text for print: severity tags become `value [TAG]`, markdown bold markers go.
fn plain_text(annotator: &Annotator, content: &str) -> String {
    let mut text = String::with_capacity(content.len());
    for segment in annotator.segments(content) {
        match segment {
            Segment::Plain(plain) => text.push_str(plain),
            Segment::Marked(mark) if mark.source == MarkSource::Tag => {
                text.push_str(&format!("{} [{}]", mark.text, mark.severity));
            }
            Segment::Marked(mark) => text.push_str(mark.text),
        }
    }
    text.replace("**", "")
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Line width for bold text at `size`, scaled from the 9pt body width.
fn chars_per_line(size: f32) -> usize {
    ((WRAP_CHARS as f32) * 9.0 / size).max(10.0) as usize
}

fn pdf_error(context: &str, e: impl std::fmt::Display) -> ReportError {
    ReportError::Export(format!("{context}: {e}"))
}

/// Top-to-bottom text layout with automatic page breaks.
struct PdfWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
}

impl PdfWriter {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let layer = doc.get_page(page).get_layer(layer);
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| pdf_error("PDF font error", e))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| pdf_error("PDF font error", e))?;

        Ok(Self {
            doc,
            layer,
            font,
            bold,
            y: TOP_MARGIN,
        })
    }

    fn ensure_space(&mut self, needed: f32) {
        if self.y - needed < BOTTOM_MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP_MARGIN;
        }
    }

    fn heading(&mut self, text: &str, size: f32) {
        for line in wrap_text(text, chars_per_line(size)) {
            let height = size * 0.5;
            self.ensure_space(height);
            self.layer
                .use_text(line, size, Mm(LEFT_MARGIN), Mm(self.y), &self.bold);
            self.y -= height;
        }
    }

    fn paragraph(&mut self, text: &str, size: f32, indent: f32) {
        for source_line in text.lines() {
            let wrapped = wrap_text(source_line, WRAP_CHARS);
            if wrapped.is_empty() {
                self.gap(size * 0.3);
                continue;
            }
            for line in wrapped {
                let height = size * 0.5;
                self.ensure_space(height);
                self.layer
                    .use_text(line, size, Mm(LEFT_MARGIN + indent), Mm(self.y), &self.font);
                self.y -= height;
            }
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn finish(self) -> Result<Vec<u8>> {
        let mut buf = BufWriter::new(Vec::new());
        self.doc
            .save(&mut buf)
            .map_err(|e| pdf_error("PDF save error", e))?;
        buf.into_inner()
            .map_err(|e| pdf_error("PDF buffer error", e))
    }
}
