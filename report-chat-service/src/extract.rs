//! Text extraction from uploaded reports.
//!
//! Extractors run in order and the first one that yields non-blank text wins:
//! embedded PDF text first, then Tesseract OCR over rendered pages for scanned
//! documents. A failing extractor is logged and skipped.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use axum::body::Bytes;
use image::ImageFormat;
use pdf2image::{PDF, Pages};
use report_kit::{ReportError, Result};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::OcrConfig;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn id(&self) -> &str;

    async fn extract(&self, pdf: Bytes) -> anyhow::Result<String>;
}

/// Text produced by the chain, with the extractor that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub extractor: String,
}

#[derive(Clone, Default)]
pub struct ExtractionChain {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embedded text first, OCR second when enabled.
    pub fn from_config(ocr: &OcrConfig) -> Self {
        let chain = Self::new().with_extractor(Arc::new(PdfTextExtractor));
        if ocr.enabled {
            chain.with_extractor(Arc::new(TesseractOcrExtractor::new(ocr.clone())))
        } else {
            chain
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn extractor_ids(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.id()).collect()
    }

    pub async fn extract(&self, pdf: Bytes) -> Result<ExtractedText> {
        for extractor in &self.extractors {
            match extractor.extract(pdf.clone()).await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(
                        "Extracted {} characters with {}",
                        text.len(),
                        extractor.id()
                    );
                    return Ok(ExtractedText {
                        text,
                        extractor: extractor.id().to_string(),
                    });
                }
                Ok(_) => warn!("{} produced no text, trying next extractor", extractor.id()),
                Err(e) => warn!("{} failed: {}", extractor.id(), e),
            }
        }

        Err(ReportError::Unreadable(
            "Could not extract text from PDF".to_string(),
        ))
    }
}

/// Reads the text layer embedded in the PDF.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    fn id(&self) -> &str {
        "pdf_text"
    }

    async fn extract(&self, pdf: Bytes) -> anyhow::Result<String> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf))
            .await?
            .map_err(|e| anyhow!("PDF text extraction failed: {}", e))?;

        Ok(clean_extracted_text(&text))
    }
}

/// Renders every page and runs the Tesseract CLI on it.
pub struct TesseractOcrExtractor {
    config: OcrConfig,
}

impl TesseractOcrExtractor {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TextExtractor for TesseractOcrExtractor {
    fn id(&self) -> &str {
        "tesseract_ocr"
    }

    async fn extract(&self, pdf: Bytes) -> anyhow::Result<String> {
        if !self.config.enabled {
            bail!("Tesseract OCR is disabled in configuration");
        }

        info!("No embedded text found, running OCR fallback");
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || ocr_pdf(&pdf, &config)).await?
    }
}

fn ocr_pdf(pdf: &[u8], config: &OcrConfig) -> anyhow::Result<String> {
    let document = PDF::from_bytes(pdf.to_vec()).map_err(|e| anyhow!("Failed to load PDF: {}", e))?;
    let pages = document
        .render(Pages::All, None)
        .map_err(|e| anyhow!("Failed to render PDF pages: {}", e))?;

    info!("Rendered {} pages for OCR", pages.len());

    let workdir = tempfile::tempdir()?;
    let mut text = String::new();
    for (i, page) in pages.iter().enumerate() {
        let page_path = workdir.path().join(format!("page_{}.png", i + 1));
        page.save_with_format(&page_path, ImageFormat::Png)
            .map_err(|e| anyhow!("Failed to write page image: {}", e))?;

        text.push_str(&run_tesseract(&page_path, config)?);
        text.push('\n');
    }

    Ok(clean_extracted_text(&text))
}

fn run_tesseract(image_path: &Path, config: &OcrConfig) -> anyhow::Result<String> {
    let output = Command::new(&config.tesseract_path)
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(&config.language)
        .output()
        .map_err(|e| {
            anyhow!(
                "Failed to run tesseract (is it installed? path='{}'): {}",
                config.tesseract_path,
                e
            )
        })?;

    if !output.status.success() {
        bail!(
            "Tesseract OCR failed (exit code {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether the configured tesseract binary can be executed.
pub fn is_tesseract_available(tesseract_path: &str) -> bool {
    Command::new(tesseract_path)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Normalize whitespace: collapse runs of spaces and tabs, drop control
/// characters, turn form feeds into paragraph breaks and keep at most one
/// blank line between paragraphs.
pub fn clean_extracted_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '\r' => {}
            '\n' | '\x0c' => {
                while cleaned.ends_with(' ') {
                    cleaned.pop();
                }
                let breaks = if ch == '\x0c' { 2 } else { 1 };
                for _ in 0..breaks {
                    if !cleaned.ends_with("\n\n") {
                        cleaned.push('\n');
                    }
                }
            }
            ' ' | '\t' => {
                if !cleaned.is_empty() && !cleaned.ends_with(' ') && !cleaned.ends_with('\n') {
                    cleaned.push(' ');
                }
            }
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    cleaned.trim().to_string()
}
