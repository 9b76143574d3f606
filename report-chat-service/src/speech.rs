//! Speech capabilities. Synthesis and recognition normally happen in the
//! browser; the server only advertises what it can do so the frontend can
//! hide controls that would not work.

use async_trait::async_trait;
use report_kit::{ReportError, Result};
use serde::Serialize;

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn is_available(&self) -> bool;

    /// Encoded audio for `text` spoken in `language`.
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn is_available(&self) -> bool;

    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String>;
}

/// Used on hosts without a speech engine.
pub struct UnsupportedSpeech;

#[async_trait]
impl TextToSpeech for UnsupportedSpeech {
    fn is_available(&self) -> bool {
        false
    }

    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        Err(ReportError::Unsupported(
            "Text-to-speech is not available on this server".to_string(),
        ))
    }
}

#[async_trait]
impl SpeechToText for UnsupportedSpeech {
    fn is_available(&self) -> bool {
        false
    }

    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String> {
        Err(ReportError::Unsupported(
            "Speech recognition is not available on this server".to_string(),
        ))
    }
}

/// Feature flags reported to the frontend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    pub llm: bool,
    pub ocr: bool,
    pub speech_synthesis: bool,
    pub speech_recognition: bool,
}
