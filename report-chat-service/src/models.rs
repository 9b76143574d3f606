use report_kit::{LabFinding, LabSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnnotateRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TranscribeParams {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadPdfResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
    pub text_preview: String,
    pub lab_data: Vec<LabFinding>,
    pub has_lab_data: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadReportResponse {
    pub success: bool,
    pub session_id: String,
    pub lab_data: Vec<LabFinding>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    /// `response` with lab values wrapped in severity markers.
    pub annotated_response: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnnotateResponse {
    pub annotated: String,
    pub findings: Vec<LabFinding>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub success: bool,
    pub lab_data: Vec<LabFinding>,
    pub summary: LabSummary,
    pub filename: String,
    pub upload_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
}
