use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use report_kit::{
    Annotator, AnnotatorConfig, ChatSession, ChatTurn, DEFAULT_LANGUAGE, InMemorySessionStorage,
    LabFinding, LabSummary, MAX_HISTORY_TURNS, ReportError, SessionStorage,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    export::{
        conversation_file_name, conversation_pdf, results_csv, results_file_name, results_pdf,
    },
    extract::{ExtractionChain, is_tesseract_available},
    labs::extract_lab_findings,
    llm::{ChatModel, create_chat_model, generate_reply},
    models::{
        AnnotateRequest, AnnotateResponse, ChatRequest, ChatResponse, ResultsResponse,
        SessionRequest, SpeakRequest, TranscribeParams, TranscribeResponse, UploadPdfResponse,
        UploadReportResponse,
    },
    speech::{Capabilities, SpeechToText, TextToSpeech, UnsupportedSpeech},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

const TEXT_PREVIEW_CHARS: usize = 500;

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn not_implemented_error(message: &str) -> ApiError {
    (StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": message })))
}

fn multipart_error(e: MultipartError) -> ApiError {
    warn!("Rejected upload: {}", e);
    (e.status(), Json(json!({ "error": e.body_text() })))
}

fn storage_error(e: ReportError) -> ApiError {
    error!("Session storage failure: {}", e);
    internal_error("Session storage failure", &e.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub chat_model: Arc<dyn ChatModel>,
    pub extraction: Arc<ExtractionChain>,
    pub annotator: Arc<Annotator>,
    pub text_to_speech: Arc<dyn TextToSpeech>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub ocr_available: bool,
    pub max_upload_bytes: usize,
}

pub fn create_app(config: &AppConfig) -> Router {
    build_router(create_app_state(config))
}

fn create_app_state(config: &AppConfig) -> AppState {
    let ocr_available = config.ocr.enabled && is_tesseract_available(&config.ocr.tesseract_path);
    if config.ocr.enabled && !ocr_available {
        warn!(
            "Tesseract not found at '{}', scanned PDFs cannot be read",
            config.ocr.tesseract_path
        );
    }

    let mut ocr = config.ocr.clone();
    ocr.enabled = ocr_available;

    AppState {
        session_storage: Arc::new(InMemorySessionStorage::new()),
        chat_model: create_chat_model(config),
        extraction: Arc::new(ExtractionChain::from_config(&ocr)),
        annotator: Arc::new(create_annotator(config)),
        text_to_speech: Arc::new(UnsupportedSpeech),
        speech_to_text: Arc::new(UnsupportedSpeech),
        ocr_available,
        max_upload_bytes: config.max_upload_bytes,
    }
}

fn create_annotator(config: &AppConfig) -> Annotator {
    if config.extra_lab_units.is_empty() {
        return Annotator::default();
    }

    let annotator_config =
        AnnotatorConfig::default().with_extra_units(config.extra_lab_units.iter().cloned());
    match Annotator::new(annotator_config) {
        Ok(annotator) => {
            info!("Recognising extra lab units {:?}", config.extra_lab_units);
            annotator
        }
        Err(e) => {
            error!("Invalid LAB_EXTRA_UNITS, using default units: {}", e);
            Annotator::default()
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/capabilities", get(capabilities))
        .route("/upload_pdf", post(upload_pdf))
        .route("/upload", post(upload_report))
        .route("/chat", post(chat))
        .route("/annotate", post(annotate_text))
        .route("/export_conversation", post(export_conversation))
        .route("/clear_session", post(clear_session))
        .route("/api/results/{session_id}", get(get_results))
        .route("/export_results/{session_id}/{format}", get(export_results))
        .route("/speak", post(speak))
        .route("/transcribe", post(transcribe))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Report Chat Service",
        "version": "1.0.0",
        "description": "Upload a medical report PDF and ask questions about it in plain language",
        "endpoints": {
            "POST /upload_pdf": "Upload a report, optionally into an existing session",
            "POST /upload": "Upload a report into a new session",
            "POST /chat": "Ask a question about the uploaded report",
            "POST /annotate": "Highlight lab values in text by severity",
            "POST /export_conversation": "Download the conversation as PDF",
            "POST /clear_session": "Forget a session",
            "GET /api/results/{session_id}": "Lab results of a session",
            "GET /export_results/{session_id}/{format}": "Download lab results as csv or pdf",
            "GET /capabilities": "Optional features available on this server",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    Json(Capabilities {
        llm: state.chat_model.is_configured(),
        ocr: state.ocr_available,
        speech_synthesis: state.text_to_speech.is_available(),
        speech_recognition: state.speech_to_text.is_available(),
    })
}

struct UploadForm {
    filename: String,
    data: Bytes,
    session_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut session_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, data));
            }
            "session_id" => {
                let value = field.text().await.map_err(multipart_error)?;
                let value = value.trim();
                if !value.is_empty() {
                    session_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| bad_request_error("No file provided"))?;
    validate_upload(&filename, &data)?;

    Ok(UploadForm {
        filename,
        data,
        session_id,
    })
}

fn validate_upload(filename: &str, data: &[u8]) -> Result<(), ApiError> {
    if filename.trim().is_empty() {
        return Err(bad_request_error("No file selected"));
    }
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(bad_request_error("File must be a PDF"));
    }
    if data.is_empty() {
        return Err(bad_request_error("Uploaded file is empty"));
    }
    Ok(())
}

/// Extract text and lab findings, then store them under `session_id`.
/// An existing session keeps its conversation.
async fn process_upload(
    state: &AppState,
    session_id: String,
    form: UploadForm,
) -> Result<(String, Vec<LabFinding>), ApiError> {
    info!(
        "Processing {} ({} bytes) for session {}",
        form.filename,
        form.data.len(),
        session_id
    );

    let extracted = state.extraction.extract(form.data).await.map_err(|e| {
        warn!("Extraction failed for {}: {}", form.filename, e);
        bad_request_error("Could not extract text from PDF")
    })?;

    let findings =
        extract_lab_findings(state.chat_model.as_ref(), &state.annotator, &extracted.text).await;

    let filename = form.filename.clone();
    let text = extracted.text.clone();
    let stored_findings = findings.clone();
    let refreshed = state
        .session_storage
        .update(
            &session_id,
            Box::new(move |session: &mut ChatSession| {
                session.replace_document(filename, text, stored_findings)
            }),
        )
        .await;

    match refreshed {
        Ok(()) => info!("Replaced report of session {}", session_id),
        Err(ReportError::SessionNotFound(_)) => {
            let mut session = ChatSession::new(&session_id, form.filename, &extracted.text);
            session.lab_findings = findings.clone();
            state
                .session_storage
                .save(session)
                .await
                .map_err(storage_error)?;
            info!("Created session {}", session_id);
        }
        Err(e) => return Err(storage_error(e)),
    }

    Ok((extracted.text, findings))
}

fn text_preview(text: &str) -> String {
    match text.char_indices().nth(TEXT_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

async fn upload_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<UploadPdfResponse> {
    let mut form = read_upload_form(multipart).await?;
    let session_id = form.session_id.take().unwrap_or_else(ChatSession::generate_id);

    let (text, lab_data) = process_upload(&state, session_id.clone(), form).await?;

    Ok(Json(UploadPdfResponse {
        success: true,
        session_id,
        message: "PDF processed successfully".to_string(),
        text_preview: text_preview(&text),
        has_lab_data: !lab_data.is_empty(),
        lab_data,
    }))
}

async fn upload_report(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<UploadReportResponse> {
    let form = read_upload_form(multipart).await?;
    let session_id = ChatSession::generate_id();

    let (_, lab_data) = process_upload(&state, session_id.clone(), form).await?;

    Ok(Json(UploadReportResponse {
        success: true,
        session_id,
        lab_data,
        message: "Medical report processed successfully".to_string(),
    }))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let (Some(session_id), Some(message)) =
        (required(request.session_id), required(request.message))
    else {
        return Err(bad_request_error("Session ID and message are required"));
    };
    let language =
        required(request.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let session = state
        .session_storage
        .get(&session_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| bad_request_error("Session not found. Please upload a PDF first."))?;

    info!("Chat message for session {} in {}", session_id, language);

    // the model call runs without holding the session entry
    let response =
        generate_reply(state.chat_model.as_ref(), &session, &message, &language).await;
    let annotated_response = state.annotator.annotate(&response);

    let question = ChatTurn::user(message);
    let answer = ChatTurn::assistant(response.clone());
    let chat_language = language.clone();
    state
        .session_storage
        .update(
            &session_id,
            Box::new(move |session: &mut ChatSession| {
                session.language = chat_language;
                session.push_exchange(question, answer, MAX_HISTORY_TURNS);
            }),
        )
        .await
        .map_err(|e| match e {
            ReportError::SessionNotFound(_) => {
                bad_request_error("Session not found. Please upload a PDF first.")
            }
            other => storage_error(other),
        })?;

    Ok(Json(ChatResponse {
        success: true,
        response,
        annotated_response,
        session_id,
    }))
}

async fn annotate_text(
    State(state): State<AppState>,
    Json(request): Json<AnnotateRequest>,
) -> ApiResult<AnnotateResponse> {
    Ok(Json(AnnotateResponse {
        annotated: state.annotator.annotate(&request.text),
        findings: state.annotator.findings(&request.text),
    }))
}

fn attachment(body: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_conversation(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Response, ApiError> {
    let session_id = required(request.session_id)
        .ok_or_else(|| bad_request_error("Session ID is required"))?;
    let session = state
        .session_storage
        .get(&session_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| bad_request_error("Session not found"))?;

    info!(
        "Exporting conversation of session {} ({} turns)",
        session_id,
        session.history.len()
    );

    let filename = conversation_file_name(session.short_id());
    let annotator = state.annotator.clone();
    let pdf = tokio::task::spawn_blocking(move || conversation_pdf(&annotator, &session.history))
        .await
        .map_err(|e| internal_error("Failed to generate PDF", &e.to_string()))?
        .map_err(|e| {
            error!("Conversation export failed for {}: {}", session_id, e);
            internal_error("Failed to generate PDF", &e.to_string())
        })?;

    Ok(attachment(pdf, "application/pdf", &filename))
}

async fn clear_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Value> {
    if let Some(session_id) = required(request.session_id) {
        let removed = state
            .session_storage
            .delete(&session_id)
            .await
            .map_err(storage_error)?;
        info!("Cleared session {} (existed: {})", session_id, removed);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Session cleared"
    })))
}

async fn find_session(state: &AppState, session_id: &str) -> Result<ChatSession, ApiError> {
    state
        .session_storage
        .get(session_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| not_found_error("Session not found", session_id))
}

async fn get_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<ResultsResponse> {
    let session = find_session(&state, &session_id).await?;

    Ok(Json(ResultsResponse {
        success: true,
        summary: LabSummary::from_findings(&session.lab_findings),
        lab_data: session.lab_findings,
        filename: session.filename,
        upload_time: session.uploaded_at.to_rfc3339(),
    }))
}

async fn export_results(
    State(state): State<AppState>,
    Path((session_id, format)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let format = format.to_ascii_lowercase();
    if format != "csv" && format != "pdf" {
        return Err(bad_request_error("Invalid format. Use csv or pdf"));
    }

    let session = find_session(&state, &session_id).await?;
    let filename = results_file_name(session.short_id(), &format);
    info!(
        "Exporting {} lab results of session {} as {}",
        session.lab_findings.len(),
        session_id,
        format
    );

    if format == "csv" {
        let csv = results_csv(&session.lab_findings);
        return Ok(attachment(csv.into_bytes(), "text/csv", &filename));
    }

    let pdf = tokio::task::spawn_blocking(move || {
        results_pdf(&session.lab_findings, &session.filename)
    })
    .await
    .map_err(|e| internal_error("Failed to generate PDF", &e.to_string()))?
    .map_err(|e| {
        error!("Results export failed for {}: {}", session_id, e);
        internal_error("Failed to generate PDF", &e.to_string())
    })?;

    Ok(attachment(pdf, "application/pdf", &filename))
}

fn speech_error(e: ReportError) -> ApiError {
    match e {
        ReportError::Unsupported(message) => not_implemented_error(&message),
        other => internal_error("Speech processing failed", &other.to_string()),
    }
}

async fn speak(
    State(state): State<AppState>,
    Json(request): Json<SpeakRequest>,
) -> Result<Response, ApiError> {
    if request.text.trim().is_empty() {
        return Err(bad_request_error("Text is required"));
    }
    let language = request
        .language
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let audio = state
        .text_to_speech
        .synthesize(&request.text, &language)
        .await
        .map_err(speech_error)?;

    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio).into_response())
}

async fn transcribe(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    audio: Bytes,
) -> ApiResult<TranscribeResponse> {
    if audio.is_empty() {
        return Err(bad_request_error("No audio provided"));
    }
    let language = params
        .language
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let text = state
        .speech_to_text
        .transcribe(&audio, &language)
        .await
        .map_err(speech_error)?;

    Ok(Json(TranscribeResponse { text }))
}
