use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Document is unreadable: {0}")]
    Unreadable(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Unsupported capability: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;
