pub mod annotate;
pub mod error;
pub mod lab;
pub mod session;

// Re-export commonly used types
pub use annotate::{
    Annotator, AnnotatorConfig, Mark, MarkSource, Segment, SeverityRule, annotate, scan_findings,
};
pub use error::{ReportError, Result};
pub use lab::{LabFinding, LabSummary, Severity};
pub use session::{
    ChatSession, ChatTurn, DEFAULT_LANGUAGE, InMemorySessionStorage, MAX_HISTORY_TURNS, Role,
    SessionStorage, SessionUpdate,
};
