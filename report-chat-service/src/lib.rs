pub mod config;
pub mod export;
pub mod extract;
pub mod labs;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod service;
pub mod speech;

pub use config::AppConfig;
pub use service::{AppState, build_router, create_app};
