use anyhow::anyhow;
use async_trait::async_trait;
use report_kit::ChatSession;
use rig::{client::CompletionClient, completion::Prompt, providers::gemini};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    prompts::{ASSISTANT_PREAMBLE, chat_prompt},
};

/// A text-in, text-out language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Whether calls can reach a real model.
    fn is_configured(&self) -> bool;

    async fn complete(&self, preamble: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Gemini through rig, trying each configured model until one answers.
pub struct GeminiChatModel {
    client: gemini::Client,
    models: Vec<String>,
}

impl GeminiChatModel {
    pub fn new(api_key: &str, models: Vec<String>) -> Self {
        Self {
            client: gemini::Client::new(api_key),
            models,
        }
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, preamble: &str, prompt: &str) -> anyhow::Result<String> {
        let mut first_error = None;

        for model in &self.models {
            let agent = self.client.agent(model).preamble(preamble).build();
            match agent.prompt(prompt).await {
                Ok(response) => {
                    info!("{} answered ({} characters)", model, response.len());
                    return Ok(response);
                }
                Err(e) => {
                    warn!("Gemini model {} failed: {}", model, e);
                    first_error.get_or_insert_with(|| anyhow!("{} failed: {}", model, e));
                }
            }
        }

        Err(first_error.unwrap_or_else(|| anyhow!("No Gemini models configured")))
    }
}

/// Stand-in used when no API key is configured.
pub struct OfflineChatModel;

#[async_trait]
impl ChatModel for OfflineChatModel {
    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(&self, _preamble: &str, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow!("GEMINI_API_KEY environment variable not set"))
    }
}

pub fn create_chat_model(config: &AppConfig) -> Arc<dyn ChatModel> {
    match &config.gemini_api_key {
        Some(api_key) => {
            info!("Gemini API configured with models {:?}", config.gemini_models);
            Arc::new(GeminiChatModel::new(api_key, config.gemini_models.clone()))
        }
        None => {
            warn!("GEMINI_API_KEY environment variable not set, answers will be placeholders");
            Arc::new(OfflineChatModel)
        }
    }
}

pub fn offline_reply(language: &str) -> String {
    format!(
        "I understand your question about the medical report. However, the Gemini API key is not configured. \
        Please set up your API key to get personalized medical explanations in {}. \
        In the meantime, I recommend discussing your report with your healthcare provider.",
        language
    )
}

/// Answer a patient question about the session's report. Model failures
/// become an apology in the reply rather than an error.
pub async fn generate_reply(
    model: &dyn ChatModel,
    session: &ChatSession,
    message: &str,
    language: &str,
) -> String {
    if !model.is_configured() {
        return offline_reply(language);
    }

    let prompt = chat_prompt(&session.extracted_text, &session.history, message, language);
    match model.complete(ASSISTANT_PREAMBLE, &prompt).await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to generate reply for session {}: {}", session.id, e);
            format!(
                "I apologize, but I'm having trouble generating a response right now. \
                Please try again or consult with your healthcare provider. Error: {}",
                e
            )
        }
    }
}
