//! Chat-completions transport for scene generation, critique and repair.

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use super::config::ReelConfig;
use crate::ui::prelude::{Level, emit};
use crate::ui::progress::Spinner;

const TEMPERATURE: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("model returned an empty response")]
    Empty,
}

/// One chat request; `json_mode` asks for a strict JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn json(system: &str, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.to_string()),
            user: user.into(),
            json_mode: true,
        }
    }

    pub fn free_text(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            json_mode: false,
        }
    }
}

pub trait SceneModel {
    /// Trimmed text of the first choice
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiChat {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &ReelConfig, api_key: String) -> Result<Self, ModelError> {
        Self::with_model(config, api_key, config.model.clone())
    }

    pub fn with_model(
        config: &ReelConfig,
        api_key: String,
        model: String,
    ) -> Result<Self, ModelError> {
        // reqwest's blocking client defaults to a 30s timeout; None disables it
        let client = Client::builder()
            .timeout(config.model_timeout())
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": TEMPERATURE,
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

impl SceneModel for OpenAiChat {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        emit(
            Level::Debug,
            "reel.model.request",
            &format!(
                "Calling {} ({} chars, json={})",
                self.model,
                request.user.len(),
                request.json_mode
            ),
            None,
        );

        let spinner = Spinner::start(format!("Waiting for {}", self.model));
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&self.body(request))
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let parsed: ChatResponse = resp.json()?;
        spinner.finish();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::Empty);
        }

        emit(
            Level::Debug,
            "reel.model.response",
            &format!("Model returned {} chars", text.len()),
            None,
        );
        Ok(text)
    }
}
