use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{BackendConfig, ChatMessage, DecisionMaker};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// A model served behind an OpenAI-compatible `/chat/completions` endpoint.
pub struct RemoteModel {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl RemoteModel {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let endpoint = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));
        info!("Using remote model '{}' at {endpoint}", config.model);

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

impl DecisionMaker for RemoteModel {
    /// One user-role message in, first completion's text out.
    fn invoke(&mut self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage::user(prompt)],
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: CompletionResponse = request
            .send()
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion returned an error status")?
            .json()
            .context("unexpected chat completion payload")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("chat completion had no content")?;

        debug!("=== REMOTE OUTPUT ({} chars) ===\n{content}", content.len());
        Ok(content)
    }
}
