#[cfg(feature = "llama")]
pub mod local;
pub mod remote;
pub mod response;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

pub use response::parse_decision;

/// Default number of attempts for a single decision-maker call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// Decision maker capability
// ---------------------------------------------------------------------------

/// Anything that turns a rendered prompt into raw model text.
///
/// Implementations report transport problems as errors; retrying is the
/// caller's job (see [`invoke_with_retry`]).
pub trait DecisionMaker {
    fn invoke(&mut self, prompt: &str) -> Result<String>;
}

impl<F> DecisionMaker for F
where
    F: FnMut(&str) -> Result<String>,
{
    fn invoke(&mut self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// Call the decision maker up to `max_attempts` times, returning the first
/// successful response.
pub fn invoke_with_retry(
    maker: &mut dyn DecisionMaker,
    prompt: &str,
    max_attempts: u32,
) -> Result<String, EvalError> {
    let attempts = max_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match maker.invoke(prompt) {
            Ok(text) => {
                debug!("Decision maker answered on attempt {attempt}");
                return Ok(text);
            }
            Err(e) => {
                warn!("Decision maker error (attempt {attempt}/{attempts}): {e:#}");
                last = format!("{e:#}");
            }
        }
    }

    Err(EvalError::TransportFailure { attempts, last })
}

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Settings for whichever backend `--model` resolves to.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Maximum tokens to generate per completion.
    pub max_tokens: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            api_base: remote::DEFAULT_API_BASE.into(),
            api_key: None,
            temperature: 1.0,
            timeout_secs: 120,
            n_gpu_layers: 0,
            n_ctx: 8092,
            max_tokens: 1024,
        }
    }
}

impl BackendConfig {
    /// A model ending in `.gguf` is a local weights file; anything else is a
    /// model name for the chat-completions endpoint.
    pub fn is_local(&self) -> bool {
        self.model.to_ascii_lowercase().ends_with(".gguf")
    }
}

/// Build the decision maker `config` asks for.
pub fn connect(config: &BackendConfig) -> Result<Box<dyn DecisionMaker>> {
    if config.is_local() {
        #[cfg(feature = "llama")]
        {
            let model = local::LocalModel::load(config)?;
            return Ok(Box::new(model));
        }
        #[cfg(not(feature = "llama"))]
        anyhow::bail!(
            "'{}' looks like a GGUF file but this build has no local backend (enable the `llama` feature)",
            config.model
        );
    }

    Ok(Box::new(remote::RemoteModel::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_returns_first_success() {
        let mut calls = 0;
        let mut flaky = |_: &str| -> Result<String> {
            calls += 1;
            if calls < 3 {
                anyhow::bail!("connection reset")
            }
            Ok("{\"choice\": \"A\"}".to_string())
        };
        let text = invoke_with_retry(&mut flaky, "prompt", 10).unwrap();
        assert_eq!(text, "{\"choice\": \"A\"}");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_gives_up_at_ceiling() {
        let mut calls = 0u32;
        let mut down = |_: &str| -> Result<String> {
            calls += 1;
            anyhow::bail!("503 service unavailable")
        };
        let err = invoke_with_retry(&mut down, "prompt", 4).unwrap_err();
        match err {
            EvalError::TransportFailure { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_local_model_detection() {
        let mut config = BackendConfig::default();
        assert!(!config.is_local());
        config.model = "./models/qwen2.5-3b-instruct-q4_k_m.GGUF".into();
        assert!(config.is_local());
    }
}
