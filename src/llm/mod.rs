//! Generative model seam.
//!
//! Every model call in the system is an explicit typed request/response pair
//! behind this trait; malformed output is interpreted by callers (e.g. the
//! query generator treats unparseable plans as `GenerationFailed`), while
//! transport and protocol failures surface as `RagentError::Model`.

use crate::error::{RagentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat-style text completion against an external generative model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete with a system context and a user message, returning the
    /// generated text verbatim.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client with exponential-backoff retry
/// on 429/5xx.
pub struct OpenAiChatModel {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    max_output_tokens: usize,
    temperature: f32,
    max_retries: usize,
}

impl OpenAiChatModel {
    pub fn new(
        api_base: String,
        api_key: String,
        model: String,
        max_output_tokens: usize,
        temperature: f32,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_base,
            api_key,
            model,
            max_output_tokens,
            temperature,
            max_retries: 2,
        }
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagentError::Model(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagentError::Model(format!(
                "Model API error {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagentError::Model(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content)
    }
}

#[async_trait]
impl CompletionModel for OpenAiChatModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.complete_once(system, user).await {
                Ok(text) => {
                    log::debug!(
                        "Model call took {:?} (attempt {})",
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries => {
                    let msg = e.to_string();
                    let should_retry = msg.contains("429")
                        || msg.contains("500")
                        || msg.contains("502")
                        || msg.contains("503")
                        || msg.contains("504");

                    if should_retry {
                        log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    } else {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted model fakes shared by agent and generator tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued responses in order; repeats the last one when drained.
    pub struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
        last: Mutex<Option<String>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                last: Mutex::new(None),
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(text) => {
                    *self.last.lock().unwrap() = Some(text.clone());
                    Ok(text)
                }
                None => {
                    let last = self.last.lock().unwrap().clone();
                    last.ok_or_else(|| RagentError::Model("no scripted response".to_string()))
                }
            }
        }
    }

    /// Always fails with a model service error.
    pub struct FailingModel;

    #[async_trait]
    impl CompletionModel for FailingModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(RagentError::Model("model service unreachable".to_string()))
        }
    }
}
