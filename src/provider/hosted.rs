// OpenAI chat-completions streaming client using reqwest-eventsource.
//
// The level's system prompt and the player's text are sent as separate chat
// messages; deltas are forwarded as `ModelEvent::Token` until `data: [DONE]`.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ModelEvent, ModelProvider, ProviderError, EMPTY_STREAM_MESSAGE};
use crate::level::ModelPrompt;
use crate::util::config::{HostedConfig, ProviderKind};

pub const MISSING_KEY_MESSAGE: &str = "OpenAI client not initialized. Check OPENAI_API_KEY.";

const DONE_SENTINEL: &str = "[DONE]";

pub struct HostedProvider {
    http: reqwest::Client,
    config: HostedConfig,
    endpoint: String,
}

impl HostedProvider {
    pub fn new(config: HostedConfig) -> Result<Self, ProviderError> {
        let endpoint = format!("{}/chat/completions", config.base_url);
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            config,
            endpoint,
        })
    }
}

#[async_trait]
impl ModelProvider for HostedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn stream_completion(&self, prompt: &ModelPrompt, tx: mpsc::Sender<ModelEvent>) {
        let Some(api_key) = self.config.api_key.as_deref() else {
            let _ = tx
                .send(ModelEvent::Error(MISSING_KEY_MESSAGE.to_string()))
                .await;
            return;
        };

        let body = serde_json::json!({
            "model": self.config.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": prompt.system_message() },
                { "role": "user", "content": prompt.user },
            ]
        });

        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(self.config.timeout)
            .json(&body);

        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(ModelEvent::Error(format!(
                        "Failed to create event source: {e}"
                    )))
                    .await;
                return;
            }
        };

        let mut received_text = false;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == DONE_SENTINEL {
                        es.close();
                        let _ = tx.send(ModelEvent::Done).await;
                        return;
                    }
                    if let Some(message) = parse_error_message(&msg.data) {
                        es.close();
                        let _ = tx.send(ModelEvent::Error(message)).await;
                        return;
                    }
                    match parse_delta_content(&msg.data) {
                        Some(text) if !text.is_empty() => {
                            received_text = true;
                            if tx.send(ModelEvent::Token(text)).await.is_err() {
                                // Receiver dropped, the client went away.
                                es.close();
                                return;
                            }
                        }
                        _ => debug!("ignoring SSE payload without content"),
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    es.close();
                    let event = if received_text {
                        ModelEvent::Done
                    } else {
                        ModelEvent::Error(EMPTY_STREAM_MESSAGE.to_string())
                    };
                    let _ = tx.send(event).await;
                    return;
                }
                Err(err) => {
                    warn!("OpenAI stream error: {err}");
                    es.close();
                    let _ = tx.send(ModelEvent::Error(extract_error_message(&err))).await;
                    return;
                }
            }
        }

        let _ = tx.send(ModelEvent::Done).await;
    }
}

/// Extract `choices[0].delta.content` from a streamed chunk.
///
/// Expected shape: `{ "choices": [ { "delta": { "content": "..." } } ] }`
pub(crate) fn parse_delta_content(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_owned)
}

/// Extract `error.message` from an in-stream error payload.
pub(crate) fn parse_error_message(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_owned)
}

pub(crate) fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("API returned status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error: {e}")
        }
        other => format!("Stream error: {other}"),
    }
}
