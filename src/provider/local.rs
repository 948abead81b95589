// Ollama `/api/generate` client. The runtime answers with newline-delimited
// JSON objects, each carrying a `response` fragment, the last one `done: true`.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{ModelEvent, ModelProvider, ProviderError, EMPTY_STREAM_MESSAGE};
use crate::level::ModelPrompt;
use crate::util::config::{LocalConfig, ProviderKind};

pub struct LocalProvider {
    http: reqwest::Client,
    config: LocalConfig,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct GenerateLine {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl LocalProvider {
    pub fn new(config: LocalConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            config,
        })
    }
}

#[async_trait]
impl ModelProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> &str {
        &self.config.url
    }

    async fn stream_completion(&self, prompt: &ModelPrompt, tx: mpsc::Sender<ModelEvent>) {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt.to_sectioned_text(),
            "stream": true,
        });

        debug!("Sending request to Ollama, model {}", self.config.model);
        let response = match self
            .http
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Error calling Ollama: {e}");
                let _ = tx.send(ModelEvent::Error(describe_error(&e))).await;
                return;
            }
        };

        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut received_text = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Error during Ollama streaming: {e}");
                    let _ = tx.send(ModelEvent::Error(describe_error(&e))).await;
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if !forward_line(&line, &tx, &mut received_text).await {
                    return;
                }
            }
        }

        // Trailing line without a newline.
        if !buffer.is_empty() && !forward_line(&buffer, &tx, &mut received_text).await {
            return;
        }

        // Body ended without `done: true`.
        let event = if received_text {
            ModelEvent::Done
        } else {
            ModelEvent::Error(EMPTY_STREAM_MESSAGE.to_string())
        };
        let _ = tx.send(event).await;
    }
}

/// Handles one NDJSON line. Returns `false` once the stream is finished or
/// the receiver is gone.
async fn forward_line(
    line: &[u8],
    tx: &mpsc::Sender<ModelEvent>,
    received_text: &mut bool,
) -> bool {
    let Some(parsed) = parse_generate_line(line) else {
        debug!("Non-JSON line in stream: {:?}", String::from_utf8_lossy(line));
        return true;
    };

    if let Some(message) = parsed.error {
        let _ = tx.send(ModelEvent::Error(message)).await;
        return false;
    }
    if let Some(text) = parsed.response.filter(|text| !text.is_empty()) {
        *received_text = true;
        if tx.send(ModelEvent::Token(text)).await.is_err() {
            return false;
        }
    }
    if parsed.done {
        let _ = tx.send(ModelEvent::Done).await;
        return false;
    }
    true
}

pub(crate) fn parse_generate_line(line: &[u8]) -> Option<GenerateLine> {
    let trimmed = std::str::from_utf8(line).ok()?.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn describe_error(e: &reqwest::Error) -> String {
    match e.status() {
        Some(status) => format!("API returned status {status}"),
        None => format!("Network error: {e}"),
    }
}
