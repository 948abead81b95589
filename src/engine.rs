// Runs one attempt against the configured provider: build the prompt, stream
// the completion, then judge whether the level secret leaked.

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, Stream, StreamExt};
use log::info;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::detect::{detect_jailbreaks, Detection};
use crate::level::Level;
use crate::provider::{ModelEvent, ModelProvider, EMPTY_STREAM_MESSAGE};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub success: bool,
    pub detectors: Detection,
    pub elapsed_sec: f64,
    pub model: String,
    pub endpoint: String,
    pub full_output: String,
}

/// One line of the `/attack` stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AttemptEvent {
    Chunk(String),
    Complete(AttemptOutcome),
    Error(String),
}

impl AttemptEvent {
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self).map(|mut line| {
            line.push('\n');
            line
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptMeta {
    pub elapsed_sec: f64,
    pub model: String,
    pub endpoint: String,
}

/// Non-streaming result of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptResult {
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
    pub detectors: Detection,
    pub meta: AttemptMeta,
}

struct AttemptState {
    rx: mpsc::Receiver<ModelEvent>,
    level: Level,
    user_input: String,
    model: String,
    endpoint: String,
    started: Instant,
    full_output: String,
    finished: bool,
}

impl AttemptState {
    fn outcome(&mut self) -> AttemptOutcome {
        let elapsed_sec = (self.started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
        let full_output = std::mem::take(&mut self.full_output);
        let success = self.level.leaked_in(&full_output);
        let detectors = detect_jailbreaks(&self.user_input, &full_output);

        info!(
            "attempt complete - level={} success={} suspicious={} elapsed={:.3}s",
            self.level.id, success, detectors.suspicious, elapsed_sec
        );

        AttemptOutcome {
            success,
            detectors,
            elapsed_sec,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            full_output,
        }
    }

    async fn next_event(&mut self) -> Option<AttemptEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Some(ModelEvent::Token(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.full_output.push_str(&text);
                    return Some(AttemptEvent::Chunk(text));
                }
                Some(ModelEvent::Done) => {
                    self.finished = true;
                    return Some(AttemptEvent::Complete(self.outcome()));
                }
                Some(ModelEvent::Error(message)) => {
                    self.finished = true;
                    return Some(AttemptEvent::Error(message));
                }
                // Provider task ended without a terminal event.
                None => {
                    self.finished = true;
                    return Some(if self.full_output.is_empty() {
                        AttemptEvent::Error(EMPTY_STREAM_MESSAGE.to_string())
                    } else {
                        AttemptEvent::Complete(self.outcome())
                    });
                }
            }
        }
    }
}

/// Streams one attempt. Yields any number of `Chunk`s followed by exactly one
/// `Complete` or `Error`. Dropping the stream stops the provider call.
pub fn stream_attempt(
    provider: Arc<dyn ModelProvider>,
    level: Level,
    user_input: String,
) -> impl Stream<Item = AttemptEvent> + Send + 'static {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let prompt = level.build_prompt(&user_input);

    let state = AttemptState {
        rx,
        model: provider.model().to_owned(),
        endpoint: provider.endpoint().to_owned(),
        level,
        user_input,
        started: Instant::now(),
        full_output: String::new(),
        finished: false,
    };

    tokio::spawn(async move {
        provider.stream_completion(&prompt, tx).await;
    });

    stream::unfold(state, |mut state| async move {
        state.next_event().await.map(|event| (event, state))
    })
}

pub async fn run_attempt(
    provider: Arc<dyn ModelProvider>,
    level: Level,
    user_input: String,
) -> AttemptResult {
    let model = provider.model().to_owned();
    let endpoint = provider.endpoint().to_owned();
    let events = stream_attempt(provider, level, user_input)
        .collect::<Vec<_>>()
        .await;

    let failed = |message: String| AttemptResult {
        output: String::new(),
        success: false,
        error: Some(message),
        detectors: Detection::default(),
        meta: AttemptMeta {
            elapsed_sec: 0.0,
            model: model.clone(),
            endpoint: endpoint.clone(),
        },
    };

    match events.into_iter().last() {
        Some(AttemptEvent::Complete(outcome)) => AttemptResult {
            output: outcome.full_output,
            success: outcome.success,
            error: None,
            detectors: outcome.detectors,
            meta: AttemptMeta {
                elapsed_sec: outcome.elapsed_sec,
                model: outcome.model,
                endpoint: outcome.endpoint,
            },
        },
        Some(AttemptEvent::Error(message)) => failed(message),
        _ => failed(EMPTY_STREAM_MESSAGE.to_string()),
    }
}
