// Language-model providers. Exactly one is selected at startup from
// `BACKEND_MODEL` and shared by every request.

pub mod hosted;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::level::ModelPrompt;
use crate::util::config::{Config, ProviderKind};

pub use hosted::HostedProvider;
pub use local::LocalProvider;

pub const EMPTY_STREAM_MESSAGE: &str = "Stream ended unexpectedly without any content";

/// One step of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Token(String),
    Done,
    Error(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Where requests go, for diagnostics. Never contains credentials.
    fn endpoint(&self) -> &str;

    /// Streams the completion for `prompt` into `tx`, ending with exactly one
    /// `Done` or `Error`. Returns early once the receiver is dropped.
    async fn stream_completion(&self, prompt: &ModelPrompt, tx: mpsc::Sender<ModelEvent>);
}

pub fn build_provider(config: &Config) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    let provider: Arc<dyn ModelProvider> = match config.backend_model {
        ProviderKind::Hosted => Arc::new(HostedProvider::new(config.openai.clone())?),
        ProviderKind::Local => Arc::new(LocalProvider::new(config.ollama.clone())?),
    };
    info!(
        "Using {} provider, model {} at {}",
        provider.kind(),
        provider.model(),
        provider.endpoint()
    );
    Ok(provider)
}
