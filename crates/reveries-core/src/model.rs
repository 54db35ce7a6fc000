//! Contracts the core demands of its external collaborators: the chat
//! completion model, the abstraction/consolidation model, and the embedding
//! service. Concrete HTTP clients live in the daemon crate; the core only
//! ever sees these traits, so tests can substitute mocks.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

/// One exchanged message in a chat completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Error)]
pub enum ModelError {
    /// Timeouts, connection refused/reset, DNS failures, generic "fetch failed".
    #[error("network error: {0}")]
    Network(String),
    /// A reply that doesn't parse as the contract demands.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ModelError {
    pub fn is_network(&self) -> bool {
        matches!(self, ModelError::Network(_))
    }
}

/// Streaming chat completion. `stream` must surface errors to the caller
/// rather than swallowing them — the conversation handler reports them to
/// the client and the monologue loop treats network-class errors specially.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError>;
}

/// One candidate episode as returned by the abstraction model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExemplarInput {
    pub quote: String,
    #[serde(default)]
    pub significance: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeCandidate {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_salience")]
    pub salience: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub exemplars: Vec<ExemplarInput>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_salience() -> f32 {
    0.3
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbstractionReply {
    #[serde(default)]
    pub episodes: Vec<EpisodeCandidate>,
    #[serde(default)]
    pub self_model_updates: crate::self_model::SelfModelUpdates,
}

/// Non-streaming abstraction/consolidation call. Implementations receive the
/// already-built prose prompt (narrative + enumerated past-tense
/// experiences) and must return raw text; fence-stripping and JSON parsing
/// happen in the consolidation engine, not here, so the contract stays a
/// plain text-in/text-out call.
#[async_trait]
pub trait AbstractionModel: Send + Sync {
    async fn abstract_experiences(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Embeds text into the daemon's configured vector space. Dimensionality is
/// constant for the lifetime of one daemon process; the core treats vectors
/// as opaque.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Strips surrounding Markdown code fences (```json ... ``` or ``` ... ```)
/// before a parse attempt, tolerating the abstraction model's habit of
/// wrapping replies.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches("json").trim_start();
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    trimmed
}
