//! Canned model implementations and episode builders for end-to-end
//! scenario tests: deterministic stand-ins for the chat, abstraction, and
//! embedding contracts `reveries_core` depends on, so a full pass can run
//! without a network call in sight.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use reveries_core::{AbstractionModel, ChatMessage, ChatModel, EmbeddingModel, Episode, ModelError};

/// Streams back a fixed reply, one word at a time, ignoring the prompt.
pub struct ScriptedChatModel {
    reply: String,
}

impl ScriptedChatModel {
    pub fn new(reply: impl Into<String>) -> Self {
        ScriptedChatModel { reply: reply.into() }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn stream(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
    ) -> Result<futures_util::stream::BoxStream<'static, Result<String, ModelError>>, ModelError> {
        let chunks: Vec<Result<String, ModelError>> = self
            .reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Returns a queue of canned JSON replies, one per call; repeats the last
/// entry once the queue is exhausted so tests don't have to size it exactly.
pub struct ScriptedAbstractionModel {
    replies: Mutex<Vec<String>>,
}

impl ScriptedAbstractionModel {
    pub fn new(replies: Vec<String>) -> Self {
        ScriptedAbstractionModel {
            replies: Mutex::new(replies),
        }
    }

    pub fn one(reply: impl Into<String>) -> Self {
        Self::new(vec![reply.into()])
    }
}

#[async_trait]
impl AbstractionModel for ScriptedAbstractionModel {
    async fn abstract_experiences(&self, _prompt: &str) -> Result<String, ModelError> {
        let mut queue = self.replies.lock().unwrap();
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            Ok(queue.first().cloned().unwrap_or_else(|| "{}".to_string()))
        }
    }
}

/// Embeds by exact-text lookup, falling back to a stable hash-derived
/// vector so unregistered text still gets a deterministic embedding rather
/// than a test failure.
pub struct LookupEmbeddingModel {
    vectors: HashMap<String, Vec<f32>>,
}

impl LookupEmbeddingModel {
    pub fn new() -> Self {
        LookupEmbeddingModel {
            vectors: HashMap::new(),
        }
    }

    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

impl Default for LookupEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingModel for LookupEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        if let Some(v) = self.vectors.get(text) {
            return Ok(v.clone());
        }
        let mut hash: u32 = 2166136261;
        for byte in text.bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(16777619);
        }
        let a = ((hash & 0xff) as f32) / 255.0;
        let b = (((hash >> 8) & 0xff) as f32) / 255.0;
        let c = (((hash >> 16) & 0xff) as f32) / 255.0;
        Ok(vec![a, b, c])
    }
}

/// Builds an episode with the given id/embedding/salience, no links.
pub fn episode(id: &str, summary: &str, embedding: Vec<f32>, salience: f32) -> Episode {
    let mut ep = Episode::new(id.to_string(), summary.to_string(), embedding, Utc::now());
    ep.salience = salience;
    ep
}
