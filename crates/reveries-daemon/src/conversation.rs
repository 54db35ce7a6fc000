//! Orchestrates one conversation turn: session tracking, partner-name
//! detection, retrieval, context assembly, streamed reply, and exchange
//! encoding. One conversation is active at a time — this is a single-user
//! daemon, not a multi-tenant chat server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use regex::Regex;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use reveries_core::{
    retrieve, ChatMessage, ChatModel, ChatRole, ContextAssembler, ContextInput, EmbeddingModel,
    EpisodeGraph, ExperienceEncoder, ExperienceKind, ModelError, MonologueLoop,
    RawExperienceMetadata, SelfModelManager, Store, StorageError,
};

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

const FALSE_POSITIVE_NAMES: &[&str] = &[
    "just", "here", "back", "fine", "okay", "great", "sorry", "glad", "happy", "sure", "not",
    "also", "still", "now", "always",
];

/// Introduction phrases the partner-name detector pattern-matches against.
/// Each pattern captures the candidate name as group 1.
fn intro_patterns() -> Vec<Regex> {
    [
        r"(?i)\bi'?m\s+([A-Za-z][\w'-]*)",
        r"(?i)\bmy name is\s+([A-Za-z][\w'-]*)",
        r"(?i)\bcall me\s+([A-Za-z][\w'-]*)",
        r"(?i)\bthis is\s+([A-Za-z][\w'-]*)",
        r"(?i)\bi go by\s+([A-Za-z][\w'-]*)",
        r"(?i)\bpeople call me\s+([A-Za-z][\w'-]*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static patterns compile"))
    .collect()
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

struct Session {
    conversation_id: String,
    history: Vec<ChatMessage>,
}

pub struct ConversationHandler {
    store: Arc<dyn Store>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    chat_model: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingModel>,
    encoder: Arc<ExperienceEncoder>,
    monologue: Arc<MonologueLoop>,
    history_turns: usize,
    intro_patterns: Vec<Regex>,
    session: Mutex<Option<Session>>,
}

impl ConversationHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<Mutex<EpisodeGraph>>,
        self_model: Arc<SelfModelManager>,
        chat_model: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        encoder: Arc<ExperienceEncoder>,
        monologue: Arc<MonologueLoop>,
        history_turns: usize,
    ) -> Self {
        ConversationHandler {
            store,
            graph,
            self_model,
            chat_model,
            embedder,
            encoder,
            monologue,
            history_turns,
            intro_patterns: intro_patterns(),
            session: Mutex::new(None),
        }
    }

    /// Pattern-matches `message` against the introduction phrase list,
    /// rejecting captures that land on the fixed false-positive list.
    fn detect_partner_name(&self, message: &str) -> Option<String> {
        for pattern in &self.intro_patterns {
            let Some(caps) = pattern.captures(message) else {
                continue;
            };
            let Some(candidate) = caps.get(1) else {
                continue;
            };
            let trimmed = candidate.as_str().trim_matches(|c: char| !c.is_alphanumeric());
            if trimmed.is_empty() {
                continue;
            }
            if FALSE_POSITIVE_NAMES.contains(&trimmed.to_lowercase().as_str()) {
                continue;
            }
            return Some(capitalize(trimmed));
        }
        None
    }

    /// Switches the active session if `conversation_id` differs from it,
    /// opening a gap for whatever session just ended and closing out any
    /// previously-opened gap for the incoming one. Returns the resumption
    /// gap in seconds, but only on the first message of a new session —
    /// later turns in the same session always get `None`.
    async fn enter_session(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, ConversationError> {
        let mut session = self.session.lock().await;
        let is_new = session
            .as_ref()
            .map(|s| s.conversation_id != conversation_id)
            .unwrap_or(true);
        if !is_new {
            return Ok(None);
        }

        if let Some(previous) = session.take() {
            self.store.open_gap(&previous.conversation_id, now).await?;
        }
        let gap = self.store.close_gap(conversation_id, now, None).await?;

        *session = Some(Session {
            conversation_id: conversation_id.to_string(),
            history: Vec::new(),
        });

        Ok(gap.and_then(|g| g.duration_seconds))
    }

    /// Opens a gap for the active session, if any — called on shutdown so a
    /// silence that started mid-process is still tracked.
    pub async fn end_active_session(&self) -> Result<(), ConversationError> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.take() {
            self.store.open_gap(&active.conversation_id, Utc::now()).await?;
        }
        Ok(())
    }

    /// Handles one turn: pauses the monologue loop for the duration of the
    /// reply, streams reply chunks to `chunk_tx`, and resumes the monologue
    /// loop with the finished exchange as its next seed.
    pub async fn handle(
        &self,
        message: &str,
        conversation_id: &str,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<(), ConversationError> {
        self.monologue.pause();

        let now = Utc::now();
        let gap_seconds = self.enter_session(conversation_id, now).await?;

        if !self.self_model.snapshot().await.has_partner() {
            if let Some(name) = self.detect_partner_name(message) {
                self.self_model.set_partner_name(&name, false).await?;
            }
        }

        let memories = match self.embedder.embed(message).await {
            Ok(embedding) => {
                let mut graph = self.graph.lock().await;
                let results = retrieve(&mut graph, &embedding, 10, 3, 0.5, 0.01);
                info!(count = results.len(), "retrieved memories for conversation turn");
                results
            }
            Err(e) => {
                warn!(error = %e, "embedding failed for conversation turn, proceeding with no memories");
                Vec::new()
            }
        };

        let monologue_echo = self.monologue.recent_buffer().await;
        let monologue_echo = if monologue_echo.trim().is_empty() {
            None
        } else {
            Some(monologue_echo.as_str())
        };

        let self_model_snapshot = self.self_model.snapshot().await;
        let context = ContextAssembler::assemble(&ContextInput {
            self_model: Some(&self_model_snapshot),
            memories: &memories,
            gap_seconds,
            monologue_echo,
        });

        let mut messages = {
            let session = self.session.lock().await;
            session
                .as_ref()
                .map(|s| s.history.clone())
                .unwrap_or_default()
        };
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: message.to_string(),
        });

        let mut stream = self.chat_model.stream(&context, &messages).await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            reply.push_str(&chunk);
            if chunk_tx.send(chunk).is_err() {
                warn!("conversation client disconnected mid-stream");
                break;
            }
        }

        {
            let mut session = self.session.lock().await;
            if let Some(active) = session.as_mut() {
                active.history.push(ChatMessage {
                    role: ChatRole::User,
                    content: message.to_string(),
                });
                active.history.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: reply.clone(),
                });
                let cap = self.history_turns * 2;
                if active.history.len() > cap {
                    let overflow = active.history.len() - cap;
                    active.history.drain(0..overflow);
                }
            }
        }

        let exchange = format!("User: {message}\n\nAssistant: {reply}");
        if let Err(e) = self
            .encoder
            .encode(
                &exchange,
                ExperienceKind::Conversation,
                RawExperienceMetadata {
                    conversation_id: Some(conversation_id.to_string()),
                    turn_count: 1,
                    topics: Vec::new(),
                    unresolved_tensions: Vec::new(),
                },
            )
            .await
        {
            warn!(error = %e, "failed to encode conversation exchange");
        }

        self.monologue.resume_after_conversation(exchange).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_patterns() -> Vec<Regex> {
        intro_patterns()
    }

    fn detect(message: &str) -> Option<String> {
        let patterns = handler_patterns();
        for pattern in &patterns {
            if let Some(caps) = pattern.captures(message) {
                if let Some(candidate) = caps.get(1) {
                    let trimmed = candidate.as_str().trim_matches(|c: char| !c.is_alphanumeric());
                    if trimmed.is_empty() {
                        continue;
                    }
                    if FALSE_POSITIVE_NAMES.contains(&trimmed.to_lowercase().as_str()) {
                        continue;
                    }
                    return Some(capitalize(trimmed));
                }
            }
        }
        None
    }

    #[test]
    fn detects_common_introduction_phrases() {
        assert_eq!(detect("hi, I'm Sarah"), Some("Sarah".to_string()));
        assert_eq!(detect("my name is Priya, nice to meet you"), Some("Priya".to_string()));
        assert_eq!(detect("call me Max"), Some("Max".to_string()));
        assert_eq!(detect("people call me Jo"), Some("Jo".to_string()));
    }

    #[test]
    fn rejects_false_positive_captures() {
        assert_eq!(detect("I'm just checking in"), None);
        assert_eq!(detect("I'm fine, thanks"), None);
        assert_eq!(detect("I'm not sure about this"), None);
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(detect("what's the weather like today?"), None);
    }

    use futures_util::stream;
    use reveries_core::{CircuitBreaker, MonologueConfig, SqliteStore};
    use tokio::sync::mpsc as tokio_mpsc;

    /// Embeds every text to the same fixed vector — the scenarios below don't
    /// exercise retrieval, just that the right messages reach the model.
    struct FixedEmbeddingModel;

    #[async_trait::async_trait]
    impl EmbeddingModel for FixedEmbeddingModel {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    /// Records the `messages` slice of every `stream` call, ignoring `system`,
    /// and replies with a fixed string.
    struct RecordingChatModel {
        calls: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl RecordingChatModel {
        fn new() -> Self {
            RecordingChatModel {
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for RecordingChatModel {
        async fn stream(
            &self,
            _system: &str,
            messages: &[ChatMessage],
        ) -> Result<futures_util::stream::BoxStream<'static, Result<String, ModelError>>, ModelError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(stream::iter(vec![Ok("hello back".to_string())]).boxed())
        }
    }

    async fn handler_with(chat_model: Arc<RecordingChatModel>) -> ConversationHandler {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let graph = Arc::new(Mutex::new(EpisodeGraph::new()));
        let self_model = Arc::new(SelfModelManager::load(store.clone()).await.unwrap());
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(FixedEmbeddingModel);
        let encoder = Arc::new(ExperienceEncoder::new(store.clone(), embedder.clone()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(store.clone(), 0.6, 3));
        let monologue = Arc::new(MonologueLoop::new(
            graph.clone(),
            store.clone(),
            self_model.clone(),
            chat_model.clone(),
            embedder.clone(),
            encoder.clone(),
            circuit_breaker,
            MonologueConfig::default(),
        ));
        ConversationHandler::new(
            store,
            graph,
            self_model,
            chat_model,
            embedder,
            encoder,
            monologue,
            20,
        )
    }

    #[tokio::test]
    async fn current_turn_message_reaches_the_chat_model() {
        let chat_model = Arc::new(RecordingChatModel::new());
        let handler = handler_with(chat_model.clone()).await;

        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        handler
            .handle("what's the weather like today?", "conv-1", tx)
            .await
            .unwrap();
        while rx.recv().await.is_some() {}

        let calls = chat_model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let last_message = calls[0].last().expect("at least one message was sent");
        assert_eq!(last_message.role, ChatRole::User);
        assert_eq!(last_message.content, "what's the weather like today?");
    }

    #[tokio::test]
    async fn second_turn_still_carries_the_new_user_message() {
        let chat_model = Arc::new(RecordingChatModel::new());
        let handler = handler_with(chat_model.clone()).await;

        let (tx1, mut rx1) = tokio_mpsc::unbounded_channel();
        handler.handle("hi, I'm Sarah", "conv-1", tx1).await.unwrap();
        while rx1.recv().await.is_some() {}

        let (tx2, mut rx2) = tokio_mpsc::unbounded_channel();
        handler.handle("what should we talk about?", "conv-1", tx2).await.unwrap();
        while rx2.recv().await.is_some() {}

        let calls = chat_model.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let second_call = &calls[1];
        let last_message = second_call.last().expect("at least one message was sent");
        assert_eq!(last_message.content, "what should we talk about?");
    }
}
