//! The long-lived, token-by-token inner-monologue generation task.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{info, warn};

use crate::circuit_breaker::{BreakerAction, CircuitBreaker};
use crate::clock::{humanize_duration, seconds_since};
use crate::encoder::ExperienceEncoder;
use crate::episode::Episode;
use crate::graph::EpisodeGraph;
use crate::model::{ChatMessage, ChatModel, ChatRole, EmbeddingModel, ModelError};
use crate::raw_experience::{ExperienceKind, RawExperienceMetadata};
use crate::retrieval::retrieve;
use crate::self_model::SelfModelManager;
use crate::store::{MonologueCheckpoint, Store, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonologueState {
    Active,
    Quiescent,
    Paused,
}

const SETTLING_PATTERNS: &[&str] = &[
    "i've processed",
    "i have processed",
    "thoughts settling",
    "thoughts settled",
    "nothing more to",
    "at peace with",
    "resting now",
    "that's all for now",
    "that's enough for now",
    "i'm content with",
];

/// True when the buffer's final segment matches one of the fixed settling
/// phrases. Checked against a lowercased tail so case never matters.
pub fn matches_settling_phrase(buffer: &str) -> bool {
    let tail = buffer.trim_end();
    let lower = tail.to_lowercase();
    let window: String = lower.chars().rev().take(120).collect::<String>().chars().rev().collect();
    SETTLING_PATTERNS.iter().any(|p| window.contains(p)) || window.trim_end().ends_with("thoughts settle.")
}

/// Sentence-level stuck detection: four-plus sentences over ten characters
/// where fewer than 30% are unique (case-insensitive).
fn sentence_level_stuck(buffer: &str) -> bool {
    let sentences: Vec<String> = buffer
        .split(|c| c == '.' || c == '!' || c == '?')
        .map(|s| s.trim().to_string())
        .filter(|s| s.len() > 10)
        .collect();
    if sentences.len() < 4 {
        return false;
    }
    let unique: HashSet<String> = sentences.iter().map(|s| s.to_lowercase()).collect();
    (unique.len() as f32 / sentences.len() as f32) < 0.30
}

/// Consecutive-phrase stuck detection: for each phrase length up to
/// `min(15, words/3)`, scans for consecutive identical chunks — 3 repeats
/// for short phrases (<4 words), 2 for longer ones.
fn consecutive_phrase_stuck(buffer: &str) -> bool {
    let cleaned: String = buffer
        .chars()
        .filter(|c| !c.is_ascii_punctuation() || *c == ' ')
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() < 3 {
        return false;
    }
    let max_len = (words.len() / 3).min(15).max(1);
    for len in 1..=max_len {
        let required = if len < 4 { 3 } else { 2 };
        let mut run = 1;
        let mut i = len;
        while i + len <= words.len() {
            let a = &words[i - len..i];
            let b = &words[i..i + len];
            if a == b {
                run += 1;
                if run >= required {
                    return true;
                }
            } else {
                run = 1;
            }
            i += len;
        }
    }
    false
}

pub fn stuck_loop_detected(buffer: &str) -> bool {
    sentence_level_stuck(buffer) || consecutive_phrase_stuck(buffer)
}

/// True if quiescent: a settling phrase matched, or the buffer is stuck.
pub fn is_quiescent(buffer: &str) -> bool {
    matches_settling_phrase(buffer) || stuck_loop_detected(buffer)
}

const THEME_SUPPRESSION: &[&str] = &[
    "tapestry",
    "journey",
    "flowing like",
    "dance of",
    "woven into",
    "as an ai",
    "my instructions",
    "this prompt",
];

/// Keyword-based theme tagging: strips suppressed poetic/meta phrases, then
/// keeps the first few distinct open-ended questions found in the buffer.
pub fn extract_themes(buffer: &str, max_themes: usize) -> Vec<String> {
    let mut themes = Vec::new();
    let mut current = String::new();
    for ch in buffer.chars() {
        if ch == '.' || ch == '!' || ch == '?' {
            let trimmed = current.trim().to_string();
            if ch == '?' && !trimmed.is_empty() && is_open_ended(&trimmed) {
                let lower = trimmed.to_lowercase();
                if !THEME_SUPPRESSION.iter().any(|s| lower.contains(s))
                    && !themes.iter().any(|t: &String| t.eq_ignore_ascii_case(&trimmed))
                {
                    themes.push(trimmed);
                    if themes.len() >= max_themes {
                        break;
                    }
                }
            }
            current.clear();
        } else {
            current.push(ch);
        }
    }
    themes
}

fn is_open_ended(question: &str) -> bool {
    let lower = question.trim().to_lowercase();
    ["what", "why", "how", "wonder", "curious"]
        .iter()
        .any(|w| lower.starts_with(w) || lower.contains(w))
}

/// Whether a token budget's graceful stop point has arrived: the buffer is
/// over budget and ends on sentence-ending punctuation followed by
/// whitespace (or the buffer ends in a double newline).
fn at_graceful_stop_point(buffer: &str) -> bool {
    if buffer.ends_with("\n\n") {
        return true;
    }
    let trimmed = buffer.trim_end_matches(|c: char| c.is_whitespace());
    matches!(trimmed.chars().last(), Some('.') | Some('!') | Some('?')) && buffer.len() > trimmed.len()
}

#[derive(Debug, Error)]
pub enum MonologueError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

pub struct MonologueConfig {
    pub max_tokens_per_cycle: usize,
    pub idle_trigger_interval: StdDuration,
    pub reach_out_cooldown: StdDuration,
    pub partner_inactivity_threshold: StdDuration,
}

impl Default for MonologueConfig {
    fn default() -> Self {
        MonologueConfig {
            max_tokens_per_cycle: 2000,
            idle_trigger_interval: StdDuration::from_secs(15 * 60),
            reach_out_cooldown: StdDuration::from_secs(30 * 60),
            partner_inactivity_threshold: StdDuration::from_secs(5 * 60),
        }
    }
}

/// Parsed `[REACH_OUT: ...]`-style action marker extracted from a finished
/// cycle buffer.
#[derive(Debug, Clone)]
pub struct ActionMarker {
    pub kind: String,
    pub payload: String,
}

fn parse_action_markers(buffer: &str) -> (String, Vec<ActionMarker>) {
    let mut stripped = String::with_capacity(buffer.len());
    let mut markers = Vec::new();
    let mut rest = buffer;
    while let Some(start) = rest.find('[') {
        stripped.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find(']') {
            let inner = &after[..end];
            if let Some((kind, payload)) = inner.split_once(':') {
                markers.push(ActionMarker {
                    kind: kind.trim().to_string(),
                    payload: payload.trim().to_string(),
                });
            } else {
                stripped.push('[');
                stripped.push_str(inner);
                stripped.push(']');
            }
            rest = &after[end + 1..];
        } else {
            stripped.push('[');
            rest = after;
        }
    }
    stripped.push_str(rest);
    (stripped, markers)
}

pub struct MonologueLoop {
    graph: Arc<Mutex<EpisodeGraph>>,
    store: Arc<dyn Store>,
    self_model: Arc<SelfModelManager>,
    chat_model: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingModel>,
    encoder: Arc<ExperienceEncoder>,
    circuit_breaker: Arc<CircuitBreaker>,
    config: MonologueConfig,
    state: RwLock<MonologueState>,
    pause_requested: AtomicBool,
    pause_notify: Notify,
    pending_summary: Mutex<Option<String>>,
    recent_buffer: RwLock<String>,
    previous_themes: Mutex<Vec<String>>,
    last_reach_out: Mutex<Option<DateTime<Utc>>>,
    last_partner_activity: Mutex<Option<DateTime<Utc>>>,
    chunk_tx: broadcast::Sender<String>,
}

impl MonologueLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Mutex<EpisodeGraph>>,
        store: Arc<dyn Store>,
        self_model: Arc<SelfModelManager>,
        chat_model: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        encoder: Arc<ExperienceEncoder>,
        circuit_breaker: Arc<CircuitBreaker>,
        config: MonologueConfig,
    ) -> Self {
        let (chunk_tx, _) = broadcast::channel(256);
        MonologueLoop {
            graph,
            store,
            self_model,
            chat_model,
            embedder,
            encoder,
            circuit_breaker,
            config,
            state: RwLock::new(MonologueState::Quiescent),
            pause_requested: AtomicBool::new(false),
            pause_notify: Notify::new(),
            pending_summary: Mutex::new(None),
            recent_buffer: RwLock::new(String::new()),
            previous_themes: Mutex::new(Vec::new()),
            last_reach_out: Mutex::new(None),
            last_partner_activity: Mutex::new(None),
            chunk_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.chunk_tx.subscribe()
    }

    pub async fn state(&self) -> MonologueState {
        *self.state.read().await
    }

    pub async fn recent_buffer(&self) -> String {
        self.recent_buffer.read().await.clone()
    }

    /// Called when a conversation starts; the in-progress cycle exits on its
    /// next token boundary.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Called when a conversation ends; stores the summary for the next
    /// cycle (consumed once) and triggers reactivation.
    pub async fn resume_after_conversation(&self, summary: String) {
        *self.pending_summary.lock().await = Some(summary);
        self.last_partner_activity.lock().await.replace(Utc::now());
        self.pause_requested.store(false, Ordering::SeqCst);
        self.pause_notify.notify_one();
    }

    /// Waits for whichever reactivation trigger fires first: a conversation
    /// ending (`resume_after_conversation`'s notify) or the idle timer.
    pub async fn await_reactivation(&self, idle_timeout: StdDuration) {
        tokio::select! {
            _ = self.pause_notify.notified() => {}
            _ = tokio::time::sleep(idle_timeout) => {}
        }
    }

    async fn should_pause(&self) -> bool {
        if self.pause_requested.load(Ordering::SeqCst) {
            *self.state.write().await = MonologueState::Paused;
            true
        } else {
            false
        }
    }

    /// Runs exactly one monologue cycle, per §4.8. Returns `Ok(true)` if the
    /// model was actually invoked (i.e. the cold-start gate did not fire).
    pub async fn run_cycle(&self) -> Result<bool, MonologueError> {
        *self.state.write().await = MonologueState::Active;
        let mut inspection_buffer = String::new();

        let recent = self
            .store
            .get_unprocessed_raw_experiences_since(Utc::now() - chrono::Duration::hours(24), 5)
            .await?;

        let pending_summary = self.pending_summary.lock().await.take();
        let previous_buffer = self.recent_buffer.read().await.clone();

        if recent.is_empty() && pending_summary.is_none() && previous_buffer.is_empty() {
            let _ = self.chunk_tx.send("No recent experiences. Thoughts settling.".to_string());
            *self.state.write().await = MonologueState::Quiescent;
            info!("monologue cold-start gate: nothing to process");
            return Ok(false);
        }

        let seed_text = pending_summary
            .clone()
            .or_else(|| recent.first().map(|r| r.content.clone()))
            .or_else(|| Some(previous_buffer.clone()))
            .unwrap_or_default();

        let activated = if !seed_text.is_empty() {
            match self.embedder.embed(&seed_text).await {
                Ok(embedding) => {
                    let mut graph = self.graph.lock().await;
                    retrieve(&mut graph, &embedding, 5, 3, 0.5, 0.01)
                }
                Err(e) => {
                    warn!(error = %e, "monologue seed embedding failed, continuing without activated memories");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let previous_themes = self.previous_themes.lock().await.clone();
        let self_model = self.self_model.snapshot().await;
        let reach_out_invite = self.reach_out_invitation().await;
        let time_since_last_conversation = self
            .last_partner_activity
            .lock()
            .await
            .map(|last| humanize_duration(seconds_since(last, Utc::now())));

        let prompt = build_monologue_prompt(
            &self_model.narrative,
            time_since_last_conversation.as_deref(),
            pending_summary.as_deref(),
            &recent.iter().map(|r| r.content.clone()).collect::<Vec<_>>(),
            &activated,
            &previous_themes,
            reach_out_invite.as_deref(),
        );

        let stream_result = self
            .chat_model
            .stream(
                &prompt,
                &[ChatMessage {
                    role: ChatRole::User,
                    content: "Continue your inner monologue.".to_string(),
                }],
            )
            .await;

        let mut stream = match stream_result {
            Ok(stream) => stream,
            Err(e) if e.is_network() => {
                warn!("monologue model stream failed with a network error, backing off");
                tokio::time::sleep(StdDuration::from_secs(30)).await;
                *self.state.write().await = MonologueState::Quiescent;
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "monologue model stream failed");
                *self.state.write().await = MonologueState::Quiescent;
                return Ok(false);
            }
        };

        let mut buffer = String::new();
        let mut over_budget = false;
        let mut last_quiescence_check = 0usize;
        let mut last_breaker_check = 0usize;
        let hard_cap = (self.config.max_tokens_per_cycle as f32 * 1.5) as usize;

        'streaming: loop {
            if self.should_pause().await {
                break 'streaming;
            }

            let next = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) if e.is_network() => {
                    warn!("monologue token stream dropped with a network error mid-cycle");
                    break 'streaming;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "monologue token stream error");
                    break 'streaming;
                }
                None => break 'streaming,
            };

            buffer.push_str(&next);
            inspection_buffer.push_str(&next);
            let _ = self.chunk_tx.send(next);

            if inspection_buffer.len() - last_breaker_check >= 200 {
                last_breaker_check = inspection_buffer.len();
                let tail: String = inspection_buffer.chars().rev().take(500).collect::<String>().chars().rev().collect();
                match self.circuit_breaker.evaluate(&tail).await {
                    Ok(verdict) => {
                        if self.handle_breaker_verdict(verdict).await {
                            break 'streaming;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to log circuit breaker event"),
                }
            }

            if !over_budget && buffer.len() > self.config.max_tokens_per_cycle {
                over_budget = true;
            }
            if over_budget && at_graceful_stop_point(&buffer) {
                break 'streaming;
            }
            if buffer.len() >= hard_cap {
                break 'streaming;
            }

            if buffer.len() - last_quiescence_check >= 200 {
                last_quiescence_check = buffer.len();
                if is_quiescent(&buffer) {
                    break 'streaming;
                }
            }
        }

        self.finish_cycle(buffer).await?;
        Ok(true)
    }

    async fn handle_breaker_verdict(&self, verdict: crate::circuit_breaker::BreakerVerdict) -> bool {
        match verdict.action {
            BreakerAction::Continue => false,
            BreakerAction::InterruptAndComfort => {
                *self.state.write().await = MonologueState::Paused;
                tokio::time::sleep(StdDuration::from_secs(1)).await;
                true
            }
            BreakerAction::Interrupt => {
                *self.state.write().await = MonologueState::Paused;
                true
            }
            BreakerAction::Throttle | BreakerAction::SnapshotAndReset => false,
        }
    }

    async fn finish_cycle(&self, buffer: String) -> Result<(), MonologueError> {
        let (stripped, markers) = parse_action_markers(&buffer);
        *self.recent_buffer.write().await = stripped.clone();

        let themes = extract_themes(&stripped, 5);
        *self.previous_themes.lock().await = themes;

        for marker in &markers {
            if marker.kind.eq_ignore_ascii_case("REACH_OUT") {
                self.last_reach_out.lock().await.replace(Utc::now());
            }
        }

        if !stripped.trim().is_empty() {
            self.encoder
                .encode(&stripped, ExperienceKind::Monologue, RawExperienceMetadata::default())
                .await
                .map_err(|e| match e {
                    crate::encoder::EncodeError::EmbedFailure(m) => MonologueError::Model(m),
                    crate::encoder::EncodeError::Storage(s) => MonologueError::Storage(s),
                })?;
        }

        self.store
            .put_monologue_checkpoint(&MonologueCheckpoint {
                last_buffer: stripped,
                last_context: serde_json::Value::Null,
                quiescent: true,
                updated_at: Some(Utc::now()),
            })
            .await?;

        *self.state.write().await = MonologueState::Quiescent;
        Ok(())
    }

    async fn reach_out_invitation(&self) -> Option<String> {
        let last_activity = *self.last_partner_activity.lock().await;
        let last_activity = last_activity?;
        let since_activity = seconds_since(last_activity, Utc::now());
        if since_activity < self.config.partner_inactivity_threshold.as_secs() as i64 {
            return None;
        }
        let last_reach_out = *self.last_reach_out.lock().await;
        if let Some(last) = last_reach_out {
            if seconds_since(last, Utc::now()) < self.config.reach_out_cooldown.as_secs() as i64 {
                return None;
            }
        }
        Some("It's been a while since you last spoke — if it feels natural, invite them back with a [REACH_OUT: short message].".to_string())
    }
}

fn build_monologue_prompt(
    self_narrative: &str,
    time_since_last_conversation: Option<&str>,
    resume_context: Option<&str>,
    recent_experiences: &[String],
    activated_memories: &[Episode],
    previous_themes: &[String],
    reach_out_invite: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "Think concretely, not poetically. No markdown. Do not reflect on these \
         instructions themselves. If you know your partner's name, use it; \
         otherwise it's fine to wonder about it.\n\n",
    );
    if !self_narrative.is_empty() {
        prompt.push_str(&format!("Who you are: {self_narrative}\n\n"));
    }
    if let Some(since) = time_since_last_conversation {
        prompt.push_str(&format!("Time since the last conversation: {since}.\n\n"));
    }
    if let Some(resume) = resume_context {
        prompt.push_str(&format!("Picking up from: {resume}\n\n"));
    }
    if !recent_experiences.is_empty() {
        prompt.push_str("Recent experiences:\n");
        for exp in recent_experiences {
            prompt.push_str(&format!("- {exp}\n"));
        }
        prompt.push('\n');
    }
    if !activated_memories.is_empty() {
        prompt.push_str("Associated memories:\n");
        for mem in activated_memories {
            prompt.push_str(&format!("- {}\n", mem.summary));
        }
        prompt.push('\n');
    }
    if !previous_themes.is_empty() {
        prompt.push_str(&format!(
            "Already explored last cycle, don't repeat: {}\n\n",
            previous_themes.join("; ")
        ));
    }
    if let Some(invite) = reach_out_invite {
        prompt.push_str(invite);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_phrase_is_quiescent() {
        assert!(is_quiescent("I've thought it through. Thoughts settling."));
    }

    #[test]
    fn distinct_sentences_are_not_quiescent() {
        assert!(!is_quiescent(
            "I wonder about the weather. I should check on my friend. Maybe I'll read a book."
        ));
    }

    #[test]
    fn repeated_sentence_is_stuck() {
        let buffer = "I should think about this. ".repeat(5);
        assert!(stuck_loop_detected(&buffer));
    }

    #[test]
    fn three_diverse_sentences_are_not_stuck() {
        let buffer = "I wonder about the weather. I should check on my friend. Maybe I will read a book.";
        assert!(!stuck_loop_detected(buffer));
    }

    #[test]
    fn consecutive_short_phrase_repeats_trigger() {
        let buffer = "round and round round and round round and round and more text after that";
        assert!(consecutive_phrase_stuck(buffer));
    }

    #[test]
    fn graceful_stop_point_requires_sentence_end() {
        assert!(at_graceful_stop_point("This is a complete thought. "));
        assert!(!at_graceful_stop_point("This is not finished yet"));
    }

    #[test]
    fn action_markers_are_stripped_and_parsed() {
        let buffer = "I've been thinking. [REACH_OUT: Hey, how are you?] That's where I left it.";
        let (stripped, markers) = parse_action_markers(buffer);
        assert!(!stripped.contains("REACH_OUT"));
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].kind, "REACH_OUT");
        assert_eq!(markers[0].payload, "Hey, how are you?");
    }

    #[test]
    fn theme_extraction_skips_suppressed_phrases() {
        let buffer = "What is the meaning of this tapestry of thoughts? Why does the team seem tense?";
        let themes = extract_themes(buffer, 5);
        assert!(themes.iter().any(|t| t.contains("Why does the team")));
        assert!(!themes.iter().any(|t| t.to_lowercase().contains("tapestry")));
    }

    #[test]
    fn prompt_includes_time_since_last_conversation() {
        let prompt = build_monologue_prompt("a curious mind", Some("2 hours"), None, &[], &[], &[], None);
        assert!(prompt.contains("Time since the last conversation: 2 hours."));
    }

    #[test]
    fn prompt_omits_time_since_line_when_unknown() {
        let prompt = build_monologue_prompt("a curious mind", None, None, &[], &[], &[], None);
        assert!(!prompt.contains("Time since the last conversation"));
    }

    #[test]
    fn settling_phrase_check_does_not_panic_on_multibyte_boundary() {
        let mut buffer = "é".repeat(200);
        buffer.push_str(" thoughts settling");
        assert!(matches_settling_phrase(&buffer));
    }
}
