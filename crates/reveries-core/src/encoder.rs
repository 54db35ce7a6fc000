//! Writes raw conversation/monologue/external fragments to the store with an
//! embedding and an initial salience score.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{EmbeddingModel, ModelError};
use crate::raw_experience::{ExperienceKind, RawExperience, RawExperienceMetadata};
use crate::store::{Store, StorageError};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("embedding failed: {0}")]
    EmbedFailure(#[from] ModelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct ExperienceEncoder {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl ExperienceEncoder {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingModel>) -> Self {
        ExperienceEncoder { store, embedder }
    }

    /// Generates an id, embeds `text`, scores initial salience from its
    /// surface features, and writes it to the raw-experiences table
    /// unprocessed. Propagates `EmbedFailure` without catching it — callers
    /// decide whether a failed embed should degrade gracefully.
    pub async fn encode(
        &self,
        text: &str,
        kind: ExperienceKind,
        metadata: RawExperienceMetadata,
    ) -> Result<RawExperience, EncodeError> {
        let embedding = self.embedder.embed(text).await?;
        let raw = RawExperience {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            content: text.to_string(),
            embedding,
            salience: initial_salience(text),
            processed: false,
            metadata,
        };
        self.store.insert_raw_experience(&raw).await?;
        Ok(raw)
    }
}

/// `0.3 + length bonuses + punctuation bonuses`, capped at 1.0.
fn initial_salience(text: &str) -> f32 {
    let words = text.split_whitespace().count();
    let mut score = 0.3f32;
    if words > 10 {
        score += 0.1;
    }
    if words > 50 {
        score += 0.1;
    }
    if words > 100 {
        score += 0.1;
    }

    let questions = text.chars().filter(|&c| c == '?').count() as f32;
    score += (questions * 0.05).min(0.15);

    let exclamations = text.chars().filter(|&c| c == '!').count() as f32;
    score += (exclamations * 0.03).min(0.1);

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_statement_gets_base_salience() {
        assert!((initial_salience("hi") - 0.3).abs() < 1e-6);
    }

    #[test]
    fn long_excited_question_gets_bonuses() {
        let text = "why ".repeat(60) + "??? !!!";
        let score = initial_salience(&text);
        assert!(score > 0.3);
        assert!(score <= 1.0);
    }

    #[test]
    fn bonuses_cap_at_one() {
        let text = format!("{} {}", "word ".repeat(150), "? ".repeat(20) + &"! ".repeat(20));
        assert_eq!(initial_salience(&text), 1.0);
    }
}
