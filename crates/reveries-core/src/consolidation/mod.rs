//! Drains unprocessed raw experiences, calls the abstraction model, creates
//! or merges episodes, forms thematic links, updates the self-model, applies
//! decay, and checkpoints — one pass per call.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::episode::{Episode, Exemplar, LinkKind};
use crate::graph::EpisodeGraph;
use crate::hydrator;
use crate::model::{strip_code_fences, AbstractionModel, AbstractionReply, EmbeddingModel};
use crate::self_model::SelfModelManager;
use crate::store::{Store, StorageError};

/// Cosine-similarity threshold above which a candidate episode is merged
/// into the nearest existing node instead of inserted as a new one.
const MERGE_THRESHOLD: f32 = 0.85;
/// How many of the graph's nearest existing nodes a freshly inserted episode
/// links to thematically.
const AUTO_LINK_COUNT: usize = 3;
const AUTO_LINK_STRENGTH: f32 = 0.5;
const MERGE_LINK_BOOST: f32 = 0.1;

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct DecayConfig {
    pub half_life_days: f64,
    pub minimum_salience: f32,
    pub minimum_link_strength: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig {
            half_life_days: 7.0,
            minimum_salience: 0.05,
            minimum_link_strength: 0.05,
        }
    }
}

/// Outcome of one consolidation pass, surfaced to the `consolidate` IPC
/// request and to logs.
#[derive(Debug, Default)]
pub struct ConsolidationResult {
    pub raw_experiences_drained: usize,
    pub episodes_inserted: usize,
    pub episodes_merged: usize,
    pub model_call_failed: bool,
}

pub struct ConsolidationEngine {
    store: Arc<dyn Store>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    abstraction_model: Arc<dyn AbstractionModel>,
    embedder: Arc<dyn EmbeddingModel>,
    decay: DecayConfig,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<Mutex<EpisodeGraph>>,
        self_model: Arc<SelfModelManager>,
        abstraction_model: Arc<dyn AbstractionModel>,
        embedder: Arc<dyn EmbeddingModel>,
        decay: DecayConfig,
    ) -> Self {
        ConsolidationEngine {
            store,
            graph,
            self_model,
            abstraction_model,
            embedder,
            decay,
        }
    }

    pub async fn run(&self) -> Result<ConsolidationResult, ConsolidationError> {
        let mut result = ConsolidationResult::default();

        let unprocessed = self.store.get_unprocessed_raw_experiences().await?;
        if !unprocessed.is_empty() {
            result.raw_experiences_drained = unprocessed.len();

            let self_model_snapshot = self.self_model.snapshot().await;
            let prompt = build_abstraction_prompt(&self_model_snapshot.narrative, &unprocessed);

            match self.abstraction_model.abstract_experiences(&prompt).await {
                Ok(raw_reply) => {
                    let reply = parse_abstraction_reply(&raw_reply);
                    self.apply_reply(&reply, &mut result).await?;

                    let ids: Vec<String> = unprocessed.iter().map(|r| r.id.clone()).collect();
                    self.store.mark_raw_experiences_processed(&ids).await?;
                }
                Err(e) => {
                    warn!(error = %e, "abstraction model call failed, pass yielded no episodes");
                    result.model_call_failed = true;
                }
            }
        }

        {
            let mut graph = self.graph.lock().await;
            graph.apply_decay(
                self.decay.half_life_days,
                self.decay.minimum_salience,
                self.decay.minimum_link_strength,
            );
            hydrator::persist(&graph, &self.store).await?;
        }

        self.store.record_consolidation_run(Utc::now()).await?;
        info!(
            drained = result.raw_experiences_drained,
            inserted = result.episodes_inserted,
            merged = result.episodes_merged,
            "consolidation pass complete"
        );
        Ok(result)
    }

    async fn apply_reply(
        &self,
        reply: &AbstractionReply,
        result: &mut ConsolidationResult,
    ) -> Result<(), ConsolidationError> {
        for candidate in &reply.episodes {
            if candidate.summary.trim().is_empty() {
                continue;
            }
            let embedding = match self.embedder.embed(&candidate.summary).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to embed consolidation candidate, skipping");
                    continue;
                }
            };

            let mut graph = self.graph.lock().await;
            let nearest = graph.find_nearest(&embedding, 1);
            let merge_target = nearest
                .first()
                .filter(|(_, similarity)| *similarity >= MERGE_THRESHOLD)
                .map(|(id, _)| id.clone());

            if let Some(nearest_id) = merge_target {
                if let Some(node) = graph.get_node_mut(&nearest_id) {
                    node.episode.summary = format!("{} {}", node.episode.summary, candidate.summary);
                    node.episode.exemplars.extend(candidate.exemplars.iter().map(|e| Exemplar {
                        quote: e.quote.clone(),
                        context: e.significance.clone(),
                        timestamp: Utc::now(),
                    }));
                    node.episode.salience = node.episode.salience.max(candidate.salience);
                    for link in &mut node.episode.links {
                        link.strength = (link.strength + MERGE_LINK_BOOST).min(1.0);
                    }
                }
                let _ = graph.reinforce(&nearest_id, Utc::now());
                result.episodes_merged += 1;
                continue;
            }

            let id = uuid::Uuid::new_v4().to_string();
            let mut episode = Episode::new(id.clone(), candidate.summary.clone(), embedding.clone(), Utc::now());
            episode.salience = candidate.salience;
            episode.confidence = candidate.confidence;
            episode.topics = candidate.topics.clone();
            episode.exemplars = candidate
                .exemplars
                .iter()
                .map(|e| Exemplar {
                    quote: e.quote.clone(),
                    context: e.significance.clone(),
                    timestamp: Utc::now(),
                })
                .collect();

            let link_targets: Vec<String> = graph
                .find_nearest(&embedding, AUTO_LINK_COUNT + 1)
                .into_iter()
                .map(|(nid, _)| nid)
                .filter(|target| target != &id)
                .take(AUTO_LINK_COUNT)
                .collect();

            graph.add_node(episode);
            for target in link_targets {
                let _ = graph.add_link(&id, &target, AUTO_LINK_STRENGTH, LinkKind::Thematic);
            }
            result.episodes_inserted += 1;
        }

        if reply.self_model_updates.current_focus.is_some()
            || reply.self_model_updates.new_tendency.is_some()
            || reply.self_model_updates.new_value.is_some()
            || reply.self_model_updates.narrative_update.is_some()
        {
            self.self_model
                .apply_updates(&reply.self_model_updates)
                .await
                .map_err(|_| StorageError::Database("self-model update failed".to_string()))?;
        }

        Ok(())
    }
}

fn build_abstraction_prompt(narrative: &str, experiences: &[crate::raw_experience::RawExperience]) -> String {
    let mut prompt = String::from(
        "Summarize the following experiences as past-tense events (they already \
         happened; do not describe them as current state). Respond as JSON shaped \
         {\"episodes\":[{\"summary\":...,\"topics\":[...],\"salience\":0-1,\"confidence\":0-1,\
         \"exemplars\":[{\"quote\":...,\"significance\":...}],\"patterns\":[...]}],\
         \"self_model_updates\":{\"current_focus\":...,\"new_tendency\":...,\"new_value\":...,\
         \"narrative_update\":...}}.\n\n",
    );
    prompt.push_str(&format!("Current identity narrative: {narrative}\n\n"));
    prompt.push_str("Experiences:\n");
    for exp in experiences {
        prompt.push_str(&format!("- ({}) {}\n", exp.kind.as_str(), exp.content));
    }
    prompt
}

/// Strips fences and retries one parse; on a second failure, treats the
/// reply as empty rather than failing the whole pass.
fn parse_abstraction_reply(raw: &str) -> AbstractionReply {
    if let Ok(reply) = serde_json::from_str::<AbstractionReply>(raw) {
        return reply;
    }
    let stripped = strip_code_fences(raw);
    serde_json::from_str::<AbstractionReply>(stripped).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reply_becomes_empty_result() {
        let reply = parse_abstraction_reply("not json at all");
        assert!(reply.episodes.is_empty());
    }

    #[test]
    fn fenced_reply_parses_after_stripping() {
        let raw = "```json\n{\"episodes\":[{\"summary\":\"talked about rust\"}]}\n```";
        let reply = parse_abstraction_reply(raw);
        assert_eq!(reply.episodes.len(), 1);
        assert_eq!(reply.episodes[0].summary, "talked about rust");
    }
}
