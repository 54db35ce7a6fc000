//! In-memory directed weighted graph of episodes.
//!
//! Nodes carry the episode's durable payload plus the first-class fields the
//! graph itself mutates (embedding, salience, access bookkeeping); edges are
//! stored alongside their source node rather than in a separate adjacency
//! table, mirroring how [`crate::episode::Episode`] already nests its links.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::days_since;
use crate::episode::{Episode, EpisodeLink, LinkKind};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(String),
}

/// One node's live state. Everything the episode itself doesn't need to
/// mutate during retrieval (summary, topics, exemplars, gap, temporal
/// neighbours) still lives on `episode` — the graph only duplicates what it
/// needs for fast decay/reinforcement bookkeeping.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub episode: Episode,
}

impl GraphNode {
    pub fn id(&self) -> &str {
        &self.episode.id
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Associative memory graph. Single-lock discipline is enforced by the
/// caller (see the crate's concurrency notes); this type itself has no
/// internal locking.
#[derive(Debug, Default)]
pub struct EpisodeGraph {
    nodes: HashMap<String, GraphNode>,
}

impl EpisodeGraph {
    pub fn new() -> Self {
        EpisodeGraph {
            nodes: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, episode: Episode) {
        self.nodes.insert(episode.id.clone(), GraphNode { episode });
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id)
    }

    pub fn get_all_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.nodes.values().map(|n| n.episode.links.len()).sum()
    }

    /// Adds a link, or strengthens it to `strength` if one of the same kind
    /// to the same target already exists.
    pub fn add_link(
        &mut self,
        from: &str,
        to: &str,
        strength: f32,
        kind: LinkKind,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| GraphError::NodeNotFound(from.to_string()))?;
        if let Some(existing) = node
            .episode
            .links
            .iter_mut()
            .find(|l| l.target == to && l.kind == kind)
        {
            existing.strength = strength;
        } else {
            node.episode.links.push(EpisodeLink {
                target: to.to_string(),
                strength,
                kind,
            });
        }
        Ok(())
    }

    pub fn get_out_links(&self, id: &str) -> Option<&[EpisodeLink]> {
        self.nodes.get(id).map(|n| n.episode.links.as_slice())
    }

    /// Up to `k` nodes nearest `query` by cosine similarity. Ties break by
    /// higher salience then lexicographic id, to keep the ordering
    /// deterministic across runs.
    pub fn find_nearest(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32, f32)> = self
            .nodes
            .values()
            .map(|n| {
                (
                    n.episode.id.clone(),
                    cosine_similarity(query, &n.episode.embedding),
                    n.episode.salience,
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(id, sim, _)| (id, sim))
            .collect()
    }

    /// Spreads activation energy outward from `seeds` for `max_hops`,
    /// decaying by `decay_per_hop` and the traversed edge's strength at each
    /// step, accumulating energy additively when multiple paths reach the
    /// same node.
    pub fn spread_activation(
        &self,
        seeds: &HashMap<String, f32>,
        max_hops: u32,
        decay_per_hop: f32,
    ) -> HashMap<String, f32> {
        let mut activation = seeds.clone();
        let mut frontier = seeds.clone();

        for _ in 0..max_hops {
            let mut next_frontier: HashMap<String, f32> = HashMap::new();
            for (node_id, energy) in &frontier {
                let Some(node) = self.nodes.get(node_id) else {
                    continue;
                };
                for link in &node.episode.links {
                    let contribution = energy * link.strength * decay_per_hop;
                    if contribution <= 0.0 {
                        continue;
                    }
                    *next_frontier.entry(link.target.clone()).or_insert(0.0) += contribution;
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            for (id, energy) in &next_frontier {
                *activation.entry(id.clone()).or_insert(0.0) += energy;
            }
            frontier = next_frontier;
        }

        activation
    }

    /// Increments access count and bumps `last_accessed` to `now`. Never
    /// decreases either.
    pub fn reinforce(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        node.episode.access_count += 1;
        if now > node.episode.last_accessed {
            node.episode.last_accessed = now;
        }
        Ok(())
    }

    /// Exponentially decays every node's salience and every outgoing link's
    /// strength by time since last access, floored at the configured
    /// minimums. Never increases anything; safe to call more than once per
    /// tick.
    pub fn apply_decay(&mut self, half_life_days: f64, minimum_salience: f32, minimum_link_strength: f32) {
        let now = Utc::now();
        for node in self.nodes.values_mut() {
            let d = days_since(node.episode.last_accessed, now);
            let factor = 0.5f64.powf(d / half_life_days) as f32;
            node.episode.salience = (node.episode.salience * factor).max(minimum_salience);
            for link in &mut node.episode.links {
                link.strength = (link.strength * factor).max(minimum_link_strength);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_episode(id: &str, embedding: Vec<f32>) -> Episode {
        Episode::new(id.to_string(), format!("summary {id}"), embedding, Utc::now())
    }

    #[test]
    fn find_nearest_orders_by_cosine_similarity() {
        let mut graph = EpisodeGraph::new();
        graph.add_node(make_episode("a", vec![1.0, 0.0, 0.0]));
        graph.add_node(make_episode("b", vec![0.0, 1.0, 0.0]));
        graph.add_node(make_episode("c", vec![0.9, 0.1, 0.0]));

        let result = graph.find_nearest(&[1.0, 0.0, 0.0], 2);
        assert_eq!(result[0].0, "a");
        assert_eq!(result[1].0, "c");
    }

    #[test]
    fn spread_activation_accumulates_across_paths() {
        let mut graph = EpisodeGraph::new();
        graph.add_node(make_episode("seed1", vec![1.0, 0.0]));
        graph.add_node(make_episode("seed2", vec![0.0, 1.0]));
        graph.add_node(make_episode("target", vec![0.5, 0.5]));
        graph.add_link("seed1", "target", 0.8, LinkKind::Thematic).unwrap();
        graph.add_link("seed2", "target", 0.6, LinkKind::Thematic).unwrap();

        let mut seeds = HashMap::new();
        seeds.insert("seed1".to_string(), 1.0);
        let alone = graph.spread_activation(&seeds, 1, 0.5);

        let mut both_seeds = HashMap::new();
        both_seeds.insert("seed1".to_string(), 1.0);
        both_seeds.insert("seed2".to_string(), 1.0);
        let combined = graph.spread_activation(&both_seeds, 1, 0.5);

        assert!(combined["target"] >= alone["target"]);
        assert!((combined["target"] - (1.0 * 0.8 * 0.5 + 1.0 * 0.6 * 0.5)).abs() < 1e-6);
    }

    #[test]
    fn reinforce_never_decreases() {
        let mut graph = EpisodeGraph::new();
        graph.add_node(make_episode("a", vec![1.0]));
        let earlier = Utc::now() - Duration::days(1);
        graph.reinforce("a", earlier).unwrap();
        let count_after_first = graph.get_node("a").unwrap().episode.access_count;
        let accessed_after_first = graph.get_node("a").unwrap().episode.last_accessed;

        graph.reinforce("a", Utc::now()).unwrap();
        assert!(graph.get_node("a").unwrap().episode.access_count > count_after_first);
        assert!(graph.get_node("a").unwrap().episode.last_accessed >= accessed_after_first);
    }

    #[test]
    fn decay_never_increases_and_respects_floors() {
        let mut graph = EpisodeGraph::new();
        let mut episode = make_episode("a", vec![1.0]);
        episode.salience = 0.9;
        episode.last_accessed = Utc::now() - Duration::days(30);
        episode.links.push(EpisodeLink {
            target: "b".to_string(),
            strength: 0.9,
            kind: LinkKind::Causal,
        });
        graph.add_node(episode);
        graph.add_node(make_episode("b", vec![0.0]));

        graph.apply_decay(7.0, 0.05, 0.05);
        let node = graph.get_node("a").unwrap();
        assert!(node.episode.salience < 0.9);
        assert!(node.episode.salience >= 0.05);
        assert!(node.episode.links[0].strength >= 0.05);
    }
}
