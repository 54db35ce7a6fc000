//! Cosine entry points into the episode graph, spread via associative
//! activation and thresholded into a final ranked list.

use std::collections::HashMap;

use chrono::Utc;

use crate::episode::Episode;
use crate::graph::EpisodeGraph;

/// Number of nearest-neighbour entry points seeded before spreading.
const ENTRY_POINTS: usize = 5;

/// Finds entry points near `query_embedding`, spreads activation across the
/// graph, drops anything under `activation_threshold`, and returns up to
/// `limit` episodes ordered by final activation descending. Reinforces every
/// returned node. Returns an empty list immediately on an empty graph.
pub fn retrieve(
    graph: &mut EpisodeGraph,
    query_embedding: &[f32],
    limit: usize,
    max_hops: u32,
    decay_per_hop: f32,
    activation_threshold: f32,
) -> Vec<Episode> {
    if graph.node_count() == 0 {
        return Vec::new();
    }

    let entries = graph.find_nearest(query_embedding, ENTRY_POINTS);
    let mut seeds: HashMap<String, f32> = HashMap::new();
    for (id, similarity) in entries {
        if let Some(node) = graph.get_node(&id) {
            seeds.insert(id, similarity * node.episode.salience);
        }
    }

    let activation = graph.spread_activation(&seeds, max_hops, decay_per_hop);

    let mut ranked: Vec<(String, f32)> = activation
        .into_iter()
        .filter(|(_, energy)| *energy >= activation_threshold)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);

    let now = Utc::now();
    let mut out = Vec::with_capacity(ranked.len());
    for (id, _) in ranked {
        let _ = graph.reinforce(&id, now);
        if let Some(node) = graph.get_node(&id) {
            out.push(node.episode.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{Episode, LinkKind};

    fn with_salience(mut episode: Episode, salience: f32) -> Episode {
        episode.salience = salience;
        episode
    }

    #[test]
    fn empty_graph_returns_empty() {
        let mut graph = EpisodeGraph::new();
        let result = retrieve(&mut graph, &[1.0, 0.0], 10, 3, 0.5, 0.01);
        assert!(result.is_empty());
    }

    #[test]
    fn chain_beats_unrelated_node() {
        let mut graph = EpisodeGraph::new();
        let work = with_salience(
            Episode::new("work".to_string(), "work project".to_string(), vec![1.0, 0.0, 0.0], Utc::now()),
            0.8,
        );
        let deadline = with_salience(
            Episode::new("deadline".to_string(), "deadline stress".to_string(), vec![0.9, 0.1, 0.0], Utc::now()),
            0.6,
        );
        let team = with_salience(
            Episode::new("team".to_string(), "team issue".to_string(), vec![0.8, 0.2, 0.0], Utc::now()),
            0.5,
        );
        let hiking = with_salience(
            Episode::new("hiking".to_string(), "hiking trip".to_string(), vec![0.0, 0.0, 1.0], Utc::now()),
            0.8,
        );

        graph.add_node(work);
        graph.add_node(deadline);
        graph.add_node(team);
        graph.add_node(hiking);
        graph.add_link("work", "deadline", 0.8, LinkKind::Causal).unwrap();
        graph.add_link("deadline", "team", 0.6, LinkKind::Causal).unwrap();

        let result = retrieve(&mut graph, &[1.0, 0.0, 0.0], 10, 3, 0.5, 0.01);
        let ids: Vec<&str> = result.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"work"));
        assert!(ids.contains(&"deadline"));
        assert!(ids.contains(&"team"));
        assert!(!ids.contains(&"hiking"));
    }

    #[test]
    fn returned_nodes_are_reinforced() {
        let mut graph = EpisodeGraph::new();
        graph.add_node(Episode::new("a".to_string(), "summary".to_string(), vec![1.0], Utc::now()));
        let before = graph.get_node("a").unwrap().episode.access_count;
        retrieve(&mut graph, &[1.0], 5, 2, 0.5, 0.0);
        let after = graph.get_node("a").unwrap().episode.access_count;
        assert!(after > before);
    }
}
