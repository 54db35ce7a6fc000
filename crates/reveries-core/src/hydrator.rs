//! Round-trips the in-memory [`EpisodeGraph`] to and from the durable store.

use std::sync::Arc;

use tracing::warn;

use crate::graph::EpisodeGraph;
use crate::store::{Store, StorageError};

/// Reads every episode from the store and assembles them into a graph.
/// Link targets that don't resolve to a loaded node are dropped with a
/// warning rather than failing the whole hydration — a dangling reference is
/// a logic error to log, not a reason to refuse to start.
pub async fn hydrate(store: &Arc<dyn Store>) -> Result<EpisodeGraph, StorageError> {
    let episodes = store.load_episodes().await?;
    let known_ids: std::collections::HashSet<String> =
        episodes.iter().map(|e| e.id.clone()).collect();

    let mut graph = EpisodeGraph::new();
    for mut episode in episodes {
        let before_count = episode.links.len();
        episode.links.retain(|link| known_ids.contains(&link.target));
        if episode.links.len() != before_count {
            warn!(
                episode_id = %episode.id,
                dropped = before_count - episode.links.len(),
                "dropped dangling link targets during hydration"
            );
        }
        graph.add_node(episode);
    }
    Ok(graph)
}

/// Persists every node in `graph` via the store's two-pass upsert-then-relink
/// transaction.
pub async fn persist(graph: &EpisodeGraph, store: &Arc<dyn Store>) -> Result<(), StorageError> {
    let episodes: Vec<_> = graph.get_all_nodes().map(|n| n.episode.clone()).collect();
    store.persist_episodes(&episodes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{Episode, EpisodeLink, LinkKind};
    use crate::store::SqliteStore;
    use chrono::Utc;

    #[tokio::test]
    async fn round_trip_preserves_nodes_and_edges() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());

        let mut graph = EpisodeGraph::new();
        let mut a = Episode::new("a".to_string(), "summary a".to_string(), vec![1.0, 0.0], Utc::now());
        a.links.push(EpisodeLink {
            target: "b".to_string(),
            strength: 0.6,
            kind: LinkKind::Thematic,
        });
        let b = Episode::new("b".to_string(), "summary b".to_string(), vec![0.0, 1.0], Utc::now());
        graph.add_node(a);
        graph.add_node(b);

        persist(&graph, &store).await.unwrap();
        let rehydrated = hydrate(&store).await.unwrap();

        assert_eq!(rehydrated.node_count(), 2);
        assert_eq!(rehydrated.link_count(), 1);
        let node_a = rehydrated.get_node("a").unwrap();
        assert_eq!(node_a.episode.links[0].target, "b");
        assert!((node_a.episode.links[0].strength - 0.6).abs() < 1e-3);
    }

    #[tokio::test]
    async fn dangling_link_is_dropped_not_fatal() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut a = Episode::new("a".to_string(), "summary".to_string(), vec![1.0], Utc::now());
        a.links.push(EpisodeLink {
            target: "missing".to_string(),
            strength: 0.5,
            kind: LinkKind::Causal,
        });
        store.persist_episodes(&[a]).await.unwrap();

        let graph = hydrate(&store).await.unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.link_count(), 0);
    }
}
