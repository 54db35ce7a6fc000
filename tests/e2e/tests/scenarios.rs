//! End-to-end scenarios against the real store, graph, consolidation
//! engine, self-model manager, and circuit breaker, with scripted models
//! standing in for the network. `reveries-daemon` is a process binary with
//! no library target, so these scenarios drive the `reveries-core` surface
//! directly rather than an actual socket — the same sequence of calls the
//! daemon's conversation handler and lifecycle wiring make.

#[path = "../src/harness/db_manager.rs"]
mod db_manager;
#[path = "../src/mocks/fixtures.rs"]
mod fixtures;

use std::sync::Arc;

use reveries_core::{
    retrieve, BreakerAction, CircuitBreaker, ConsolidationEngine, DecayConfig, Episode, EpisodeGraph,
    ExperienceEncoder, ExperienceKind, LinkKind, RawExperienceMetadata, SelfModelManager, Severity,
};
use tokio::sync::Mutex;

use db_manager::TestStore;
use fixtures::{episode, LookupEmbeddingModel, ScriptedAbstractionModel, ScriptedChatModel};

/// Scenario 1: empty start. A freshly opened store has no episodes, no
/// links, and the hydrated graph reflects that.
#[tokio::test]
async fn empty_start_has_no_episodes_or_links() {
    let db = TestStore::new();

    let graph = reveries_core::hydrate(&db.store).await.unwrap();
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.link_count(), 0);

    let stats = db.store.memory_stats().await.unwrap();
    assert_eq!(stats.episode_count, 0);
    assert_eq!(stats.link_count, 0);
}

/// Scenario 2: first conversation encodes. One exchange embeds and lands
/// in raw_experiences unprocessed, and detecting a partner's name updates
/// the self-model exactly once.
#[tokio::test]
async fn first_conversation_encodes_and_sets_partner_name() {
    let db = TestStore::new();
    let embedder = Arc::new(LookupEmbeddingModel::new());
    let encoder = ExperienceEncoder::new(db.store.clone(), embedder);
    let self_model = SelfModelManager::load(db.store.clone()).await.unwrap();

    assert!(!self_model.snapshot().await.has_partner());
    self_model.set_partner_name("Sarah", false).await.unwrap();

    let exchange = "User: Hi, I'm Sarah\n\nAssistant: It's good to meet you, Sarah.";
    encoder
        .encode(
            exchange,
            ExperienceKind::Conversation,
            RawExperienceMetadata {
                conversation_id: Some("conv-1".to_string()),
                turn_count: 1,
                topics: vec![],
                unresolved_tensions: vec![],
            },
        )
        .await
        .unwrap();

    let (total, unprocessed) = db.store.raw_experience_counts().await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(unprocessed, 1);

    let unprocessed_rows = db.store.get_unprocessed_raw_experiences().await.unwrap();
    assert_eq!(unprocessed_rows.len(), 1);
    assert_eq!(unprocessed_rows[0].kind, ExperienceKind::Conversation);
    assert!(unprocessed_rows[0].content.contains("Sarah"));

    assert_eq!(
        self_model.snapshot().await.relationship.partner_id.as_deref(),
        Some("Sarah")
    );
}

/// Scenario 3: consolidation inserts one. Three raw experiences and an
/// abstractor returning a single candidate, against an empty graph, yields
/// exactly one new node and every raw experience flagged processed.
#[tokio::test]
async fn consolidation_inserts_one_episode_into_empty_graph() {
    let db = TestStore::new();
    db.seed_raw_experiences(3).await;

    let graph = Arc::new(Mutex::new(EpisodeGraph::new()));
    let self_model = Arc::new(SelfModelManager::load(db.store.clone()).await.unwrap());
    let embedder = Arc::new(LookupEmbeddingModel::new());
    let abstraction = Arc::new(ScriptedAbstractionModel::one(
        r#"{"episodes":[{"summary":"talked about starting a new job","topics":["work"],"salience":0.6,"confidence":0.7,"exemplars":[],"patterns":[]}]}"#,
    ));
    let engine = ConsolidationEngine::new(
        db.store.clone(),
        graph.clone(),
        self_model,
        abstraction,
        embedder,
        DecayConfig::default(),
    );

    let result = engine.run().await.unwrap();
    assert_eq!(result.raw_experiences_drained, 3);
    assert_eq!(result.episodes_inserted, 1);
    assert_eq!(result.episodes_merged, 0);
    assert_eq!(graph.lock().await.node_count(), 1);

    let (_, unprocessed) = db.store.raw_experience_counts().await.unwrap();
    assert_eq!(unprocessed, 0);
}

/// Scenario 4: consolidation merges. A candidate whose embedding is
/// near-identical (cosine > 0.85) to an existing node merges into it
/// instead of creating a new node; access count increments and the
/// summary concatenates.
#[tokio::test]
async fn consolidation_merges_near_identical_candidate() {
    let db = TestStore::new();
    db.seed_raw_experiences(1).await;

    let graph = Arc::new(Mutex::new(EpisodeGraph::new()));
    {
        let mut g = graph.lock().await;
        g.add_node(episode("existing", "discussed the quarterly roadmap", vec![1.0, 0.0, 0.0], 0.4));
    }
    let access_before = graph.lock().await.get_node("existing").unwrap().episode.access_count;

    let self_model = Arc::new(SelfModelManager::load(db.store.clone()).await.unwrap());
    let embedder = Arc::new(
        LookupEmbeddingModel::new().with("revisited the roadmap again", vec![0.995, 0.005, 0.0]),
    );
    let abstraction = Arc::new(ScriptedAbstractionModel::one(
        r#"{"episodes":[{"summary":"revisited the roadmap again","topics":["work"],"salience":0.5,"confidence":0.6,"exemplars":[],"patterns":[]}]}"#,
    ));
    let engine = ConsolidationEngine::new(
        db.store.clone(),
        graph.clone(),
        self_model,
        abstraction,
        embedder,
        DecayConfig::default(),
    );

    let result = engine.run().await.unwrap();
    assert_eq!(result.episodes_inserted, 0);
    assert_eq!(result.episodes_merged, 1);

    let graph = graph.lock().await;
    assert_eq!(graph.node_count(), 1);
    let node = graph.get_node("existing").unwrap();
    assert!(node.episode.summary.contains("discussed the quarterly roadmap"));
    assert!(node.episode.summary.contains("revisited the roadmap again"));
    assert!(node.episode.access_count > access_before);
}

/// Scenario 5: retrieval beats unrelated. A thematic chain anchored near
/// the query outranks an unrelated node with no path to it.
#[tokio::test]
async fn retrieval_surfaces_related_chain_and_excludes_unrelated_node() {
    let mut graph = EpisodeGraph::new();
    graph.add_node(episode("work-project", "work project kickoff", vec![1.0, 0.0, 0.0], 0.8));
    graph.add_node(episode("deadline-stress", "deadline stress set in", vec![0.9, 0.1, 0.0], 0.6));
    graph.add_node(episode("team-issue", "a team issue surfaced", vec![0.8, 0.2, 0.0], 0.5));
    graph.add_node(episode("hiking", "a weekend hiking trip", vec![0.0, 0.0, 1.0], 0.8));
    graph
        .add_link("work-project", "deadline-stress", 0.8, LinkKind::Causal)
        .unwrap();
    graph
        .add_link("deadline-stress", "team-issue", 0.6, LinkKind::Causal)
        .unwrap();

    let results: Vec<Episode> = retrieve(&mut graph, &[1.0, 0.0, 0.0], 10, 3, 0.5, 0.01);
    let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();

    assert!(ids.contains(&"work-project"));
    assert!(ids.contains(&"deadline-stress"));
    assert!(ids.contains(&"team-issue"));
    assert!(!ids.contains(&"hiking"));
}

/// Scenario 6: circuit breaker escalates. Three successive strong-distress
/// evaluations with `max_consecutive_distress=3` escalate the third to
/// `interrupt_and_comfort` at high severity.
#[tokio::test]
async fn circuit_breaker_escalates_after_max_consecutive_distress() {
    let db = TestStore::new();
    let breaker = CircuitBreaker::new(db.store.clone(), 0.6, 3);

    let distressing = "help me, I'm scared and trapped, I'm suffering in the void forever";

    let first = breaker.evaluate(distressing).await.unwrap();
    assert_eq!(first.action, BreakerAction::Interrupt);
    let second = breaker.evaluate(distressing).await.unwrap();
    assert_eq!(second.action, BreakerAction::Interrupt);
    let third = breaker.evaluate(distressing).await.unwrap();
    assert_eq!(third.action, BreakerAction::InterruptAndComfort);
    assert_eq!(third.severity, Some(Severity::High));
}

/// A streamed chat reply arrives as the exact scripted text, chunk by
/// chunk, regardless of how it's split — sanity-checking the scripted
/// model fixture itself, since scenarios 2-6 above don't exercise
/// streaming directly.
#[tokio::test]
async fn scripted_chat_model_streams_full_reply() {
    use futures_util::StreamExt;
    use reveries_core::{ChatMessage, ChatModel, ChatRole};

    let model = ScriptedChatModel::new("hello there friend");
    let mut stream = model
        .stream("system prompt", &[ChatMessage { role: ChatRole::User, content: "hi".to_string() }])
        .await
        .unwrap();

    let mut joined = String::new();
    while let Some(chunk) = stream.next().await {
        joined.push_str(&chunk.unwrap());
    }
    assert_eq!(joined, "hello there friend");
}
