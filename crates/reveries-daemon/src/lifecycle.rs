//! Wires C1–C11 together, schedules periodic consolidation, and runs the
//! wake/sleep sequence around the IPC surface and the monologue loop.

use std::sync::Arc;
use std::time::Instant;

use reveries_core::{
    CircuitBreaker, ConsolidationEngine, ConsolidationResult, DecayConfig, EpisodeGraph,
    ExperienceEncoder, MonologueConfig, MonologueLoop, SelfModelManager, SqliteStore, Store,
};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::clients::cerebras::CerebrasClient;
use crate::clients::voyage::VoyageClient;
use crate::config::{self, Config};
use crate::conversation::ConversationHandler;
use crate::ipc::{self, DaemonState};

/// Runs the daemon end to end: wakes every component, serves the IPC
/// surface and the monologue loop until a shutdown request or signal
/// arrives, then sleeps cleanly. Returns once the process is safe to exit.
pub async fn run(
    data_dir_override: Option<std::path::PathBuf>,
    socket_override: Option<std::path::PathBuf>,
    config_path_override: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let config = config::load(data_dir_override, socket_override, config_path_override)?;
    config::validate_credentials(&config)?;

    let db_path = config.data_dir.join("reveries.db");
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);

    let (total, unprocessed) = store.raw_experience_counts().await?;
    info!(total, unprocessed, "raw experience counts at wake");

    let graph = reveries_core::hydrate(&store).await?;
    info!(
        nodes = graph.node_count(),
        links = graph.link_count(),
        "episode graph hydrated"
    );
    let graph = Arc::new(Mutex::new(graph));

    let self_model = Arc::new(SelfModelManager::load(store.clone()).await?);

    let chat_model: Arc<CerebrasClient> = Arc::new(CerebrasClient::new(
        config
            .cerebras_api_key
            .clone()
            .or_else(|| config.openai_api_key.clone())
            .expect("validate_credentials guarantees a chat credential is present"),
        config.chat_model.clone(),
    ));
    let embedder: Arc<VoyageClient> = Arc::new(VoyageClient::new(
        config
            .voyage_api_key
            .clone()
            .expect("validate_credentials guarantees a voyage credential is present"),
        config.embedding_model.clone(),
    ));

    let encoder = Arc::new(ExperienceEncoder::new(store.clone(), embedder.clone()));
    let circuit_breaker = Arc::new(CircuitBreaker::new(
        store.clone(),
        config.distress_threshold,
        config.max_consecutive_distress,
    ));
    let consolidation = Arc::new(ConsolidationEngine::new(
        store.clone(),
        graph.clone(),
        self_model.clone(),
        chat_model.clone(),
        embedder.clone(),
        DecayConfig::default(),
    ));

    let monologue_config = MonologueConfig {
        max_tokens_per_cycle: config.monologue.max_tokens_per_cycle,
        idle_trigger_interval: config.monologue.idle_trigger_interval,
        reach_out_cooldown: config.monologue.reach_out_cooldown,
        partner_inactivity_threshold: config.monologue.partner_inactivity_threshold,
    };
    let monologue = Arc::new(MonologueLoop::new(
        graph.clone(),
        store.clone(),
        self_model.clone(),
        chat_model.clone(),
        embedder.clone(),
        encoder.clone(),
        circuit_breaker.clone(),
        monologue_config,
    ));

    let conversation = Arc::new(ConversationHandler::new(
        store.clone(),
        graph.clone(),
        self_model.clone(),
        chat_model.clone(),
        embedder.clone(),
        encoder.clone(),
        monologue.clone(),
        config.conversation_history_turns,
    ));

    write_pid_file(&config)?;

    let shutdown = Arc::new(Notify::new());
    spawn_signal_listener(shutdown.clone());
    let consolidation_task = spawn_consolidation_timer(consolidation.clone(), config.consolidation_interval, shutdown.clone());
    let monologue_task = spawn_monologue_loop(monologue.clone(), config.monologue.idle_trigger_interval, shutdown.clone());

    let state = Arc::new(DaemonState {
        store: store.clone(),
        graph: graph.clone(),
        embedder: embedder.clone(),
        conversation: conversation.clone(),
        monologue: monologue.clone(),
        consolidation: consolidation.clone(),
        started_at: Instant::now(),
    });

    let ipc_result = ipc::run(&config.socket_path, state, shutdown.clone()).await;

    consolidation_task.abort();
    monologue_task.abort();

    sleep(&store, &graph, &conversation, &consolidation, &config).await;

    ipc_result
}

fn spawn_signal_listener(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt signal, shutting down");
            shutdown.notify_one();
        }
    });
}

fn spawn_consolidation_timer(
    consolidation: Arc<ConsolidationEngine>,
    interval: std::time::Duration,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    match consolidation.run().await {
                        Ok(result) => log_consolidation(&result),
                        Err(e) => warn!(error = %e, "scheduled consolidation pass failed"),
                    }
                }
            }
        }
    })
}

fn spawn_monologue_loop(
    monologue: Arc<MonologueLoop>,
    idle_interval: std::time::Duration,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                result = monologue.run_cycle() => {
                    if let Err(e) = result {
                        warn!(error = %e, "monologue cycle failed");
                    }
                    monologue.await_reactivation(idle_interval).await;
                }
            }
        }
    })
}

fn log_consolidation(result: &ConsolidationResult) {
    info!(
        drained = result.raw_experiences_drained,
        inserted = result.episodes_inserted,
        merged = result.episodes_merged,
        model_call_failed = result.model_call_failed,
        "consolidation pass complete"
    );
}

async fn sleep(
    store: &Arc<dyn Store>,
    graph: &Arc<Mutex<EpisodeGraph>>,
    conversation: &Arc<ConversationHandler>,
    consolidation: &Arc<ConsolidationEngine>,
    config: &Config,
) {
    if let Err(e) = conversation.end_active_session().await {
        warn!(error = %e, "failed to close out active session on shutdown");
    }

    if let Err(e) = consolidation.run().await {
        warn!(error = %e, "final consolidation pass on shutdown failed");
    }

    let graph = graph.lock().await;
    if let Err(e) = reveries_core::persist(&graph, store).await {
        warn!(error = %e, "failed to persist episode graph on shutdown");
    }

    let _ = std::fs::remove_file(&config.pid_file);
    info!("daemon shutting down cleanly");
}

fn write_pid_file(config: &Config) -> anyhow::Result<()> {
    if let Some(parent) = config.pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.pid_file, std::process::id().to_string())?;
    Ok(())
}
