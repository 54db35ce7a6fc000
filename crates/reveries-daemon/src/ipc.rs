//! The Unix-socket transport. One newline-delimited JSON request per line;
//! connections are persistent and a client may issue many requests on one
//! socket. Grounded in the unified daemon's accept loop, generalized from a
//! one-request-per-connection protocol to a per-line read loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{error, info, warn};

use reveries_core::{ConsolidationEngine, EmbeddingModel, EpisodeGraph, MonologueLoop, Store};

use crate::conversation::ConversationHandler;
use crate::protocol::{MemorySearchHit, MemoryStatsPayload, Request, Response, StatusPayload};

/// Rejects an inbound line past this size rather than growing the read
/// buffer without bound for a misbehaving or malicious client.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

pub struct DaemonState {
    pub store: Arc<dyn Store>,
    pub graph: Arc<Mutex<EpisodeGraph>>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub conversation: Arc<ConversationHandler>,
    pub monologue: Arc<MonologueLoop>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub started_at: Instant,
}

pub async fn run(
    socket_path: &Path,
    state: Arc<DaemonState>,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "ipc listening");

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, shutdown).await {
                        error!(error = %e, "ipc connection ended with error");
                    }
                });
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }
        if line.len() > MAX_REQUEST_BYTES {
            send(&writer, &Response::error(None, "request exceeds maximum size")).await?;
            continue;
        }

        let request: Request = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                send(&writer, &Response::error(None, format!("malformed request: {e}"))).await?;
                continue;
            }
        };

        if let Err(e) = dispatch(request, &state, &writer, &shutdown).await {
            warn!(error = %e, "request handling failed");
        }
    }

    Ok(())
}

async fn send(writer: &Arc<Mutex<OwnedWriteHalf>>, response: &Response) -> anyhow::Result<()> {
    let encoded = serde_json::to_string(response)?;
    let mut guard = writer.lock().await;
    guard.write_all(encoded.as_bytes()).await?;
    guard.write_all(b"\n").await?;
    guard.flush().await?;
    Ok(())
}

async fn dispatch(
    request: Request,
    state: &Arc<DaemonState>,
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    shutdown: &Arc<Notify>,
) -> anyhow::Result<()> {
    let request_id = request.request_id().map(|s| s.to_string());

    match request {
        Request::Chat {
            message,
            conversation_id,
            ..
        } => {
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
            let writer_clone = writer.clone();
            let rid = request_id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(content) = chunk_rx.recv().await {
                    let _ = send(
                        &writer_clone,
                        &Response::ChatChunk {
                            content,
                            request_id: rid.clone(),
                        },
                    )
                    .await;
                }
            });

            let outcome = state.conversation.handle(&message, &conversation_id, chunk_tx).await;
            let _ = forwarder.await;

            match outcome {
                Ok(()) => send(writer, &Response::ChatDone { request_id }).await?,
                Err(e) => send(writer, &Response::error(request_id, e.to_string())).await?,
            }
        }

        Request::Status { .. } => {
            let stats = state.store.memory_stats().await?;
            let last_consolidation = state.store.last_consolidation().await?;
            let payload = StatusPayload {
                uptime_ms: state.started_at.elapsed().as_millis() as u64,
                monologue_state: format!("{:?}", state.monologue.state().await).to_lowercase(),
                memory_stats: MemoryStatsPayload {
                    raw_buffer_count: stats.raw_buffer_count,
                    episode_count: stats.episode_count,
                    link_count: stats.link_count,
                },
                last_consolidation,
            };
            send(writer, &Response::Status { payload, request_id }).await?;
        }

        Request::Consolidate { .. } => match state.consolidation.run().await {
            Ok(result) => {
                let data = serde_json::json!({
                    "raw_experiences_drained": result.raw_experiences_drained,
                    "episodes_inserted": result.episodes_inserted,
                    "episodes_merged": result.episodes_merged,
                    "model_call_failed": result.model_call_failed,
                });
                send(writer, &Response::ok(request_id, Some(data))).await?;
            }
            Err(e) => send(writer, &Response::error(request_id, e.to_string())).await?,
        },

        Request::MonologueStream { .. } => {
            let mut rx = state.monologue.subscribe();
            loop {
                match rx.recv().await {
                    Ok(content) => {
                        let result = send(
                            writer,
                            &Response::MonologueChunk {
                                content,
                                request_id: request_id.clone(),
                            },
                        )
                        .await;
                        if result.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }

        Request::MemoryStats { .. } => {
            let stats = state.store.memory_stats().await?;
            let data = serde_json::json!({
                "raw_buffer_count": stats.raw_buffer_count,
                "episode_count": stats.episode_count,
                "link_count": stats.link_count,
            });
            send(writer, &Response::ok(request_id, Some(data))).await?;
        }

        Request::MemorySearch { query, .. } => match state.embedder.embed(&query).await {
            Ok(embedding) => {
                let graph = state.graph.lock().await;
                let hits: Vec<MemorySearchHit> = graph
                    .find_nearest(&embedding, 20)
                    .into_iter()
                    .filter_map(|(id, similarity)| {
                        graph.get_node(&id).map(|node| MemorySearchHit {
                            id,
                            summary: node.episode.summary.clone(),
                            similarity,
                        })
                    })
                    .collect();
                let data = serde_json::to_value(hits)?;
                send(writer, &Response::ok(request_id, Some(data))).await?;
            }
            Err(e) => send(writer, &Response::error(request_id, e.to_string())).await?,
        },

        Request::Shutdown { .. } => {
            shutdown.notify_one();
            send(writer, &Response::ok(request_id, None)).await?;
        }
    }

    Ok(())
}
