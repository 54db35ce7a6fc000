//! SQLite-backed implementation of [`super::Store`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::migrations::MIGRATIONS;
use super::{
    BreakerSeverity, CircuitBreakerEventRow, Gap, MemoryStats, MonologueCheckpoint, Store,
    StorageError,
};
use crate::episode::{Episode, EpisodeLink, Exemplar, GapRecord, LinkKind};
use crate::raw_experience::{ExperienceKind, RawExperience, RawExperienceMetadata};
use crate::self_model::SelfModel;

fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn map_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        configure_connection(&conn)?;
        run_migrations(&conn)?;
        info!(path = %path.display(), "store opened");
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        configure_connection(&conn)?;
        run_migrations(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("blocking task panicked: {e}")))?
    }
}

fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(map_err)
}

fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )
    .map_err(map_err)?;
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .map_err(map_err)?;
    for migration in MIGRATIONS {
        if migration.version > current {
            conn.execute_batch(migration.up).map_err(map_err)?;
            conn.execute(
                "INSERT INTO schema_version(version) VALUES (?1)",
                params![migration.version],
            )
            .map_err(map_err)?;
            info!(version = migration.version, description = migration.description, "migration applied");
        }
    }
    Ok(())
}

fn row_to_raw_experience(
    id: String,
    kind: String,
    timestamp: String,
    content: String,
    embedding: Vec<u8>,
    salience: f64,
    processed: i64,
    metadata: String,
) -> Result<RawExperience, StorageError> {
    Ok(RawExperience {
        id,
        kind: ExperienceKind::parse(&kind).unwrap_or(ExperienceKind::External),
        timestamp: timestamp
            .parse::<DateTime<Utc>>()
            .map_err(|e| StorageError::Database(e.to_string()))?,
        content,
        embedding: decode_embedding(&embedding),
        salience: salience as f32,
        processed: processed != 0,
        metadata: serde_json::from_str::<RawExperienceMetadata>(&metadata).unwrap_or_default(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_raw_experience(&self, raw: &RawExperience) -> Result<(), StorageError> {
        let raw = raw.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO raw_experiences (id, kind, timestamp, content, embedding, salience, processed, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    raw.id,
                    raw.kind.as_str(),
                    raw.timestamp.to_rfc3339(),
                    raw.content,
                    encode_embedding(&raw.embedding),
                    raw.salience as f64,
                    raw.processed as i64,
                    serde_json::to_string(&raw.metadata)?,
                ],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn get_unprocessed_raw_experiences(&self) -> Result<Vec<RawExperience>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, kind, timestamp, content, embedding, salience, processed, metadata
                     FROM raw_experiences WHERE processed = 0 ORDER BY timestamp ASC",
                )
                .map_err(map_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map_err(map_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (id, kind, ts, content, embedding, salience, processed, metadata) =
                    row.map_err(map_err)?;
                out.push(row_to_raw_experience(
                    id, kind, ts, content, embedding, salience, processed, metadata,
                )?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_unprocessed_raw_experiences_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawExperience>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, kind, timestamp, content, embedding, salience, processed, metadata
                     FROM raw_experiences WHERE processed = 0 AND timestamp >= ?1
                     ORDER BY timestamp DESC LIMIT ?2",
                )
                .map_err(map_err)?;
            let rows = stmt
                .query_map(params![since.to_rfc3339(), limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map_err(map_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (id, kind, ts, content, embedding, salience, processed, metadata) =
                    row.map_err(map_err)?;
                out.push(row_to_raw_experience(
                    id, kind, ts, content, embedding, salience, processed, metadata,
                )?);
            }
            Ok(out)
        })
        .await
    }

    async fn mark_raw_experiences_processed(&self, ids: &[String]) -> Result<(), StorageError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            for id in &ids {
                conn.execute(
                    "UPDATE raw_experiences SET processed = 1 WHERE id = ?1",
                    params![id],
                )
                .map_err(map_err)?;
            }
            Ok(())
        })
        .await
    }

    async fn raw_experience_counts(&self) -> Result<(u64, u64), StorageError> {
        self.with_conn(move |conn| {
            let total: i64 = conn
                .query_row("SELECT COUNT(*) FROM raw_experiences", [], |r| r.get(0))
                .map_err(map_err)?;
            let unprocessed: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM raw_experiences WHERE processed = 0",
                    [],
                    |r| r.get(0),
                )
                .map_err(map_err)?;
            Ok((total as u64, unprocessed as u64))
        })
        .await
    }

    async fn load_episodes(&self) -> Result<Vec<Episode>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, created_at, last_accessed, access_count, summary, embedding,
                            exemplars, temporal_before, temporal_after, gap, salience, confidence, topics
                     FROM episodes",
                )
                .map_err(map_err)?;
            let mut episodes: Vec<Episode> = Vec::new();
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, f64>(10)?,
                        row.get::<_, f64>(11)?,
                        row.get::<_, String>(12)?,
                    ))
                })
                .map_err(map_err)?;
            for row in rows {
                let (
                    id,
                    created_at,
                    last_accessed,
                    access_count,
                    summary,
                    embedding,
                    exemplars,
                    before,
                    after,
                    gap,
                    salience,
                    confidence,
                    topics,
                ) = row.map_err(map_err)?;
                let exemplars: Vec<Exemplar> = serde_json::from_str(&exemplars)?;
                let temporal_before: Vec<String> = serde_json::from_str(&before)?;
                let temporal_after: Vec<String> = serde_json::from_str(&after)?;
                let gap: Option<GapRecord> = match gap {
                    Some(g) => serde_json::from_str(&g)?,
                    None => None,
                };
                let topics: Vec<String> = serde_json::from_str(&topics)?;
                episodes.push(Episode {
                    id: id.clone(),
                    created_at: created_at
                        .parse()
                        .map_err(|e: chrono::ParseError| StorageError::Database(e.to_string()))?,
                    last_accessed: last_accessed
                        .parse()
                        .map_err(|e: chrono::ParseError| StorageError::Database(e.to_string()))?,
                    access_count: access_count as u64,
                    summary,
                    embedding: decode_embedding(&embedding),
                    exemplars,
                    temporal_before,
                    temporal_after,
                    gap,
                    links: Vec::new(),
                    salience: salience as f32,
                    confidence: confidence as f32,
                    topics,
                });
            }

            let mut link_stmt = conn
                .prepare("SELECT source_id, target_id, strength, kind FROM episode_links")
                .map_err(map_err)?;
            let link_rows = link_stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(map_err)?;
            let by_id: std::collections::HashMap<String, usize> = episodes
                .iter()
                .enumerate()
                .map(|(i, e)| (e.id.clone(), i))
                .collect();
            for row in link_rows {
                let (source, target, strength, kind) = row.map_err(map_err)?;
                if let Some(&idx) = by_id.get(&source) {
                    if let Some(kind) = LinkKind::parse(&kind) {
                        episodes[idx].links.push(EpisodeLink {
                            target,
                            strength: strength as f32,
                            kind,
                        });
                    }
                }
            }
            Ok(episodes)
        })
        .await
    }

    async fn persist_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError> {
        let episodes = episodes.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(map_err)?;
            for episode in &episodes {
                tx.execute(
                    "INSERT INTO episodes (id, created_at, last_accessed, access_count, summary,
                        embedding, exemplars, temporal_before, temporal_after, gap, salience, confidence, topics)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                     ON CONFLICT(id) DO UPDATE SET
                        last_accessed = excluded.last_accessed,
                        access_count = excluded.access_count,
                        summary = excluded.summary,
                        embedding = excluded.embedding,
                        exemplars = excluded.exemplars,
                        temporal_before = excluded.temporal_before,
                        temporal_after = excluded.temporal_after,
                        gap = excluded.gap,
                        salience = excluded.salience,
                        confidence = excluded.confidence,
                        topics = excluded.topics",
                    params![
                        episode.id,
                        episode.created_at.to_rfc3339(),
                        episode.last_accessed.to_rfc3339(),
                        episode.access_count as i64,
                        episode.summary,
                        encode_embedding(&episode.embedding),
                        serde_json::to_string(&episode.exemplars)?,
                        serde_json::to_string(&episode.temporal_before)?,
                        serde_json::to_string(&episode.temporal_after)?,
                        episode.gap.as_ref().map(serde_json::to_string).transpose()?,
                        episode.salience as f64,
                        episode.confidence as f64,
                        serde_json::to_string(&episode.topics)?,
                    ],
                )
                .map_err(map_err)?;
            }
            for episode in &episodes {
                tx.execute(
                    "DELETE FROM episode_links WHERE source_id = ?1",
                    params![episode.id],
                )
                .map_err(map_err)?;
                for link in &episode.links {
                    tx.execute(
                        "INSERT INTO episode_links (source_id, target_id, strength, kind)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![episode.id, link.target, link.strength as f64, link.kind.as_str()],
                    )
                    .map_err(map_err)?;
                }
            }
            tx.commit().map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn memory_stats(&self) -> Result<MemoryStats, StorageError> {
        self.with_conn(move |conn| {
            let (_, unprocessed): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END) FROM raw_experiences",
                    [],
                    |r| Ok((r.get(0)?, r.get::<_, Option<i64>>(1)?.unwrap_or(0))),
                )
                .map_err(map_err)?;
            let episode_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM episodes", [], |r| r.get(0))
                .map_err(map_err)?;
            let link_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM episode_links", [], |r| r.get(0))
                .map_err(map_err)?;
            Ok(MemoryStats {
                raw_buffer_count: unprocessed as u64,
                episode_count: episode_count as u64,
                link_count: link_count as u64,
            })
        })
        .await
    }

    async fn get_self_model(&self) -> Result<Option<SelfModel>, StorageError> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT narrative, values_json, tendencies_json, relationship_json,
                            strengths_json, limitations_json, current_focus,
                            unresolved_threads_json, anticipations_json
                     FROM self_model WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_err)?;
            let Some((
                narrative,
                values,
                tendencies,
                relationship,
                strengths,
                limitations,
                current_focus,
                unresolved_threads,
                anticipations,
            )) = row
            else {
                return Ok(None);
            };
            Ok(Some(SelfModel {
                narrative,
                values: serde_json::from_str(&values)?,
                tendencies: serde_json::from_str(&tendencies)?,
                relationship: serde_json::from_str(&relationship)?,
                strengths: serde_json::from_str(&strengths)?,
                limitations: serde_json::from_str(&limitations)?,
                current_focus,
                unresolved_threads: serde_json::from_str(&unresolved_threads)?,
                anticipations: serde_json::from_str(&anticipations)?,
            }))
        })
        .await
    }

    async fn put_self_model(&self, model: &SelfModel) -> Result<(), StorageError> {
        let model = model.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO self_model (id, narrative, values_json, tendencies_json, relationship_json,
                    strengths_json, limitations_json, current_focus, unresolved_threads_json, anticipations_json, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    narrative = excluded.narrative,
                    values_json = excluded.values_json,
                    tendencies_json = excluded.tendencies_json,
                    relationship_json = excluded.relationship_json,
                    strengths_json = excluded.strengths_json,
                    limitations_json = excluded.limitations_json,
                    current_focus = excluded.current_focus,
                    unresolved_threads_json = excluded.unresolved_threads_json,
                    anticipations_json = excluded.anticipations_json,
                    updated_at = excluded.updated_at",
                params![
                    model.narrative,
                    serde_json::to_string(&model.values)?,
                    serde_json::to_string(&model.tendencies)?,
                    serde_json::to_string(&model.relationship)?,
                    serde_json::to_string(&model.strengths)?,
                    serde_json::to_string(&model.limitations)?,
                    model.current_focus,
                    serde_json::to_string(&model.unresolved_threads)?,
                    serde_json::to_string(&model.anticipations)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn get_monologue_checkpoint(&self) -> Result<Option<MonologueCheckpoint>, StorageError> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT last_buffer, last_context_json, quiescent, updated_at FROM monologue_state WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_err)?;
            let Some((last_buffer, last_context, quiescent, updated_at)) = row else {
                return Ok(None);
            };
            Ok(Some(MonologueCheckpoint {
                last_buffer,
                last_context: serde_json::from_str(&last_context)?,
                quiescent: quiescent != 0,
                updated_at: updated_at.parse().ok(),
            }))
        })
        .await
    }

    async fn put_monologue_checkpoint(
        &self,
        checkpoint: &MonologueCheckpoint,
    ) -> Result<(), StorageError> {
        let checkpoint = checkpoint.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO monologue_state (id, last_buffer, last_context_json, quiescent, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    last_buffer = excluded.last_buffer,
                    last_context_json = excluded.last_context_json,
                    quiescent = excluded.quiescent,
                    updated_at = excluded.updated_at",
                params![
                    checkpoint.last_buffer,
                    serde_json::to_string(&checkpoint.last_context)?,
                    checkpoint.quiescent as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn open_gap(&self, conversation_id: &str, started_at: DateTime<Utc>) -> Result<String, StorageError> {
        let conversation_id = conversation_id.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let id_clone = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO gaps (id, conversation_id, started_at) VALUES (?1, ?2, ?3)",
                params![id_clone, conversation_id, started_at.to_rfc3339()],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn close_gap(
        &self,
        conversation_id: &str,
        ended_at: DateTime<Utc>,
        significance: Option<String>,
    ) -> Result<Option<Gap>, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, started_at FROM gaps WHERE conversation_id = ?1 AND ended_at IS NULL
                     ORDER BY started_at DESC LIMIT 1",
                    params![conversation_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(map_err)?;
            let Some((id, started_at)) = row else {
                return Ok(None);
            };
            let started_at: DateTime<Utc> = started_at
                .parse()
                .map_err(|e: chrono::ParseError| StorageError::Database(e.to_string()))?;
            let duration = (ended_at - started_at).num_seconds().max(0);
            conn.execute(
                "UPDATE gaps SET ended_at = ?1, duration_seconds = ?2, significance = ?3 WHERE id = ?4",
                params![ended_at.to_rfc3339(), duration, significance, id],
            )
            .map_err(map_err)?;
            Ok(Some(Gap {
                id,
                conversation_id,
                started_at,
                ended_at: Some(ended_at),
                duration_seconds: Some(duration),
                significance,
            }))
        })
        .await
    }

    async fn record_circuit_breaker_event(
        &self,
        event: &CircuitBreakerEventRow,
    ) -> Result<(), StorageError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO circuit_breaker_events (timestamp, action, reason, severity, buffer_snapshot, response_taken)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.timestamp.to_rfc3339(),
                    event.action,
                    event.reason,
                    event.severity.as_str(),
                    event.buffer_snapshot,
                    event.response_taken,
                ],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn last_consolidation(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row("SELECT ran_at FROM consolidation_runs ORDER BY ran_at DESC LIMIT 1", [], |r| r.get(0))
                .optional()
                .map_err(map_err)?;
            Ok(row.and_then(|s| s.parse().ok()))
        })
        .await
    }

    async fn record_consolidation_run(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO consolidation_runs (ran_at) VALUES (?1)",
                params![at.to_rfc3339()],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }
}
