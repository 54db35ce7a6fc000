//! Durable storage: the logical schema from the external-interfaces
//! contract, implemented here as SQLite tables (see [`sqlite`]).

mod migrations;
mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::Episode;
use crate::raw_experience::RawExperience;
use crate::self_model::SelfModel;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store initialization failed: {0}")]
    Init(String),
}

/// Singleton monologue checkpoint, written on shutdown and read on wake to
/// decide whether to resume mid-thought.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonologueCheckpoint {
    pub last_buffer: String,
    pub last_context: serde_json::Value,
    pub quiescent: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Gap {
    pub id: String,
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerSeverity {
    Low,
    Medium,
    High,
}

impl BreakerSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerSeverity::Low => "low",
            BreakerSeverity::Medium => "medium",
            BreakerSeverity::High => "high",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerEventRow {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub reason: String,
    pub severity: BreakerSeverity,
    pub buffer_snapshot: String,
    pub response_taken: Option<String>,
}

/// Aggregate counts used by the `status`/`memory_stats` IPC responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub raw_buffer_count: u64,
    pub episode_count: u64,
    pub link_count: u64,
}

/// The full durable contract C1–C6 depend on. Implemented by [`SqliteStore`];
/// kept as a trait so tests can substitute an in-memory fake without an
/// on-disk file.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_raw_experience(&self, raw: &RawExperience) -> Result<(), StorageError>;
    async fn get_unprocessed_raw_experiences(&self) -> Result<Vec<RawExperience>, StorageError>;
    async fn get_unprocessed_raw_experiences_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawExperience>, StorageError>;
    async fn mark_raw_experiences_processed(&self, ids: &[String]) -> Result<(), StorageError>;
    async fn raw_experience_counts(&self) -> Result<(u64, u64), StorageError>;

    /// Reads every episode with its links attached, in no particular order;
    /// the hydrator assembles these into the in-memory graph.
    async fn load_episodes(&self) -> Result<Vec<Episode>, StorageError>;

    /// Two-pass upsert-then-relink transaction: every episode is upserted
    /// first, then every episode's links are replaced wholesale. Wrapped in
    /// one durable transaction so a partial write is never observable.
    async fn persist_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError>;

    async fn memory_stats(&self) -> Result<MemoryStats, StorageError>;

    async fn get_self_model(&self) -> Result<Option<SelfModel>, StorageError>;
    async fn put_self_model(&self, model: &SelfModel) -> Result<(), StorageError>;

    async fn get_monologue_checkpoint(&self) -> Result<Option<MonologueCheckpoint>, StorageError>;
    async fn put_monologue_checkpoint(
        &self,
        checkpoint: &MonologueCheckpoint,
    ) -> Result<(), StorageError>;

    async fn open_gap(&self, conversation_id: &str, started_at: DateTime<Utc>) -> Result<String, StorageError>;
    async fn close_gap(
        &self,
        conversation_id: &str,
        ended_at: DateTime<Utc>,
        significance: Option<String>,
    ) -> Result<Option<Gap>, StorageError>;

    async fn record_circuit_breaker_event(
        &self,
        event: &CircuitBreakerEventRow,
    ) -> Result<(), StorageError>;

    async fn last_consolidation(&self) -> Result<Option<DateTime<Utc>>, StorageError>;
    async fn record_consolidation_run(&self, at: DateTime<Utc>) -> Result<(), StorageError>;
}
