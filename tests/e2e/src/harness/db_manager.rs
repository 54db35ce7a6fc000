//! Isolated, disposable stores for scenario tests: an in-memory SQLite
//! store per test plus seeding helpers for raw experiences.

use std::sync::Arc;

use chrono::Utc;
use reveries_core::{ExperienceKind, RawExperience, RawExperienceMetadata, SqliteStore, Store};

pub struct TestStore {
    pub store: Arc<dyn Store>,
}

impl TestStore {
    pub fn new() -> Self {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open_in_memory().expect("failed to open in-memory store"));
        TestStore { store }
    }

    /// Inserts `count` unprocessed conversation raw experiences with
    /// placeholder content and a zero embedding, returning their ids.
    pub async fn seed_raw_experiences(&self, count: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let raw = RawExperience {
                id: uuid::Uuid::new_v4().to_string(),
                kind: ExperienceKind::Conversation,
                timestamp: Utc::now(),
                content: format!("exchange number {i}"),
                embedding: vec![0.0, 0.0, 0.0],
                salience: 0.3,
                processed: false,
                metadata: RawExperienceMetadata::default(),
            };
            ids.push(raw.id.clone());
            self.store
                .insert_raw_experience(&raw)
                .await
                .expect("seed insert should not fail");
        }
        ids
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}
