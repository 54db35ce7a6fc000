//! The singleton identity record and its exclusive-lock manager.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::store::{Store, StorageError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservedPattern {
    pub description: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub history: String,
    #[serde(default)]
    pub communication_style: String,
    #[serde(default)]
    pub shared_context: Vec<String>,
    #[serde(default)]
    pub observed_patterns: Vec<ObservedPattern>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelfModel {
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub tendencies: Vec<String>,
    #[serde(default)]
    pub relationship: Relationship,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub current_focus: Option<String>,
    #[serde(default)]
    pub unresolved_threads: Vec<String>,
    #[serde(default)]
    pub anticipations: Vec<String>,
}

/// The abstraction model's proposed changes for one consolidation pass.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfModelUpdates {
    #[serde(default)]
    pub current_focus: Option<String>,
    #[serde(default)]
    pub new_tendency: Option<String>,
    #[serde(default)]
    pub new_value: Option<String>,
    #[serde(default)]
    pub narrative_update: Option<String>,
}

impl SelfModel {
    /// Applies `updates` in place: appends current-focus, de-duplicates and
    /// appends tendencies/values, replaces the narrative if given. Running
    /// the same update twice is a no-op the second time (idempotent) because
    /// de-duplication happens on the merged set, not on append order.
    pub fn apply_updates(&mut self, updates: &SelfModelUpdates) {
        if let Some(focus) = &updates.current_focus {
            self.current_focus = Some(focus.clone());
        }
        if let Some(tendency) = &updates.new_tendency {
            if !self.tendencies.iter().any(|t| t == tendency) {
                self.tendencies.push(tendency.clone());
            }
        }
        if let Some(value) = &updates.new_value {
            if !self.values.iter().any(|v| v == value) {
                self.values.push(value.clone());
            }
        }
        if let Some(narrative) = &updates.narrative_update {
            self.narrative = narrative.clone();
        }
    }

    /// True once a conversation partner has been identified by name.
    pub fn has_partner(&self) -> bool {
        self.relationship.partner_id.is_some()
    }
}

#[derive(Debug, Error)]
pub enum SelfModelError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Serialises every write against the store through a single async mutex so
/// that detection (conversation handler) and consolidation can both mutate
/// the self-model without losing updates.
pub struct SelfModelManager {
    store: Arc<dyn Store>,
    cached: Mutex<SelfModel>,
}

impl SelfModelManager {
    pub async fn load(store: Arc<dyn Store>) -> Result<Self, SelfModelError> {
        let existing = store.get_self_model().await?;
        let model = existing.unwrap_or_default();
        Ok(SelfModelManager {
            store,
            cached: Mutex::new(model),
        })
    }

    /// Snapshot of the current self-model, for context assembly.
    pub async fn snapshot(&self) -> SelfModel {
        self.cached.lock().await.clone()
    }

    /// Sets the relationship partner id, but only the first time — later
    /// calls are no-ops unless `force` is set (explicit rename).
    pub async fn set_partner_name(&self, name: &str, force: bool) -> Result<(), SelfModelError> {
        let mut guard = self.cached.lock().await;
        if guard.relationship.partner_id.is_some() && !force {
            return Ok(());
        }
        guard.relationship.partner_id = Some(name.to_string());
        self.store.put_self_model(&guard).await?;
        info!(partner = %name, "partner name recorded");
        Ok(())
    }

    /// Reloads from the store, applies `updates` under the lock, and
    /// persists — the read-modify-write contract consolidation depends on
    /// so a concurrent partner-name write is never clobbered.
    pub async fn apply_updates(&self, updates: &SelfModelUpdates) -> Result<(), SelfModelError> {
        let mut guard = self.cached.lock().await;
        if let Some(fresh) = self.store.get_self_model().await? {
            *guard = fresh;
        }
        guard.apply_updates(updates);
        self.store.put_self_model(&guard).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applying_same_update_twice_is_idempotent() {
        let mut model = SelfModel::default();
        let update = SelfModelUpdates {
            current_focus: Some("learning rust".to_string()),
            new_tendency: Some("asks clarifying questions".to_string()),
            new_value: Some("curiosity".to_string()),
            narrative_update: Some("a careful observer".to_string()),
        };
        model.apply_updates(&update);
        let once = model.clone();
        model.apply_updates(&update);
        assert_eq!(once, model);
        assert_eq!(model.tendencies.len(), 1);
        assert_eq!(model.values.len(), 1);
    }

    #[test]
    fn partner_id_is_not_reset_by_unrelated_update() {
        let mut model = SelfModel::default();
        model.relationship.partner_id = Some("Sarah".to_string());
        model.apply_updates(&SelfModelUpdates {
            current_focus: Some("work".to_string()),
            ..Default::default()
        });
        assert_eq!(model.relationship.partner_id.as_deref(), Some("Sarah"));
    }
}
