//! Short-term records produced by the encoder and drained by consolidation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which subsystem produced a raw experience. Consolidation reads all three;
/// the monologue loop only ever encodes `Monologue`; the conversation
/// handler only ever encodes `Conversation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceKind {
    Conversation,
    Monologue,
    External,
}

impl ExperienceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceKind::Conversation => "conversation",
            ExperienceKind::Monologue => "monologue",
            ExperienceKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(ExperienceKind::Conversation),
            "monologue" => Some(ExperienceKind::Monologue),
            "external" => Some(ExperienceKind::External),
            _ => None,
        }
    }
}

/// Loose bag of metadata riding alongside a raw experience. Every field is
/// optional; the encoder fills in what it has and leaves the rest empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExperienceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub unresolved_tensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExperience {
    pub id: String,
    pub kind: ExperienceKind,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub salience: f32,
    pub processed: bool,
    pub metadata: RawExperienceMetadata,
}
