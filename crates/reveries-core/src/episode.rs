//! The durable abstraction that graph nodes carry as their data payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A verbatim quote retained to anchor an abstraction against drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exemplar {
    pub quote: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// A silence between conversations, recorded against the episode it was
/// folded into (if any) rather than only in the standalone `gaps` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GapRecord {
    pub duration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Causal,
    Thematic,
    Temporal,
    Emotional,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Causal => "causal",
            LinkKind::Thematic => "thematic",
            LinkKind::Temporal => "temporal",
            LinkKind::Emotional => "emotional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "causal" => Some(LinkKind::Causal),
            "thematic" => Some(LinkKind::Thematic),
            "temporal" => Some(LinkKind::Temporal),
            "emotional" => Some(LinkKind::Emotional),
            _ => None,
        }
    }
}

/// A directed edge from one episode to another. Strength decays towards
/// `minimum_link_strength` but edges are never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeLink {
    pub target: String,
    pub strength: f32,
    pub kind: LinkKind,
}

/// The full durable record for one episode. The graph keeps this split
/// between first-class fields (embedding, salience, access bookkeeping) and
/// the rest, carried as opaque payload — see `hydrator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub exemplars: Vec<Exemplar>,
    pub temporal_before: Vec<String>,
    pub temporal_after: Vec<String>,
    pub gap: Option<GapRecord>,
    pub links: Vec<EpisodeLink>,
    pub salience: f32,
    pub confidence: f32,
    pub topics: Vec<String>,
}

impl Episode {
    pub fn new(id: String, summary: String, embedding: Vec<f32>, now: DateTime<Utc>) -> Self {
        Episode {
            id,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            summary,
            embedding,
            exemplars: Vec::new(),
            temporal_before: Vec::new(),
            temporal_after: Vec::new(),
            gap: None,
            links: Vec::new(),
            salience: 0.3,
            confidence: 0.5,
            topics: Vec::new(),
        }
    }
}
