//! # Reveries Core
//!
//! The cognitive engine behind a persistent conversational companion: durable
//! episodic storage, an associative episode graph, consolidation of raw
//! experience into abstracted episodes, spreading-activation retrieval, a
//! self-model that accretes identity and relationship knowledge over time,
//! a context assembler that turns all of the above into a model-facing
//! preamble, an inner-monologue loop, and a circuit breaker that watches for
//! stuck loops and distress.
//!
//! This crate is transport-agnostic: it has no knowledge of sockets, HTTP, or
//! process lifecycle. Those concerns live in the daemon binary that embeds
//! this crate. Everything here operates against the [`model::ChatModel`],
//! [`model::AbstractionModel`], and [`model::EmbeddingModel`] traits, so the
//! engine can be exercised in tests without a network call in sight.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reveries_core::store::{Store, SqliteStore};
//! use reveries_core::hydrator;
//!
//! let store = SqliteStore::open_in_memory()?;
//! let graph = hydrator::hydrate(&store).await?;
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod consolidation;
pub mod context;
pub mod encoder;
pub mod episode;
pub mod graph;
pub mod hydrator;
pub mod model;
pub mod monologue;
pub mod raw_experience;
pub mod retrieval;
pub mod self_model;
pub mod store;

pub use circuit_breaker::{BreakerAction, BreakerVerdict, CircuitBreaker, Severity};
pub use consolidation::{ConsolidationEngine, ConsolidationResult, DecayConfig};
pub use context::{ContextAssembler, ContextInput};
pub use encoder::ExperienceEncoder;
pub use episode::{Episode, EpisodeLink, Exemplar, GapRecord, LinkKind};
pub use graph::EpisodeGraph;
pub use hydrator::{hydrate, persist};
pub use model::{AbstractionModel, ChatMessage, ChatModel, ChatRole, EmbeddingModel, ModelError};
pub use monologue::{MonologueConfig, MonologueLoop, MonologueState};
pub use raw_experience::{ExperienceKind, RawExperience, RawExperienceMetadata};
pub use retrieval::retrieve;
pub use self_model::{Relationship, SelfModel, SelfModelManager, SelfModelUpdates};
pub use store::{MemoryStats, SqliteStore, Store, StorageError};

/// Crate version, surfaced over the `status` request.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
