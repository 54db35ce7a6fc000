//! Schema migrations, applied in order against a fresh or existing store.

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS raw_experiences (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    salience REAL NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_raw_experiences_processed_ts
    ON raw_experiences(processed, timestamp);

CREATE TABLE IF NOT EXISTS episodes (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    summary TEXT NOT NULL,
    embedding BLOB NOT NULL,
    exemplars TEXT NOT NULL DEFAULT '[]',
    temporal_before TEXT NOT NULL DEFAULT '[]',
    temporal_after TEXT NOT NULL DEFAULT '[]',
    gap TEXT,
    salience REAL NOT NULL,
    confidence REAL NOT NULL,
    topics TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS episode_links (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    strength REAL NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, kind),
    FOREIGN KEY (source_id) REFERENCES episodes(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_episode_links_source ON episode_links(source_id);

CREATE TABLE IF NOT EXISTS self_model (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    narrative TEXT NOT NULL DEFAULT '',
    values_json TEXT NOT NULL DEFAULT '[]',
    tendencies_json TEXT NOT NULL DEFAULT '[]',
    relationship_json TEXT NOT NULL DEFAULT '{}',
    strengths_json TEXT NOT NULL DEFAULT '[]',
    limitations_json TEXT NOT NULL DEFAULT '[]',
    current_focus TEXT,
    unresolved_threads_json TEXT NOT NULL DEFAULT '[]',
    anticipations_json TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monologue_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_buffer TEXT NOT NULL DEFAULT '',
    last_context_json TEXT NOT NULL DEFAULT '{}',
    quiescent INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gaps (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_seconds INTEGER,
    significance TEXT
);
CREATE INDEX IF NOT EXISTS idx_gaps_conversation ON gaps(conversation_id, ended_at);

CREATE TABLE IF NOT EXISTS circuit_breaker_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    reason TEXT NOT NULL,
    severity TEXT NOT NULL,
    buffer_snapshot TEXT NOT NULL,
    response_taken TEXT
);

CREATE TABLE IF NOT EXISTS consolidation_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ran_at TEXT NOT NULL
);
"#;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema: raw experiences, episodes, links, self-model, monologue state, gaps, circuit breaker events",
    up: MIGRATION_V1_UP,
}];
