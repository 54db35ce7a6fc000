//! Newline-delimited JSON request/response shapes for the Unix-socket IPC
//! surface. Every request carries an optional client-generated `requestId`;
//! every response echoes it back so a client can correlate replies on a
//! connection carrying many requests in flight.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Chat {
        message: String,
        conversation_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    Status {
        #[serde(default)]
        request_id: Option<String>,
    },
    Consolidate {
        #[serde(default)]
        request_id: Option<String>,
    },
    MonologueStream {
        #[serde(default)]
        request_id: Option<String>,
    },
    MemoryStats {
        #[serde(default)]
        request_id: Option<String>,
    },
    MemorySearch {
        query: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    Shutdown {
        #[serde(default)]
        request_id: Option<String>,
    },
}

impl Request {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Request::Chat { request_id, .. }
            | Request::Status { request_id }
            | Request::Consolidate { request_id }
            | Request::MonologueStream { request_id }
            | Request::MemoryStats { request_id }
            | Request::MemorySearch { request_id, .. }
            | Request::Shutdown { request_id } => request_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatsPayload {
    pub raw_buffer_count: u64,
    pub episode_count: u64,
    pub link_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub uptime_ms: u64,
    pub monologue_state: String,
    pub memory_stats: MemoryStatsPayload,
    pub last_consolidation: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySearchHit {
    pub id: String,
    pub summary: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ChatChunk {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    ChatDone {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Status {
        #[serde(flatten)]
        payload: StatusPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    MonologueChunk {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    ProactiveMessage {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl Response {
    pub fn error(request_id: Option<String>, message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
            request_id,
        }
    }

    pub fn ok(request_id: Option<String>, data: Option<serde_json::Value>) -> Self {
        Response::Ok { data, request_id }
    }
}
