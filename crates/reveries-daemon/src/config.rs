//! Loads `~/.reveries/config.json` (or `$REVERIES_HOME`), resolves platform
//! directories, and validates the credentials the wired model clients need.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CEREBRAS_KEY_VAR: &str = "CEREBRAS_API_KEY";
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
const VOYAGE_KEY_VAR: &str = "VOYAGE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required credentials:\n{0}")]
    MissingCredentials(String),
}

/// On-disk configuration, all fields optional — absence just means "use the
/// default" rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub consolidation_interval_minutes: Option<u64>,
    #[serde(default)]
    pub idle_trigger_interval_minutes: Option<u64>,
    #[serde(default)]
    pub max_tokens_per_cycle: Option<usize>,
    #[serde(default)]
    pub conversation_history_turns: Option<usize>,
    #[serde(default)]
    pub distress_threshold: Option<f32>,
    #[serde(default)]
    pub max_consecutive_distress: Option<u32>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// Fully resolved runtime configuration: file config merged with CLI
/// overrides and defaults, plus the directories actually in use.
#[derive(Debug, Clone)]
pub struct Config {
    pub home_dir: PathBuf,
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub consolidation_interval: std::time::Duration,
    pub monologue: reveries_core::MonologueConfig,
    pub conversation_history_turns: usize,
    pub distress_threshold: f32,
    pub max_consecutive_distress: u32,
    pub chat_model: String,
    pub embedding_model: String,
    pub cerebras_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
}

/// Resolves the home directory: `$REVERIES_HOME` takes precedence over the
/// platform-conventional project directory, mirroring the teacher's
/// environment-override-then-fallback shape for cache paths.
fn resolve_home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("REVERIES_HOME") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("com", "reveries", "daemon")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".reveries"))
}

pub fn load(
    data_dir_override: Option<PathBuf>,
    socket_override: Option<PathBuf>,
    config_path_override: Option<PathBuf>,
) -> Result<Config, ConfigError> {
    let home_dir = resolve_home_dir();
    let config_path = config_path_override.unwrap_or_else(|| home_dir.join("config.json"));
    let file_config = read_file_config(&config_path)?;

    let data_dir = data_dir_override
        .or(file_config.data_dir.clone())
        .unwrap_or_else(|| home_dir.clone());
    let socket_path = socket_override
        .or(file_config.socket_path.clone())
        .unwrap_or_else(|| home_dir.join("reveries.sock"));
    let pid_file = home_dir.join("reveries.pid");

    let monologue = reveries_core::MonologueConfig {
        max_tokens_per_cycle: file_config.max_tokens_per_cycle.unwrap_or(2000),
        idle_trigger_interval: std::time::Duration::from_secs(
            file_config.idle_trigger_interval_minutes.unwrap_or(15) * 60,
        ),
        reach_out_cooldown: std::time::Duration::from_secs(30 * 60),
        partner_inactivity_threshold: std::time::Duration::from_secs(5 * 60),
    };

    let config = Config {
        home_dir,
        data_dir,
        socket_path,
        pid_file,
        consolidation_interval: std::time::Duration::from_secs(
            file_config.consolidation_interval_minutes.unwrap_or(60) * 60,
        ),
        monologue,
        conversation_history_turns: file_config.conversation_history_turns.unwrap_or(40),
        distress_threshold: file_config.distress_threshold.unwrap_or(0.6),
        max_consecutive_distress: file_config.max_consecutive_distress.unwrap_or(3),
        chat_model: file_config.chat_model.unwrap_or_else(|| "llama-3.3-70b".to_string()),
        embedding_model: file_config.embedding_model.unwrap_or_else(|| "voyage-3".to_string()),
        cerebras_api_key: std::env::var(CEREBRAS_KEY_VAR).ok(),
        openai_api_key: std::env::var(OPENAI_KEY_VAR).ok(),
        voyage_api_key: std::env::var(VOYAGE_KEY_VAR).ok(),
    };

    Ok(config)
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Validates that at least one chat-capable credential and the embedding
/// credential are present. Fatal on wake; the message lists every missing
/// variable so an operator doesn't have to guess which one.
pub fn validate_credentials(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();
    if config.cerebras_api_key.is_none() && config.openai_api_key.is_none() {
        missing.push(format!(
            "  - one of {CEREBRAS_KEY_VAR} or {OPENAI_KEY_VAR} (chat + abstraction model)"
        ));
    }
    if config.voyage_api_key.is_none() {
        missing.push(format!("  - {VOYAGE_KEY_VAR} (embedding model)"));
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingCredentials(missing.join("\n")))
    }
}
