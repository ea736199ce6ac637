//! Configuration for engram-memory

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Which graph backend the store is built on.
///
/// Resolved once at startup; the rest of the system only ever talks to the
/// `GraphStore` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process maps, nothing persisted. For demos and tests.
    Memory,

    /// Embedded relational file (SQLite).
    Sqlite,

    /// Remote graph-protocol server reached over HTTP/JSON.
    Remote,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            "remote" => Ok(BackendKind::Remote),
            other => Err(Error::config(format!("unknown graph backend: {other}"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Configuration for the graph memory system
#[derive(Debug, Clone)]
pub struct Config {
    /// Graph backend selection
    pub backend: BackendKind,

    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Explicit SQLite database path (overrides the data-dir default)
    pub sqlite_path: Option<PathBuf>,

    /// Base URL of the remote graph-protocol server
    pub remote_url: String,

    /// Optional basic-auth credentials for the remote server
    pub remote_user: Option<String>,
    pub remote_password: Option<String>,

    /// Retry attempts for remote calls before surfacing `BackendUnavailable`
    pub remote_retry_attempts: u32,

    /// Base backoff delay between remote retries, in milliseconds (doubled
    /// per attempt)
    pub remote_retry_base_ms: u64,

    /// Default number of entities in a context pack
    pub default_context_limit: usize,

    /// Max source references attached per entity in a context pack
    pub provenance_limit: usize,

    /// Decay half-life in seconds; controls how fast unmentioned entities fade
    pub decay_half_life_secs: i64,

    /// Entities decay below this score become archive candidates
    pub archive_decay_threshold: f64,

    /// Entities must also fall below this importance to be archived
    pub archive_importance_floor: f64,

    /// When set, the server runs housekeeping on this interval as well as
    /// on demand
    pub housekeeping_interval_secs: Option<u64>,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engram-memory");

        Self {
            backend: BackendKind::Sqlite,
            data_dir,
            sqlite_path: None,
            remote_url: "http://localhost:7474".to_string(),
            remote_user: None,
            remote_password: None,
            remote_retry_attempts: 3,
            remote_retry_base_ms: 200,
            default_context_limit: 20,
            provenance_limit: 3,
            decay_half_life_secs: 7 * 24 * 3600,
            archive_decay_threshold: 0.05,
            archive_importance_floor: 0.5,
            housekeeping_interval_secs: None,
            server_port: 8430,
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("ENGRAM_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Ok(dir) = std::env::var("ENGRAM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("ENGRAM_SQLITE_PATH") {
            config.sqlite_path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("ENGRAM_REMOTE_URL") {
            config.remote_url = url;
        }
        if let Ok(user) = std::env::var("ENGRAM_REMOTE_USER") {
            config.remote_user = Some(user);
        }
        if let Ok(password) = std::env::var("ENGRAM_REMOTE_PASSWORD") {
            config.remote_password = Some(password);
        }
        if let Ok(interval) = std::env::var("ENGRAM_HOUSEKEEPING_INTERVAL_SECS") {
            let secs = interval.parse().map_err(|_| {
                Error::config(format!("invalid ENGRAM_HOUSEKEEPING_INTERVAL_SECS: {interval}"))
            })?;
            config.housekeeping_interval_secs = Some(secs);
        }
        if let Ok(port) = std::env::var("ENGRAM_PORT") {
            config.server_port = port
                .parse()
                .map_err(|_| Error::config(format!("invalid ENGRAM_PORT: {port}")))?;
        }

        Ok(config)
    }

    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("graph.db"))
    }

    /// Weight applied to an entity's type when computing importance.
    /// Durable kinds of knowledge outrank transient ones.
    pub fn entity_type_weight(&self, entity_type: &str) -> f64 {
        match entity_type.to_lowercase().as_str() {
            "decision" | "preference" => 2.0,
            "goal" | "constraint" => 1.5,
            "person" | "project" | "org" => 1.2,
            "task" | "tool" | "place" => 1.0,
            _ => 1.0,
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if let Some(parent) = self.sqlite_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_known_names() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("SQLite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert!("bolt".parse::<BackendKind>().is_err());
    }

    #[test]
    fn sqlite_path_override_wins() {
        let mut config = Config::with_data_dir("/tmp/engram-test");
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/engram-test/graph.db"));

        config.sqlite_path = Some(PathBuf::from("/tmp/elsewhere.db"));
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/elsewhere.db"));
    }

    #[test]
    fn durable_types_outweigh_transient() {
        let config = Config::default();
        assert!(config.entity_type_weight("decision") > config.entity_type_weight("task"));
        assert!(config.entity_type_weight("Preference") > config.entity_type_weight("unknown"));
    }
}
