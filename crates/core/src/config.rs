use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FractalError;

/// Upper bound on tasks a single manager may hold at once.
pub const MAX_TASKS_CEILING: usize = 10_000;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, FractalError> {
    raw.parse()
        .map_err(|_| FractalError::Config(format!("{key}: cannot parse '{raw}'")))
}

// ── Top-level config ──────────────────────────────────────────

/// Configuration for an in-process deployment: the server's heartbeat
/// settings plus one queue manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FractalConfig {
    #[serde(default)]
    pub server: HeartbeatConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl FractalConfig {
    /// Parse config from a TOML string, then apply `FRACTAL_*` env overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, FractalError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FractalError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, FractalError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), FractalError> {
        self.apply_overrides(env_opt)
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), FractalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FRACTAL_HEARTBEAT_FREQUENCY_MS") {
            self.server.heartbeat_frequency_ms = parse_override("FRACTAL_HEARTBEAT_FREQUENCY_MS", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_MAX_MISSED_HEARTBEATS") {
            self.server.max_missed_heartbeats = parse_override("FRACTAL_MAX_MISSED_HEARTBEATS", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_SWEEP_INTERVAL_MS") {
            self.server.sweep_interval_ms = Some(parse_override("FRACTAL_SWEEP_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("FRACTAL_CLUSTER") {
            self.manager.cluster = v;
        }
        if let Some(v) = lookup("FRACTAL_QUEUE_TAG") {
            self.manager.queue_tag = Some(v);
        }
        if let Some(v) = lookup("FRACTAL_MAX_TASKS") {
            self.manager.max_tasks = parse_override("FRACTAL_MAX_TASKS", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_SERVER_ERROR_RETRIES") {
            self.manager.server_error_retries = parse_override("FRACTAL_SERVER_ERROR_RETRIES", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_UPDATE_FREQUENCY_MS") {
            self.manager.update_frequency_ms = parse_override("FRACTAL_UPDATE_FREQUENCY_MS", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_ADAPTER") {
            self.manager.adapter = v.parse()?;
        }
        if let Some(v) = lookup("FRACTAL_WORKERS") {
            self.manager.workers = parse_override("FRACTAL_WORKERS", &v)?;
        }
        if let Some(v) = lookup("FRACTAL_USERNAME") {
            self.manager.username = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FractalError> {
        if self.server.heartbeat_frequency_ms == 0 {
            return Err(FractalError::Config("heartbeat_frequency_ms must be > 0".into()));
        }
        if self.server.max_missed_heartbeats == 0 {
            return Err(FractalError::Config("max_missed_heartbeats must be > 0".into()));
        }
        if self.server.sweep_interval_ms == Some(0) {
            return Err(FractalError::Config("sweep_interval_ms must be > 0".into()));
        }
        if self.manager.update_frequency_ms == 0 {
            return Err(FractalError::Config("update_frequency_ms must be > 0".into()));
        }
        if self.manager.queue_tag.as_deref() == Some("") {
            return Err(FractalError::Config("queue_tag must not be empty; omit it for wildcard".into()));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  heartbeat:   frequency={:?}, timeout={:?}, sweep={:?}",
            self.server.heartbeat_frequency(),
            self.server.timeout(),
            self.server.sweep_interval()
        );
        tracing::info!(
            "  manager:     cluster={}, tag={}, max_tasks={}, retries={}",
            self.manager.cluster,
            self.manager.queue_tag.as_deref().unwrap_or("(any)"),
            self.manager.clamped_max_tasks(),
            self.manager.server_error_retries
        );
        tracing::info!(
            "  adapter:     kind={}, workers={}",
            self.manager.adapter,
            self.manager.resolved_workers()
        );
    }
}

// ── Heartbeats (server side) ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Expected interval between manager heartbeats.
    #[serde(default = "default_heartbeat_frequency")]
    pub heartbeat_frequency_ms: u64,
    /// Heartbeats a manager may miss before it is marked inactive.
    #[serde(default = "default_max_missed")]
    pub max_missed_heartbeats: u32,
    /// How often the monitor sweeps. Defaults to the heartbeat frequency.
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,
}

fn default_heartbeat_frequency() -> u64 { 1_800_000 }
fn default_max_missed() -> u32 { 5 }

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_frequency_ms: default_heartbeat_frequency(),
            max_missed_heartbeats: default_max_missed(),
            sweep_interval_ms: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn heartbeat_frequency(&self) -> Duration {
        Duration::from_millis(self.heartbeat_frequency_ms)
    }

    /// Silence after which a manager is considered dead.
    pub fn timeout(&self) -> Duration {
        self.heartbeat_frequency() * self.max_missed_heartbeats
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.unwrap_or(self.heartbeat_frequency_ms))
    }
}

// ── Queue manager (client side) ───────────────────────────────

/// Execution backend a manager submits work to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Local thread pool.
    Pool,
    /// Tokio runtime with a bounded blocking pool.
    Runtime,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Pool => write!(f, "pool"),
            AdapterKind::Runtime => write!(f, "runtime"),
        }
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = FractalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pool" => Ok(AdapterKind::Pool),
            "runtime" | "tokio" => Ok(AdapterKind::Runtime),
            other => Err(FractalError::Config(format!("unknown adapter kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Cluster name, the first component of the manager name.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Only claim tasks with this tag. `None` claims any tag.
    #[serde(default)]
    pub queue_tag: Option<String>,
    /// Maximum tasks held at once. Clamped to [`MAX_TASKS_CEILING`].
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Failed retry pushes tolerated before a result is counted as a stale job.
    #[serde(default = "default_server_error_retries")]
    pub server_error_retries: u32,
    /// Poll loop period.
    #[serde(default = "default_update_frequency")]
    pub update_frequency_ms: u64,
    #[serde(default = "default_adapter")]
    pub adapter: AdapterKind,
    /// Worker count for the adapter. 0 = available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub username: Option<String>,
}

fn default_cluster() -> String { "unknown".into() }
fn default_max_tasks() -> usize { 200 }
fn default_server_error_retries() -> u32 { 1 }
fn default_update_frequency() -> u64 { 2_000 }
fn default_adapter() -> AdapterKind { AdapterKind::Pool }

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            queue_tag: None,
            max_tasks: default_max_tasks(),
            server_error_retries: default_server_error_retries(),
            update_frequency_ms: default_update_frequency(),
            adapter: default_adapter(),
            workers: 0,
            username: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.queue_tag = Some(tag.into());
        self
    }

    pub fn clamped_max_tasks(&self) -> usize {
        self.max_tasks.min(MAX_TASKS_CEILING)
    }

    pub fn update_frequency(&self) -> Duration {
        Duration::from_millis(self.update_frequency_ms)
    }

    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}
