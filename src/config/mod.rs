//! Layered configuration: built-in defaults, an optional
//! `.conductor/config.toml` under the repo root, and the environment
//! variables on top. Later layers win.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::worker::WorkerSettings;

pub const DEFAULT_DASHBOARD_PORT: u16 = 4179;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_DB_FILE: &str = "orchestrator.db";
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Shape of `.conductor/config.toml`. Everything is optional; missing
/// sections fall through to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    base_branch: Option<String>,
    #[serde(default)]
    worker: WorkerFileConfig,
    #[serde(default)]
    dashboard: DashboardFileConfig,
    #[serde(default)]
    dispatch: DispatchFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WorkerFileConfig {
    binary: Option<String>,
    reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DashboardFileConfig {
    port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DispatchFileConfig {
    poll_interval_ms: Option<u64>,
    stop_when_empty: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default repo root when none is supplied (`ORCHESTRATOR_BASE_DIR`)
    pub base_dir: Option<PathBuf>,
    /// Explicit job id (`ORCHESTRATOR_JOB_ID`)
    pub job_id: Option<String>,
    /// Base branch override (`ORCHESTRATOR_BASE_BRANCH`)
    pub base_branch: Option<String>,
    /// Fallback base branch when detection fails
    pub default_base_branch: String,
    /// State-store file (`ORCHESTRATOR_DB_PATH`)
    pub db_path: PathBuf,
    /// Forced terminal tee (`ORCHESTRATOR_TEE_CODEX`); None = default policy
    pub tee_override: Option<bool>,
    /// Dashboard HTTP/WS port (`DASHBOARD_PORT`)
    pub dashboard_port: u16,
    pub worker: WorkerSettings,
    pub poll_interval_ms: u64,
    pub stop_when_empty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: None,
            job_id: None,
            base_branch: None,
            default_base_branch: DEFAULT_BASE_BRANCH.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            tee_override: None,
            dashboard_port: DEFAULT_DASHBOARD_PORT,
            worker: WorkerSettings::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stop_when_empty: false,
        }
    }
}

impl Config {
    /// Load the config for a working directory: defaults, then the TOML
    /// file under `dir` if present, then the process environment.
    pub fn load(dir: &Path) -> Self {
        let mut config = Config::default();
        config.apply_file(dir);
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    fn apply_file(&mut self, dir: &Path) {
        let path = dir.join(".conductor").join("config.toml");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return;
        };
        let file: FileConfig = match toml::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("ignoring malformed {}: {e}", path.display());
                return;
            }
        };

        if let Some(branch) = file.base_branch {
            self.default_base_branch = branch;
        }
        if let Some(binary) = file.worker.binary {
            self.worker.binary = binary;
        }
        if let Some(effort) = file.worker.reasoning_effort {
            self.worker.reasoning_effort = if effort.is_empty() {
                None
            } else {
                Some(effort)
            };
        }
        if let Some(port) = file.dashboard.port {
            self.dashboard_port = port;
        }
        if let Some(interval) = file.dispatch.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(stop) = file.dispatch.stop_when_empty {
            self.stop_when_empty = stop;
        }
    }

    /// Apply the environment on top. Takes the lookup as a function so
    /// tests can drive it without touching the process environment.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = get("ORCHESTRATOR_BASE_DIR").filter(|v| !v.is_empty()) {
            self.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(id) = get("ORCHESTRATOR_JOB_ID").filter(|v| !v.is_empty()) {
            self.job_id = Some(id);
        }
        if let Some(branch) = get("ORCHESTRATOR_BASE_BRANCH").filter(|v| !v.is_empty()) {
            self.base_branch = Some(branch);
        }
        if let Some(path) = get("ORCHESTRATOR_DB_PATH").filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(raw) = get("ORCHESTRATOR_TEE_CODEX") {
            match parse_bool(&raw) {
                Some(tee) => self.tee_override = Some(tee),
                None => tracing::debug!("ignoring unparseable ORCHESTRATOR_TEE_CODEX={raw}"),
            }
        }
        if let Some(raw) = get("DASHBOARD_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.dashboard_port = port,
                Err(_) => tracing::debug!("ignoring unparseable DASHBOARD_PORT={raw}"),
            }
        }
    }
}

/// `1/0/yes/no/true/false/on/off`, case-insensitive. Anything else is None.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
