use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXTRACTOR_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_MAX_CHAINED_TRANSITIONS: u32 = 1;
pub const DEFAULT_HISTORY_WINDOW: usize = 40;
pub const DEFAULT_TOOL_LOOP_MAX_ITERATIONS: u32 = 10;

/// Top-level dispatcher config (`crewline.toml` + `CREWLINE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewlineConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for CrewlineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Dispatcher tuning knobs (spec.md §9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long the field-extraction micro-agent is allowed to run before
    /// the dispatcher gives up on it and flushes the buffered crew stream
    /// as-is (spec.md §4.4.2.C, §7 timeout handling).
    #[serde(default = "default_extractor_timeout_ms")]
    pub extractor_timeout_ms: u64,

    /// Maximum number of automatic crew transitions chained from a single
    /// user message before the dispatcher stops and serves the resulting
    /// crew's response (spec.md §9 Open Questions — resolved to 1: a
    /// transition fires at most once per message).
    #[serde(default = "default_max_chained_transitions")]
    pub max_chained_transitions: u32,

    /// Number of trailing history messages handed to `buildContext` and to
    /// the field extractor (spec.md §4.2, §4.6).
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Tool-call loop iteration bound (spec.md §4.7.4).
    #[serde(default = "default_tool_loop_max_iterations")]
    pub tool_loop_max_iterations: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            extractor_timeout_ms: DEFAULT_EXTRACTOR_TIMEOUT_MS,
            max_chained_transitions: DEFAULT_MAX_CHAINED_TRANSITIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
            tool_loop_max_iterations: DEFAULT_TOOL_LOOP_MAX_ITERATIONS,
        }
    }
}

/// Database config for the optional SQLite-backed stores in
/// `crewline-sessions`. Absent entirely, callers use the in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_extractor_timeout_ms() -> u64 {
    DEFAULT_EXTRACTOR_TIMEOUT_MS
}
fn default_max_chained_transitions() -> u32 {
    DEFAULT_MAX_CHAINED_TRANSITIONS
}
fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}
fn default_tool_loop_max_iterations() -> u32 {
    DEFAULT_TOOL_LOOP_MAX_ITERATIONS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.crewline/crewline.db", home)
}

impl CrewlineConfig {
    /// Load config from a TOML file with `CREWLINE_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `~/.crewline/crewline.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CrewlineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CREWLINE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CrewlineError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.crewline/crewline.toml", home)
}
