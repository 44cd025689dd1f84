//! Process-wide tracing setup.

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENABLED_KEYS: [&str; 2] = ["TOKENWIRE_OBSERVABILITY_ENABLED", "TOKENWIRE_OBSERVABILITY"];
const LEVEL_KEY: &str = "TOKENWIRE_LOG_LEVEL";
const JSON_PATH_KEY: &str = "TOKENWIRE_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "tokenwire.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Logging options resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Explicit filter directive; falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL output file. Console output when unset.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: None,
            json_log_path: None,
        }
    }
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        let level = lookup(LEVEL_KEY).filter(|v| !v.trim().is_empty());
        let json_log_path = lookup(JSON_PATH_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            level,
            json_log_path,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the global subscriber once per process.
///
/// Environment variables:
/// - `TOKENWIRE_OBSERVABILITY_ENABLED` / `TOKENWIRE_OBSERVABILITY`: enable flag (default on).
/// - `TOKENWIRE_LOG_LEVEL`: filter directive, else `RUST_LOG`, else `info`.
/// - `TOKENWIRE_JSON_LOG_PATH`: write JSONL to this file instead of compact
///   console output on stderr.
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

/// Like [`init_observability`] with explicit settings.
pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let filter = settings.env_filter();
        match &settings.json_log_path {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                let _ = std::fs::create_dir_all(&dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}
