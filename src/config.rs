use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{EngineSettings, Locale, Strategy};

/// Server settings, read once at startup. Unparsable values fall back to the
/// defaults rather than aborting.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub engine: EngineSettings,
    pub default_locale: Locale,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5434,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            engine: EngineSettings::default(),
            default_locale: Locale::default(),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let engine = EngineSettings {
            workers: parse_var(&var, "SLOTGRID_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.engine.workers),
            query_timeout: parse_var(&var, "SLOTGRID_QUERY_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine.query_timeout),
            strategy: var("SLOTGRID_CLASSIFIER")
                .and_then(|s| Strategy::parse(&s))
                .unwrap_or(defaults.engine.strategy),
        };

        Self {
            port: parse_var(&var, "SLOTGRID_PORT").unwrap_or(defaults.port),
            bind: var("SLOTGRID_BIND").unwrap_or(defaults.bind),
            data_dir: var("SLOTGRID_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parse_var(&var, "SLOTGRID_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            engine,
            default_locale: var("SLOTGRID_DEFAULT_LOCALE")
                .and_then(|s| Locale::parse(&s))
                .unwrap_or(defaults.default_locale),
            metrics_port: parse_var(&var, "SLOTGRID_METRICS_PORT"),
            tls_cert: var("SLOTGRID_TLS_CERT").map(PathBuf::from),
            tls_key: var("SLOTGRID_TLS_KEY").map(PathBuf::from),
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|s| s.trim().parse().ok())
}
