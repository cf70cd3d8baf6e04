use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, read once from `CHAIRTIME_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How often past-dated appointments are settled.
    pub reap_interval: Duration,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "chairtime".into(),
            max_connections: 256,
            compact_threshold: 1000,
            reap_interval: Duration::from_secs(60),
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            bind: lookup("CHAIRTIME_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "CHAIRTIME_PORT").unwrap_or(defaults.port),
            data_dir: lookup("CHAIRTIME_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("CHAIRTIME_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "CHAIRTIME_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "CHAIRTIME_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            reap_interval: parse_var(&lookup, "CHAIRTIME_REAP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            tls_cert: lookup("CHAIRTIME_TLS_CERT"),
            tls_key: lookup("CHAIRTIME_TLS_KEY"),
            metrics_port: parse_var(&lookup, "CHAIRTIME_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("chairtime.wal")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
