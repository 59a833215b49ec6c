//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration. File: ~/.config/rangzen/config.toml or /etc/rangzen/config.toml.
/// Env overrides: RANGZEN_DISCOVERY_PORT, RANGZEN_EXCHANGE_PORT, RANGZEN_DATA_DIR,
/// RANGZEN_EXCHANGE_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 45688).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Exchange TCP port (default 45689).
    #[serde(default = "default_exchange_port")]
    pub exchange_port: u16,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Peers not seen for this long are dropped (default 300).
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Bound on one exchange, connect included (default 30).
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
    /// Messages sent per exchange (default 100).
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Identity, stores and exchange log live here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Append one JSON line per finished exchange to `exchanges.jsonl`.
    #[serde(default = "default_record_exchanges")]
    pub record_exchanges: bool,
}

fn default_discovery_port() -> u16 {
    45688
}
fn default_exchange_port() -> u16 {
    45689
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_peer_timeout_secs() -> u64 {
    300
}
fn default_exchange_timeout_secs() -> u64 {
    30
}
fn default_max_messages() -> usize {
    100
}
fn default_record_exchanges() -> bool {
    true
}
fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/rangzen"),
        None => PathBuf::from("/var/lib/rangzen"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            exchange_port: default_exchange_port(),
            tick_interval_ms: default_tick_interval_ms(),
            peer_timeout_secs: default_peer_timeout_secs(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            max_messages: default_max_messages(),
            data_dir: default_data_dir(),
            record_exchanges: default_record_exchanges(),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// `None` when set to 0.
    pub fn exchange_timeout(&self) -> Option<Duration> {
        (self.exchange_timeout_secs > 0).then(|| Duration::from_secs(self.exchange_timeout_secs))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(p) = var("RANGZEN_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.discovery_port = p;
        }
        if let Some(p) = var("RANGZEN_EXCHANGE_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.exchange_port = p;
        }
        if let Some(d) = var("RANGZEN_DATA_DIR").filter(|s| !s.is_empty()) {
            self.data_dir = PathBuf::from(d);
        }
        if let Some(t) = var("RANGZEN_EXCHANGE_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            self.exchange_timeout_secs = t;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rangzen/config.toml"));
    }
    out.push(PathBuf::from("/etc/rangzen/config.toml"));
    out
}

fn parse_file(p: &Path) -> Option<Config> {
    let s = std::fs::read_to_string(p).ok()?;
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}

/// First existing path wins, even if it fails to parse.
fn load_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    parse_file(&p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.exchange_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.peer_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn file_fields_override_defaults() {
        let c: Config = toml::from_str(
            "exchange_port = 5000\nmax_messages = 7\ndata_dir = \"/tmp/rz\"\nrecord_exchanges = false\n",
        )
        .unwrap();
        assert_eq!(c.exchange_port, 5000);
        assert_eq!(c.max_messages, 7);
        assert_eq!(c.data_dir, PathBuf::from("/tmp/rz"));
        assert!(!c.record_exchanges);
        assert_eq!(c.discovery_port, 45688);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_port = 3128").unwrap();
        assert_eq!(parse_file(&path), None);
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("RANGZEN_EXCHANGE_PORT", "6001"),
            ("RANGZEN_DISCOVERY_PORT", "not a port"),
            ("RANGZEN_EXCHANGE_TIMEOUT_SECS", "0"),
            ("RANGZEN_DATA_DIR", "/srv/rangzen"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.exchange_port, 6001);
        assert_eq!(c.discovery_port, 45688);
        assert_eq!(c.exchange_timeout(), None);
        assert_eq!(c.data_dir, PathBuf::from("/srv/rangzen"));
    }
}
