//! Global config singleton. Load settings.json once; the server binary calls `ensure_loaded()`
//! and hands an `Arc<Config>` to the bridge. Per-channel values are resolved through
//! `Config::channel_settings`, which layers `channels.<channel_id>` overrides over the
//! process-wide `phabricator` section.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;

/// Env var that points at an alternative settings.json.
pub const SETTINGS_ENV: &str = "PHABRELAY_SETTINGS";

const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_POLL_TICK: Duration = Duration::from_secs(5);
const DEFAULT_ALERTS_LISTEN: &str = "127.0.0.1:8089";

/// Root directory for config: settings.json lives next to the workspace manifest.
fn config_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

/// Install rustls default crypto provider once (required by rustls 0.22+ before any TLS use).
fn ensure_rustls_provider() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        // Err only means another provider was installed first.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide Phabricator values; every channel falls back to these.
#[derive(Debug, Clone)]
pub struct PhabricatorDefaults {
    /// Conduit API root, e.g. https://forge.example.org/api/
    pub uri: Option<String>,
    pub token: Option<String>,
    pub announce: bool,
    pub announce_interval: Duration,
    pub username_blacklist: HashSet<String>,
}

impl Default for PhabricatorDefaults {
    fn default() -> Self {
        Self {
            uri: None,
            token: None,
            announce: false,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            username_blacklist: HashSet::new(),
        }
    }
}

/// Per-channel overrides from `channels.<channel_id>.phabricator`. `None` = inherit.
#[derive(Debug, Clone, Default)]
pub struct ChannelOverrides {
    pub uri: Option<String>,
    pub token: Option<String>,
    pub announce: Option<bool>,
    pub announce_interval: Option<Duration>,
    pub username_blacklist: Option<HashSet<String>>,
}

/// Effective settings for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub announce: bool,
    pub announce_interval: Duration,
    pub username_blacklist: HashSet<String>,
    pub remote_uri: Option<String>,
    pub remote_token: Option<String>,
}

impl ChannelSettings {
    /// Host and token for this channel, or None when either is missing (bridge disabled here).
    pub fn endpoint(&self) -> Option<(&str, &str)> {
        match (self.remote_uri.as_deref(), self.remote_token.as_deref()) {
            (Some(uri), Some(token)) => Some((uri, token)),
            _ => None,
        }
    }
}

/// Cached config from settings.json.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: Option<String>,
    pub phabricator: PhabricatorDefaults,
    /// Keyed by channel id ("telegram:-100123"). Listed channels are pre-registered as joined.
    pub channels: HashMap<String, ChannelOverrides>,
    /// How often the feed poller wakes up; each channel still honours its own interval.
    pub poll_tick: Duration,
    /// Listen address for the alert webhook.
    pub alerts_listen: String,
}

impl Config {
    /// Resolve the effective settings for `channel_id`.
    pub fn channel_settings(&self, channel_id: &str) -> ChannelSettings {
        let defaults = &self.phabricator;
        let Some(o) = self.channels.get(channel_id) else {
            return ChannelSettings {
                announce: defaults.announce,
                announce_interval: defaults.announce_interval,
                username_blacklist: defaults.username_blacklist.clone(),
                remote_uri: defaults.uri.clone(),
                remote_token: defaults.token.clone(),
            };
        };
        ChannelSettings {
            announce: o.announce.unwrap_or(defaults.announce),
            announce_interval: o.announce_interval.unwrap_or(defaults.announce_interval),
            username_blacklist: o
                .username_blacklist
                .clone()
                .unwrap_or_else(|| defaults.username_blacklist.clone()),
            remote_uri: o.uri.clone().or_else(|| defaults.uri.clone()),
            remote_token: o.token.clone().or_else(|| defaults.token.clone()),
        }
    }
}

/// Ensure config is loaded (idempotent). Loads settings.json on first call; returns the same instance afterwards.
pub fn ensure_loaded() -> &'static Config {
    ensure_rustls_provider();
    CONFIG.get_or_init(|| {
        let path = std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| config_root().join("settings.json"));
        load_settings_from(&path)
    })
}

fn load_settings_from(path: &Path) -> Config {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "settings.json not readable, using defaults");
            return Config::default();
        }
    };
    match serde_json::from_str::<Value>(&data) {
        Ok(root) => parse_settings(&root),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "settings.json is not valid JSON, using defaults");
            Config::default()
        }
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn secs(v: Option<&Value>) -> Option<Duration> {
    v.and_then(|v| v.as_u64()).map(Duration::from_secs)
}

fn string_set(v: Option<&Value>) -> Option<HashSet<String>> {
    v.and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|i| i.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn parse_overrides(phab: Option<&Value>) -> ChannelOverrides {
    let announce = phab.and_then(|p| p.get("announce"));
    ChannelOverrides {
        uri: non_empty_str(phab.and_then(|p| p.get("uri"))),
        token: non_empty_str(phab.and_then(|p| p.get("token"))),
        announce: announce.and_then(|a| a.get("enabled")).and_then(|v| v.as_bool()),
        announce_interval: secs(announce.and_then(|a| a.get("interval_secs"))),
        username_blacklist: string_set(announce.and_then(|a| a.get("username_blacklist"))),
    }
}

/// Build a Config from an already-parsed settings document. Missing keys take defaults.
pub fn parse_settings(root: &Value) -> Config {
    let telegram_bot_token = non_empty_str(root.get("telegram").and_then(|t| t.get("bot_token")));

    let process = parse_overrides(root.get("phabricator"));
    let phabricator = PhabricatorDefaults {
        uri: process.uri,
        token: process.token,
        announce: process.announce.unwrap_or(false),
        announce_interval: process.announce_interval.unwrap_or(DEFAULT_ANNOUNCE_INTERVAL),
        username_blacklist: process.username_blacklist.unwrap_or_default(),
    };

    let channels = root
        .get("channels")
        .and_then(|c| c.as_object())
        .map(|map| {
            map.iter()
                .map(|(id, ch)| (id.trim().to_string(), parse_overrides(ch.get("phabricator"))))
                .filter(|(id, _)| !id.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let poll_tick = secs(root.get("poll_tick_secs"))
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_POLL_TICK);

    let alerts_listen = non_empty_str(root.get("alerts").and_then(|a| a.get("listen")))
        .unwrap_or_else(|| DEFAULT_ALERTS_LISTEN.to_string());

    Config {
        telegram_bot_token,
        phabricator,
        channels,
        poll_tick,
        alerts_listen,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            phabricator: PhabricatorDefaults::default(),
            channels: HashMap::new(),
            poll_tick: DEFAULT_POLL_TICK,
            alerts_listen: DEFAULT_ALERTS_LISTEN.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = parse_settings(&json!({}));
        assert!(cfg.telegram_bot_token.is_none());
        assert_eq!(cfg.poll_tick, DEFAULT_POLL_TICK);
        let s = cfg.channel_settings("telegram:1");
        assert!(!s.announce);
        assert_eq!(s.announce_interval, DEFAULT_ANNOUNCE_INTERVAL);
        assert!(s.endpoint().is_none());
    }

    #[test]
    fn channel_overrides_layer_over_process_values() {
        let cfg = parse_settings(&json!({
            "telegram": { "bot_token": " 123:abc " },
            "phabricator": {
                "uri": "https://forge.example.org/api/",
                "token": "api-default",
                "announce": { "interval_secs": 30, "username_blacklist": ["bot"] }
            },
            "channels": {
                "telegram:-42": {
                    "phabricator": {
                        "token": "api-other",
                        "announce": { "enabled": true, "username_blacklist": ["ardumont", ""] }
                    }
                }
            },
            "poll_tick_secs": 2
        }));

        assert_eq!(cfg.telegram_bot_token.as_deref(), Some("123:abc"));
        assert_eq!(cfg.poll_tick, Duration::from_secs(2));

        let s = cfg.channel_settings("telegram:-42");
        assert!(s.announce);
        assert_eq!(s.announce_interval, Duration::from_secs(30));
        assert_eq!(s.username_blacklist, HashSet::from(["ardumont".to_string()]));
        assert_eq!(s.endpoint(), Some(("https://forge.example.org/api/", "api-other")));

        let other = cfg.channel_settings("telegram:7");
        assert!(!other.announce);
        assert_eq!(other.username_blacklist, HashSet::from(["bot".to_string()]));
        assert_eq!(other.endpoint(), Some(("https://forge.example.org/api/", "api-default")));
    }

    #[test]
    fn zero_poll_tick_falls_back_to_default() {
        let cfg = parse_settings(&json!({ "poll_tick_secs": 0 }));
        assert_eq!(cfg.poll_tick, DEFAULT_POLL_TICK);
    }
}
