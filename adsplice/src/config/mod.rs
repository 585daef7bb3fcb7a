//! Configuration: process settings from the environment, and channel
//! configuration behind a cache.

pub mod cache;
pub mod channel;
pub mod service;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub use cache::ConfigCache;
pub use channel::{ChannelConfig, ChannelKey, ConfigLookup, IntervalSchedule, StaticConfigLookup};
pub use service::ConfigService;

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Base URL of the live origin; playlists are fetched from
    /// `<base>/<org>/<channel>/<variant>`.
    pub origin_base_url: String,
    /// Decision endpoint. Without one every break gets the filler asset.
    pub decision_url: Option<String>,
    pub decision_timeout: Duration,
    pub decision_ttl: Duration,
    pub config_ttl: Duration,
    pub lock_ttl: Duration,
    pub signing_key: Option<String>,
    pub signed_uri_ttl: Duration,
    /// Base URL ad assets and relative rendition URIs resolve against.
    pub asset_base_url: String,
    pub channels_file: Option<PathBuf>,
    pub filler_asset: String,
    pub pdt_window_secs: i64,
    pub transcode_queue_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12560,
            enable_cors: true,
            origin_base_url: "http://127.0.0.1:8080".to_string(),
            decision_url: None,
            decision_timeout: Duration::from_millis(1500),
            decision_ttl: Duration::from_secs(30),
            config_ttl: cache::DEFAULT_CONFIG_TTL,
            lock_ttl: Duration::from_secs(120),
            signing_key: None,
            signed_uri_ttl: Duration::from_secs(300),
            asset_base_url: "http://127.0.0.1:8081/assets/".to_string(),
            channels_file: None,
            filler_asset: "filler".to_string(),
            pdt_window_secs: scte35::validate::DEFAULT_PDT_WINDOW_SECS,
            transcode_queue_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Load settings from `ADSPLICE_*` environment variables, falling back to
    /// defaults. Unparseable values are logged and ignored.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(bind_address) = non_empty_var("ADSPLICE_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        config.port = parse_var("ADSPLICE_PORT", config.port);
        config.enable_cors = parse_var("ADSPLICE_ENABLE_CORS", config.enable_cors);

        if let Some(url) = non_empty_var("ADSPLICE_ORIGIN_BASE_URL") {
            config.origin_base_url = url;
        }
        config.decision_url = non_empty_var("ADSPLICE_DECISION_URL");
        config.decision_timeout = Duration::from_millis(parse_var(
            "ADSPLICE_DECISION_TIMEOUT_MS",
            config.decision_timeout.as_millis() as u64,
        ));
        config.decision_ttl = Duration::from_secs(parse_var(
            "ADSPLICE_DECISION_TTL_SECS",
            config.decision_ttl.as_secs(),
        ));
        config.config_ttl = Duration::from_secs(parse_var(
            "ADSPLICE_CONFIG_TTL_SECS",
            config.config_ttl.as_secs(),
        ));
        config.lock_ttl = Duration::from_secs(parse_var(
            "ADSPLICE_LOCK_TTL_SECS",
            config.lock_ttl.as_secs(),
        ));
        config.signing_key = non_empty_var("ADSPLICE_SIGNING_KEY");
        config.signed_uri_ttl = Duration::from_secs(parse_var(
            "ADSPLICE_SIGNED_URI_TTL_SECS",
            config.signed_uri_ttl.as_secs(),
        ));
        if let Some(url) = non_empty_var("ADSPLICE_ASSET_BASE_URL") {
            config.asset_base_url = url;
        }
        config.channels_file = non_empty_var("ADSPLICE_CHANNELS_FILE").map(PathBuf::from);
        if let Some(asset) = non_empty_var("ADSPLICE_FILLER_ASSET") {
            config.filler_asset = asset;
        }
        config.pdt_window_secs = parse_var("ADSPLICE_PDT_WINDOW_SECS", config.pdt_window_secs);
        config.transcode_queue_capacity = parse_var(
            "ADSPLICE_TRANSCODE_QUEUE_CAPACITY",
            config.transcode_queue_capacity,
        );

        config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr + Copy + std::fmt::Debug>(name: &str, default: T) -> T {
    parse_or_default(name, non_empty_var(name).as_deref(), default)
}

fn parse_or_default<T: FromStr + Copy + std::fmt::Debug>(
    name: &str,
    raw: Option<&str>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = raw, ?default, "Invalid value, using default");
                default
            }
        },
    }
}
