use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;

use crate::error::ConfigError;

/// Fixed identifier sent in `Sec-WebSocket-Origin`.
pub const DEFAULT_ORIGIN: &str = "tick_ws";

/// How outgoing frames are masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskMode {
    /// Fresh random 4-byte key per frame. Pongs echo the ping payload.
    #[default]
    Random,
    /// All-zero key on data frames and a bare unmasked `0x8A 0x00` pong.
    /// Reproduces the wire trace of older embedded clients byte for byte.
    Legacy,
}

impl FromStr for MaskMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(MaskMode::Random),
            "legacy" | "zero" => Ok(MaskMode::Legacy),
            _ => Err(()),
        }
    }
}

/// Engine configuration. Fixed at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay between connect attempts.
    pub retry_interval: Duration,
    /// Number of polls of the transport while waiting for the handshake
    /// response. Shared between the first byte and any later stall.
    pub handshake_attempts: u32,
    /// Sleep between handshake polls.
    pub handshake_poll_delay: Duration,
    /// Upper bound on one TCP connect attempt per resolved address. This
    /// wait happens inside `poll` when a reconnect fires, as does the host
    /// name lookup before it. An IP-literal host skips the lookup.
    pub connect_timeout: Duration,
    pub origin: String,
    pub mask_mode: MaskMode,
    /// Check `Sec-WebSocket-Accept` against the key we sent. Off by default:
    /// only the `HTTP/1.1 101` status line decides success.
    pub verify_accept: bool,
    /// Gate for the engine's own diagnostics.
    pub log_level: LevelFilter,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(3000),
            handshake_attempts: 300,
            handshake_poll_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            origin: DEFAULT_ORIGIN.to_string(),
            mask_mode: MaskMode::Random,
            verify_accept: false,
            log_level: LevelFilter::Info,
        }
    }
}

impl ClientConfig {
    /// Builds a config from the process environment, after loading `.env` if
    /// one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(ms) = parse::<u64, _>(&lookup, "WS_RETRY_MS")? {
            cfg.retry_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<u32, _>(&lookup, "WS_HANDSHAKE_ATTEMPTS")? {
            cfg.handshake_attempts = n;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "WS_HANDSHAKE_DELAY_MS")? {
            cfg.handshake_poll_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "WS_CONNECT_TIMEOUT_MS")? {
            cfg.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(origin) = lookup("WS_ORIGIN") {
            cfg.origin = origin;
        }
        if let Some(mode) = parse::<MaskMode, _>(&lookup, "WS_MASK")? {
            cfg.mask_mode = mode;
        }
        if let Some(verify) = parse::<bool, _>(&lookup, "WS_VERIFY_ACCEPT")? {
            cfg.verify_accept = verify;
        }
        if let Some(level) = parse::<LevelFilter, _>(&lookup, "WS_LOG")? {
            cfg.log_level = level;
        }

        Ok(cfg)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
