//! Environment-driven collector configuration.
//!
//! Every option has a default that keeps startup alive: a missing target URL
//! disables scraping, a half-configured login disables login, and unparseable
//! numbers fall back to their defaults with a warning.

use std::{fmt, path::PathBuf, time::Duration};

use log::warn;

const ENV_PREFIX: &str = "ROUNDTAP_";

const DEFAULT_SESSION_PATH: &str = "./data/session_state.json";
const DEFAULT_DB_PATH: &str = "./data/roundtap.sqlite3";
const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
const MIN_POLL_INTERVAL_SECS: f64 = 0.1;
const DEFAULT_BACKOFF_SECS: f64 = 5.0;
const MIN_BACKOFF_SECS: f64 = 1.0;
const DEFAULT_DEBUG_PORT: u16 = 9222;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// `None` disables scraping entirely.
    pub target_url: Option<String>,
    pub session_path: PathBuf,
    pub db_path: PathBuf,
    pub headless: bool,
    pub credentials: Option<Credentials>,
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub room: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub debug_port: u16,
    /// Persist captured events that carried no parseable value as null rows.
    pub keep_unparsed: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            session_path: PathBuf::from(DEFAULT_SESSION_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            headless: true,
            credentials: None,
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            backoff: Duration::from_secs_f64(DEFAULT_BACKOFF_SECS),
            room: None,
            chrome_path: None,
            debug_port: DEFAULT_DEBUG_PORT,
            keep_unparsed: false,
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let target_url = get("TARGET_URL");

        let session_path = get("SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.session_path);

        let db_path = get("DB_PATH")
            .or_else(|| {
                lookup("DATABASE_PATH")
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let headless = get("HEADLESS")
            .map(|value| {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            })
            .unwrap_or(defaults.headless);

        let credentials = match (get("LOGIN_EMAIL"), get("LOGIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            (None, None) => None,
            _ => {
                warn!(
                    "{ENV_PREFIX}LOGIN_EMAIL and {ENV_PREFIX}LOGIN_PASSWORD must be set together; login disabled"
                );
                None
            }
        };

        let poll_interval = get("POLL_INTERVAL_SECS")
            .and_then(|raw| parse_duration("POLL_INTERVAL_SECS", &raw, MIN_POLL_INTERVAL_SECS))
            .unwrap_or(defaults.poll_interval);

        let backoff = get("BACKOFF_SECS")
            .and_then(|raw| parse_duration("BACKOFF_SECS", &raw, MIN_BACKOFF_SECS))
            .unwrap_or(defaults.backoff);

        let debug_port = get("DEBUG_PORT")
            .and_then(|raw| match raw.parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => {
                    warn!("Ignoring invalid {ENV_PREFIX}DEBUG_PORT '{raw}'");
                    None
                }
            })
            .unwrap_or(defaults.debug_port);

        let keep_unparsed = get("KEEP_UNPARSED")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.keep_unparsed);

        Self {
            target_url,
            session_path,
            db_path,
            headless,
            credentials,
            poll_interval,
            backoff,
            room: get("ROOM"),
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            debug_port,
            keep_unparsed,
        }
    }

    pub fn scraping_enabled(&self) -> bool {
        self.target_url.is_some()
    }
}

/// Seconds as a duration, raised to `min`. Negative, non-numeric and
/// unrepresentably large values are rejected.
fn parse_duration(name: &str, raw: &str, min: f64) -> Option<Duration> {
    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs.max(min)).ok());
    if parsed.is_none() {
        warn!("Ignoring invalid {ENV_PREFIX}{name} '{raw}'");
    }
    parsed
}
