//! Configuration management for the helpdesk client.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Only the backend endpoint and its public key are required.

use crate::error::ConfigError;
use helpdesk_runtime::retry::RetryPolicy;
use helpdesk_supabase::SupabaseConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the hosted backend (`SUPABASE_URL`)
    pub supabase_url: String,
    /// Public API key (`SUPABASE_ANON_KEY`)
    pub supabase_anon_key: String,
    /// Where the signed-in session is kept between runs
    pub session_file: PathBuf,
    /// Keep the session on disk; when false it lives only in memory
    pub persist_session: bool,
    /// Quiet period before an edited item is written back
    pub edit_debounce: Duration,
    /// Realtime heartbeat interval
    pub realtime_heartbeat: Duration,
    /// How long to wait for the server to accept a channel join
    pub realtime_join_timeout: Duration,
    /// Retries when setting up a change feed
    pub subscribe_retries: usize,
    /// Delay before the first change-feed setup retry
    pub subscribe_retry_delay: Duration,
    /// Link target for sign-in emails
    pub redirect_url: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required key is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a key to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required key is missing or a value
    /// does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| value(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            supabase_url: required("SUPABASE_URL")?,
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            session_file: value("HELPDESK_SESSION_FILE")
                .map_or_else(|| PathBuf::from(".helpdesk-session.json"), PathBuf::from),
            persist_session: parse_or(&value, "HELPDESK_PERSIST_SESSION", true)?,
            edit_debounce: Duration::from_millis(parse_or(
                &value,
                "HELPDESK_EDIT_DEBOUNCE_MS",
                500,
            )?),
            realtime_heartbeat: Duration::from_secs(parse_or(
                &value,
                "HELPDESK_REALTIME_HEARTBEAT_SECS",
                25,
            )?),
            realtime_join_timeout: Duration::from_secs(parse_or(
                &value,
                "HELPDESK_REALTIME_JOIN_TIMEOUT_SECS",
                10,
            )?),
            subscribe_retries: parse_or(&value, "HELPDESK_SUBSCRIBE_RETRIES", 3)?,
            subscribe_retry_delay: Duration::from_millis(parse_or(
                &value,
                "HELPDESK_SUBSCRIBE_RETRY_DELAY_MS",
                1000,
            )?),
            redirect_url: value("HELPDESK_REDIRECT_URL"),
        })
    }

    /// Backend client settings
    #[must_use]
    pub fn supabase(&self) -> SupabaseConfig {
        SupabaseConfig::new(&self.supabase_url, &self.supabase_anon_key)
            .with_heartbeat_interval(self.realtime_heartbeat)
            .with_join_timeout(self.realtime_join_timeout)
    }

    /// Retry policy for change-feed setup
    #[must_use]
    pub fn subscribe_retry(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.subscribe_retries)
            .initial_delay(self.subscribe_retry_delay)
            .build()
    }
}

fn parse_or<T, F>(value: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match value(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
