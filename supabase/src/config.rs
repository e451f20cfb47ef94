//! Connection settings for the hosted backend

use std::time::Duration;

/// Endpoint, key and realtime timing for one backend project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Public anonymous API key
    pub anon_key: String,
    /// Interval between realtime heartbeats
    pub heartbeat_interval: Duration,
    /// How long to wait for the server to accept a channel join
    pub join_timeout: Duration,
}

impl SupabaseConfig {
    /// Settings with default realtime timing (25s heartbeat, 10s join timeout)
    #[must_use]
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            heartbeat_interval: Duration::from_secs(25),
            join_timeout: Duration::from_secs(10),
        }
    }

    /// Override the heartbeat interval
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Override the join timeout
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// REST endpoint for a table
    #[must_use]
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    /// Auth endpoint, `path` without leading slash
    #[must_use]
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    /// Realtime WebSocket endpoint (`http` becomes `ws`, `https` becomes `wss`)
    #[must_use]
    pub fn realtime_url(&self) -> String {
        let base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!("{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0", self.anon_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_derived_from_the_project_url() {
        let config = SupabaseConfig::new("https://abc.supabase.co/", "anon");
        assert_eq!(config.rest_url("tickets"), "https://abc.supabase.co/rest/v1/tickets");
        assert_eq!(config.auth_url("otp"), "https://abc.supabase.co/auth/v1/otp");
        assert_eq!(
            config.realtime_url(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn plain_http_maps_to_plain_ws() {
        let config = SupabaseConfig::new("http://127.0.0.1:54321", "k");
        assert!(config.realtime_url().starts_with("ws://127.0.0.1:54321/realtime/v1/websocket"));
    }
}
