//! Server configuration.

use std::time::Duration;

use lectern_core::defaults;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Idle time on a progress stream before a heartbeat is sent.
    pub sse_heartbeat: Duration,
    /// Relaunch jobs orphaned by a previous process on startup.
    pub recover_on_startup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::SERVER_HOST.to_string(),
            port: defaults::SERVER_PORT,
            database_url: "postgres://localhost/lectern".to_string(),
            sse_heartbeat: Duration::from_secs(defaults::SSE_HEARTBEAT_SECS),
            recover_on_startup: defaults::RECOVER_ON_STARTUP,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | 3000 |
    /// | `DATABASE_URL` | `postgres://localhost/lectern` |
    /// | `SSE_HEARTBEAT_SECS` | 15 |
    /// | `RECOVER_ON_STARTUP` | true |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(base.database_url),
            sse_heartbeat: std::env::var("SSE_HEARTBEAT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(base.sse_heartbeat),
            recover_on_startup: std::env::var("RECOVER_ON_STARTUP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(base.recover_on_startup),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_sse_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.sse_heartbeat = heartbeat;
        self
    }

    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
