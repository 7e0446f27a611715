//! Inference endpoint configuration.

use lectern_core::defaults;

/// Configuration for the OpenAI-compatible chat endpoint used by the
/// planner and generator.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1` or a local
    /// OpenAI-compatible server.
    pub base_url: String,
    /// Bearer token; optional for local endpoints.
    pub api_key: Option<String>,
    /// Model used for planning.
    pub plan_model: String,
    /// Model used for item generation.
    pub gen_model: String,
    /// HTTP timeout per request, in seconds.
    pub timeout_seconds: u64,
    /// Attempts for transient failures (rate limits, 5xx, timeouts).
    pub max_attempts: u32,
    /// Skip TLS verification (self-signed certs in local environments).
    pub skip_tls_verify: bool,
    /// HTTP-Referer header for OpenRouter rankings.
    pub http_referer: Option<String>,
    /// X-Title header for OpenRouter.
    pub x_title: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_BASE_URL.to_string(),
            api_key: None,
            plan_model: defaults::LLM_PLAN_MODEL.to_string(),
            gen_model: defaults::LLM_GEN_MODEL.to_string(),
            timeout_seconds: defaults::LLM_TIMEOUT_SECS,
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            skip_tls_verify: false,
            http_referer: None,
            x_title: None,
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LLM_BASE_URL` | `https://api.openai.com/v1` |
    /// | `LLM_API_KEY` | unset |
    /// | `LLM_PLAN_MODEL` | `gpt-4o-mini` |
    /// | `LLM_GEN_MODEL` | `gpt-4o-mini` |
    /// | `LLM_TIMEOUT_SECS` | 120 |
    /// | `LLM_MAX_ATTEMPTS` | 4 |
    /// | `LLM_SKIP_TLS_VERIFY` | false |
    /// | `LLM_HTTP_REFERER` / `LLM_X_TITLE` | unset |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or(base.base_url),
            api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            plan_model: std::env::var("LLM_PLAN_MODEL").unwrap_or(base.plan_model),
            gen_model: std::env::var("LLM_GEN_MODEL").unwrap_or(base.gen_model),
            timeout_seconds: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.timeout_seconds),
            max_attempts: std::env::var("LLM_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.max_attempts),
            skip_tls_verify: std::env::var("LLM_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            http_referer: std::env::var("LLM_HTTP_REFERER").ok(),
            x_title: std::env::var("LLM_X_TITLE").ok(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_plan_model(mut self, model: impl Into<String>) -> Self {
        self.plan_model = model.into();
        self
    }

    pub fn with_gen_model(mut self, model: impl Into<String>) -> Self {
        self.gen_model = model.into();
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}
