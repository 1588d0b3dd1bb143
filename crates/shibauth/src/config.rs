//! Client configuration: timeouts, chain caps, and the redirect rewrite.

use std::time::Duration;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default redirect cap for a single exchange.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;
/// Default cap on adapter steps for one `initiate`/`resume` call.
pub const DEFAULT_MAX_CHAIN_STEPS: usize = 32;

/// Rewrites redirects that land on the service's bare root.
///
/// Some service providers bounce an unauthenticated client to their front
/// page, which never establishes a session. Such redirects are sent to the
/// service's authentication callback instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRewrite {
    pub service_root: Url,
    pub callback: Url,
}

impl RedirectRewrite {
    pub fn new(service_root: Url, callback: Url) -> Self {
        Self {
            service_root,
            callback,
        }
    }

    /// Returns the callback if `target` is the service root.
    pub fn apply(&self, target: &Url) -> Option<Url> {
        if target == &self.service_root {
            Some(self.callback.clone())
        } else {
            None
        }
    }
}

/// Tunables for the HTTP session and the Shibboleth engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub max_chain_steps: usize,
    pub user_agent: String,
    pub redirect_rewrite: Option<RedirectRewrite>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_chain_steps: DEFAULT_MAX_CHAIN_STEPS,
            user_agent: format!("shibauth/{}", env!("CARGO_PKG_VERSION")),
            redirect_rewrite: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `SHIBAUTH_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    pub fn with_redirect_rewrite(mut self, rewrite: RedirectRewrite) -> Self {
        self.redirect_rewrite = Some(rewrite);
        self
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = lookup("SHIBAUTH_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("SHIBAUTH_MAX_REDIRECTS").and_then(|v| v.trim().parse().ok()) {
            self.max_redirects = n;
        }
        if let Some(n) = lookup("SHIBAUTH_MAX_CHAIN_STEPS").and_then(|v| v.trim().parse().ok()) {
            self.max_chain_steps = n;
        }
        if let Some(ua) = lookup("SHIBAUTH_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            self.user_agent = ua;
        }
        self
    }
}
