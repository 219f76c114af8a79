//! Process-level gateway options.
//!
//! Everything per virtual host comes from [`gatekeep_config::Config`]; these are the
//! knobs that only the process owner sets.

use std::net::SocketAddr;
use std::time::Duration;

/// Grace period for in-flight requests on shutdown (60 seconds).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Bound on each session backend call (5 seconds).
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Debounce applied to file-system events before a reload (500 ms).
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Upstream TCP connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on a whole upstream exchange, response body included (5 minutes).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Idle upstream connections are dropped after this long (90 seconds).
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Largest request body buffered for forwarding (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Gateway options.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Overrides the `0.0.0.0:{port}` address derived from the config.
    pub bind_address: Option<SocketAddr>,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_grace: Duration,

    /// Bound on each session backend call.
    pub backend_timeout: Duration,

    /// Debounce for config and certificate watchers.
    pub watch_debounce: Duration,

    /// Upstream connect timeout. A connect failure moves on to the next endpoint.
    pub connect_timeout: Duration,

    /// Upstream exchange timeout. Expiry answers 502.
    pub response_timeout: Duration,

    pub pool_idle_timeout: Duration,

    /// Maximum request body size forwarded upstream.
    pub max_body_size: usize,

    /// Custom not-found page. `{{title}}` and `{{error}}` are substituted.
    pub not_found_template: Option<String>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            bind_address: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            not_found_template: None,
        }
    }
}

impl GatewayOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the session backend timeout.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the watcher debounce.
    pub fn with_watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }

    /// Set the upstream connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the upstream exchange timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the maximum forwarded body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Use a custom not-found page template.
    pub fn with_not_found_template(mut self, template: impl Into<String>) -> Self {
        self.not_found_template = Some(template.into());
        self
    }
}
