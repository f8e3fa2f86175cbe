//! Context configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use cactx_runtime::config::ContextConfig;
//!
//! let config = ContextConfig::from_env()
//!     .recv_poll_interval(Duration::from_millis(250));
//! ```

use std::time::Duration;
use cactx_core::env::{env_get, env_get_opt, env_get_str};

/// Library defaults
pub mod defaults {
    /// Largest wait, in ticks, a single bounded wait may request
    pub const MAX_WAIT_TICKS: u64 = u32::MAX as u64;
    /// Receive worker poll timeout per iteration
    pub const RECV_POLL_MS: u64 = 1000;
    /// How long a suspend request waits for the receive worker to park
    pub const SUSPEND_TIMEOUT_MS: u64 = 5000;
    pub const DISPATCHER_THREAD_PREFIX: &str = "ca-ev";
    pub const RECV_THREAD_PREFIX: &str = "ca-recv";
    /// Tick rate of the portable Instant-based tick source
    pub const FALLBACK_TICK_RATE: u64 = 1000;
}

/// Per-context configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Clamp for converted wait timeouts
    pub max_wait_ticks: u64,
    /// Receive worker poll timeout
    pub recv_poll_interval: Duration,
    /// Bound on waiting for the receive worker to park
    pub suspend_timeout: Duration,
    /// Name prefix for the put-notify dispatch thread
    pub dispatcher_thread_prefix: String,
    /// Name prefix for the receive thread
    pub recv_thread_prefix: String,
    /// Stack size for spawned threads (None = system default)
    pub thread_stack_size: Option<usize>,
    /// Tick rate used where no OS tick counter is available
    pub fallback_tick_rate: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ContextConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CA_MAX_WAIT_TICKS` - Clamp for bounded waits, in ticks
    /// - `CA_RECV_POLL_MS` - Receive worker poll timeout
    /// - `CA_SUSPEND_TIMEOUT_MS` - Wait for the receive worker to park
    /// - `CA_DISPATCHER_THREAD_PREFIX` - Dispatch thread name prefix
    /// - `CA_RECV_THREAD_PREFIX` - Receive thread name prefix
    /// - `CA_STACK_SIZE` - Stack size for spawned threads
    /// - `CA_TICK_RATE_HZ` - Fallback tick rate
    pub fn from_env() -> Self {
        Self {
            max_wait_ticks: env_get("CA_MAX_WAIT_TICKS", defaults::MAX_WAIT_TICKS),
            recv_poll_interval: Duration::from_millis(env_get(
                "CA_RECV_POLL_MS",
                defaults::RECV_POLL_MS,
            )),
            suspend_timeout: Duration::from_millis(env_get(
                "CA_SUSPEND_TIMEOUT_MS",
                defaults::SUSPEND_TIMEOUT_MS,
            )),
            dispatcher_thread_prefix: env_get_str(
                "CA_DISPATCHER_THREAD_PREFIX",
                defaults::DISPATCHER_THREAD_PREFIX,
            ),
            recv_thread_prefix: env_get_str("CA_RECV_THREAD_PREFIX", defaults::RECV_THREAD_PREFIX),
            thread_stack_size: env_get_opt("CA_STACK_SIZE"),
            fallback_tick_rate: env_get("CA_TICK_RATE_HZ", defaults::FALLBACK_TICK_RATE),
        }
    }

    /// Defaults only, no environment lookups
    pub fn new() -> Self {
        Self {
            max_wait_ticks: defaults::MAX_WAIT_TICKS,
            recv_poll_interval: Duration::from_millis(defaults::RECV_POLL_MS),
            suspend_timeout: Duration::from_millis(defaults::SUSPEND_TIMEOUT_MS),
            dispatcher_thread_prefix: defaults::DISPATCHER_THREAD_PREFIX.to_string(),
            recv_thread_prefix: defaults::RECV_THREAD_PREFIX.to_string(),
            thread_stack_size: None,
            fallback_tick_rate: defaults::FALLBACK_TICK_RATE,
        }
    }

    // Builder methods

    pub fn max_wait_ticks(mut self, ticks: u64) -> Self {
        self.max_wait_ticks = ticks;
        self
    }

    pub fn recv_poll_interval(mut self, d: Duration) -> Self {
        self.recv_poll_interval = d;
        self
    }

    pub fn suspend_timeout(mut self, d: Duration) -> Self {
        self.suspend_timeout = d;
        self
    }

    pub fn dispatcher_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dispatcher_thread_prefix = prefix.into();
        self
    }

    pub fn recv_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.recv_thread_prefix = prefix.into();
        self
    }

    pub fn thread_stack_size(mut self, size: Option<usize>) -> Self {
        self.thread_stack_size = size;
        self
    }

    pub fn fallback_tick_rate(mut self, rate: u64) -> Self {
        self.fallback_tick_rate = rate;
        self
    }

    /// Thread builder carrying the configured stack size
    pub(crate) fn thread_builder(&self, name: String) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(name);
        match self.thread_stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_wait_ticks == 0 {
            return Err(ConfigError::InvalidValue("max_wait_ticks must be > 0"));
        }
        if self.recv_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("recv_poll_interval must be > 0"));
        }
        if self.fallback_tick_rate == 0 {
            return Err(ConfigError::InvalidValue("fallback_tick_rate must be > 0"));
        }
        if let Some(size) = self.thread_stack_size {
            if size < 16 * 1024 {
                return Err(ConfigError::InvalidValue("thread_stack_size must be >= 16KB"));
            }
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("Context Configuration:");
        eprintln!("  max_wait_ticks:            {}", self.max_wait_ticks);
        eprintln!("  recv_poll_interval:        {:?}", self.recv_poll_interval);
        eprintln!("  suspend_timeout:           {:?}", self.suspend_timeout);
        eprintln!("  dispatcher_thread_prefix:  {}", self.dispatcher_thread_prefix);
        eprintln!("  recv_thread_prefix:        {}", self.recv_thread_prefix);
        eprintln!("  thread_stack_size:         {:?}", self.thread_stack_size);
        eprintln!("  fallback_tick_rate:        {}", self.fallback_tick_rate);
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
