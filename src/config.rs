//! Engine and connection configuration

use std::time::Duration;

/// Configuration for the request correlation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a request waits for the watch to answer before failing.
    /// `None` waits until the value arrives or the connection drops.
    pub request_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Configuration for the BLE connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bluetooth address of the watch, or `None` to scan for the first Casio device
    pub device_address: Option<String>,

    /// How long to wait for GATT services to be resolved after connecting
    pub services_resolve_timeout: Duration,

    /// Largest payload written to a characteristic in one call
    pub max_write_size: usize,

    /// Maximum number of consecutive connection attempts before giving up
    pub reconnect_attempts: u32,

    /// Initial delay between connection attempts
    pub initial_backoff: Duration,

    /// Maximum delay between connection attempts
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            services_resolve_timeout: Duration::from_secs(10),
            max_write_size: 20,
            reconnect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ConnectionConfig {
    /// Delay before connection attempt number `attempt` (0 based)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(
            (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64()),
        )
    }
}
