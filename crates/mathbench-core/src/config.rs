//! Centralized configuration for the evaluation harness.
//!
//! Constants for the relay transport, the gateway's deadlines and answer
//! bounds, and the environment variables both processes agree on so they
//! can be launched independently.

use std::time::Duration;

/// Relay transport configuration.
pub struct RelayConfig;

impl RelayConfig {
    /// Default address both processes use when none is configured.
    pub const DEFAULT_ADDR: &'static str = "127.0.0.1:9090";

    /// Environment variable overriding the relay address.
    pub const ADDR_ENV_VAR: &'static str = "MATHBENCH_RELAY_ADDR";

    /// Maximum frame size accepted on the wire (16 MiB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    // Startup grace: the gateway and the responder are launched
    // independently, so the dialer retries until the peer is listening.
    pub const CONNECT_GRACE_PERIOD: Duration = Duration::from_secs(60);
    pub const CONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    pub const CONNECT_MAX_BACKOFF: Duration = Duration::from_secs(5);

    /// Reconnect window after a timed-out call poisoned the connection.
    /// The peer is known to be alive at this point, so it is short.
    pub const RECONNECT_GRACE_PERIOD: Duration = Duration::from_secs(5);
}

/// Gateway-side evaluation configuration.
pub struct GatewayConfig;

impl GatewayConfig {
    /// Endpoint the solver must register.
    pub const PREDICT_ENDPOINT: &'static str = "predict";

    /// Per-problem deadline applied to every predict call.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);

    /// Inclusive answer bounds; out-of-range answers are clamped.
    pub const ANSWER_MIN: u32 = 0;
    pub const ANSWER_MAX: u32 = 99_999;

    /// Answer recorded for calls that never resolved to a valid one.
    pub const DEFAULT_ANSWER: u32 = 0;

    /// Environment variable marking a scored run. When set truthy, the
    /// solver process starts its serve loop; otherwise it is expected to be
    /// driven in-process for local debugging.
    pub const SCORED_RUN_ENV_VAR: &'static str = "MATHBENCH_SCORED_RUN";
}

/// Resolve the relay address from the environment, falling back to the
/// default loopback address.
pub fn relay_addr_from_env() -> String {
    std::env::var(RelayConfig::ADDR_ENV_VAR)
        .unwrap_or_else(|_| RelayConfig::DEFAULT_ADDR.to_string())
}

/// Whether this process is part of a scored run.
pub fn is_scored_run() -> bool {
    match std::env::var(GatewayConfig::SCORED_RUN_ENV_VAR) {
        Ok(v) => {
            let v = v.trim().to_ascii_lowercase();
            !v.is_empty() && v != "0" && v != "false"
        }
        Err(_) => false,
    }
}
