// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::time::Duration;

use crate::constants::{
    DEFAULT_CONFIRM_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY,
    DEFAULT_GASVALVE_CONFIRM_TIMEOUT, DEFAULT_IDLE_GAP, DEFAULT_IDLE_POLL,
    DEFAULT_IDLE_WAIT_BUDGET, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX, DEFAULT_RECONNECT_MIN,
    DEFAULT_RECV_CHUNK, DEFAULT_RECV_POLL, DEFAULT_RETRY_GAP, DEFAULT_TCP_PORT,
};
use crate::frame::Checksum;
use crate::protocol::ConfirmTimeouts;
use crate::transport::Endpoint;

/// Configuration for connecting to a wallpad bus.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Where the RS-485 bus is reachable (TCP bridge or local serial port)
    pub endpoint: Endpoint,
    /// Checksum formula used by this installation
    pub checksum: Checksum,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt
    pub reconnect_min: Duration,
    /// Upper bound for the reconnect delay
    pub reconnect_max: Duration,
    /// Maximum bytes read per receive call
    pub recv_chunk: usize,
    /// How long a single receive call waits for data
    pub recv_poll: Duration,
    /// Bus silence required before transmitting
    pub idle_gap: Duration,
    /// Interval between idle checks
    pub idle_poll: Duration,
    /// Give up waiting for silence after this long and send anyway
    pub idle_wait_budget: Duration,
    /// Sends per action before reporting a confirmation timeout
    pub max_attempts: u32,
    /// Pause between unconfirmed attempts
    pub retry_gap: Duration,
    /// Confirmation timeouts per attempt
    pub confirm_timeouts: ConfirmTimeouts,
    /// Broadcast channel capacity for device events
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Tcp {
                host: "192.168.0.200".to_string(),
                port: DEFAULT_TCP_PORT,
            },
            checksum: Checksum::Sum,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_min: DEFAULT_RECONNECT_MIN,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            recv_chunk: DEFAULT_RECV_CHUNK,
            recv_poll: DEFAULT_RECV_POLL,
            idle_gap: DEFAULT_IDLE_GAP,
            idle_poll: DEFAULT_IDLE_POLL,
            idle_wait_budget: DEFAULT_IDLE_WAIT_BUDGET,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_gap: DEFAULT_RETRY_GAP,
            confirm_timeouts: ConfirmTimeouts {
                default: DEFAULT_CONFIRM_TIMEOUT,
                gas_valve: DEFAULT_GASVALVE_CONFIRM_TIMEOUT,
            },
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl GatewayConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Delay before reconnect attempt `attempt` (1-based), doubling from
    /// `reconnect_min` and capped at `reconnect_max`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.reconnect_min
            .saturating_mul(1 << shift)
            .min(self.reconnect_max)
    }
}

/// Builder for GatewayConfig.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.config.checksum = checksum;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.reconnect_min = min;
        self.config.reconnect_max = max.max(min);
        self
    }

    pub fn recv_chunk(mut self, bytes: usize) -> Self {
        self.config.recv_chunk = bytes.max(1);
        self
    }

    pub fn recv_poll(mut self, poll: Duration) -> Self {
        self.config.recv_poll = poll;
        self
    }

    pub fn idle_gap(mut self, gap: Duration) -> Self {
        self.config.idle_gap = gap;
        self
    }

    pub fn idle_poll(mut self, poll: Duration) -> Self {
        self.config.idle_poll = poll;
        self
    }

    pub fn idle_wait_budget(mut self, budget: Duration) -> Self {
        self.config.idle_wait_budget = budget;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_gap(mut self, gap: Duration) -> Self {
        self.config.retry_gap = gap;
        self
    }

    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.config.confirm_timeouts.default = timeout;
        self
    }

    pub fn gas_valve_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.config.confirm_timeouts.gas_valve = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.checksum, Checksum::Sum);
        assert_eq!(config.recv_chunk, 512);
        assert_eq!(config.recv_poll, Duration::from_millis(50));
        assert_eq!(config.idle_gap, Duration::from_millis(200));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_gap, Duration::from_millis(500));
        assert_eq!(config.confirm_timeouts.default, Duration::from_secs(1));
        assert_eq!(config.confirm_timeouts.gas_valve, Duration::from_millis(1500));
        assert_eq!(config.event_capacity, 256);
        assert!(matches!(config.endpoint, Endpoint::Tcp { port: 8899, .. }));
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfig::builder()
            .endpoint("10.0.0.7:9000".parse().unwrap())
            .checksum(Checksum::TwosComplement)
            .max_attempts(0)
            .retry_gap(Duration::from_millis(250))
            .build();

        assert_eq!(
            config.endpoint,
            Endpoint::Tcp {
                host: "10.0.0.7".to_string(),
                port: 9000
            }
        );
        assert_eq!(config.checksum, Checksum::TwosComplement);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.retry_gap, Duration::from_millis(250));
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let config = GatewayConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(5), Duration::from_secs(16));
        assert_eq!(config.reconnect_delay(6), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_max_never_below_min() {
        let config = GatewayConfig::builder()
            .reconnect_backoff(Duration::from_secs(5), Duration::from_secs(1))
            .build();
        assert_eq!(config.reconnect_max, Duration::from_secs(5));
    }
}
