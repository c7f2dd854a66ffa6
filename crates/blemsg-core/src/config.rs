//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Receive Policy
// ----------------------------------------------------------------------------

/// What the receive loop does after a failed read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReceivePolicy {
    /// Tear the session down on the first failed read
    FailFast,
    /// Sleep and retry transient read failures, up to a bound
    RetryWithCooldown {
        cooldown_ms: u64,
        max_consecutive_failures: u32,
    },
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        ReceivePolicy::FailFast
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for the session coordinator and its engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bytes requested by a single read; one read is one message
    pub read_buffer_size: usize,
    /// Behaviour after a failed read
    pub receive_policy: ReceivePolicy,
    /// Stop scanning after this long (None scans until stopped)
    pub scan_timeout_ms: Option<u64>,
    /// Give up waiting for connect/accept after this long (None waits forever)
    pub connect_timeout_ms: Option<u64>,
    /// Start the receive loop as soon as a connection is established
    pub auto_receive: bool,
    /// Capacity of the event broadcast and discovery channels
    pub event_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            receive_policy: ReceivePolicy::FailFast,
            scan_timeout_ms: None,
            connect_timeout_ms: None,
            auto_receive: true,
            event_buffer_size: 64,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set read buffer size (at least one byte)
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set receive policy
    pub fn with_receive_policy(mut self, policy: ReceivePolicy) -> Self {
        self.receive_policy = policy;
        self
    }

    /// Bound every scan to `timeout`
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Race connect/accept against `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enable or disable the automatic receive loop
    pub fn with_auto_receive(mut self, enabled: bool) -> Self {
        self.auto_receive = enabled;
        self
    }

    /// Set channel capacities
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size.max(1);
        self
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
