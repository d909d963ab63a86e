//! Transport timing budget and resource limits.
//!
//! Defaults follow SAE J1939-21. Every value can be overridden from YAML so a
//! test bench can stretch timeouts for slow adapters:
//!
//! ```rust
//! use j1939tp::TransportConfig;
//!
//! let config = TransportConfig::from_yaml("t3_ms: 2000\nmax_sessions: 32\n").unwrap();
//! assert_eq!(config.t3().as_millis(), 2000);
//! assert_eq!(config.t1().as_millis(), 750);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Result, TransportError};

/// J1939-21 timing constants in milliseconds.
pub mod timing {
    /// Maximum gap between data segments once a transfer is flowing.
    pub const T1: u64 = 750;
    /// Maximum wait for the first data segment after a CTS or BAM.
    pub const T2: u64 = 1250;
    /// Maximum wait for a CTS or EOM after sending data or an RTS.
    pub const T3: u64 = 1250;
    /// Maximum wait for the next CTS after a "hold the connection open" CTS.
    pub const T4: u64 = 1050;
    /// Interval at which a receiver repeats "hold open" CTS frames.
    pub const TH: u64 = 500;
    /// Maximum response time of a node to a request.
    pub const TR: u64 = 200;
    /// Gap between broadcast data segments.
    pub const BAM_INTERVAL: u64 = 50;
}

/// Configuration for a [`TransportEngine`](crate::transport::TransportEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub t1_ms: u64,
    pub t2_ms: u64,
    pub t3_ms: u64,
    pub t4_ms: u64,
    pub bam_interval_ms: u64,

    /// Consecutive CTS rounds without progress tolerated before a
    /// peer-to-peer receive gives up. A heuristic, not a protocol value.
    pub max_stalls: u32,

    /// Upper bound on concurrently running receive sessions.
    pub max_sessions: usize,

    /// Advertised in RTS byte 5; 255 means no limit.
    pub max_packets_per_cts: u8,

    /// Capacity of each in-process bus channel.
    pub bus_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            t1_ms: timing::T1,
            t2_ms: timing::T2,
            t3_ms: timing::T3,
            t4_ms: timing::T4,
            bam_interval_ms: timing::BAM_INTERVAL,
            max_stalls: 3,
            max_sessions: 200,
            max_packets_per_cts: 0xFF,
            bus_capacity: 4096,
        }
    }
}

impl TransportConfig {
    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml).map_err(|e| TransportError::Parse {
            context: "transport config".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine hang or refuse all work.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("t1_ms", self.t1_ms),
            ("t2_ms", self.t2_ms),
            ("t3_ms", self.t3_ms),
            ("t4_ms", self.t4_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(TransportError::config(format!("{name} must be greater than zero")));
        }
        if self.max_sessions == 0 {
            return Err(TransportError::config("max_sessions must be greater than zero"));
        }
        if self.max_packets_per_cts == 0 {
            return Err(TransportError::config("max_packets_per_cts must be greater than zero"));
        }
        if self.bus_capacity == 0 {
            return Err(TransportError::config("bus_capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn t1(&self) -> Duration {
        Duration::from_millis(self.t1_ms)
    }

    pub fn t2(&self) -> Duration {
        Duration::from_millis(self.t2_ms)
    }

    pub fn t3(&self) -> Duration {
        Duration::from_millis(self.t3_ms)
    }

    pub fn t4(&self) -> Duration {
        Duration::from_millis(self.t4_ms)
    }

    pub fn bam_interval(&self) -> Duration {
        Duration::from_millis(self.bam_interval_ms)
    }
}
