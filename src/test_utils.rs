//! Test utilities shared by unit tests, integration tests and benches.

#![cfg(any(test, feature = "benchmark"))]

use crate::config::TransportConfig;

/// Install a `fmt` subscriber honouring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic payload of `len` bytes.
///
/// Consecutive segments differ, so a misplaced segment shows up as a
/// content mismatch rather than passing by accident.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 3)) as u8).collect()
}

/// Protocol timings with a short BAM pacing interval, for tests that run in
/// real time.
pub fn fast_config() -> TransportConfig {
    TransportConfig { bam_interval_ms: 1, ..TransportConfig::default() }
}
