//! Sync engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the queue processor and its collaborators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL for the remote write API (e.g., "https://api.quill.app").
    pub api_base_url: String,

    /// Path of the lightweight liveness endpoint the monitor probes.
    pub probe_path: String,

    /// Per-request timeout in seconds. No call in the pipeline blocks longer.
    pub request_timeout_secs: u64,

    /// Max operations claimed per drain cycle.
    pub batch_size: usize,

    /// Transient failures allowed before a row dead-letters.
    pub max_retries: u32,

    /// Rows stuck in processing longer than this are reclaimed (seconds).
    pub processing_reclaim_secs: i64,

    /// Interval between drain cycles (seconds).
    pub drain_interval_secs: u64,

    /// Interval between reachability probes (seconds).
    pub probe_interval_secs: u64,

    /// Interval between expiry/reclaim sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Combined document size above which merge short-circuits to
    /// "not mergeable" (bytes).
    pub max_merge_size: usize,

    /// Consecutive failures that open the circuit breaker.
    pub breaker_failure_threshold: u32,

    /// Consecutive half-open successes that close the breaker.
    pub breaker_success_threshold: u32,

    /// First open cooldown in milliseconds; doubles per consecutive open.
    pub breaker_base_cooldown_ms: u64,

    /// Cooldown cap in milliseconds.
    pub breaker_max_cooldown_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.quill.app".to_string(),
            probe_path: "/api/health".to_string(),
            request_timeout_secs: 10,
            batch_size: 25,
            max_retries: 5,
            processing_reclaim_secs: 120,
            drain_interval_secs: 5,
            probe_interval_secs: 15,
            sweep_interval_secs: 30,
            max_merge_size: 256 * 1024,
            breaker_failure_threshold: 3,
            breaker_success_threshold: 2,
            breaker_base_cooldown_ms: 1_000,
            breaker_max_cooldown_ms: 30_000,
        }
    }
}
