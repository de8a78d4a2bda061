//! Shared types for test-user provisioning
//!
//! Error taxonomy for the two control planes plus the summary returned by
//! a provisioning run.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while provisioning or tearing down test users
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Startup configuration is unusable (mismatched lists, zero-sized knobs)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level HTTP failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Vault answered with a non-success status
    #[error("Vault returned {status} for {path}: {body}")]
    VaultStatus {
        status: u16,
        path: String,
        body: String,
    },

    /// APISIX admin API answered with a non-success status
    #[error("APISIX admin API returned {status} for {path}: {body}")]
    ApisixStatus {
        status: u16,
        path: String,
        body: String,
    },

    /// A spawned request task was cancelled or panicked
    #[error("Request task failed: {0}")]
    TaskJoin(String),

    /// Reading or writing the credential snapshot failed
    #[error("Credential snapshot I/O failed: {0}")]
    Snapshot(#[from] std::io::Error),
}

/// Outcome of a create or delete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Number of identities processed
    pub identities: usize,
    /// Number of clusters targeted
    pub clusters: usize,
    /// Vault requests issued (one per cluster/identity pair)
    pub vault_requests: usize,
    /// Gateway admin requests issued (one per cluster/identity pair)
    pub gateway_requests: usize,
    /// Number of batches the identities were split into
    pub batches: usize,
    /// Wall-clock time spent on the HTTP fan-out
    pub elapsed: Duration,
}
