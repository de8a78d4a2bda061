//! Agent configuration
//!
//! Cluster targets and tunables for a provisioning run. Clusters, Vault
//! tokens, and APISIX admin keys arrive as three parallel ordered lists;
//! position i of each list describes cluster i. The lists are zipped into
//! per-cluster targets after validation, so a mismatch is fatal before any
//! request is issued.

use crate::types::ProvisionError;
use std::path::PathBuf;

/// Vault KV path under which per-user secrets live
pub const VAULT_SECRET_MOUNT: &str = "v1/apisix/consumers/test_users";

/// APISIX secret-reference prefix for the Vault resource (secret conf id 1)
pub const APISIX_SECRET_REF_BASE: &str = "$secret://vault/1";

/// Consumer group every synthetic user is placed in
pub const CONSUMER_GROUP: &str = "TEST_USER";

/// A single cluster with the credentials for both control planes
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    /// Cluster name (e.g., "eu-west")
    pub name: String,
    /// Base URL of the cluster's Vault, no trailing slash
    pub vault_url: String,
    /// Base URL of the cluster's APISIX admin API, no trailing slash
    pub admin_url: String,
    /// Vault token for secret writes
    pub vault_token: String,
    /// APISIX admin API key
    pub admin_api_key: String,
}

impl ClusterTarget {
    /// Build a target from a cluster name and the shared base domain
    ///
    /// Both control planes follow the platform URL scheme:
    /// `vault.{cluster}.{domain}` and `admin-api.{cluster}.{domain}`.
    pub fn from_domain(
        name: &str,
        base_domain: &str,
        vault_token: &str,
        admin_api_key: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            vault_url: format!("https://vault.{}.{}", name, base_domain),
            admin_url: format!("https://admin-api.{}.{}", name, base_domain),
            vault_token: vault_token.to_string(),
            admin_api_key: admin_api_key.to_string(),
        }
    }
}

/// Validated settings for one provisioning run
#[derive(Debug, Clone)]
pub struct Settings {
    /// Clusters to provision, with per-cluster credentials
    pub clusters: Vec<ClusterTarget>,
    /// Number of synthetic users to manage
    pub user_count: usize,
    /// Identities processed per concurrency round
    pub batch_size: usize,
    /// Global cap on in-flight HTTP requests, shared across clusters
    pub concurrency_limit: usize,
    /// Path of the CSV credential snapshot
    pub output_file: PathBuf,
}

impl Settings {
    /// Zip the parallel cluster/credential lists into validated settings
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        clusters: &[String],
        vault_tokens: &[String],
        admin_api_keys: &[String],
        base_domain: &str,
        user_count: usize,
        batch_size: usize,
        concurrency_limit: usize,
        output_file: PathBuf,
    ) -> Result<Self, ProvisionError> {
        if clusters.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "at least one cluster is required".to_string(),
            ));
        }
        if vault_tokens.len() != clusters.len() {
            return Err(ProvisionError::InvalidConfig(format!(
                "expected {} Vault tokens, got {}",
                clusters.len(),
                vault_tokens.len()
            )));
        }
        if admin_api_keys.len() != clusters.len() {
            return Err(ProvisionError::InvalidConfig(format!(
                "expected {} APISIX admin keys, got {}",
                clusters.len(),
                admin_api_keys.len()
            )));
        }
        if batch_size == 0 {
            return Err(ProvisionError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if concurrency_limit == 0 {
            return Err(ProvisionError::InvalidConfig(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let targets = clusters
            .iter()
            .zip(vault_tokens)
            .zip(admin_api_keys)
            .map(|((name, token), key)| {
                if name.trim().is_empty() {
                    return Err(ProvisionError::InvalidConfig(
                        "cluster names must be non-empty".to_string(),
                    ));
                }
                if token.trim().is_empty() || key.trim().is_empty() {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "empty credential supplied for cluster {}",
                        name
                    )));
                }
                Ok(ClusterTarget::from_domain(name, base_domain, token, key))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            clusters: targets,
            user_count,
            batch_size,
            concurrency_limit,
            output_file,
        })
    }
}
