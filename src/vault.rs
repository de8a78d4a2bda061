//! Vault secret-store client
//!
//! Writes each user's API key into the cluster's Vault KV and removes it on
//! teardown. Deletes treat an already-missing entry as success so teardown
//! stays idempotent.

use crate::config::{ClusterTarget, VAULT_SECRET_MOUNT};
use crate::types::ProvisionError;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

/// Header carrying the Vault token
const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Secret body: the key-auth material stored under `auth_key`
#[derive(Debug, Serialize)]
struct SecretPayload<'a> {
    auth_key: &'a str,
}

/// Vault client shared across all clusters
#[derive(Clone)]
pub struct VaultClient {
    http_client: Client,
}

impl VaultClient {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Path of a user's secret below a cluster's Vault base URL
    pub fn secret_path(username: &str) -> String {
        format!("/{}/{}", VAULT_SECRET_MOUNT, username)
    }

    /// Write a user's API key into the cluster's Vault
    pub async fn store_auth_key(
        &self,
        cluster: &ClusterTarget,
        username: &str,
        apikey: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!("{}{}", cluster.vault_url, Self::secret_path(username));

        debug!(cluster = %cluster.name, username = %username, "Writing Vault secret");

        let response = self
            .http_client
            .post(&url)
            .header(VAULT_TOKEN_HEADER, &cluster.vault_token)
            .json(&SecretPayload { auth_key: apikey })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::VaultStatus {
                status: status.as_u16(),
                path: url,
                body,
            });
        }

        Ok(())
    }

    /// Delete a user's secret; 200, 204 and 404 all count as removed
    pub async fn delete_auth_key(
        &self,
        cluster: &ClusterTarget,
        username: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!("{}{}", cluster.vault_url, Self::secret_path(username));

        debug!(cluster = %cluster.name, username = %username, "Deleting Vault secret");

        let response = self
            .http_client
            .delete(&url)
            .header(VAULT_TOKEN_HEADER, &cluster.vault_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(cluster = %cluster.name, username = %username, "Vault secret already absent");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::VaultStatus {
                status: status.as_u16(),
                path: url,
                body,
            });
        }

        Ok(())
    }
}
