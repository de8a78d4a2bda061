//! APISIX admin-API client
//!
//! Upserts one key-auth consumer per user and cluster. The consumer stores
//! a `$secret://vault/...` reference to the key material, never the raw
//! key, so rotating the secret in Vault needs no gateway change.

use crate::config::{ClusterTarget, APISIX_SECRET_REF_BASE, CONSUMER_GROUP};
use crate::types::ProvisionError;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

/// Header carrying the admin API key
const ADMIN_KEY_HEADER: &str = "X-API-KEY";

/// Consumer record sent on upsert
#[derive(Debug, Serialize)]
struct ConsumerRecord<'a> {
    username: &'a str,
    plugins: ConsumerPlugins,
    group_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ConsumerPlugins {
    #[serde(rename = "key-auth")]
    key_auth: KeyAuthPlugin,
}

#[derive(Debug, Serialize)]
struct KeyAuthPlugin {
    key: String,
}

/// APISIX admin client shared across all clusters
#[derive(Clone)]
pub struct ApisixAdminClient {
    http_client: Client,
}

impl ApisixAdminClient {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Path of a consumer below a cluster's admin base URL
    pub fn consumer_path(username: &str) -> String {
        format!("/apisix/admin/consumers/{}", username)
    }

    /// Vault reference stored in the consumer's key-auth plugin
    pub fn secret_ref(username: &str) -> String {
        format!(
            "{}/test_users/{}/auth_key",
            APISIX_SECRET_REF_BASE, username
        )
    }

    /// Create or update the consumer for a user on one cluster
    pub async fn upsert_consumer(
        &self,
        cluster: &ClusterTarget,
        username: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!("{}{}", cluster.admin_url, Self::consumer_path(username));

        debug!(cluster = %cluster.name, username = %username, "Upserting APISIX consumer");

        let record = ConsumerRecord {
            username,
            plugins: ConsumerPlugins {
                key_auth: KeyAuthPlugin {
                    key: Self::secret_ref(username),
                },
            },
            group_id: CONSUMER_GROUP,
        };

        let response = self
            .http_client
            .put(&url)
            .header(ADMIN_KEY_HEADER, &cluster.admin_api_key)
            .json(&record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::ApisixStatus {
                status: status.as_u16(),
                path: url,
                body,
            });
        }

        Ok(())
    }

    /// Delete the consumer for a user; 200, 204 and 404 all count as removed
    pub async fn delete_consumer(
        &self,
        cluster: &ClusterTarget,
        username: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!("{}{}", cluster.admin_url, Self::consumer_path(username));

        debug!(cluster = %cluster.name, username = %username, "Deleting APISIX consumer");

        let response = self
            .http_client
            .delete(&url)
            .header(ADMIN_KEY_HEADER, &cluster.admin_api_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(cluster = %cluster.name, username = %username, "APISIX consumer already absent");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::ApisixStatus {
                status: status.as_u16(),
                path: url,
                body,
            });
        }

        Ok(())
    }
}
