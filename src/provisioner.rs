//! Batched provisioning fan-out
//!
//! Drives both control planes for every (cluster, identity) pair with one
//! global cap on in-flight requests. Identities are processed in fixed-size
//! batches; within a batch every Vault call resolves before the first
//! gateway call is issued, so a consumer never references a secret that was
//! not written.

use crate::apisix::ApisixAdminClient;
use crate::artifact;
use crate::config::Settings;
use crate::identity::TestIdentity;
use crate::types::{ProvisionError, RunSummary};
use crate::vault::VaultClient;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// User agent presented to both control planes
const USER_AGENT: &str = concat!("test-user-agent/", env!("CARGO_PKG_VERSION"));

/// One side of a batch round: which call each (cluster, identity) pair gets
#[derive(Debug, Clone, Copy)]
enum Phase {
    StoreSecret,
    UpsertConsumer,
    DeleteSecret,
    DeleteConsumer,
}

/// Provisions and tears down synthetic users across all configured clusters
pub struct Provisioner {
    settings: Settings,
    vault: VaultClient,
    apisix: ApisixAdminClient,
    permits: Arc<Semaphore>,
}

impl Provisioner {
    /// Build a provisioner with one shared HTTP client for both planes
    pub fn new(settings: Settings) -> Result<Self, ProvisionError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        let permits = Arc::new(Semaphore::new(settings.concurrency_limit));

        Ok(Self {
            vault: VaultClient::new(http_client.clone()),
            apisix: ApisixAdminClient::new(http_client),
            permits,
            settings,
        })
    }

    /// Provision every identity on every cluster, then write the snapshot
    ///
    /// Secret writes and consumer upserts are not rolled back on failure:
    /// the first failing batch aborts the run and the snapshot is withheld.
    pub async fn create(&self, identities: &[TestIdentity]) -> Result<RunSummary, ProvisionError> {
        info!(
            users = identities.len(),
            clusters = self.settings.clusters.len(),
            "Creating test users"
        );

        let summary = self
            .run_batches(identities, Phase::StoreSecret, Phase::UpsertConsumer)
            .await?;

        artifact::write_snapshot(&self.settings.output_file, identities)?;

        info!(
            vault_requests = summary.vault_requests,
            gateway_requests = summary.gateway_requests,
            batches = summary.batches,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Test users created"
        );
        Ok(summary)
    }

    /// Remove every identity from every cluster, then drop the snapshot
    ///
    /// Both planes treat 404 as success, so repeating a teardown is safe.
    pub async fn delete(&self, identities: &[TestIdentity]) -> Result<RunSummary, ProvisionError> {
        info!(
            users = identities.len(),
            clusters = self.settings.clusters.len(),
            "Deleting test users"
        );

        let summary = self
            .run_batches(identities, Phase::DeleteSecret, Phase::DeleteConsumer)
            .await?;

        artifact::remove_snapshot(&self.settings.output_file)?;

        info!(
            vault_requests = summary.vault_requests,
            gateway_requests = summary.gateway_requests,
            batches = summary.batches,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Test users deleted"
        );
        Ok(summary)
    }

    /// Run both phases for each fixed-size batch of identities
    async fn run_batches(
        &self,
        identities: &[TestIdentity],
        vault_phase: Phase,
        gateway_phase: Phase,
    ) -> Result<RunSummary, ProvisionError> {
        let started = Instant::now();
        let mut vault_requests = 0;
        let mut gateway_requests = 0;
        let mut batches = 0;

        for batch in identities.chunks(self.settings.batch_size) {
            batches += 1;
            debug!(batch = batches, size = batch.len(), "Dispatching batch");

            vault_requests += self.run_phase(batch, vault_phase).await?;
            gateway_requests += self.run_phase(batch, gateway_phase).await?;
        }

        Ok(RunSummary {
            identities: identities.len(),
            clusters: self.settings.clusters.len(),
            vault_requests,
            gateway_requests,
            batches,
            elapsed: started.elapsed(),
        })
    }

    /// Issue one phase's call for every (cluster, identity) pair of a batch
    ///
    /// All calls run concurrently under the global permit semaphore. The
    /// set is always drained: siblings of a failed call run to completion
    /// and only then does the first error propagate, so the caller can rely
    /// on nothing from this phase still being in flight.
    async fn run_phase(
        &self,
        batch: &[TestIdentity],
        phase: Phase,
    ) -> Result<usize, ProvisionError> {
        let mut join_set = JoinSet::new();

        for cluster in &self.settings.clusters {
            for identity in batch {
                let permits = Arc::clone(&self.permits);
                let vault = self.vault.clone();
                let apisix = self.apisix.clone();
                let cluster = cluster.clone();
                let identity = identity.clone();

                join_set.spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .expect("permit semaphore is never closed");

                    match phase {
                        Phase::StoreSecret => {
                            vault
                                .store_auth_key(&cluster, &identity.username, &identity.apikey)
                                .await
                        }
                        Phase::UpsertConsumer => {
                            apisix.upsert_consumer(&cluster, &identity.username).await
                        }
                        Phase::DeleteSecret => {
                            vault.delete_auth_key(&cluster, &identity.username).await
                        }
                        Phase::DeleteConsumer => {
                            apisix.delete_consumer(&cluster, &identity.username).await
                        }
                    }
                });
            }
        }

        let issued = join_set.len();
        let mut first_error = None;

        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ProvisionError::TaskJoin(e.to_string())),
            };

            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "Sibling request in failed phase also failed");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(issued),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterTarget;
    use crate::identity;
    use axum::extract::{Request, State};
    use axum::http::StatusCode;
    use axum::Router;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// One request as observed by the mock control plane
    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        vault_token: Option<String>,
        admin_key: Option<String>,
        body: String,
    }

    /// Mock Vault + APISIX endpoint recording every request it serves
    #[derive(Clone, Default)]
    struct MockControlPlane {
        requests: Arc<Mutex<Vec<Recorded>>>,
        fail_paths: Arc<Mutex<HashSet<String>>>,
        missing_deletes: Arc<AtomicBool>,
        delay_ms: Arc<AtomicU64>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl MockControlPlane {
        fn recorded(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }

        fn fail_path(&self, path: String) {
            self.fail_paths.lock().unwrap().insert(path);
        }
    }

    async fn handle(State(plane): State<MockControlPlane>, request: Request) -> StatusCode {
        let current = plane.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        plane.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };

        let method = parts.method.to_string();
        let path = parts.uri.path().to_string();

        plane.requests.lock().unwrap().push(Recorded {
            method: method.clone(),
            path: path.clone(),
            vault_token: header("X-Vault-Token"),
            admin_key: header("X-API-KEY"),
            body: String::from_utf8_lossy(&bytes).to_string(),
        });

        let delay = plane.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let status = if plane.fail_paths.lock().unwrap().contains(&path) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else if method == "DELETE" && plane.missing_deletes.load(Ordering::SeqCst) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };

        plane.in_flight.fetch_sub(1, Ordering::SeqCst);
        status
    }

    async fn spawn_control_plane(plane: MockControlPlane) -> SocketAddr {
        let app = Router::new().fallback(handle).with_state(plane);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        addr
    }

    fn target(addr: SocketAddr, name: &str, token: &str, key: &str) -> ClusterTarget {
        ClusterTarget {
            name: name.to_string(),
            vault_url: format!("http://{}", addr),
            admin_url: format!("http://{}", addr),
            vault_token: token.to_string(),
            admin_api_key: key.to_string(),
        }
    }

    fn settings(clusters: Vec<ClusterTarget>, output_file: PathBuf) -> Settings {
        Settings {
            clusters,
            user_count: 0, // identities are passed explicitly in these tests
            batch_size: 50,
            concurrency_limit: 20,
            output_file,
        }
    }

    #[tokio::test]
    async fn test_create_issues_every_write_per_cluster_pair() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        let provisioner = Provisioner::new(settings(
            vec![
                target(addr, "alpha", "token-a", "key-a"),
                target(addr, "beta", "token-b", "key-b"),
            ],
            output.clone(),
        ))
        .unwrap();

        let identities = identity::generate(2);
        let summary = provisioner.create(&identities).await.unwrap();

        assert_eq!(summary.identities, 2);
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.vault_requests, 4);
        assert_eq!(summary.gateway_requests, 4);
        assert_eq!(summary.batches, 1);

        let requests = plane.recorded();
        let posts: Vec<&Recorded> = requests.iter().filter(|r| r.method == "POST").collect();
        let puts: Vec<&Recorded> = requests.iter().filter(|r| r.method == "PUT").collect();
        assert_eq!(posts.len(), 4);
        assert_eq!(puts.len(), 4);

        // Two secret writes per cluster, attributed by Vault token
        for token in ["token-a", "token-b"] {
            let per_cluster = posts
                .iter()
                .filter(|r| r.vault_token.as_deref() == Some(token))
                .count();
            assert_eq!(per_cluster, 2);
        }
        for key in ["key-a", "key-b"] {
            let per_cluster = puts
                .iter()
                .filter(|r| r.admin_key.as_deref() == Some(key))
                .count();
            assert_eq!(per_cluster, 2);
        }

        // Vault sees the raw key, the gateway only the secret reference
        for identity in &identities {
            let secret_writes: Vec<&&Recorded> = posts
                .iter()
                .filter(|r| r.path == VaultClient::secret_path(&identity.username))
                .collect();
            assert_eq!(secret_writes.len(), 2);
            for write in secret_writes {
                assert!(write.body.contains(&identity.apikey));
            }

            let upserts: Vec<&&Recorded> = puts
                .iter()
                .filter(|r| r.path == ApisixAdminClient::consumer_path(&identity.username))
                .collect();
            assert_eq!(upserts.len(), 2);
            for upsert in upserts {
                assert!(upsert
                    .body
                    .contains(&ApisixAdminClient::secret_ref(&identity.username)));
                assert!(!upsert.body.contains(&identity.apikey));
            }
        }

        // The whole Vault phase resolves before the first consumer upsert
        let last_post = requests.iter().rposition(|r| r.method == "POST").unwrap();
        let first_put = requests.iter().position(|r| r.method == "PUT").unwrap();
        assert!(last_post < first_put);

        // Snapshot: header plus one verbatim line per identity
        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents.lines().count(), 3);
        for identity in &identities {
            assert!(contents.contains(&format!("{},{}", identity.username, identity.apikey)));
        }
    }

    #[tokio::test]
    async fn test_delete_mirrors_create_paths_and_is_idempotent() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        let provisioner = Provisioner::new(settings(
            vec![
                target(addr, "alpha", "token-a", "key-a"),
                target(addr, "beta", "token-b", "key-b"),
            ],
            output.clone(),
        ))
        .unwrap();

        provisioner.create(&identity::generate(3)).await.unwrap();
        assert!(output.exists());

        // Teardown regenerates identities; usernames line up by position
        let summary = provisioner.delete(&identity::generate(3)).await.unwrap();
        assert_eq!(summary.vault_requests, 6);
        assert_eq!(summary.gateway_requests, 6);
        assert!(!output.exists());

        let requests = plane.recorded();
        let mut written: Vec<&str> = requests
            .iter()
            .filter(|r| r.method == "POST" || r.method == "PUT")
            .map(|r| r.path.as_str())
            .collect();
        let mut removed: Vec<&str> = requests
            .iter()
            .filter(|r| r.method == "DELETE")
            .map(|r| r.path.as_str())
            .collect();
        written.sort_unstable();
        removed.sort_unstable();
        assert_eq!(written, removed);

        // Repeating the teardown: everything is already gone, still a success
        plane.missing_deletes.store(true, Ordering::SeqCst);
        let again = provisioner.delete(&identity::generate(3)).await.unwrap();
        assert_eq!(again.vault_requests, 6);
        assert_eq!(again.gateway_requests, 6);
    }

    #[tokio::test]
    async fn test_vault_failure_withholds_gateway_phase() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        plane.fail_path(VaultClient::secret_path("test_user_2"));

        let provisioner = Provisioner::new(settings(
            vec![target(addr, "alpha", "token-a", "key-a")],
            output.clone(),
        ))
        .unwrap();

        let err = provisioner.create(&identity::generate(3)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::VaultStatus { status: 500, .. }));

        // Siblings of the failed write ran to completion, but no consumer
        // upsert was ever issued and the snapshot was withheld
        let requests = plane.recorded();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.method == "POST"));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_failed_batch_stops_later_batches() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        plane.fail_path(VaultClient::secret_path("test_user_1"));

        let mut cfg = settings(vec![target(addr, "alpha", "token-a", "key-a")], output);
        cfg.batch_size = 2;
        let provisioner = Provisioner::new(cfg).unwrap();

        let err = provisioner.create(&identity::generate(4)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::VaultStatus { .. }));

        // Only the first batch's Vault writes were dispatched
        let requests = plane.recorded();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.method == "POST"));
    }

    #[tokio::test]
    async fn test_gateway_failure_aborts_after_vault_phase() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        plane.fail_path(ApisixAdminClient::consumer_path("test_user_2"));

        let provisioner = Provisioner::new(settings(
            vec![target(addr, "alpha", "token-a", "key-a")],
            output.clone(),
        ))
        .unwrap();

        let err = provisioner.create(&identity::generate(3)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ApisixStatus { status: 500, .. }));

        // All Vault writes and all sibling upserts completed; no snapshot
        let requests = plane.recorded();
        assert_eq!(requests.iter().filter(|r| r.method == "POST").count(), 3);
        assert_eq!(requests.iter().filter(|r| r.method == "PUT").count(), 3);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_batches_split_into_two_phase_rounds() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        let mut cfg = settings(vec![target(addr, "alpha", "token-a", "key-a")], output);
        cfg.batch_size = 2;
        let provisioner = Provisioner::new(cfg).unwrap();

        let summary = provisioner.create(&identity::generate(3)).await.unwrap();
        assert_eq!(summary.batches, 2);

        // Round 1: two writes then two upserts; round 2: one of each
        let methods: Vec<String> = plane.recorded().iter().map(|r| r.method.clone()).collect();
        assert_eq!(methods, vec!["POST", "POST", "PUT", "PUT", "POST", "PUT"]);
    }

    #[tokio::test]
    async fn test_in_flight_requests_respect_global_cap() {
        let plane = MockControlPlane::default();
        let addr = spawn_control_plane(plane.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test_users_apikeys.csv");

        plane.delay_ms.store(25, Ordering::SeqCst);

        let mut cfg = settings(vec![target(addr, "alpha", "token-a", "key-a")], output);
        cfg.concurrency_limit = 3;
        let provisioner = Provisioner::new(cfg).unwrap();

        provisioner.create(&identity::generate(12)).await.unwrap();

        let max = plane.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "cap exceeded: {} requests in flight", max);
        assert!(max >= 2, "requests never overlapped");
    }
}
