//! Test User Agent Library
//!
//! Provisions synthetic API consumers across clusters by pairing
//! Vault secret writes with APISIX consumer upserts.

pub mod apisix;
pub mod artifact;
pub mod config;
pub mod identity;
pub mod provisioner;
pub mod types;
pub mod vault;

pub use apisix::ApisixAdminClient;
pub use config::{ClusterTarget, Settings};
pub use identity::TestIdentity;
pub use provisioner::Provisioner;
pub use types::{ProvisionError, RunSummary};
pub use vault::VaultClient;
