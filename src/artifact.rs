//! Credential snapshot file
//!
//! The sole durable artifact of a provisioning run: a CSV with one line per
//! identity, written after create and removed after delete so test suites
//! can pick up the generated keys.

use crate::identity::TestIdentity;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Header line of the snapshot CSV
pub const SNAPSHOT_HEADER: &str = "username,apikey";

/// Write the credential snapshot, replacing any previous file
pub fn write_snapshot(path: &Path, identities: &[TestIdentity]) -> std::io::Result<()> {
    let mut lines = Vec::with_capacity(identities.len() + 1);
    lines.push(SNAPSHOT_HEADER.to_string());
    for identity in identities {
        lines.push(format!("{},{}", identity.username, identity.apikey));
    }

    fs::write(path, lines.join("\n") + "\n")?;

    info!(
        path = %path.display(),
        users = identities.len(),
        "Credential snapshot written"
    );
    Ok(())
}

/// Remove the credential snapshot; a missing file is tolerated
pub fn remove_snapshot(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
        info!(path = %path.display(), "Credential snapshot removed");
    } else {
        warn!(path = %path.display(), "No credential snapshot to remove");
    }
    Ok(())
}
