//! Synthetic test identities
//!
//! Usernames are deterministic in count and position so that create and
//! delete runs address the same remote records; API keys are fresh random
//! material on every generation.

use uuid::Uuid;

/// Hex characters of a v4 UUID embedded in each generated key
const KEY_FRAGMENT_LEN: usize = 16;

/// A synthetic test user and its gateway API key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentity {
    /// Deterministic username: `test_user_{i}`, 1-based
    pub username: String,
    /// Random API key: `test_key_` followed by 16 hex characters
    pub apikey: String,
}

/// Generate `count` identities with positionally stable usernames
pub fn generate(count: usize) -> Vec<TestIdentity> {
    (1..=count)
        .map(|i| TestIdentity {
            username: format!("test_user_{}", i),
            apikey: random_apikey(),
        })
        .collect()
}

/// Draw a fresh random API key from a v4 UUID
fn random_apikey() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("test_key_{}", &hex[..KEY_FRAGMENT_LEN])
}
