//! Correlation values binding a redirect result to the session that asked
//! for it.
//!
//! Both `state` and `nonce` are derived once, at construction, from the
//! session identifier and the construction timestamp:
//! `BASE64URL(SHA256(label ":" identifier ":" millis))`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ring::digest;

/// The `state` / `nonce` pair of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    state: String,
    nonce: String,
}

impl Correlation {
    /// Derive the pair for `identifier` at time `at`.
    pub fn derive(identifier: &str, at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis();
        Self {
            state: hash("state", identifier, millis),
            nonce: hash("nonce", identifier, millis),
        }
    }

    /// The correlation token sent as `state`.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The replay-protection value sent as `nonce`.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Whether a returned `state` belongs to this session.
    pub fn matches(&self, state: &str) -> bool {
        self.state == state
    }
}

fn hash(label: &str, identifier: &str, millis: i64) -> String {
    let input = format!("{label}:{identifier}:{millis}");
    let digest = digest::digest(&digest::SHA256, input.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = Correlation::derive("main", at(1_700_000_000_000));
        let b = Correlation::derive("main", at(1_700_000_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn identifier_and_time_change_the_values() {
        let base = Correlation::derive("main", at(1_700_000_000_000));
        assert_ne!(base, Correlation::derive("other", at(1_700_000_000_000)));
        assert_ne!(base, Correlation::derive("main", at(1_700_000_000_001)));
    }

    #[test]
    fn state_and_nonce_differ() {
        let c = Correlation::derive("main", at(0));
        assert_ne!(c.state(), c.nonce());
        // 32 bytes base64url encoded = 43 characters (no padding).
        assert_eq!(c.state().len(), 43);
    }

    #[test]
    fn matches_only_own_state() {
        let c = Correlation::derive("main", at(0));
        let state = c.state().to_string();
        assert!(c.matches(&state));
        assert!(!c.matches("forged"));
    }
}
