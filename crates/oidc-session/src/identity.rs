//! User identity and credential values.
//!
//! Identity is a loose claims map: whatever the identity token, userinfo
//! endpoint, or gateway reports. The identity token is decoded without
//! signature verification; verifying it is the job of whoever consumes the
//! token downstream.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// Upper bound on the time until a credential is refreshed (30 minutes).
pub const MAX_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// Key under which some providers nest profile fields in userinfo.
const PROFILE_KEY: &str = "profile";

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// The credential a session holds while authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A bearer access token.
    Bearer(String),
    /// Authentication rides on an ambient cookie session.
    Ambient,
}

impl Credential {
    /// The bearer value, if this is a bearer credential.
    pub fn bearer(&self) -> Option<&str> {
        match self {
            Self::Bearer(token) => Some(token),
            Self::Ambient => None,
        }
    }

    /// Whether this is the ambient-session sentinel.
    pub fn is_ambient(&self) -> bool {
        matches!(self, Self::Ambient)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Claims describing the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Map<String, Value>);

impl Identity {
    /// Wrap a claims map.
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Wrap a JSON object; anything else yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(claims) => Some(Self(claims)),
            _ => None,
        }
    }

    /// Build an identity from a userinfo response.
    ///
    /// Fields nested one level deep under `profile` are lifted to the top
    /// level; top-level fields win on conflict.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] if the response is not a JSON
    /// object.
    pub fn from_userinfo(value: Value) -> Result<Self> {
        let Value::Object(mut claims) = value else {
            return Err(SessionError::Serialization(serde::de::Error::custom(
                "userinfo response is not an object",
            )));
        };

        if let Some(Value::Object(profile)) = claims.remove(PROFILE_KEY) {
            for (key, value) in profile {
                claims.entry(key).or_insert(value);
            }
        }
        Ok(Self(claims))
    }

    /// The `email` claim.
    pub fn email(&self) -> Option<&str> {
        self.0.get("email").and_then(Value::as_str)
    }

    /// The `sub` claim.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// Any claim by name.
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// All claims.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Time left until the `exp` claim, capped at [`MAX_EXPIRY`].
    ///
    /// Returns `None` without an `exp` claim; an `exp` in the past yields
    /// zero.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<Duration> {
        let exp = self.0.get("exp")?;
        let exp_secs = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
        let remaining_ms = exp_secs
            .saturating_mul(1000)
            .saturating_sub(now.timestamp_millis());
        let remaining = Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0));
        Some(remaining.min(MAX_EXPIRY))
    }
}

/// Decode the payload of a compact JWT without verifying its signature.
///
/// # Errors
///
/// Returns [`SessionError::InvalidIdToken`] if the token is not three
/// dot-separated parts or the payload is not a base64url JSON object.
pub fn decode_id_token(id_token: &str) -> Result<Identity> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(SessionError::InvalidIdToken {
            reason: format!("expected 3 segments, found {}", parts.len()),
        });
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| SessionError::InvalidIdToken {
            reason: format!("payload is not base64url: {e}"),
        })?;

    let value: Value =
        serde_json::from_slice(&payload).map_err(|e| SessionError::InvalidIdToken {
            reason: format!("payload is not JSON: {e}"),
        })?;

    Identity::from_value(value).ok_or_else(|| SessionError::InvalidIdToken {
        reason: "payload is not a JSON object".to_string(),
    })
}

/// Decide how long until the next refresh.
///
/// `expires_in` (seconds) wins outright. Otherwise the identity's `exp`
/// claim is used, clamped to [`MAX_EXPIRY`]. With neither, [`MAX_EXPIRY`].
pub fn resolve_expiry(
    identity: Option<&Identity>,
    expires_in: Option<u64>,
    now: DateTime<Utc>,
) -> Duration {
    if let Some(secs) = expires_in {
        return Duration::from_secs(secs);
    }
    identity
        .and_then(|id| id.remaining_lifetime(now))
        .unwrap_or(MAX_EXPIRY)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn decode_id_token_claims() {
        let token = jwt(&json!({"sub": "u-1", "email": "a@b.com", "name": "Ada"}));
        let identity = decode_id_token(&token).unwrap();

        assert_eq!(identity.subject(), Some("u-1"));
        assert_eq!(identity.email(), Some("a@b.com"));
        assert_eq!(identity.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn decode_id_token_wrong_segments() {
        let err = decode_id_token("only.two").unwrap_err();
        assert!(err.to_string().contains("expected 3 segments"));
    }

    #[test]
    fn decode_id_token_bad_payload() {
        assert!(decode_id_token("a.!!!.c").is_err());
        let not_object = format!("a.{}.c", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_id_token(&not_object).is_err());
    }

    #[test]
    fn userinfo_flattens_profile() {
        let identity = Identity::from_userinfo(json!({
            "email": "a@b.com",
            "profile": {"name": "Ada", "email": "shadowed@b.com"}
        }))
        .unwrap();

        assert_eq!(identity.email(), Some("a@b.com"));
        assert_eq!(identity.get("name"), Some(&json!("Ada")));
        assert!(identity.get("profile").is_none());
    }

    #[test]
    fn userinfo_rejects_non_object() {
        assert!(Identity::from_userinfo(json!("nope")).is_err());
    }

    #[test]
    fn remaining_lifetime_is_clamped() {
        let identity = Identity::from_value(json!({"exp": 1_700_000_000 + 7200})).unwrap();
        assert_eq!(identity.remaining_lifetime(now()), Some(MAX_EXPIRY));
    }

    #[test]
    fn remaining_lifetime_below_clamp() {
        let identity = Identity::from_value(json!({"exp": 1_700_000_000 + 300})).unwrap();
        assert_eq!(
            identity.remaining_lifetime(now()),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn remaining_lifetime_past_is_zero() {
        let identity = Identity::from_value(json!({"exp": 1_600_000_000})).unwrap();
        assert_eq!(identity.remaining_lifetime(now()), Some(Duration::ZERO));
    }

    #[test]
    fn expires_in_overrides_clamp() {
        let identity = Identity::from_value(json!({"exp": 1_700_000_000 + 7200})).unwrap();
        assert_eq!(
            resolve_expiry(Some(&identity), Some(600), now()),
            Duration::from_millis(600_000)
        );
        assert_eq!(
            resolve_expiry(None, Some(3600), now()),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn expiry_defaults_to_max() {
        assert_eq!(resolve_expiry(None, None, now()), MAX_EXPIRY);
        let no_exp = Identity::from_value(json!({"email": "a@b.com"})).unwrap();
        assert_eq!(resolve_expiry(Some(&no_exp), None, now()), MAX_EXPIRY);
    }

    #[test]
    fn credential_accessors() {
        assert_eq!(Credential::Bearer("t".into()).bearer(), Some("t"));
        assert!(Credential::Ambient.is_ambient());
        assert_eq!(Credential::Ambient.bearer(), None);
    }
}
