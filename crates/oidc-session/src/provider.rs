//! Provider endpoint resolution.
//!
//! A session needs up to five endpoints: authorize, token, refresh,
//! userinfo, and logout. They come either from a fixed template (well-known
//! suffixes appended to a base URL, no network) or from the provider's
//! discovery document at `{base}/.well-known/openid-configuration`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::http::{HttpRequest, HttpTransport};

/// Discovery document path, relative to the normalised provider base URL.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

const AUTHORIZE_SUFFIX: &str = "authorize";
const TOKEN_SUFFIX: &str = "token";
const USERINFO_SUFFIX: &str = "userinfo";
const LOGOUT_SUFFIX: &str = "logout";

/// The protocol endpoints of a provider. Unresolved endpoints are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    /// Authorization endpoint (or gateway URL for `apache`).
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Code exchange endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Refresh / ambient-session probe endpoint.
    #[serde(default)]
    pub refresh_url: Option<String>,
    /// Userinfo endpoint.
    #[serde(default)]
    pub userinfo_url: Option<String>,
    /// Logout (end-session) endpoint.
    #[serde(default)]
    pub logout_url: Option<String>,
}

impl ProviderEndpoints {
    /// Build endpoints from the fixed template rooted at `base_url`.
    pub fn from_template(base_url: &str) -> Self {
        let base = normalize_base_url(base_url);
        let token_url = format!("{base}{TOKEN_SUFFIX}");
        Self {
            auth_url: Some(format!("{base}{AUTHORIZE_SUFFIX}")),
            refresh_url: Some(token_url.clone()),
            token_url: Some(token_url),
            userinfo_url: Some(format!("{base}{USERINFO_SUFFIX}")),
            logout_url: Some(format!("{base}{LOGOUT_SUFFIX}")),
        }
    }

    /// Fill every endpoint that `overrides` sets, keeping the rest.
    pub fn overlay(mut self, overrides: &ProviderEndpoints) -> Self {
        fn pick(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        pick(&mut self.auth_url, &overrides.auth_url);
        pick(&mut self.token_url, &overrides.token_url);
        pick(&mut self.refresh_url, &overrides.refresh_url);
        pick(&mut self.userinfo_url, &overrides.userinfo_url);
        pick(&mut self.logout_url, &overrides.logout_url);
        self
    }

    /// Whether the authorize endpoint, the minimum for any flow, is known.
    pub fn is_resolved(&self) -> bool {
        self.auth_url.is_some()
    }
}

/// Append a trailing `/` to a provider base URL if it lacks one.
pub fn normalize_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    }
}

/// The subset of the discovery document the session uses.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Authorization endpoint.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint, also used for refresh.
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Userinfo endpoint.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// RP-initiated logout endpoint.
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl DiscoveryDocument {
    /// Convert into endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidProviderMetadata`] if the document has
    /// no authorization endpoint.
    pub fn into_endpoints(self) -> Result<ProviderEndpoints> {
        let auth_url =
            self.authorization_endpoint
                .ok_or_else(|| SessionError::InvalidProviderMetadata {
                    reason: "missing authorization_endpoint".to_string(),
                })?;

        Ok(ProviderEndpoints {
            auth_url: Some(auth_url),
            refresh_url: self.token_endpoint.clone(),
            token_url: self.token_endpoint,
            userinfo_url: self.userinfo_endpoint,
            logout_url: self.end_session_endpoint,
        })
    }
}

/// The discovery document URL for a provider base URL.
pub fn discovery_url(base_url: &str) -> String {
    format!("{}{DISCOVERY_PATH}", normalize_base_url(base_url))
}

/// Fetch and parse discovery metadata.
///
/// Any failure, network or parse, is reported as
/// [`SessionError::InvalidProviderMetadata`].
///
/// # Errors
///
/// See above.
pub async fn discover(transport: &dyn HttpTransport, base_url: &str) -> Result<ProviderEndpoints> {
    let url = discovery_url(base_url);
    tracing::debug!(url = %url, "fetching provider discovery metadata");

    let body = transport
        .send(HttpRequest::get(&url))
        .await
        .map_err(|e| SessionError::InvalidProviderMetadata {
            reason: e.to_string(),
        })?;

    let document: DiscoveryDocument =
        serde_json::from_value(body).map_err(|e| SessionError::InvalidProviderMetadata {
            reason: e.to_string(),
        })?;

    let issuer = document.issuer.clone();
    let endpoints = document.into_endpoints()?;
    tracing::debug!(
        issuer = issuer.as_deref().unwrap_or_default(),
        auth_url = ?endpoints.auth_url,
        "provider metadata resolved"
    );
    Ok(endpoints)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryTransport, MockReply};
    use serde_json::json;

    #[test]
    fn normalize_appends_separator() {
        assert_eq!(normalize_base_url("https://id.example.com"), "https://id.example.com/");
        assert_eq!(normalize_base_url("https://id.example.com/"), "https://id.example.com/");
    }

    #[test]
    fn template_with_and_without_separator_match() {
        let bare = ProviderEndpoints::from_template("https://id.example.com/oauth");
        let slashed = ProviderEndpoints::from_template("https://id.example.com/oauth/");
        assert_eq!(bare, slashed);
    }

    #[test]
    fn template_builds_all_endpoints() {
        let endpoints = ProviderEndpoints::from_template("https://id.example.com/oauth");
        assert_eq!(
            endpoints.auth_url.as_deref(),
            Some("https://id.example.com/oauth/authorize")
        );
        assert_eq!(
            endpoints.token_url.as_deref(),
            Some("https://id.example.com/oauth/token")
        );
        assert_eq!(endpoints.refresh_url, endpoints.token_url);
        assert_eq!(
            endpoints.userinfo_url.as_deref(),
            Some("https://id.example.com/oauth/userinfo")
        );
        assert_eq!(
            endpoints.logout_url.as_deref(),
            Some("https://id.example.com/oauth/logout")
        );
    }

    #[test]
    fn overlay_prefers_overrides() {
        let overrides = ProviderEndpoints {
            token_url: Some("https://api.example.com/auth/code".to_string()),
            ..ProviderEndpoints::default()
        };
        let endpoints = ProviderEndpoints::from_template("https://id.example.com").overlay(&overrides);

        assert_eq!(
            endpoints.token_url.as_deref(),
            Some("https://api.example.com/auth/code")
        );
        assert_eq!(
            endpoints.auth_url.as_deref(),
            Some("https://id.example.com/authorize")
        );
    }

    #[test]
    fn discovery_url_normalizes() {
        assert_eq!(
            discovery_url("https://id.example.com/realms/main"),
            "https://id.example.com/realms/main/.well-known/openid-configuration"
        );
    }

    #[test]
    fn discovery_document_without_authorize_is_invalid() {
        let doc: DiscoveryDocument =
            serde_json::from_value(json!({"token_endpoint": "https://id/token"})).unwrap();
        assert!(matches!(
            doc.into_endpoints(),
            Err(SessionError::InvalidProviderMetadata { .. })
        ));
    }

    #[tokio::test]
    async fn discover_populates_endpoints() {
        let transport = MemoryTransport::new();
        transport.respond(
            "https://id.example.com/.well-known/openid-configuration",
            MockReply::Json(json!({
                "issuer": "https://id.example.com",
                "authorization_endpoint": "https://id.example.com/auth",
                "token_endpoint": "https://id.example.com/token",
                "userinfo_endpoint": "https://id.example.com/me",
                "end_session_endpoint": "https://id.example.com/bye"
            })),
        );

        let endpoints = discover(&transport, "https://id.example.com").await.unwrap();
        assert_eq!(endpoints.auth_url.as_deref(), Some("https://id.example.com/auth"));
        assert_eq!(endpoints.refresh_url.as_deref(), Some("https://id.example.com/token"));
        assert_eq!(endpoints.userinfo_url.as_deref(), Some("https://id.example.com/me"));
        assert_eq!(endpoints.logout_url.as_deref(), Some("https://id.example.com/bye"));
    }

    #[tokio::test]
    async fn discover_failure_is_invalid_metadata() {
        let transport = MemoryTransport::new();
        transport.respond(
            "https://id.example.com/.well-known/openid-configuration",
            MockReply::Status(500, "boom".to_string()),
        );

        let err = discover(&transport, "https://id.example.com/").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidProviderMetadata { .. }));
    }

    #[tokio::test]
    async fn discover_malformed_is_invalid_metadata() {
        let transport = MemoryTransport::new();
        transport.respond(
            "https://id.example.com/.well-known/openid-configuration",
            MockReply::Json(json!(["not", "an", "object"])),
        );

        let err = discover(&transport, "https://id.example.com").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidProviderMetadata { .. }));
    }
}
