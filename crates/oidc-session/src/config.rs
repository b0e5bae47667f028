//! Process-wide and per-session configuration.
//!
//! [`GlobalConfig`] carries the values the hosting application sets once at
//! startup (default provider, shared redirect targets, popup size). It is
//! wrapped in an `Arc` and handed to every [`Session`](crate::Session) at
//! construction; nothing mutates it afterwards.
//!
//! [`SessionConfig`] is per instance. Its only late-bound part is the set of
//! endpoints, which the provider resolver fills in.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::provider::ProviderEndpoints;

/// Default lifetime assumed for ambient (cookie) sessions: 20 minutes.
pub const DEFAULT_AMBIENT_LIFETIME_SECS: u64 = 20 * 60;

/// Default interval between checks of a logout popup.
const DEFAULT_LOGOUT_POLL_MS: u64 = 500;

/// Default upper bound on waiting for a logout popup to close (5 minutes).
const DEFAULT_LOGOUT_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Authentication method
// ---------------------------------------------------------------------------

/// How a session trusts its backend. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Public client talking to the provider's token endpoint directly.
    Public,
    /// Trusted backend exchanges the code and hands back a bearer token.
    BackendToken,
    /// Trusted backend exchanges the code and sets a session cookie.
    BackendCredentials,
    /// An authenticating gateway in front of the application.
    Apache,
}

impl AuthMethod {
    /// The kebab-case name used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::BackendToken => "backend-token",
            Self::BackendCredentials => "backend-credentials",
            Self::Apache => "apache",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Self::Public),
            "backend-token" => Ok(Self::BackendToken),
            "backend-credentials" => Ok(Self::BackendCredentials),
            "apache" => Ok(Self::Apache),
            other => Err(SessionError::InvalidConfig {
                reason: format!("unknown auth method `{other}`"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider source
// ---------------------------------------------------------------------------

/// Whether endpoints come from a fixed template or from discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Endpoints are well-known suffixes of a base URL.
    FixedTemplate,
    /// Endpoints are read from the provider's discovery document.
    Discovered,
}

/// Where a session's endpoints come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderSource {
    /// Fixed template rooted at `base_url`, or at the global provider URL
    /// when absent.
    FixedTemplate {
        /// Provider base URL override.
        #[serde(default)]
        base_url: Option<String>,
    },
    /// Discovery metadata fetched from `base_url`.
    Discovered {
        /// Provider base URL hosting `.well-known/openid-configuration`.
        base_url: String,
    },
}

impl Default for ProviderSource {
    fn default() -> Self {
        Self::FixedTemplate { base_url: None }
    }
}

impl ProviderSource {
    /// The kind of this source.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::FixedTemplate { .. } => ProviderKind::FixedTemplate,
            Self::Discovered { .. } => ProviderKind::Discovered,
        }
    }
}

// ---------------------------------------------------------------------------
// Global configuration
// ---------------------------------------------------------------------------

/// Popup window dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupSize {
    /// Window width.
    pub width: u32,
    /// Window height.
    pub height: u32,
}

impl Default for PopupSize {
    fn default() -> Self {
        Self {
            width: 500,
            height: 600,
        }
    }
}

/// Configuration shared by every session in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default provider base URL for fixed-template sessions.
    pub provider_url: String,

    /// Redirect target used for login flows.
    pub redirect_uri: String,

    /// Redirect target used for logout flows. Falls back to `redirect_uri`.
    #[serde(default)]
    pub logout_redirect_uri: Option<String>,

    /// Size of login and logout popups.
    #[serde(default)]
    pub popup: PopupSize,

    /// How often a logout popup is checked for closure, in milliseconds.
    #[serde(default = "default_logout_poll_ms")]
    pub logout_poll_ms: u64,

    /// How long to wait for a logout popup before resetting anyway.
    #[serde(default = "default_logout_timeout_secs")]
    pub logout_timeout_secs: u64,
}

fn default_logout_poll_ms() -> u64 {
    DEFAULT_LOGOUT_POLL_MS
}

fn default_logout_timeout_secs() -> u64 {
    DEFAULT_LOGOUT_TIMEOUT_SECS
}

impl GlobalConfig {
    /// Create a configuration with default popup and logout settings.
    pub fn new(provider_url: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            provider_url: provider_url.into(),
            redirect_uri: redirect_uri.into(),
            logout_redirect_uri: None,
            popup: PopupSize::default(),
            logout_poll_ms: DEFAULT_LOGOUT_POLL_MS,
            logout_timeout_secs: DEFAULT_LOGOUT_TIMEOUT_SECS,
        }
    }

    /// Use a distinct redirect target for logout flows.
    pub fn with_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.logout_redirect_uri = Some(uri.into());
        self
    }

    /// Override the popup dimensions.
    pub fn with_popup(mut self, popup: PopupSize) -> Self {
        self.popup = popup;
        self
    }

    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConfigParse`] if the text is not valid TOML or
    /// lacks required fields.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file cannot be read, or
    /// [`SessionError::ConfigParse`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "loaded global session config");
        Self::from_toml_str(&text)
    }

    /// The redirect target for logout flows.
    pub fn logout_redirect_uri(&self) -> &str {
        self.logout_redirect_uri
            .as_deref()
            .unwrap_or(&self.redirect_uri)
    }

    pub(crate) fn logout_poll_interval(&self) -> Duration {
        Duration::from_millis(self.logout_poll_ms.max(1))
    }

    pub(crate) fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Per-session configuration
// ---------------------------------------------------------------------------

/// Configuration of a single session instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Opaque name of the instance; seeds the correlation token.
    pub identifier: String,

    /// Backend trust method.
    pub method: AuthMethod,

    /// Where endpoints come from.
    #[serde(default)]
    pub provider: ProviderSource,

    /// OAuth client ID.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Explicit endpoints; each one set here wins over the resolved value.
    #[serde(default)]
    pub endpoints: ProviderEndpoints,

    /// Authenticate silently through a hidden frame on `start()`.
    #[serde(default)]
    pub use_hidden_frame: bool,

    /// Ask a backend-credentials backend for single sign-on.
    #[serde(default)]
    pub sso: bool,

    /// Lifetime assumed for ambient sessions, in seconds.
    #[serde(default = "default_ambient_lifetime_secs")]
    pub ambient_lifetime_secs: u64,
}

fn default_ambient_lifetime_secs() -> u64 {
    DEFAULT_AMBIENT_LIFETIME_SECS
}

impl SessionConfig {
    /// Create a configuration using the global fixed-template provider.
    pub fn new(identifier: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            identifier: identifier.into(),
            method,
            provider: ProviderSource::default(),
            client_id: None,
            endpoints: ProviderEndpoints::default(),
            use_hidden_frame: false,
            sso: false,
            ambient_lifetime_secs: DEFAULT_AMBIENT_LIFETIME_SECS,
        }
    }

    /// Set the OAuth client ID.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the provider source.
    pub fn with_provider(mut self, provider: ProviderSource) -> Self {
        self.provider = provider;
        self
    }

    /// Set explicit endpoint overrides.
    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Enable silent authentication through a hidden frame.
    pub fn with_hidden_frame(mut self, enabled: bool) -> Self {
        self.use_hidden_frame = enabled;
        self
    }

    /// Request single sign-on from a backend-credentials backend.
    pub fn with_sso(mut self, enabled: bool) -> Self {
        self.sso = enabled;
        self
    }

    /// Override the ambient session lifetime.
    pub fn with_ambient_lifetime(mut self, lifetime: Duration) -> Self {
        self.ambient_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Parse a session configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConfigParse`] on malformed input.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The ambient session lifetime.
    pub fn ambient_lifetime(&self) -> Duration {
        Duration::from_secs(self.ambient_lifetime_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
