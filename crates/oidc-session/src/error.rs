//! Error types for the session crate.
//!
//! Every fallible operation surfaces a [`SessionError`]. Callers that only
//! care about the category of a failure (the value passed to `error`
//! handlers) use [`SessionError::kind`], which maps each variant onto a
//! stable [`ErrorKind`].

use serde::{Deserialize, Serialize};

/// Unified error type for the session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Discovery metadata could not be fetched or did not describe a usable
    /// provider.
    #[error("invalid provider metadata: {reason}")]
    InvalidProviderMetadata {
        /// What went wrong while fetching or parsing the document.
        reason: String,
    },

    /// An operation needs a bearer token but the session holds none.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Userinfo was requested but the endpoint is unresolved.
    #[error("no userinfo url configured")]
    NoUserinfoUrl,

    /// A protocol endpoint required by the operation has not been resolved.
    #[error("{endpoint} endpoint is not resolved")]
    EndpointUnresolved {
        /// Which endpoint is missing (`authorize`, `token`, ...).
        endpoint: &'static str,
    },

    /// The token endpoint rejected the grant.
    #[error("invalid grant: {reason}")]
    InvalidGrant {
        /// Explanation from the authorization server.
        reason: String,
    },

    /// A non-success HTTP status without an OAuth error body.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The response status code.
        status: u16,
        /// The raw response body.
        body: String,
    },

    /// An HTTP request failed at the transport level.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The embedded identity token could not be decoded.
    #[error("invalid id token: {reason}")]
    InvalidIdToken {
        /// Why decoding failed.
        reason: String,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The redirect channel could not open or address a window.
    #[error("redirect channel error: {reason}")]
    Channel {
        /// Details reported by the channel implementation.
        reason: String,
    },

    /// The session was torn down with `remove()` and cannot be reused.
    #[error("session has been removed")]
    Removed,

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error (reading configuration files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Coarse category of a [`SessionError`], as delivered to `error` handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Discovery fetch or parse failure.
    InvalidProviderMetadata,
    /// Userinfo requested without a token.
    NotAuthenticated,
    /// Userinfo requested without a resolved endpoint.
    NoUserinfoUrl,
    /// Some other endpoint needed by an operation is missing.
    EndpointUnresolved,
    /// Network or HTTP-level failure, including rejected grants.
    Transport,
    /// Identity token payload could not be decoded.
    InvalidIdToken,
    /// Bad configuration or unparsable URLs.
    Configuration,
    /// Popup or frame handling failed.
    Channel,
    /// Operation attempted on a removed session.
    SessionRemoved,
}

impl ErrorKind {
    /// Wire-style name of the kind, e.g. `INVALID_PROVIDER_METADATA`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidProviderMetadata => "INVALID_PROVIDER_METADATA",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::NoUserinfoUrl => "NO_USERINFO_URL",
            Self::EndpointUnresolved => "ENDPOINT_UNRESOLVED",
            Self::Transport => "TRANSPORT",
            Self::InvalidIdToken => "INVALID_ID_TOKEN",
            Self::Configuration => "CONFIGURATION",
            Self::Channel => "CHANNEL",
            Self::SessionRemoved => "SESSION_REMOVED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProviderMetadata { .. } => ErrorKind::InvalidProviderMetadata,
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            Self::NoUserinfoUrl => ErrorKind::NoUserinfoUrl,
            Self::EndpointUnresolved { .. } => ErrorKind::EndpointUnresolved,
            Self::InvalidGrant { .. }
            | Self::HttpStatus { .. }
            | Self::NetworkError(_)
            | Self::Serialization(_) => ErrorKind::Transport,
            Self::InvalidIdToken { .. } => ErrorKind::InvalidIdToken,
            Self::InvalidConfig { .. }
            | Self::ConfigParse(_)
            | Self::Io(_)
            | Self::UrlParse(_) => ErrorKind::Configuration,
            Self::Channel { .. } => ErrorKind::Channel,
            Self::Removed => ErrorKind::SessionRemoved,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
