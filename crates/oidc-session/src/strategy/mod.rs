//! Backend trust strategies.
//!
//! A [`MethodStrategy`] is chosen once per session from its
//! [`AuthMethod`]. It decides the shape of every request the session makes
//! (code exchange, refresh, userinfo, logout) and maps raw JSON replies onto
//! an [`AuthResponse`]. The session itself never branches on the method.
//!
//! | Method | Exchange | Refresh | Logout | Credential |
//! |---|---|---|---|---|
//! | `public` | form POST to token endpoint | form `refresh_token` grant | provider logout popup | bearer |
//! | `backend-token` | JSON POST to backend | GET with bearer refresh token | POST with bearer | bearer |
//! | `backend-credentials` | form POST with cookies | GET with cookies | GET with cookies | ambient |
//! | `apache` | none (delegated message) | GET with cookies | GET with cookies | ambient |

mod apache;
mod backend_credentials;
mod backend_token;
mod public;

pub use apache::ApacheStrategy;
pub use backend_credentials::BackendCredentialsStrategy;
pub use backend_token::BackendTokenStrategy;
pub use public::PublicStrategy;

use serde_json::Value;
use url::Url;

use crate::config::AuthMethod;
use crate::error::{Result, SessionError};
use crate::http::HttpRequest;
use crate::identity::{Credential, Identity};
use crate::provider::ProviderEndpoints;

/// Scope requested by every code flow.
const SCOPE: &str = "openid";

// ---------------------------------------------------------------------------
// Context and results
// ---------------------------------------------------------------------------

/// Snapshot of what a strategy needs to build requests.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// OAuth client ID.
    pub client_id: Option<String>,
    /// Resolved endpoints.
    pub endpoints: ProviderEndpoints,
    /// Login redirect target.
    pub redirect_uri: String,
    /// Logout redirect target.
    pub logout_redirect_uri: String,
    /// Correlation token.
    pub state: String,
    /// Replay-protection nonce.
    pub nonce: String,
    /// Single sign-on requested.
    pub sso: bool,
}

impl StrategyContext {
    fn client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .ok_or_else(|| SessionError::InvalidConfig {
                reason: "client_id is required for this method".to_string(),
            })
    }

    fn auth_url(&self) -> Result<&str> {
        self.endpoints
            .auth_url
            .as_deref()
            .ok_or(SessionError::EndpointUnresolved {
                endpoint: "authorize",
            })
    }

    fn token_url(&self) -> Result<&str> {
        self.endpoints
            .token_url
            .as_deref()
            .ok_or(SessionError::EndpointUnresolved { endpoint: "token" })
    }

    fn refresh_url(&self) -> Result<&str> {
        self.endpoints
            .refresh_url
            .as_deref()
            .ok_or(SessionError::EndpointUnresolved { endpoint: "refresh" })
    }

    fn userinfo_url(&self) -> Result<&str> {
        self.endpoints
            .userinfo_url
            .as_deref()
            .ok_or(SessionError::NoUserinfoUrl)
    }
}

/// Tokens carried by an exchange or refresh reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenGrant {
    /// `token` or `access_token`.
    pub token: Option<String>,
    /// `refresh_token`.
    pub refresh_token: Option<String>,
    /// Embedded identity token.
    pub id_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    /// Extract a grant from a reply. `None` if it carries neither a token nor
    /// an identity token.
    pub fn from_body(body: &Value) -> Option<Self> {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(String::from);

        let grant = Self {
            token: text("token").or_else(|| text("access_token")),
            refresh_token: text("refresh_token"),
            id_token: text("id_token"),
            expires_in: body.get("expires_in").and_then(seconds),
        };
        (grant.token.is_some() || grant.id_token.is_some()).then_some(grant)
    }
}

fn seconds(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// A reply mapped into what the session should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResponse {
    /// Bearer-style tokens.
    Tokens(TokenGrant),
    /// Identity resolved directly (ambient session).
    Identity(Identity),
    /// The backend accepted the code and set a cookie; probe for identity.
    SessionEstablished,
    /// Nothing usable.
    Empty,
}

/// How to end the provider-side session.
#[derive(Debug, Clone, PartialEq)]
pub enum LogoutAction {
    /// Open a popup at this URL and wait for it to close.
    Popup(String),
    /// Send this request.
    Request(HttpRequest),
    /// Nothing to do remotely.
    None,
}

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Request shapes and reply mapping for one backend trust method.
pub trait MethodStrategy: Send + Sync + std::fmt::Debug {
    /// The method this strategy implements.
    fn method(&self) -> AuthMethod;

    /// URL the login popup or hidden frame is pointed at.
    ///
    /// # Errors
    ///
    /// Unresolved authorize endpoint, missing client ID, or unparsable URL.
    fn authorize_url(&self, ctx: &StrategyContext) -> Result<String> {
        authorize_with_query(ctx)
    }

    /// The code exchange request, or `None` if this method never exchanges.
    ///
    /// # Errors
    ///
    /// Unresolved endpoint or missing client ID.
    fn exchange_request(&self, ctx: &StrategyContext, code: &str) -> Result<Option<HttpRequest>>;

    /// Map a code exchange reply.
    fn interpret_exchange(&self, body: &Value) -> AuthResponse {
        interpret_tokens(body)
    }

    /// The refresh (or ambient probe) request.
    ///
    /// # Errors
    ///
    /// Unresolved endpoint, or no refresh token where one is needed.
    fn refresh_request(&self, ctx: &StrategyContext, refresh_token: Option<&str>) -> Result<HttpRequest>;

    /// Map a refresh reply.
    fn interpret_refresh(&self, body: &Value) -> AuthResponse {
        interpret_tokens(body)
    }

    /// The userinfo request.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthenticated`] without a needed token,
    /// [`SessionError::NoUserinfoUrl`] without an endpoint.
    fn userinfo_request(&self, ctx: &StrategyContext, credential: Option<&Credential>) -> Result<HttpRequest>;

    /// What to do remotely on logout.
    ///
    /// # Errors
    ///
    /// Unparsable logout URL or missing client ID.
    fn logout_action(&self, ctx: &StrategyContext, credential: Option<&Credential>) -> Result<LogoutAction>;

    /// Whether `start()` probes for an existing ambient session.
    fn probes_ambient_session(&self) -> bool {
        false
    }

    /// Whether identity may arrive directly in a redirect message.
    fn accepts_delegated_identity(&self) -> bool {
        false
    }
}

/// The strategy for `method`.
pub fn for_method(method: AuthMethod) -> Box<dyn MethodStrategy> {
    match method {
        AuthMethod::Public => Box::new(PublicStrategy),
        AuthMethod::BackendToken => Box::new(BackendTokenStrategy),
        AuthMethod::BackendCredentials => Box::new(BackendCredentialsStrategy),
        AuthMethod::Apache => Box::new(ApacheStrategy),
    }
}

// ---------------------------------------------------------------------------
// Shared building blocks
// ---------------------------------------------------------------------------

/// Authorize endpoint plus `redirect_uri`, `response_type`, `client_id`,
/// `scope`, `state`, `nonce`, in that order.
fn authorize_with_query(ctx: &StrategyContext) -> Result<String> {
    let mut url = Url::parse(ctx.auth_url()?)?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", &ctx.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("client_id", ctx.client_id()?)
        .append_pair("scope", SCOPE)
        .append_pair("state", &ctx.state)
        .append_pair("nonce", &ctx.nonce);
    Ok(url.into())
}

fn interpret_tokens(body: &Value) -> AuthResponse {
    TokenGrant::from_body(body).map_or(AuthResponse::Empty, AuthResponse::Tokens)
}

/// Identity if the reply carries an `email`, otherwise [`AuthResponse::Empty`].
fn interpret_ambient(body: &Value) -> AuthResponse {
    ambient_identity(body).map_or(AuthResponse::Empty, AuthResponse::Identity)
}

fn ambient_identity(body: &Value) -> Option<Identity> {
    body.get("email").and_then(Value::as_str)?;
    Identity::from_value(body.clone())
}

fn bearer_userinfo(ctx: &StrategyContext, credential: Option<&Credential>) -> Result<HttpRequest> {
    let token = credential
        .and_then(Credential::bearer)
        .ok_or(SessionError::NotAuthenticated)?;
    Ok(HttpRequest::get(ctx.userinfo_url()?).bearer(token))
}

fn ambient_get(url: &str) -> HttpRequest {
    HttpRequest::get(url).with_credentials()
}

fn ambient_refresh(ctx: &StrategyContext) -> Result<HttpRequest> {
    Ok(ambient_get(ctx.refresh_url()?))
}

fn ambient_userinfo(ctx: &StrategyContext) -> Result<HttpRequest> {
    Ok(ambient_get(ctx.userinfo_url()?))
}

fn ambient_logout(ctx: &StrategyContext) -> LogoutAction {
    match ctx.endpoints.logout_url.as_deref() {
        Some(url) => LogoutAction::Request(ambient_get(url)),
        None => LogoutAction::None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn context() -> StrategyContext {
        StrategyContext {
            client_id: Some("web-app".to_string()),
            endpoints: ProviderEndpoints::from_template("https://id.example.com/oauth"),
            redirect_uri: "https://app.example.com/auth/redirect.html".to_string(),
            logout_redirect_uri: "https://app.example.com/auth/logout.html".to_string(),
            state: "st-1".to_string(),
            nonce: "n-1".to_string(),
            sso: false,
        }
    }

    #[test]
    fn authorize_url_params_in_order() {
        let url = authorize_with_query(&context()).unwrap();
        assert_eq!(
            url,
            "https://id.example.com/oauth/authorize?redirect_uri=https%3A%2F%2Fapp.example.com%2Fauth%2Fredirect.html\
             &response_type=code&client_id=web-app&scope=openid&state=st-1&nonce=n-1"
        );
    }

    #[test]
    fn authorize_url_requires_endpoint_and_client() {
        let mut ctx = context();
        ctx.client_id = None;
        assert!(matches!(
            authorize_with_query(&ctx),
            Err(SessionError::InvalidConfig { .. })
        ));

        ctx.endpoints.auth_url = None;
        assert!(matches!(
            authorize_with_query(&ctx),
            Err(SessionError::EndpointUnresolved { endpoint: "authorize" })
        ));
    }

    #[test]
    fn token_grant_accepts_either_token_field() {
        let grant = TokenGrant::from_body(&json!({"token": "t"})).unwrap();
        assert_eq!(grant.token.as_deref(), Some("t"));

        let grant = TokenGrant::from_body(&json!({
            "access_token": "a", "refresh_token": "r", "id_token": "i", "expires_in": 60
        }))
        .unwrap();
        assert_eq!(grant.token.as_deref(), Some("a"));
        assert_eq!(grant.refresh_token.as_deref(), Some("r"));
        assert_eq!(grant.id_token.as_deref(), Some("i"));
        assert_eq!(grant.expires_in, Some(60));
    }

    #[test]
    fn token_grant_expires_in_as_string() {
        let grant = TokenGrant::from_body(&json!({"access_token": "a", "expires_in": "300"})).unwrap();
        assert_eq!(grant.expires_in, Some(300));
    }

    #[test]
    fn token_grant_requires_token_or_id_token() {
        assert!(TokenGrant::from_body(&json!({"refresh_token": "r"})).is_none());
        assert!(TokenGrant::from_body(&Value::Null).is_none());
        assert!(TokenGrant::from_body(&json!({"id_token": "i"})).is_some());
    }

    #[test]
    fn ambient_interpretation_needs_email() {
        assert!(matches!(
            interpret_ambient(&json!({"email": "a@b.com"})),
            AuthResponse::Identity(_)
        ));
        assert_eq!(interpret_ambient(&json!({})), AuthResponse::Empty);
        assert_eq!(interpret_ambient(&json!({"email": 3})), AuthResponse::Empty);
    }

    #[test]
    fn for_method_dispatches() {
        for method in [
            AuthMethod::Public,
            AuthMethod::BackendToken,
            AuthMethod::BackendCredentials,
            AuthMethod::Apache,
        ] {
            assert_eq!(for_method(method).method(), method);
        }
    }
}
