//! HTTP boundary used by the session.
//!
//! The session never talks to `reqwest` directly. It describes each call as
//! an [`HttpRequest`] and hands it to an [`HttpTransport`], which returns the
//! decoded JSON body. [`ReqwestTransport`] is the production implementation;
//! [`MemoryTransport`](crate::memory::MemoryTransport) replays scripted
//! replies in tests.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SessionError};

// ---------------------------------------------------------------------------
// Request description
// ---------------------------------------------------------------------------

/// HTTP verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// Body of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
    /// `application/json` document.
    Json(Value),
}

/// A single call the session wants to make.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Request body.
    pub body: RequestBody,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
    /// Whether ambient browser credentials (cookies) accompany the request.
    pub include_credentials: bool,
}

impl HttpRequest {
    /// A `GET` with no body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: RequestBody::Empty,
            bearer: None,
            include_credentials: false,
        }
    }

    /// A `POST` with no body yet.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            ..Self::get(url)
        }
    }

    /// Attach a form-encoded body.
    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Authenticate with a bearer token.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Send ambient credentials along with the request.
    pub fn with_credentials(mut self) -> Self {
        self.include_credentials = true;
        self
    }

    /// Look up a form field by name.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Opaque request/response capability.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform the request and return the JSON body.
    ///
    /// An empty successful body is returned as [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Transport failures, non-success statuses, and undecodable bodies.
    async fn send(&self, request: HttpRequest) -> Result<Value>;
}

/// Raw error response from an authorization server.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Map a non-success status and body onto a [`SessionError`].
pub(crate) fn status_error(status: u16, body: String) -> SessionError {
    match serde_json::from_str::<OAuthErrorResponse>(&body) {
        Ok(error_response) => SessionError::InvalidGrant {
            reason: error_response
                .error_description
                .unwrap_or(error_response.error),
        },
        Err(_) => SessionError::HttpStatus { status, body },
    }
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// [`HttpTransport`] backed by `reqwest`.
///
/// Requests that include credentials go through a client with a cookie
/// store; all others use a client that never shares cookies.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    plain: reqwest::Client,
    credentialed: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with fresh clients.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NetworkError`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self> {
        Ok(Self {
            plain: reqwest::Client::builder().build()?,
            credentialed: reqwest::Client::builder().cookie_store(true).build()?,
        })
    }

    /// Use caller-supplied clients (for connection pool reuse or testing).
    pub fn with_clients(plain: reqwest::Client, credentialed: reqwest::Client) -> Self {
        Self {
            plain,
            credentialed,
        }
    }

    fn client_for(&self, request: &HttpRequest) -> &reqwest::Client {
        if request.include_credentials {
            &self.credentialed
        } else {
            &self.plain
        }
    }

    async fn parse_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value> {
        let client = self.client_for(&request);
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };

        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(ref pairs) => builder.form(pairs),
            RequestBody::Json(ref value) => builder.json(value),
        };

        tracing::debug!(
            url = %request.url,
            method = ?request.method,
            credentials = request.include_credentials,
            "sending request"
        );

        let response = builder.send().await?;
        Self::parse_response(response).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new().unwrap()
    }

    #[test]
    fn request_builders() {
        let request = HttpRequest::post("https://id.example.com/token")
            .form([("grant_type", "refresh_token"), ("refresh_token", "r1")])
            .bearer("t1")
            .with_credentials();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.form_value("refresh_token"), Some("r1"));
        assert_eq!(request.form_value("missing"), None);
        assert_eq!(request.bearer.as_deref(), Some("t1"));
        assert!(request.include_credentials);
    }

    #[test]
    fn status_error_with_oauth_body() {
        let err = status_error(
            400,
            r#"{"error":"invalid_grant","error_description":"code expired"}"#.to_string(),
        );
        assert!(matches!(err, SessionError::InvalidGrant { ref reason } if reason == "code expired"));
    }

    #[test]
    fn status_error_without_description() {
        let err = status_error(400, r#"{"error":"access_denied"}"#.to_string());
        assert!(matches!(err, SessionError::InvalidGrant { ref reason } if reason == "access_denied"));
    }

    #[test]
    fn status_error_plain_body() {
        let err = status_error(503, "unavailable".to_string());
        assert!(matches!(err, SessionError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn form_post_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t1"})))
            .mount(&server)
            .await;

        let request = HttpRequest::post(format!("{}/token", server.uri()))
            .form([("grant_type", "authorization_code"), ("code", "abc")]);
        let body = transport().send(request).await.unwrap();

        assert_eq!(body["access_token"], "t1");
    }

    #[tokio::test]
    async fn json_post_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", "Bearer t1"))
            .and(body_json(json!({"reason": "user"})))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let request = HttpRequest::post(format!("{}/auth/logout", server.uri()))
            .json(json!({"reason": "user"}))
            .bearer("t1");
        let body = transport().send(request).await.unwrap();

        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn error_status_maps_to_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "The code has expired"
            })))
            .mount(&server)
            .await;

        let request = HttpRequest::post(format!("{}/token", server.uri())).form([("code", "x")]);
        let err = transport().send(request).await.unwrap_err();

        assert!(matches!(err, SessionError::InvalidGrant { ref reason } if reason == "The code has expired"));
    }

    #[tokio::test]
    async fn non_json_success_is_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = transport()
            .send(HttpRequest::get(format!("{}/userinfo", server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[test]
    fn transport_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReqwestTransport>();
        assert_send_sync::<HttpRequest>();
    }
}
