//! Trusted backend that exchanges the code and keeps the session in a
//! cookie. Identity comes from the refresh endpoint, which doubles as an
//! ambient-session probe.

use serde_json::Value;

use super::{
    AuthResponse, LogoutAction, MethodStrategy, StrategyContext, TokenGrant, ambient_identity,
    ambient_logout, ambient_refresh, ambient_userinfo, interpret_ambient,
};
use crate::config::AuthMethod;
use crate::error::Result;
use crate::http::HttpRequest;
use crate::identity::Credential;

/// Strategy for [`AuthMethod::BackendCredentials`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCredentialsStrategy;

impl MethodStrategy for BackendCredentialsStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::BackendCredentials
    }

    fn exchange_request(&self, ctx: &StrategyContext, code: &str) -> Result<Option<HttpRequest>> {
        let mut form = vec![("code", code.to_string())];
        if let Some(ref client_id) = ctx.client_id {
            form.push(("clientId", client_id.clone()));
        }
        form.push(("redirectUri", ctx.redirect_uri.clone()));
        form.push(("nonce", ctx.nonce.clone()));
        if ctx.sso {
            form.push(("sso", "true".to_string()));
        }

        Ok(Some(
            HttpRequest::post(ctx.token_url()?)
                .form(form)
                .with_credentials(),
        ))
    }

    /// Tokens win over a bare identity; a reply with neither means the
    /// backend only set its cookie.
    fn interpret_exchange(&self, body: &Value) -> AuthResponse {
        if let Some(grant) = TokenGrant::from_body(body) {
            return AuthResponse::Tokens(grant);
        }
        ambient_identity(body).map_or(AuthResponse::SessionEstablished, AuthResponse::Identity)
    }

    fn refresh_request(&self, ctx: &StrategyContext, _refresh_token: Option<&str>) -> Result<HttpRequest> {
        ambient_refresh(ctx)
    }

    fn interpret_refresh(&self, body: &Value) -> AuthResponse {
        interpret_ambient(body)
    }

    fn userinfo_request(&self, ctx: &StrategyContext, _credential: Option<&Credential>) -> Result<HttpRequest> {
        ambient_userinfo(ctx)
    }

    fn logout_action(&self, ctx: &StrategyContext, _credential: Option<&Credential>) -> Result<LogoutAction> {
        Ok(ambient_logout(ctx))
    }

    fn probes_ambient_session(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::strategy::tests::context;
    use serde_json::json;

    #[test]
    fn exchange_is_credentialed_form_post() {
        let request = BackendCredentialsStrategy
            .exchange_request(&context(), "abc")
            .unwrap()
            .unwrap();

        assert!(request.include_credentials);
        assert_eq!(request.form_value("code"), Some("abc"));
        assert_eq!(request.form_value("clientId"), Some("web-app"));
        assert_eq!(request.form_value("nonce"), Some("n-1"));
        assert_eq!(request.form_value("sso"), None);
    }

    #[test]
    fn exchange_includes_sso_when_requested() {
        let mut ctx = context();
        ctx.sso = true;
        let request = BackendCredentialsStrategy
            .exchange_request(&ctx, "abc")
            .unwrap()
            .unwrap();
        assert_eq!(request.form_value("sso"), Some("true"));
    }

    #[test]
    fn exchange_reply_without_identity_needs_probe() {
        assert_eq!(
            BackendCredentialsStrategy.interpret_exchange(&Value::Null),
            AuthResponse::SessionEstablished
        );
        assert!(matches!(
            BackendCredentialsStrategy.interpret_exchange(&json!({"email": "a@b.com"})),
            AuthResponse::Identity(_)
        ));
    }

    #[test]
    fn exchange_reply_with_tokens_is_a_grant() {
        let response = BackendCredentialsStrategy.interpret_exchange(&json!({
            "token": "t1", "id_token": "i1", "email": "a@b.com"
        }));
        let AuthResponse::Tokens(grant) = response else {
            panic!("expected a token grant, got {response:?}");
        };
        assert_eq!(grant.token.as_deref(), Some("t1"));
        assert_eq!(grant.id_token.as_deref(), Some("i1"));
    }

    #[test]
    fn refresh_probe_is_credentialed_get() {
        let request = BackendCredentialsStrategy.refresh_request(&context(), None).unwrap();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.include_credentials);
        assert_eq!(request.bearer, None);
        assert_eq!(
            BackendCredentialsStrategy.interpret_refresh(&json!({})),
            AuthResponse::Empty
        );
    }

    #[test]
    fn userinfo_does_not_need_token() {
        let request = BackendCredentialsStrategy.userinfo_request(&context(), None).unwrap();
        assert!(request.include_credentials);
    }

    #[test]
    fn logout_is_credentialed_get() {
        let LogoutAction::Request(request) =
            BackendCredentialsStrategy.logout_action(&context(), None).unwrap()
        else {
            panic!("expected a logout request");
        };
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.include_credentials);
    }
}
