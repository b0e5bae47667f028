//! Authenticating gateway. The login page is served by the gateway, which
//! posts identity straight back; there is no code to exchange.

use serde_json::Value;

use super::{
    AuthResponse, LogoutAction, MethodStrategy, StrategyContext, ambient_logout, ambient_refresh,
    ambient_userinfo, interpret_ambient,
};
use crate::config::AuthMethod;
use crate::error::{Result, SessionError};
use crate::http::HttpRequest;
use crate::identity::Credential;

/// Strategy for [`AuthMethod::Apache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApacheStrategy;

impl MethodStrategy for ApacheStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::Apache
    }

    fn authorize_url(&self, ctx: &StrategyContext) -> Result<String> {
        ctx.endpoints
            .auth_url
            .clone()
            .ok_or(SessionError::EndpointUnresolved {
                endpoint: "authorize",
            })
    }

    fn exchange_request(&self, _ctx: &StrategyContext, _code: &str) -> Result<Option<HttpRequest>> {
        Ok(None)
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

    fn accepts_delegated_identity(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::context;

    #[test]
    fn authorize_url_is_verbatim() {
        let mut ctx = context();
        ctx.endpoints.auth_url = Some("https://gw.example.com/login?back=1".to_string());
        assert_eq!(
            ApacheStrategy.authorize_url(&ctx).unwrap(),
            "https://gw.example.com/login?back=1"
        );
    }

    #[test]
    fn never_exchanges_codes() {
        assert_eq!(ApacheStrategy.exchange_request(&context(), "abc").unwrap(), None);
    }

    #[test]
    fn delegated_and_probing() {
        assert!(ApacheStrategy.accepts_delegated_identity());
        assert!(ApacheStrategy.probes_ambient_session());
        let request = ApacheStrategy.refresh_request(&context(), None).unwrap();
        assert!(request.include_credentials);
    }
}
