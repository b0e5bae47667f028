//! Trusted backend that exchanges the code and returns a bearer token.

use serde_json::json;

use super::{LogoutAction, MethodStrategy, StrategyContext, bearer_userinfo};
use crate::config::AuthMethod;
use crate::error::{Result, SessionError};
use crate::http::HttpRequest;
use crate::identity::Credential;

/// Strategy for [`AuthMethod::BackendToken`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendTokenStrategy;

impl MethodStrategy for BackendTokenStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::BackendToken
    }

    fn exchange_request(&self, ctx: &StrategyContext, code: &str) -> Result<Option<HttpRequest>> {
        let request = HttpRequest::post(ctx.token_url()?).json(json!({
            "code": code,
            "state": ctx.state,
            "clientId": ctx.client_id,
            "redirectUri": ctx.redirect_uri,
        }));
        Ok(Some(request))
    }

    fn refresh_request(&self, ctx: &StrategyContext, refresh_token: Option<&str>) -> Result<HttpRequest> {
        let refresh_token = refresh_token.ok_or(SessionError::NotAuthenticated)?;
        Ok(HttpRequest::get(ctx.refresh_url()?).bearer(refresh_token))
    }

    fn userinfo_request(&self, ctx: &StrategyContext, credential: Option<&Credential>) -> Result<HttpRequest> {
        bearer_userinfo(ctx, credential)
    }

    fn logout_action(&self, ctx: &StrategyContext, credential: Option<&Credential>) -> Result<LogoutAction> {
        let token = credential.and_then(Credential::bearer);
        Ok(match (ctx.endpoints.logout_url.as_deref(), token) {
            (Some(url), Some(token)) => LogoutAction::Request(HttpRequest::post(url).bearer(token)),
            _ => LogoutAction::None,
        })
    }
}
