//! Public client: the browser talks to the provider's token endpoint itself.

use url::Url;

use super::{LogoutAction, MethodStrategy, StrategyContext, bearer_userinfo};
use crate::config::AuthMethod;
use crate::error::{Result, SessionError};
use crate::http::HttpRequest;
use crate::identity::Credential;

/// Strategy for [`AuthMethod::Public`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicStrategy;

impl MethodStrategy for PublicStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::Public
    }

    fn exchange_request(&self, ctx: &StrategyContext, code: &str) -> Result<Option<HttpRequest>> {
        let request = HttpRequest::post(ctx.token_url()?).form([
            ("code", code),
            ("grant_type", "authorization_code"),
            ("client_id", ctx.client_id()?),
            ("redirect_uri", ctx.redirect_uri.as_str()),
        ]);
        Ok(Some(request))
    }

    fn refresh_request(&self, ctx: &StrategyContext, refresh_token: Option<&str>) -> Result<HttpRequest> {
        let refresh_token = refresh_token.ok_or(SessionError::NotAuthenticated)?;
        Ok(HttpRequest::post(ctx.refresh_url()?).form([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", ctx.client_id()?),
        ]))
    }

    fn userinfo_request(&self, ctx: &StrategyContext, credential: Option<&Credential>) -> Result<HttpRequest> {
        bearer_userinfo(ctx, credential)
    }

    fn logout_action(&self, ctx: &StrategyContext, _credential: Option<&Credential>) -> Result<LogoutAction> {
        let Some(logout_url) = ctx.endpoints.logout_url.as_deref() else {
            return Ok(LogoutAction::None);
        };
        let mut url = Url::parse(logout_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", ctx.client_id()?)
            .append_pair("redirect_uri", &ctx.logout_redirect_uri);
        Ok(LogoutAction::Popup(url.into()))
    }
}
