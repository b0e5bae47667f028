//! The session state machine.
//!
//! A [`Session`] drives one authorization flow end to end: it resolves the
//! provider, opens a popup or hidden frame through the [`RedirectChannel`],
//! validates the message the redirect target posts back, exchanges the code
//! through its [`MethodStrategy`], caches identity and expiry, and keeps the
//! session alive with a single [`RefreshScheduler`].
//!
//! ```text
//!                       message / probe
//!  Unauthenticated ──────────────────────▶ Exchanging
//!        ▲                                     │
//!        │ logout, refresh failure,            │ credentials + identity
//!        │ empty reply                         ▼
//!        └──────────────────────────────── Authenticated ◀─┐
//!                                              │ timer       │
//!                                              └─────────────┘
//! ```
//!
//! Every reset bumps a generation counter. Asynchronous results are only
//! committed if the generation captured before the request is still current,
//! so a slow exchange reply arriving after logout cannot resurrect the
//! session.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::channel::{ChannelMessage, FrameHandle, PopupHandle, RedirectChannel};
use crate::config::{AuthMethod, GlobalConfig, ProviderKind, ProviderSource, SessionConfig};
use crate::correlation::Correlation;
use crate::error::{Result, SessionError};
use crate::events::EventHandlers;
use crate::http::{HttpRequest, HttpTransport};
use crate::identity::{Credential, Identity, decode_id_token, resolve_expiry};
use crate::message::{DiscardReason, MessageDisposition, classify};
use crate::provider::{self, ProviderEndpoints};
use crate::scheduler::RefreshScheduler;
use crate::strategy::{self, AuthResponse, LogoutAction, MethodStrategy, StrategyContext, TokenGrant};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No credential held.
    Unauthenticated,
    /// A code exchange is in flight.
    Exchanging,
    /// Credential and identity are held; the refresh timer is armed.
    Authenticated,
    /// Torn down; every operation is refused.
    Removed,
}

/// Whether a reset tells the host through the logout callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetNotice {
    Logout,
    Silent,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    generation: u64,
    endpoints: ProviderEndpoints,
    provider_resolved: bool,
    started: bool,
    credential: Option<Credential>,
    refresh_token: Option<String>,
    identity: Option<Identity>,
    expiry: Option<Duration>,
    frame: Option<FrameHandle>,
    popup: Option<PopupHandle>,
    listener: Option<JoinHandle<()>>,
    scheduler: RefreshScheduler,
}

struct SessionInner {
    config: SessionConfig,
    global: Arc<GlobalConfig>,
    strategy: Box<dyn MethodStrategy>,
    correlation: Correlation,
    transport: Arc<dyn HttpTransport>,
    channel: Arc<dyn RedirectChannel>,
    events: EventHandlers,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        if let Some(frame) = state.frame.take() {
            self.channel.remove_frame(frame);
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to one authentication session.
///
/// Cloning is cheap; clones share state. Dropping the last handle stops the
/// message listener and the refresh timer.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.inner.config.identifier)
            .field("method", &self.inner.config.method)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Session {
    /// Create a session.
    ///
    /// Fixed-template endpoints are resolved immediately; discovered ones on
    /// the first [`resolve_provider`](Self::resolve_provider),
    /// [`start`](Self::start) or [`login`](Self::login). Explicit endpoints
    /// in `config` always win.
    pub fn new(
        config: SessionConfig,
        global: Arc<GlobalConfig>,
        transport: Arc<dyn HttpTransport>,
        channel: Arc<dyn RedirectChannel>,
    ) -> Self {
        let (endpoints, provider_resolved) = match &config.provider {
            ProviderSource::FixedTemplate { base_url } => {
                let base = base_url.as_deref().unwrap_or(&global.provider_url);
                (
                    ProviderEndpoints::from_template(base).overlay(&config.endpoints),
                    true,
                )
            }
            ProviderSource::Discovered { .. } => (config.endpoints.clone(), false),
        };

        let correlation = Correlation::derive(&config.identifier, Utc::now());
        let strategy = strategy::for_method(config.method);

        tracing::debug!(
            identifier = %config.identifier,
            method = %config.method,
            provider = ?config.provider.kind(),
            "session created"
        );

        Self {
            inner: Arc::new(SessionInner {
                config,
                global,
                strategy,
                correlation,
                transport,
                channel,
                events: EventHandlers::default(),
                state: Mutex::new(SessionState {
                    phase: Phase::Unauthenticated,
                    generation: 0,
                    endpoints,
                    provider_resolved,
                    started: false,
                    credential: None,
                    refresh_token: None,
                    identity: None,
                    expiry: None,
                    frame: None,
                    popup: None,
                    listener: None,
                    scheduler: RefreshScheduler::new(),
                }),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a handler for successful authentication.
    pub fn on_authenticated<F>(&self, handler: F)
    where
        F: Fn(&Identity, &Session) + Send + Sync + 'static,
    {
        self.inner.events.on_authenticated(Arc::new(handler));
    }

    /// Register a handler for the return to the unauthenticated state.
    pub fn on_logout<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.on_logout(Arc::new(handler));
    }

    /// Register a handler for discovery and code exchange failures.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.inner.events.on_error(Arc::new(handler));
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The instance identifier.
    pub fn identifier(&self) -> &str {
        &self.inner.config.identifier
    }

    /// The backend trust method.
    pub fn method(&self) -> AuthMethod {
        self.inner.config.method
    }

    /// How endpoints are obtained.
    pub fn provider_kind(&self) -> ProviderKind {
        self.inner.config.provider.kind()
    }

    /// The `state` / `nonce` pair of this session.
    pub fn correlation(&self) -> &Correlation {
        &self.inner.correlation
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Current credential.
    pub fn token(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    /// Current refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.inner.lock().refresh_token.clone()
    }

    /// Current identity.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    /// Shortcut for the identity's `email` claim.
    pub fn email(&self) -> Option<String> {
        self.inner
            .lock()
            .identity
            .as_ref()
            .and_then(Identity::email)
            .map(String::from)
    }

    /// Time from authentication to the next refresh.
    pub fn expiry(&self) -> Option<Duration> {
        self.inner.lock().expiry
    }

    /// Whether the refresh timer is running.
    pub fn refresh_timer_armed(&self) -> bool {
        self.inner.lock().scheduler.is_armed()
    }

    /// The endpoints currently in use.
    pub fn endpoints(&self) -> ProviderEndpoints {
        self.inner.lock().endpoints.clone()
    }

    /// The URL the login popup or hidden frame is pointed at.
    ///
    /// # Errors
    ///
    /// Unresolved authorize endpoint or missing client ID.
    pub fn authorize_url(&self) -> Result<String> {
        self.inner.strategy.authorize_url(&self.context())
    }

    // -----------------------------------------------------------------------
    // Flow initiation
    // -----------------------------------------------------------------------

    /// Fetch discovery metadata if this session uses a discovered provider
    /// that has not been resolved yet.
    ///
    /// Failures are reported through the error callback as well as returned;
    /// endpoints then stay at their explicit overrides and a later call
    /// retries.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidProviderMetadata`] or [`SessionError::Removed`].
    pub async fn resolve_provider(&self) -> Result<()> {
        self.ensure_active()?;
        let ProviderSource::Discovered { base_url } = &self.inner.config.provider else {
            return Ok(());
        };
        if self.inner.lock().provider_resolved {
            return Ok(());
        }

        match provider::discover(self.inner.transport.as_ref(), base_url).await {
            Ok(discovered) => {
                let mut state = self.inner.lock();
                state.endpoints = discovered.overlay(&self.inner.config.endpoints);
                state.provider_resolved = true;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    error = %error,
                    "provider discovery failed"
                );
                self.inner.events.emit_error(&error);
                Err(error)
            }
        }
    }

    /// Start listening for redirect messages.
    ///
    /// On the first call with silent authentication enabled a hidden frame is
    /// attached at the authorize URL. Ambient-session methods also probe the
    /// refresh endpoint on every call; a failed probe leaves the session
    /// unauthenticated and is not an error.
    ///
    /// # Errors
    ///
    /// Discovery failure, unresolved authorize endpoint for the hidden frame,
    /// channel failure, or [`SessionError::Removed`].
    pub async fn start(&self) -> Result<()> {
        self.ensure_active()?;
        self.resolve_provider().await?;
        self.ensure_listener();

        let first_start = {
            let mut state = self.inner.lock();
            !std::mem::replace(&mut state.started, true)
        };

        if first_start && self.inner.config.use_hidden_frame {
            let url = self.authorize_url()?;
            let frame = self.inner.channel.open_hidden(&url)?;
            self.inner.lock().frame = Some(frame);
            tracing::info!(
                identifier = %self.identifier(),
                url = %url,
                "silent authentication frame attached"
            );
        }

        if self.inner.strategy.probes_ambient_session() {
            tracing::debug!(identifier = %self.identifier(), "probing for an ambient session");
            if let Err(error) = self.refresh().await {
                tracing::debug!(
                    identifier = %self.identifier(),
                    error = %error,
                    "no ambient session"
                );
            }
        }

        Ok(())
    }

    /// Open the login popup. Returns as soon as the window is requested.
    ///
    /// # Errors
    ///
    /// Discovery failure, unresolved authorize endpoint, channel failure, or
    /// [`SessionError::Removed`].
    pub async fn login(&self) -> Result<PopupHandle> {
        self.ensure_active()?;
        self.resolve_provider().await?;
        self.ensure_listener();

        let url = self.authorize_url()?;
        let popup = self.inner.channel.open_popup(&url, self.inner.global.popup)?;
        self.inner.lock().popup = Some(popup);

        tracing::info!(identifier = %self.identifier(), url = %url, "login popup opened");
        Ok(popup)
    }

    fn ensure_listener(&self) {
        let mut state = self.inner.lock();
        if state.listener.is_some() || state.phase == Phase::Removed {
            return;
        }
        let messages = self.inner.channel.subscribe();
        state.listener = Some(spawn_listener(Arc::downgrade(&self.inner), messages));
        tracing::debug!(identifier = %self.identifier(), "message listener registered");
    }

    // -----------------------------------------------------------------------
    // Message handling and code exchange
    // -----------------------------------------------------------------------

    /// Validate and act on a redirect message.
    ///
    /// Messages for other sessions are discarded without touching state. The
    /// listener registered by [`start`](Self::start) calls this for every
    /// message; hosts with their own message plumbing may call it directly.
    pub async fn handle_message(&self, message: ChannelMessage) -> MessageDisposition {
        let (active, auth_url) = {
            let state = self.inner.lock();
            (state.phase != Phase::Removed, state.endpoints.auth_url.clone())
        };
        if !active {
            return MessageDisposition::Discard(DiscardReason::Inactive);
        }

        let disposition = classify(
            &message,
            &self.inner.correlation,
            self.inner.strategy.accepts_delegated_identity(),
            auth_url.as_deref(),
        );

        match &disposition {
            MessageDisposition::Delegated(identity) => {
                tracing::info!(
                    identifier = %self.identifier(),
                    origin = %message.origin,
                    "identity delegated by gateway"
                );
                self.detach_frame();
                let generation = self.inner.lock().generation;
                self.commit(
                    generation,
                    Credential::Ambient,
                    None,
                    identity.clone(),
                    self.inner.config.ambient_lifetime(),
                );
            }
            MessageDisposition::Code(code) => {
                self.detach_frame();
                self.exchange(code).await;
            }
            MessageDisposition::Discard(DiscardReason::UntrustedOrigin) => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    origin = %message.origin,
                    "discarding delegated message from untrusted origin"
                );
            }
            MessageDisposition::Discard(reason) => {
                tracing::debug!(
                    identifier = %self.identifier(),
                    reason = ?reason,
                    "message not for this session"
                );
            }
        }

        disposition
    }

    fn detach_frame(&self) {
        let frame = self.inner.lock().frame.take();
        if let Some(frame) = frame {
            self.inner.channel.remove_frame(frame);
            tracing::debug!(identifier = %self.identifier(), "hidden frame removed");
        }
    }

    async fn exchange(&self, code: &str) {
        let request = match self.inner.strategy.exchange_request(&self.context(), code) {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(identifier = %self.identifier(), "method has no code exchange");
                return;
            }
            Err(error) => {
                let (generation, held) = self.begin_exchange();
                self.fail_exchange(generation, held, error);
                return;
            }
        };

        let (generation, held) = self.begin_exchange();
        tracing::debug!(
            identifier = %self.identifier(),
            url = %request.url,
            generation,
            "exchanging authorization code"
        );

        if let Err(error) = self.complete_exchange(request, generation).await {
            self.fail_exchange(generation, held, error);
        }
    }

    /// Enter the exchanging phase. Returns the current generation and whether
    /// a credential was already held.
    fn begin_exchange(&self) -> (u64, bool) {
        let mut state = self.inner.lock();
        state.phase = Phase::Exchanging;
        (state.generation, state.credential.is_some())
    }

    async fn complete_exchange(&self, request: HttpRequest, generation: u64) -> Result<()> {
        let body = self.inner.transport.send(request).await?;
        if !self.is_current(generation) {
            tracing::debug!(
                identifier = %self.identifier(),
                generation,
                "discarding exchange reply for a superseded flow"
            );
            return Ok(());
        }

        match self.inner.strategy.interpret_exchange(&body) {
            AuthResponse::Tokens(grant) => {
                self.accept_tokens(grant, generation).await?;
            }
            AuthResponse::Identity(identity) => {
                self.commit(
                    generation,
                    Credential::Ambient,
                    None,
                    identity,
                    self.inner.config.ambient_lifetime(),
                );
            }
            AuthResponse::SessionEstablished => {
                tracing::debug!(
                    identifier = %self.identifier(),
                    "backend session established, probing for identity"
                );
                if let Err(error) = self.refresh().await {
                    tracing::debug!(identifier = %self.identifier(), error = %error, "probe after exchange failed");
                }
            }
            AuthResponse::Empty => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    "code exchange returned no credentials"
                );
                self.reset(ResetNotice::Logout);
            }
        }
        Ok(())
    }

    fn fail_exchange(&self, generation: u64, held: bool, error: SessionError) {
        if !self.is_current(generation) {
            tracing::debug!(
                identifier = %self.identifier(),
                error = %error,
                "dropping failure of a superseded exchange"
            );
            return;
        }
        tracing::warn!(
            identifier = %self.identifier(),
            error = %error,
            kind = %error.kind(),
            "code exchange failed"
        );
        // A held credential is dropped here, so the host must hear about it.
        self.reset(if held { ResetNotice::Logout } else { ResetNotice::Silent });
        self.inner.events.emit_error(&error);
    }

    /// Turn a token grant into a committed authentication.
    ///
    /// Identity comes from the embedded identity token when it decodes, and
    /// from a userinfo request with the new bearer token otherwise. Returns
    /// `false` if the flow was superseded meanwhile.
    async fn accept_tokens(&self, grant: TokenGrant, generation: u64) -> Result<bool> {
        let TokenGrant {
            token,
            refresh_token,
            id_token,
            expires_in,
        } = grant;

        let decoded = match id_token.as_deref().map(decode_id_token) {
            Some(Ok(identity)) => Some(identity),
            Some(Err(error)) => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    error = %error,
                    "ignoring undecodable id_token"
                );
                None
            }
            None => None,
        };

        let Some(token) = token.or(id_token) else {
            return Err(SessionError::NotAuthenticated);
        };
        let credential = Credential::Bearer(token.clone());

        let identity = match decoded {
            Some(identity) => identity,
            None => {
                tracing::debug!(identifier = %self.identifier(), "no identity token, asking userinfo");
                let request = self
                    .inner
                    .strategy
                    .userinfo_request(&self.context(), Some(&credential))?;
                let body = self.inner.transport.send(request).await?;
                Identity::from_userinfo(body)?
            }
        };

        let refresh_token = refresh_token
            .or_else(|| self.inner.lock().refresh_token.clone())
            .or(Some(token));
        let expiry = resolve_expiry(Some(&identity), expires_in, Utc::now());

        Ok(self.commit(generation, credential, refresh_token, identity, expiry))
    }

    /// Store an authentication result and arm the refresh timer if none is
    /// running. Returns `false` without touching state if `generation` is
    /// stale.
    fn commit(
        &self,
        generation: u64,
        credential: Credential,
        refresh_token: Option<String>,
        identity: Identity,
        expiry: Duration,
    ) -> bool {
        {
            let mut state = self.inner.lock();
            if state.generation != generation || state.phase == Phase::Removed {
                tracing::debug!(
                    identifier = %self.identifier(),
                    generation,
                    current = state.generation,
                    "discarding stale authentication result"
                );
                return false;
            }

            state.phase = Phase::Authenticated;
            state.credential = Some(credential);
            state.refresh_token = refresh_token;
            state.identity = Some(identity.clone());
            state.expiry = Some(expiry);

            if !state.scheduler.is_armed() {
                let session = Arc::downgrade(&self.inner);
                state
                    .scheduler
                    .arm(expiry, move || refresh_tick(session.clone()));
            }
        }

        tracing::info!(
            identifier = %self.identifier(),
            email = identity.email().unwrap_or_default(),
            expiry_ms = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX),
            "session authenticated"
        );
        self.inner.events.emit_authenticated(&identity, self);
        true
    }

    // -----------------------------------------------------------------------
    // Refresh and identity
    // -----------------------------------------------------------------------

    /// Refresh the credential, or probe for an ambient session.
    ///
    /// Any failure, including a reply without identity, resets the session
    /// and fires the logout callback. The error is also returned. A session
    /// that holds no credential and cannot build a refresh request (a bearer
    /// method before its first login) is left untouched.
    ///
    /// # Errors
    ///
    /// The refresh failure, or [`SessionError::Removed`].
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_active()?;
        let (generation, refresh_token, held) = {
            let state = self.inner.lock();
            (
                state.generation,
                state.refresh_token.clone(),
                state.credential.is_some(),
            )
        };

        let request = self
            .inner
            .strategy
            .refresh_request(&self.context(), refresh_token.as_deref());
        let result = match request {
            Ok(request) => self.try_refresh(generation, request).await,
            Err(error) if !held => {
                tracing::debug!(
                    identifier = %self.identifier(),
                    error = %error,
                    "nothing to refresh"
                );
                return Err(error);
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                if self.is_current(generation) {
                    tracing::warn!(
                        identifier = %self.identifier(),
                        error = %error,
                        "refresh failed, resetting session"
                    );
                    self.reset(ResetNotice::Logout);
                }
                Err(error)
            }
        }
    }

    async fn try_refresh(&self, generation: u64, request: HttpRequest) -> Result<bool> {
        tracing::debug!(
            identifier = %self.identifier(),
            url = %request.url,
            generation,
            "refreshing session"
        );

        let body = self.inner.transport.send(request).await?;
        if !self.is_current(generation) {
            return Ok(false);
        }

        match self.inner.strategy.interpret_refresh(&body) {
            AuthResponse::Tokens(grant) => self.accept_tokens(grant, generation).await,
            AuthResponse::Identity(identity) => Ok(self.commit(
                generation,
                Credential::Ambient,
                None,
                identity,
                self.inner.config.ambient_lifetime(),
            )),
            AuthResponse::SessionEstablished | AuthResponse::Empty => {
                Err(SessionError::NotAuthenticated)
            }
        }
    }

    /// Fetch the identity from the userinfo endpoint.
    ///
    /// The cached identity is replaced if the session is still authenticated
    /// when the reply arrives.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthenticated`] for bearer methods without a token,
    /// [`SessionError::NoUserinfoUrl`] without an endpoint, transport
    /// failures, or [`SessionError::Removed`].
    pub async fn userinfo(&self) -> Result<Identity> {
        self.ensure_active()?;
        let (generation, credential) = {
            let state = self.inner.lock();
            (state.generation, state.credential.clone())
        };

        let request = self
            .inner
            .strategy
            .userinfo_request(&self.context(), credential.as_ref())?;
        let body = self.inner.transport.send(request).await?;
        let identity = Identity::from_userinfo(body)?;

        {
            let mut state = self.inner.lock();
            if state.generation == generation && state.phase == Phase::Authenticated {
                state.identity = Some(identity.clone());
            }
        }
        Ok(identity)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// End the session locally and, where the method has one, remotely.
    ///
    /// The session is unauthenticated afterwards whatever happens to the
    /// remote call.
    ///
    /// # Errors
    ///
    /// Only [`SessionError::Removed`].
    pub async fn logout(&self) -> Result<()> {
        self.ensure_active()?;
        tracing::info!(identifier = %self.identifier(), "logging out");

        let credential = self.inner.lock().credential.clone();
        let action = self
            .inner
            .strategy
            .logout_action(&self.context(), credential.as_ref());

        match action {
            Ok(LogoutAction::Popup(url)) => self.logout_popup(&url).await,
            Ok(LogoutAction::Request(request)) => {
                if let Err(error) = self.inner.transport.send(request).await {
                    tracing::warn!(
                        identifier = %self.identifier(),
                        error = %error,
                        "logout request failed"
                    );
                }
            }
            Ok(LogoutAction::None) => {
                tracing::debug!(identifier = %self.identifier(), "no remote logout");
            }
            Err(error) => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    error = %error,
                    "could not prepare remote logout"
                );
            }
        }

        self.reset(ResetNotice::Logout);
        Ok(())
    }

    async fn logout_popup(&self, url: &str) {
        let popup = match self.inner.channel.open_popup(url, self.inner.global.popup) {
            Ok(popup) => popup,
            Err(error) => {
                tracing::warn!(
                    identifier = %self.identifier(),
                    error = %error,
                    "could not open logout popup"
                );
                return;
            }
        };
        self.inner.lock().popup = Some(popup);

        let channel = self.inner.channel.clone();
        let poll = self.inner.global.logout_poll_interval();
        let closed = tokio::time::timeout(self.inner.global.logout_timeout(), async move {
            while !channel.is_popup_closed(popup) {
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        if closed.is_err() {
            tracing::warn!(identifier = %self.identifier(), "logout popup did not close in time");
            self.inner.channel.close_popup(popup);
        }

        let mut state = self.inner.lock();
        if state.popup == Some(popup) {
            state.popup = None;
        }
    }

    /// Tear the session down: reset, detach the message listener, remove the
    /// hidden frame. The session refuses every operation afterwards.
    pub fn remove(&self) {
        if self.phase() == Phase::Removed {
            return;
        }
        self.reset(ResetNotice::Logout);

        let (listener, frame, popup) = {
            let mut state = self.inner.lock();
            state.phase = Phase::Removed;
            (state.listener.take(), state.frame.take(), state.popup.take())
        };
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(frame) = frame {
            self.inner.channel.remove_frame(frame);
        }
        if let Some(popup) = popup {
            self.inner.channel.close_popup(popup);
        }

        tracing::info!(identifier = %self.identifier(), "session removed");
    }

    fn reset(&self, notice: ResetNotice) {
        {
            let mut state = self.inner.lock();
            state.generation += 1;
            if state.phase != Phase::Removed {
                state.phase = Phase::Unauthenticated;
            }
            state.credential = None;
            state.refresh_token = None;
            state.identity = None;
            state.expiry = None;
            state.scheduler.cancel();
        }

        tracing::debug!(identifier = %self.identifier(), notice = ?notice, "session reset");
        if notice == ResetNotice::Logout {
            self.inner.events.emit_logout();
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_active(&self) -> Result<()> {
        if self.phase() == Phase::Removed {
            return Err(SessionError::Removed);
        }
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.inner.lock();
        state.generation == generation && state.phase != Phase::Removed
    }

    fn context(&self) -> StrategyContext {
        let endpoints = self.inner.lock().endpoints.clone();
        StrategyContext {
            client_id: self.inner.config.client_id.clone(),
            endpoints,
            redirect_uri: self.inner.global.redirect_uri.clone(),
            logout_redirect_uri: self.inner.global.logout_redirect_uri().to_string(),
            state: self.inner.correlation.state().to_string(),
            nonce: self.inner.correlation.nonce().to_string(),
            sso: self.inner.config.sso,
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

fn spawn_listener(
    session: Weak<SessionInner>,
    mut messages: broadcast::Receiver<ChannelMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = match messages.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "message listener lagged behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = session.upgrade() else {
                break;
            };
            (Session { inner }).handle_message(message).await;
        }
    })
}

async fn refresh_tick(session: Weak<SessionInner>) -> ControlFlow<()> {
    let Some(inner) = session.upgrade() else {
        return ControlFlow::Break(());
    };
    match (Session { inner }).refresh().await {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
