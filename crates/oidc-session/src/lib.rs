//! Client-side OAuth2 / OpenID Connect session manager.
//!
//! This crate drives an authorization code flow from inside a browser-like
//! host without depending on a browser. It provides:
//!
//! - **Provider resolution** from a fixed endpoint template or from
//!   discovery metadata
//! - **Popup and silent (hidden frame) login** through an injected
//!   [`RedirectChannel`]
//! - **Four backend trust methods** (`public`, `backend-token`,
//!   `backend-credentials`, `apache`) behind one [`MethodStrategy`] trait
//! - **Identity derivation** from identity tokens or userinfo, with a
//!   30-minute expiry ceiling
//! - **Scheduled refresh** with a single timer per session
//!
//! Network access goes through the [`HttpTransport`] boundary;
//! [`ReqwestTransport`] is the production implementation and the
//! [`memory`] module supplies in-memory doubles of both boundaries.
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Provider resolver   (template / discovery)
//! ├── MethodStrategy      (public | backend-token | backend-credentials | apache)
//! ├── RedirectChannel     (popup, hidden frame, message fan-out)
//! ├── HttpTransport       (reqwest / memory)
//! └── RefreshScheduler    (one recurring timer)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use oidc_session::memory::MemoryChannel;
//! use oidc_session::{AuthMethod, GlobalConfig, ReqwestTransport, Session, SessionConfig};
//!
//! # async fn example() -> oidc_session::Result<()> {
//! let global = Arc::new(GlobalConfig::new(
//!     "https://id.example.com/oauth",
//!     "https://app.example.com/auth/redirect.html",
//! ));
//! let config = SessionConfig::new("main", AuthMethod::Public).with_client_id("web-app");
//!
//! let session = Session::new(
//!     config,
//!     global,
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(MemoryChannel::new()),
//! );
//! session.on_authenticated(|identity, _| {
//!     println!("signed in as {:?}", identity.email());
//! });
//!
//! session.start().await?;
//! session.login().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod http;
pub mod identity;
pub mod memory;
pub mod message;
pub mod provider;
pub mod redirect;
pub mod scheduler;
pub mod session;
pub mod strategy;

// Re-export key types at the crate root for convenience.
pub use channel::{ChannelMessage, FrameHandle, PopupHandle, RedirectChannel};
pub use config::{AuthMethod, GlobalConfig, PopupSize, ProviderKind, ProviderSource, SessionConfig};
pub use correlation::Correlation;
pub use error::{ErrorKind, Result, SessionError};
pub use http::{HttpMethod, HttpRequest, HttpTransport, ReqwestTransport, RequestBody};
pub use identity::{Credential, Identity, MAX_EXPIRY};
pub use message::{DiscardReason, MessageDisposition};
pub use provider::ProviderEndpoints;
pub use redirect::{AuthorizationResult, Embedding, PostTarget, RedirectPost};
pub use session::{Phase, Session};
pub use strategy::{AuthResponse, LogoutAction, MethodStrategy};
