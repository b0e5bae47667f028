//! The redirect-target side of the message contract.
//!
//! When the provider redirects back, the page at the redirect URI reads its
//! own URL, splits it on `?`, `&` and `#`, and classifies every `key=value`
//! pair as either an authorization parameter (`code`, `state`,
//! `session_state`, `error`) or an application parameter. It then posts
//! `{code, state, url}` to whoever opened it:
//!
//! - as a popup: to `opener`, restricted to the page's own origin, and the
//!   popup closes itself afterwards;
//! - as a frame: to `parent`, with no origin restriction.
//!
//! This module computes that message and delivery plan so a host rendering
//! the redirect page emits exactly what [`classify`](crate::message::classify)
//! expects.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use url::Url;

/// Parameters that belong to the authorization result.
const AUTH_PARAMS: [&str; 4] = ["code", "state", "session_state", "error"];

/// Parameters extracted from a redirect URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResult {
    /// `code`, `state`, `session_state`, `error`.
    pub auth_params: BTreeMap<String, String>,
    /// Everything else.
    pub app_params: BTreeMap<String, String>,
}

impl AuthorizationResult {
    /// Parse every `key=value` segment of `url`, delimited by `?`, `&`, `#`.
    ///
    /// Segments without `=` (such as the path) are skipped. Keys and values
    /// are percent-decoded with `+` read as a space.
    pub fn parse(url: &str) -> Self {
        let mut result = Self::default();

        for segment in url.split(['?', '&', '#']) {
            if !segment.contains('=') {
                continue;
            }
            let Some((key, value)) = url::form_urlencoded::parse(segment.as_bytes()).next() else {
                continue;
            };
            let (key, value) = (key.into_owned(), value.into_owned());
            if AUTH_PARAMS.contains(&key.as_str()) {
                result.auth_params.insert(key, value);
            } else {
                result.app_params.insert(key, value);
            }
        }

        result
    }

    /// The authorization code.
    pub fn code(&self) -> Option<&str> {
        self.auth_params.get("code").map(String::as_str)
    }

    /// The returned correlation token.
    pub fn state(&self) -> Option<&str> {
        self.auth_params.get("state").map(String::as_str)
    }

    /// The provider's session state.
    pub fn session_state(&self) -> Option<&str> {
        self.auth_params.get("session_state").map(String::as_str)
    }

    /// An error reported by the provider.
    pub fn error(&self) -> Option<&str> {
        self.auth_params.get("error").map(String::as_str)
    }

    /// The message payload: `{code, state, url}`.
    pub fn to_message(&self, url: &str) -> Value {
        json!({
            "code": self.code(),
            "state": self.state(),
            "url": url,
        })
    }
}

/// How the redirect page was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embedding {
    /// Opened with `window.open`.
    Popup,
    /// Loaded inside a (hidden) frame.
    Frame,
}

/// Which window receives the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTarget {
    /// `window.opener`.
    Opener,
    /// `window.parent`.
    Parent,
}

/// Everything the redirect page needs to post its result.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectPost {
    /// Receiving window.
    pub target: PostTarget,
    /// Origin restriction for `postMessage`; `None` means `*`.
    pub target_origin: Option<String>,
    /// Whether the page closes itself after posting.
    pub close_window: bool,
    /// The payload.
    pub message: Value,
}

impl RedirectPost {
    /// Build the post for a redirect page loaded at `url`.
    pub fn for_page(url: &str, embedding: Embedding) -> Self {
        let result = AuthorizationResult::parse(url);
        let message = result.to_message(url);

        match embedding {
            Embedding::Popup => Self {
                target: PostTarget::Opener,
                target_origin: origin_of(url),
                close_window: true,
                message,
            },
            Embedding::Frame => Self {
                target: PostTarget::Parent,
                target_origin: None,
                close_window: false,
                message,
            },
        }
    }
}

/// The serialized origin (`scheme://host[:port]`) of `url`.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_standard_redirect() {
        let result = AuthorizationResult::parse("https://app.example.com/cb?code=abc123&state=xyz789");
        assert_eq!(result.code(), Some("abc123"));
        assert_eq!(result.state(), Some("xyz789"));
        assert!(result.app_params.is_empty());
    }

    #[test]
    fn parse_fragment_and_session_state() {
        let result = AuthorizationResult::parse(
            "https://app.example.com/cb#state=s456&session_state=abcdef&code=c123",
        );
        assert_eq!(result.code(), Some("c123"));
        assert_eq!(result.state(), Some("s456"));
        assert_eq!(result.session_state(), Some("abcdef"));
    }

    #[test]
    fn parse_separates_app_params() {
        let result =
            AuthorizationResult::parse("https://app/cb?tab=settings&code=c&lang=en#state=s");
        assert_eq!(result.app_params.get("tab").map(String::as_str), Some("settings"));
        assert_eq!(result.app_params.get("lang").map(String::as_str), Some("en"));
        assert_eq!(result.auth_params.len(), 2);
    }

    #[test]
    fn parse_percent_encoded() {
        let result = AuthorizationResult::parse("https://app/cb?code=abc%20def&state=123%2B456");
        assert_eq!(result.code(), Some("abc def"));
        assert_eq!(result.state(), Some("123+456"));
    }

    #[test]
    fn parse_plus_as_space() {
        let result = AuthorizationResult::parse("https://app/cb?code=hello+world&state=foo+bar");
        assert_eq!(result.code(), Some("hello world"));
        assert_eq!(result.state(), Some("foo bar"));
    }

    #[test]
    fn parse_error_param() {
        let result = AuthorizationResult::parse("https://app/cb?error=access_denied&state=xyz");
        assert_eq!(result.error(), Some("access_denied"));
        assert_eq!(result.code(), None);
    }

    #[test]
    fn parse_without_query() {
        let result = AuthorizationResult::parse("https://app/cb");
        assert_eq!(result, AuthorizationResult::default());
    }

    #[test]
    fn message_shape() {
        let url = "https://app/cb?code=c&state=s";
        let message = AuthorizationResult::parse(url).to_message(url);
        assert_eq!(message, json!({"code": "c", "state": "s", "url": url}));
    }

    #[test]
    fn popup_posts_to_opener_with_own_origin() {
        let post = RedirectPost::for_page("https://app.example.com:8443/cb?code=c&state=s", Embedding::Popup);
        assert_eq!(post.target, PostTarget::Opener);
        assert_eq!(post.target_origin.as_deref(), Some("https://app.example.com:8443"));
        assert!(post.close_window);
        assert_eq!(post.message["code"], "c");
    }

    #[test]
    fn frame_posts_to_parent_unrestricted() {
        let post = RedirectPost::for_page("https://app.example.com/cb?code=c&state=s", Embedding::Frame);
        assert_eq!(post.target, PostTarget::Parent);
        assert_eq!(post.target_origin, None);
        assert!(!post.close_window);
    }

    #[test]
    fn origin_of_opaque_url() {
        assert_eq!(origin_of("data:text/plain,hi"), None);
        assert_eq!(origin_of("not a url"), None);
        assert_eq!(
            origin_of("https://app.example.com/a/b").as_deref(),
            Some("https://app.example.com")
        );
    }
}
