//! Receiving-side validation of redirect messages.
//!
//! Every session on a page sees every posted message. [`classify`] decides,
//! for one session, whether a message is a delegated identity (gateway
//! flows), an authorization code for this session, or noise to drop.
//! Dropping is silent: a mismatched `state` usually just means the message
//! belongs to another session.

use serde_json::Value;

use crate::channel::ChannelMessage;
use crate::correlation::Correlation;
use crate::identity::Identity;

/// What a session should do with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDisposition {
    /// Identity delivered directly by a trusted gateway; skip code exchange.
    Delegated(Identity),
    /// An authorization code addressed to this session.
    Code(String),
    /// Not for this session.
    Discard(DiscardReason),
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Delegated message from an origin outside the authorize URL.
    UntrustedOrigin,
    /// Delegated message without an identity indicator.
    MissingIdentity,
    /// No `code` field.
    MissingCode,
    /// `state` absent or not ours.
    StateMismatch,
    /// The session has been removed.
    Inactive,
}

/// Classify `message` for a session.
///
/// With `delegated` set (gateway method), only messages whose origin is
/// contained in `authorize_url` and whose payload carries an `email` are
/// accepted. Otherwise the payload must carry a `code` and a `state` equal
/// to the session's correlation token.
pub fn classify(
    message: &ChannelMessage,
    correlation: &Correlation,
    delegated: bool,
    authorize_url: Option<&str>,
) -> MessageDisposition {
    if delegated {
        return classify_delegated(message, authorize_url);
    }

    let Some(code) = message.data.get("code").and_then(Value::as_str) else {
        return MessageDisposition::Discard(DiscardReason::MissingCode);
    };
    match message.data.get("state").and_then(Value::as_str) {
        Some(state) if correlation.matches(state) => MessageDisposition::Code(code.to_string()),
        _ => MessageDisposition::Discard(DiscardReason::StateMismatch),
    }
}

fn classify_delegated(message: &ChannelMessage, authorize_url: Option<&str>) -> MessageDisposition {
    let trusted = !message.origin.is_empty()
        && authorize_url.is_some_and(|url| url.contains(message.origin.as_str()));
    if !trusted {
        return MessageDisposition::Discard(DiscardReason::UntrustedOrigin);
    }

    let has_email = message.data.get("email").and_then(Value::as_str).is_some();
    match Identity::from_value(message.data.clone()) {
        Some(identity) if has_email => MessageDisposition::Delegated(identity),
        _ => MessageDisposition::Discard(DiscardReason::MissingIdentity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn correlation() -> Correlation {
        Correlation::derive("main", DateTime::from_timestamp(0, 0).unwrap())
    }

    #[test]
    fn matching_state_yields_code() {
        let c = correlation();
        let message = ChannelMessage::new(
            "https://app.example.com",
            json!({"code": "abc", "state": c.state(), "url": "https://app/cb?code=abc"}),
        );
        assert_eq!(
            classify(&message, &c, false, None),
            MessageDisposition::Code("abc".to_string())
        );
    }

    #[test]
    fn mismatched_or_absent_state_is_discarded() {
        let c = correlation();
        let forged = ChannelMessage::new("https://app", json!({"code": "abc", "state": "other"}));
        let stateless = ChannelMessage::new("https://app", json!({"code": "abc"}));

        assert_eq!(
            classify(&forged, &c, false, None),
            MessageDisposition::Discard(DiscardReason::StateMismatch)
        );
        assert_eq!(
            classify(&stateless, &c, false, None),
            MessageDisposition::Discard(DiscardReason::StateMismatch)
        );
    }

    #[test]
    fn missing_code_is_discarded() {
        let c = correlation();
        let message = ChannelMessage::new("https://app", json!({"state": c.state()}));
        assert_eq!(
            classify(&message, &c, false, None),
            MessageDisposition::Discard(DiscardReason::MissingCode)
        );
    }

    #[test]
    fn delegated_from_gateway_origin() {
        let message = ChannelMessage::new(
            "https://gw.example.com",
            json!({"email": "x@y.com", "name": "X"}),
        );
        let disposition = classify(
            &message,
            &correlation(),
            true,
            Some("https://gw.example.com/login/redirect.html"),
        );

        match disposition {
            MessageDisposition::Delegated(identity) => assert_eq!(identity.email(), Some("x@y.com")),
            other => panic!("expected delegated identity, got {other:?}"),
        }
    }

    #[test]
    fn delegated_from_foreign_origin_is_discarded() {
        let message = ChannelMessage::new("https://evil.example.com", json!({"email": "x@y.com"}));
        assert_eq!(
            classify(&message, &correlation(), true, Some("https://gw.example.com/login")),
            MessageDisposition::Discard(DiscardReason::UntrustedOrigin)
        );
    }

    #[test]
    fn delegated_without_email_is_discarded() {
        let message = ChannelMessage::new("https://gw.example.com", json!({"name": "X"}));
        assert_eq!(
            classify(&message, &correlation(), true, Some("https://gw.example.com/login")),
            MessageDisposition::Discard(DiscardReason::MissingIdentity)
        );
    }

    #[test]
    fn delegated_ignores_code_messages() {
        let c = correlation();
        let message = ChannelMessage::new(
            "https://gw.example.com",
            json!({"code": "abc", "state": c.state()}),
        );
        assert_eq!(
            classify(&message, &c, true, Some("https://gw.example.com/login")),
            MessageDisposition::Discard(DiscardReason::MissingIdentity)
        );
    }
}
