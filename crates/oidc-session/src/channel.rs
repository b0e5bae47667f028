//! Cross-context boundary: popups, hidden frames, and posted messages.
//!
//! The host environment implements [`RedirectChannel`]. In a browser that
//! means `window.open`, an invisible iframe, and `message` events; in tests it
//! is [`MemoryChannel`](crate::memory::MemoryChannel).
//!
//! Messages are fanned out over a `tokio::sync::broadcast` channel so that
//! every session on a page sees every message and discards the ones that do
//! not carry its own correlation token.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::PopupSize;
use crate::error::Result;

/// A message posted by a redirect target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Origin of the posting window, e.g. `https://app.example.com`.
    pub origin: String,
    /// The posted payload.
    pub data: Value,
}

impl ChannelMessage {
    /// Create a message.
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Handle to an open popup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PopupHandle(pub Uuid);

/// Handle to a hidden frame attached to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub Uuid);

impl PopupHandle {
    /// Allocate a fresh handle.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PopupHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHandle {
    /// Allocate a fresh handle.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FrameHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Window and message primitives of the hosting page.
pub trait RedirectChannel: Send + Sync {
    /// Open a visible popup at `url`.
    ///
    /// A popup blocked by the browser need not be reported; the flow then
    /// simply never receives a message.
    ///
    /// # Errors
    ///
    /// Implementation-specific failures to create the window.
    fn open_popup(&self, url: &str, size: PopupSize) -> Result<PopupHandle>;

    /// Attach an invisible frame pointed at `url`.
    ///
    /// # Errors
    ///
    /// Implementation-specific failures to create the frame.
    fn open_hidden(&self, url: &str) -> Result<FrameHandle>;

    /// Detach a hidden frame. Unknown handles are ignored.
    fn remove_frame(&self, frame: FrameHandle);

    /// Close a popup. Unknown handles are ignored.
    fn close_popup(&self, popup: PopupHandle);

    /// Whether the popup has been closed (by the user or by itself).
    fn is_popup_closed(&self, popup: PopupHandle) -> bool;

    /// Subscribe to messages posted to this page.
    fn subscribe(&self) -> broadcast::Receiver<ChannelMessage>;
}
