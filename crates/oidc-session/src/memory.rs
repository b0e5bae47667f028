//! In-memory implementations of the transport and channel boundaries.
//!
//! Useful for headless hosts and for exercising the session state machine
//! without a browser or network. Replies are scripted per URL (query string
//! ignored) and every request is recorded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, broadcast};

use crate::channel::{ChannelMessage, FrameHandle, PopupHandle, RedirectChannel};
use crate::config::PopupSize;
use crate::error::{Result, SessionError};
use crate::http::{HttpRequest, HttpTransport, status_error};

/// Capacity of the in-memory message broadcast.
const MESSAGE_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful response with a JSON body.
    Json(Value),
    /// Non-success status with a raw body.
    Status(u16, String),
}

#[derive(Debug)]
struct Scripted {
    reply: MockReply,
    gate: Option<Arc<Notify>>,
}

/// [`HttpTransport`] that replays scripted replies.
///
/// When several replies are queued for one URL they are consumed in order;
/// the last one is sticky and answers every later request.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MemoryTransport {
    /// Create a transport with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `url`.
    pub fn respond(&self, url: impl Into<String>, reply: MockReply) {
        self.push(url.into(), Scripted { reply, gate: None });
    }

    /// Queue a reply for `url` that is held back until `gate` is notified.
    pub fn respond_after(&self, url: impl Into<String>, reply: MockReply, gate: Arc<Notify>) {
        self.push(
            url.into(),
            Scripted {
                reply,
                gate: Some(gate),
            },
        );
    }

    fn push(&self, url: String, scripted: Scripted) {
        lock(&self.replies).entry(url).or_default().push_back(scripted);
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Requests sent to `url` (query string ignored).
    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| strip_query(&r.url) == url)
            .cloned()
            .collect()
    }

    fn next_reply(&self, url: &str) -> Option<(MockReply, Option<Arc<Notify>>)> {
        let mut replies = lock(&self.replies);
        let queue = replies.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front().map(|s| (s.reply, s.gate))
        } else {
            queue.front().map(|s| (s.reply.clone(), s.gate.clone()))
        }
    }
}

#[async_trait]
impl HttpTransport for MemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value> {
        let url = strip_query(&request.url).to_string();
        lock(&self.requests).push(request);

        let Some((reply, gate)) = self.next_reply(&url) else {
            return Err(SessionError::HttpStatus {
                status: 404,
                body: format!("no reply scripted for {url}"),
            });
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        match reply {
            MockReply::Json(value) => Ok(value),
            MockReply::Status(status, body) => Err(status_error(status, body)),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A popup opened through a [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedPopup {
    /// Handle returned to the session.
    pub handle: PopupHandle,
    /// Requested URL.
    pub url: String,
    /// Requested size.
    pub size: PopupSize,
}

/// A hidden frame attached through a [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedFrame {
    /// Handle returned to the session.
    pub handle: FrameHandle,
    /// Frame URL.
    pub url: String,
}

#[derive(Debug, Default)]
struct ChannelState {
    popups: Vec<OpenedPopup>,
    frames: Vec<OpenedFrame>,
    removed_frames: HashSet<FrameHandle>,
    closed_popups: HashSet<PopupHandle>,
}

/// [`RedirectChannel`] that records windows and relays injected messages.
#[derive(Debug)]
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
    sender: broadcast::Sender<ChannelMessage>,
    auto_close_popups: bool,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Create a channel whose popups stay open until closed explicitly.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(MESSAGE_CAPACITY);
        Self {
            state: Mutex::new(ChannelState::default()),
            sender,
            auto_close_popups: false,
        }
    }

    /// Report every popup as closed as soon as it is polled.
    pub fn with_auto_close_popups(mut self) -> Self {
        self.auto_close_popups = true;
        self
    }

    /// Post a message to every subscriber. Returns the subscriber count.
    pub fn post(&self, message: ChannelMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// Simulate the user closing a popup.
    pub fn close(&self, popup: PopupHandle) {
        lock(&self.state).closed_popups.insert(popup);
    }

    /// Popups opened so far.
    pub fn popups(&self) -> Vec<OpenedPopup> {
        lock(&self.state).popups.clone()
    }

    /// Frames attached so far, including removed ones.
    pub fn frames(&self) -> Vec<OpenedFrame> {
        lock(&self.state).frames.clone()
    }

    /// Frames still attached.
    pub fn attached_frames(&self) -> Vec<OpenedFrame> {
        let state = lock(&self.state);
        state
            .frames
            .iter()
            .filter(|f| !state.removed_frames.contains(&f.handle))
            .cloned()
            .collect()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl RedirectChannel for MemoryChannel {
    fn open_popup(&self, url: &str, size: PopupSize) -> Result<PopupHandle> {
        let handle = PopupHandle::new();
        lock(&self.state).popups.push(OpenedPopup {
            handle,
            url: url.to_string(),
            size,
        });
        Ok(handle)
    }

    fn open_hidden(&self, url: &str) -> Result<FrameHandle> {
        let handle = FrameHandle::new();
        lock(&self.state).frames.push(OpenedFrame {
            handle,
            url: url.to_string(),
        });
        Ok(handle)
    }

    fn remove_frame(&self, frame: FrameHandle) {
        lock(&self.state).removed_frames.insert(frame);
    }

    fn close_popup(&self, popup: PopupHandle) {
        lock(&self.state).closed_popups.insert(popup);
    }

    fn is_popup_closed(&self, popup: PopupHandle) -> bool {
        self.auto_close_popups || lock(&self.state).closed_popups.contains(&popup)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.sender.subscribe()
    }
}
