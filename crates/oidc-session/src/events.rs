//! Callback registry for session events.
//!
//! Handlers are cloned out of the registry before being invoked, so a handler
//! may register further handlers or call back into the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SessionError;
use crate::identity::Identity;
use crate::session::Session;

/// Called after every successful authentication, including refreshes.
pub type AuthenticatedHandler = Arc<dyn Fn(&Identity, &Session) + Send + Sync>;

/// Called when the session returns to the unauthenticated state.
pub type LogoutHandler = Arc<dyn Fn() + Send + Sync>;

/// Called for failures that need the host's attention.
pub type ErrorHandler = Arc<dyn Fn(&SessionError) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct EventHandlers {
    authenticated: Mutex<Vec<AuthenticatedHandler>>,
    logout: Mutex<Vec<LogoutHandler>>,
    error: Mutex<Vec<ErrorHandler>>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("authenticated", &lock(&self.authenticated).len())
            .field("logout", &lock(&self.logout).len())
            .field("error", &lock(&self.error).len())
            .finish()
    }
}

impl EventHandlers {
    pub(crate) fn on_authenticated(&self, handler: AuthenticatedHandler) {
        lock(&self.authenticated).push(handler);
    }

    pub(crate) fn on_logout(&self, handler: LogoutHandler) {
        lock(&self.logout).push(handler);
    }

    pub(crate) fn on_error(&self, handler: ErrorHandler) {
        lock(&self.error).push(handler);
    }

    pub(crate) fn emit_authenticated(&self, identity: &Identity, session: &Session) {
        let handlers = lock(&self.authenticated).clone();
        for handler in handlers {
            handler(identity, session);
        }
    }

    pub(crate) fn emit_logout(&self) {
        let handlers = lock(&self.logout).clone();
        for handler in handlers {
            handler();
        }
    }

    pub(crate) fn emit_error(&self, error: &SessionError) {
        let handlers = lock(&self.error).clone();
        for handler in handlers {
            handler(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_handler_runs() {
        let events = EventHandlers::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let count = count.clone();
            events.on_logout(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        events.emit_logout();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_may_register_during_emit() {
        let events = Arc::new(EventHandlers::default());
        let inner = events.clone();
        events.on_error(Arc::new(move |_| {
            inner.on_error(Arc::new(|_| {}));
        }));

        events.emit_error(&SessionError::NotAuthenticated);
        assert_eq!(lock(&events.error).len(), 2);
    }
}
