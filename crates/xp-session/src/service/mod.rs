//! # Tools-Service Contract
//!
//! The profiler talks to an out-of-process tools service through typed
//! requests and owner-URI-scoped notifications. [`ProfilerService`] is that
//! contract; transports implement it. [`NotificationHub`] is the
//! notification half: any number of handlers per owner URI, each removable
//! through the [`Registration`] returned when it was added.

pub mod logged;
pub mod replay;

#[cfg(test)]
pub(crate) mod mock;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use xp_core::ProfilerEvent;

use crate::error::Result;
use crate::template::SessionTemplate;

pub use logged::LoggedService;
pub use replay::FileReplayService;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsAvailableParams {
    pub owner_uri: String,
    pub events: Vec<ProfilerEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStoppedParams {
    pub owner_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedParams {
    pub owner_uri: String,
    pub session_name: String,
    pub template_name: String,
}

/// Where the server reads events from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ProfilingSessionType {
    RemoteSession,
    LocalFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartProfilingResponse {
    pub unique_session_id: String,
    pub can_pause: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PauseProfilingResponse {
    pub is_paused: bool,
}

// =============================================================================
// Core Trait
// =============================================================================

/// Requests understood by the tools service.
///
/// Every request may fail; failures propagate to the caller.
#[async_trait::async_trait]
pub trait ProfilerService: Send + Sync {
    async fn create_session(
        &self,
        owner_uri: &str,
        session_name: &str,
        template: &SessionTemplate,
    ) -> Result<()>;

    async fn start_profiling(
        &self,
        owner_uri: &str,
        session_name: &str,
        session_type: ProfilingSessionType,
    ) -> Result<StartProfilingResponse>;

    async fn stop_profiling(&self, owner_uri: &str) -> Result<()>;

    /// Toggles the pause state server-side and reports the resulting state.
    async fn pause_profiling(&self, owner_uri: &str) -> Result<PauseProfilingResponse>;

    async fn disconnect_session(&self, owner_uri: &str) -> Result<()>;

    /// Names of the XEvent sessions available on the server.
    async fn list_sessions(&self, owner_uri: &str) -> Result<Vec<String>>;

    /// Notification fan-out for this service.
    fn notifications(&self) -> &NotificationHub;
}

// =============================================================================
// Notification Hub
// =============================================================================

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct HandlerList<P> {
    next_id: u64,
    by_owner: HashMap<String, Vec<(u64, Handler<P>)>>,
}

/// Handlers of one notification kind, keyed by owner URI.
pub struct Channel<P> {
    handlers: Arc<Mutex<HandlerList<P>>>,
}

impl<P> Clone for Channel<P> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<P> Default for Channel<P> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HandlerList {
                next_id: 0,
                by_owner: HashMap::new(),
            })),
        }
    }
}

impl<P: 'static> Channel<P> {
    pub fn subscribe(
        &self,
        owner_uri: &str,
        handler: impl Fn(&P) + Send + Sync + 'static,
    ) -> Registration {
        let id = {
            let mut list = lock(&self.handlers);
            list.next_id += 1;
            let id = list.next_id;
            list.by_owner
                .entry(owner_uri.to_string())
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<HandlerList<P>>> = Arc::downgrade(&self.handlers);
        let owner_uri = owner_uri.to_string();
        Registration::new(move || {
            let Some(handlers) = weak.upgrade() else {
                return;
            };
            let mut list = lock(&handlers);
            if let Some(entries) = list.by_owner.get_mut(&owner_uri) {
                entries.retain(|(entry_id, _)| *entry_id != id);
                if entries.is_empty() {
                    list.by_owner.remove(&owner_uri);
                }
            }
        })
    }

    /// Deliver `params` to every handler registered for `owner_uri`.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, owner_uri: &str, params: &P) -> usize {
        // Handlers run unlocked so they may register or dispose.
        let handlers: Vec<Handler<P>> = {
            let list = lock(&self.handlers);
            list.by_owner
                .get(owner_uri)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(params);
        }
        handlers.len()
    }

    pub fn handler_count(&self, owner_uri: &str) -> usize {
        lock(&self.handlers)
            .by_owner
            .get(owner_uri)
            .map_or(0, Vec::len)
    }
}

/// Fan-out for the three profiler notifications.
#[derive(Clone, Default)]
pub struct NotificationHub {
    pub events_available: Channel<EventsAvailableParams>,
    pub session_stopped: Channel<SessionStoppedParams>,
    pub session_created: Channel<SessionCreatedParams>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_events_available(&self, params: EventsAvailableParams) -> usize {
        let delivered = self.events_available.emit(&params.owner_uri, &params);
        if delivered == 0 {
            tracing::debug!(
                "Dropped {} events for unbound owner URI {}",
                params.events.len(),
                params.owner_uri
            );
        }
        delivered
    }

    pub fn emit_session_stopped(&self, params: SessionStoppedParams) -> usize {
        self.session_stopped.emit(&params.owner_uri, &params)
    }

    pub fn emit_session_created(&self, params: SessionCreatedParams) -> usize {
        self.session_created.emit(&params.owner_uri, &params)
    }
}

/// Removes a handler when disposed or dropped.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn dispose(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stopped(owner_uri: &str) -> SessionStoppedParams {
        SessionStoppedParams {
            owner_uri: owner_uri.into(),
            error_message: None,
        }
    }

    #[test]
    fn test_fans_out_to_every_handler_for_owner() {
        let hub = NotificationHub::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        let _r1 = hub.session_stopped.subscribe("u1", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = hits.clone();
        let _r2 = hub.session_stopped.subscribe("u1", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });
        let h3 = hits.clone();
        let _r3 = hub.session_stopped.subscribe("u2", move |_| {
            h3.fetch_add(100, Ordering::SeqCst);
        });

        assert_eq!(hub.emit_session_stopped(stopped("u1")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_dispose_and_drop_unregister() {
        let hub = NotificationHub::new();
        let r1 = hub.session_stopped.subscribe("u1", |_| {});
        let r2 = hub.session_stopped.subscribe("u1", |_| {});
        assert_eq!(hub.session_stopped.handler_count("u1"), 2);

        r1.dispose();
        assert_eq!(hub.session_stopped.handler_count("u1"), 1);
        drop(r2);
        assert_eq!(hub.session_stopped.handler_count("u1"), 0);
        assert_eq!(hub.emit_session_stopped(stopped("u1")), 0);
    }

    #[test]
    fn test_registration_outliving_hub_is_harmless() {
        let hub = NotificationHub::new();
        let registration = hub.session_stopped.subscribe("u1", |_| {});
        drop(hub);
        registration.dispose();
    }

    #[test]
    fn test_handler_may_unsubscribe_during_emit() {
        let hub = NotificationHub::new();
        let slot: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));
        let inner_slot = slot.clone();
        let registration = hub.session_stopped.subscribe("u1", move |_| {
            lock(&inner_slot).take();
        });
        *lock(&slot) = Some(registration);

        assert_eq!(hub.emit_session_stopped(stopped("u1")), 1);
        assert_eq!(hub.session_stopped.handler_count("u1"), 0);
    }
}
