//! # Session Manager
//!
//! Owns every [`ProfilerSession`] and indexes each one twice: by session id
//! and by owner URI. Both indexes are updated together, so a session is
//! either present in both or in neither.

use std::collections::HashMap;
use std::sync::Arc;

use xp_buffer::AddResult;
use xp_core::{EventRow, ProfilerEvent};

use crate::error::{ProfilerError, Result};
use crate::service::ProfilerService;
use crate::session::{ProfilerSession, SessionOptions, SessionState};

pub struct ProfilerSessionManager {
    service: Arc<dyn ProfilerService>,
    sessions: HashMap<String, Arc<ProfilerSession>>,
    by_owner_uri: HashMap<String, Arc<ProfilerSession>>,
}

impl ProfilerSessionManager {
    pub fn new(service: Arc<dyn ProfilerService>) -> Self {
        Self {
            service,
            sessions: HashMap::new(),
            by_owner_uri: HashMap::new(),
        }
    }

    pub fn service(&self) -> &Arc<dyn ProfilerService> {
        &self.service
    }

    /// Create and index a session. Ids and owner URIs must both be unused.
    pub fn create_session(&mut self, options: SessionOptions) -> Result<Arc<ProfilerSession>> {
        if self.sessions.contains_key(&options.id) {
            return Err(ProfilerError::SessionExists(options.id));
        }
        if self.by_owner_uri.contains_key(&options.owner_uri) {
            return Err(ProfilerError::OwnerUriInUse(options.owner_uri));
        }

        let session = Arc::new(ProfilerSession::new(options, self.service.clone()));
        self.sessions
            .insert(session.id().to_string(), session.clone());
        self.by_owner_uri
            .insert(session.owner_uri().to_string(), session.clone());

        tracing::info!(
            "Registered session {} ({}) for {}",
            session.id(),
            session.session_name(),
            session.owner_uri()
        );
        Ok(session)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get_session(&self, id: &str) -> Option<Arc<ProfilerSession>> {
        self.sessions.get(id).cloned()
    }

    pub fn get_session_by_owner_uri(&self, owner_uri: &str) -> Option<Arc<ProfilerSession>> {
        self.by_owner_uri.get(owner_uri).cloned()
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn has_session_for_owner_uri(&self, owner_uri: &str) -> bool {
        self.by_owner_uri.contains_key(owner_uri)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Every session, oldest first.
    pub fn get_all_sessions(&self) -> Vec<Arc<ProfilerSession>> {
        let mut sessions: Vec<_> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        sessions
    }

    pub fn get_running_sessions(&self) -> Vec<Arc<ProfilerSession>> {
        self.get_all_sessions()
            .into_iter()
            .filter(|s| s.state() == SessionState::Running)
            .collect()
    }

    fn require(&self, id: &str) -> Result<&Arc<ProfilerSession>> {
        self.sessions
            .get(id)
            .ok_or_else(|| ProfilerError::SessionNotFound(id.to_string()))
    }

    fn require_owner(&self, owner_uri: &str) -> Result<&Arc<ProfilerSession>> {
        self.by_owner_uri
            .get(owner_uri)
            .ok_or_else(|| ProfilerError::OwnerUriNotFound(owner_uri.to_string()))
    }

    // =========================================================================
    // Local Transitions
    // =========================================================================

    pub fn start_session(&self, id: &str) -> Result<()> {
        self.require(id)?.start();
        Ok(())
    }

    pub fn pause_session(&self, id: &str) -> Result<()> {
        self.require(id)?.pause();
        Ok(())
    }

    pub fn stop_session(&self, id: &str) -> Result<()> {
        self.require(id)?.stop();
        Ok(())
    }

    pub fn get_session_state(&self, id: &str) -> Result<SessionState> {
        Ok(self.require(id)?.state())
    }

    pub fn get_session_state_by_owner_uri(&self, owner_uri: &str) -> Result<SessionState> {
        Ok(self.require_owner(owner_uri)?.state())
    }

    pub fn start_all(&self) {
        for session in self.sessions.values() {
            session.start();
        }
    }

    pub fn pause_all(&self) {
        for session in self.sessions.values() {
            session.pause();
        }
    }

    pub fn stop_all(&self) {
        for session in self.sessions.values() {
            session.stop();
        }
    }

    // =========================================================================
    // Service Round Trips
    // =========================================================================

    pub async fn start_profiling(&self, id: &str) -> Result<()> {
        let session = self.require(id)?.clone();
        session.start_profiling().await
    }

    pub async fn stop_profiling(&self, id: &str) -> Result<()> {
        let session = self.require(id)?.clone();
        session.stop_profiling().await
    }

    /// Returns the server's pause state.
    pub async fn toggle_pause(&self, id: &str) -> Result<bool> {
        let session = self.require(id)?.clone();
        session.toggle_pause().await
    }

    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let session = self.require(id)?.clone();
        session.disconnect().await
    }

    /// XEvent sessions the server offers on `owner_uri`.
    pub async fn list_server_sessions(&self, owner_uri: &str) -> Result<Vec<String>> {
        self.service.list_sessions(owner_uri).await
    }

    // =========================================================================
    // Event Routing
    // =========================================================================

    /// Route one event by owner URI. `None` for an unknown owner or a
    /// paused buffer.
    pub fn add_event(&self, owner_uri: &str, event: ProfilerEvent) -> Option<AddResult<EventRow>> {
        match self.by_owner_uri.get(owner_uri) {
            Some(session) => session.add_event(event),
            None => {
                tracing::debug!("Dropping event for unknown owner URI {}", owner_uri);
                None
            }
        }
    }

    /// Route a batch by owner URI. Empty for an unknown owner.
    pub fn add_events(&self, owner_uri: &str, events: Vec<ProfilerEvent>) -> Vec<AddResult<EventRow>> {
        match self.by_owner_uri.get(owner_uri) {
            Some(session) => session.add_events(events),
            None => {
                tracing::debug!(
                    "Dropping {} events for unknown owner URI {}",
                    events.len(),
                    owner_uri
                );
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Dispose and unregister. `false` if no such session.
    pub async fn remove_session(&mut self, id: &str) -> bool {
        let Some(session) = self.sessions.get(id).cloned() else {
            return false;
        };
        session.dispose().await;
        self.sessions.remove(id);
        self.by_owner_uri.remove(session.owner_uri());
        tracing::info!("Removed session {}", id);
        true
    }

    pub async fn remove_session_by_owner_uri(&mut self, owner_uri: &str) -> bool {
        let Some(id) = self.by_owner_uri.get(owner_uri).map(|s| s.id().to_string()) else {
            return false;
        };
        self.remove_session(&id).await
    }

    /// Dispose every session concurrently and empty both indexes.
    pub async fn clear(&mut self) {
        self.by_owner_uri.clear();
        let sessions: Vec<Arc<ProfilerSession>> =
            self.sessions.drain().map(|(_, session)| session).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.dispose())).await;
        if count > 0 {
            tracing::info!("Disposed {} sessions", count);
        }
    }

    pub async fn dispose(&mut self) {
        self.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::mock::MockService;
    use crate::session::SessionType;
    use std::sync::Mutex;

    fn manager() -> (Arc<MockService>, ProfilerSessionManager) {
        let mock = Arc::new(MockService::new());
        let manager = ProfilerSessionManager::new(mock.clone());
        (mock, manager)
    }

    fn options(id: &str, owner_uri: &str) -> SessionOptions {
        SessionOptions::new(id, owner_uri, SessionType::Live)
    }

    fn event(n: u64) -> ProfilerEvent {
        ProfilerEvent {
            event_number: Some(n),
            name: "rpc_completed".into(),
            timestamp: "2024-05-01T10:00:00Z".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_routing_integrity() {
        let (_, mut manager) = manager();
        let created = manager.create_session(options("s1", "u1")).unwrap();

        let by_id = manager.get_session("s1").unwrap();
        let by_owner = manager.get_session_by_owner_uri("u1").unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_owner));
        assert!(Arc::ptr_eq(&created, &by_id));
        assert!(manager.has_session("s1") && manager.has_session_for_owner_uri("u1"));

        assert!(manager.remove_session("s1").await);
        assert!(manager.get_session("s1").is_none());
        assert!(manager.get_session_by_owner_uri("u1").is_none());
        assert!(!manager.remove_session("s1").await);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_duplicate_session_id_rejected() {
        let (_, mut manager) = manager();
        manager.create_session(options("dup", "u1")).unwrap();
        let err = manager.create_session(options("dup", "u2")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dup"));
        assert!(msg.contains("already exists"));

        assert!(matches!(
            manager.create_session(options("other", "u1")),
            Err(ProfilerError::OwnerUriInUse(_))
        ));
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_not_found_errors_embed_key() {
        let (_, manager) = manager();
        let err = manager.start_session("ghost").unwrap_err();
        assert!(err.to_string().contains("ghost"));
        let err = manager.get_session_state_by_owner_uri("file:///gone").unwrap_err();
        assert!(matches!(err, ProfilerError::OwnerUriNotFound(uri) if uri == "file:///gone"));
    }

    #[test]
    fn test_unknown_owner_is_a_routing_miss() {
        let (_, manager) = manager();
        assert!(manager.add_event("nobody", event(1)).is_none());
        assert!(manager.add_events("nobody", vec![event(1), event(2)]).is_empty());
    }

    #[test]
    fn test_pause_blocks_ingestion() {
        let (_, mut manager) = manager();
        let session = manager.create_session(options("s1", "u1")).unwrap();

        manager.pause_session("s1").unwrap();
        assert!(manager.add_event("u1", event(1)).is_none());
        assert_eq!(session.event_count(), 0);

        manager.start_session("s1").unwrap();
        assert!(manager.add_event("u1", event(1)).is_some());
        assert_eq!(session.event_count(), 1);
    }

    #[test]
    fn test_bulk_transitions_and_running_filter() {
        let (_, mut manager) = manager();
        manager.create_session(options("a", "u1")).unwrap();
        manager.create_session(options("b", "u2")).unwrap();

        manager.start_all();
        assert_eq!(manager.get_running_sessions().len(), 2);
        manager.pause_session("a").unwrap();
        let running: Vec<String> = manager
            .get_running_sessions()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(running, vec!["b"]);

        manager.pause_all();
        assert_eq!(manager.get_session_state("b").unwrap(), SessionState::Paused);
        manager.stop_all();
        assert!(manager.get_running_sessions().is_empty());
        assert_eq!(manager.get_all_sessions().len(), 2);
    }

    #[test]
    fn test_eviction_reported_through_manager() {
        let (_, mut manager) = manager();
        let session = manager
            .create_session(options("s1", "u1").with_capacity(5))
            .unwrap();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        session.on_events_removed(move |rows| {
            sink.lock()
                .unwrap()
                .extend(rows.iter().map(|r| r.event_number))
        });

        let accepted = manager.add_events("u1", (1..=10).map(event).collect());
        assert_eq!(accepted.len(), 10);
        let kept: Vec<u64> = session.rows().iter().map(|r| r.event_number).collect();
        assert_eq!(kept, vec![6, 7, 8, 9, 10]);
        assert_eq!(*removed.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_rpc_operations_by_id() {
        let (mock, mut manager) = manager();
        manager.create_session(options("s1", "u1")).unwrap();

        manager.start_profiling("s1").await.unwrap();
        assert!(manager.toggle_pause("s1").await.unwrap());
        assert_eq!(manager.get_session_state("s1").unwrap(), SessionState::Paused);
        manager.stop_profiling("s1").await.unwrap();
        manager.disconnect("s1").await.unwrap();
        assert!(matches!(
            manager.start_profiling("ghost").await,
            Err(ProfilerError::SessionNotFound(_))
        ));

        assert_eq!(
            manager.list_server_sessions("u1").await.unwrap(),
            vec!["XP_Session"]
        );
        assert_eq!(mock.count("start_profiling"), 1);
    }

    #[tokio::test]
    async fn test_clear_disposes_everything() {
        let (mock, mut manager) = manager();
        manager.create_session(options("a", "u1")).unwrap();
        manager.create_session(options("b", "u2")).unwrap();
        manager.start_profiling("a").await.unwrap();

        manager.dispose().await;
        assert_eq!(manager.session_count(), 0);
        assert!(!manager.has_session_for_owner_uri("u2"));
        assert_eq!(mock.count("stop_profiling"), 1);
        assert_eq!(mock.notifications().events_available.handler_count("u1"), 0);
        assert_eq!(mock.notifications().session_created.handler_count("u2"), 0);
    }

    #[tokio::test]
    async fn test_remove_by_owner_uri_stops_running_session() {
        let (mock, mut manager) = manager();
        manager.create_session(options("s1", "u1")).unwrap();
        manager.start_profiling("s1").await.unwrap();

        mock.fail_next("stop_profiling", "server unreachable");
        assert!(manager.remove_session_by_owner_uri("u1").await);
        assert!(!manager.has_session("s1"));
        assert!(!manager.remove_session_by_owner_uri("u1").await);
    }
}
