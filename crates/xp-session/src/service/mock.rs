//! Scriptable in-process service for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    lock, NotificationHub, PauseProfilingResponse, ProfilerService, ProfilingSessionType,
    StartProfilingResponse,
};
use crate::error::{ProfilerError, Result};
use crate::template::SessionTemplate;

#[derive(Default)]
pub(crate) struct MockService {
    hub: NotificationHub,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, String>>,
    paused: Mutex<HashMap<String, bool>>,
    server_sessions: Vec<String>,
    can_pause: bool,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            can_pause: true,
            server_sessions: vec!["XP_Session".into()],
            ..Self::default()
        }
    }

    /// The next call to `operation` fails with `message`.
    pub fn fail_next(&self, operation: &'static str, message: &str) {
        lock(&self.failures).insert(operation, message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    fn record(&self, operation: &'static str, owner_uri: &str) -> Result<()> {
        lock(&self.calls).push(format!("{operation} {owner_uri}"));
        match lock(&self.failures).remove(operation) {
            Some(message) => Err(ProfilerError::rpc(operation, message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ProfilerService for MockService {
    async fn create_session(
        &self,
        owner_uri: &str,
        _session_name: &str,
        _template: &SessionTemplate,
    ) -> Result<()> {
        self.record("create_session", owner_uri)
    }

    async fn start_profiling(
        &self,
        owner_uri: &str,
        session_name: &str,
        _session_type: ProfilingSessionType,
    ) -> Result<StartProfilingResponse> {
        self.record("start_profiling", owner_uri)?;
        lock(&self.paused).insert(owner_uri.to_string(), false);
        Ok(StartProfilingResponse {
            unique_session_id: format!("{session_name}-1"),
            can_pause: self.can_pause,
        })
    }

    async fn stop_profiling(&self, owner_uri: &str) -> Result<()> {
        self.record("stop_profiling", owner_uri)
    }

    async fn pause_profiling(&self, owner_uri: &str) -> Result<PauseProfilingResponse> {
        self.record("pause_profiling", owner_uri)?;
        let mut paused = lock(&self.paused);
        let state = paused.entry(owner_uri.to_string()).or_insert(false);
        *state = !*state;
        Ok(PauseProfilingResponse { is_paused: *state })
    }

    async fn disconnect_session(&self, owner_uri: &str) -> Result<()> {
        self.record("disconnect_session", owner_uri)
    }

    async fn list_sessions(&self, owner_uri: &str) -> Result<Vec<String>> {
        self.record("list_sessions", owner_uri)?;
        Ok(self.server_sessions.clone())
    }

    fn notifications(&self) -> &NotificationHub {
        &self.hub
    }
}
