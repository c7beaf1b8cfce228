//! Logging decorator for any [`ProfilerService`].
//!
//! Every failed request is logged at error level and returned unchanged.

use super::{
    NotificationHub, PauseProfilingResponse, ProfilerService, ProfilingSessionType,
    StartProfilingResponse,
};
use crate::error::Result;
use crate::template::SessionTemplate;

pub struct LoggedService<S> {
    inner: S,
}

impl<S: ProfilerService> LoggedService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<S: ProfilerService> ProfilerService for LoggedService<S> {
    async fn create_session(
        &self,
        owner_uri: &str,
        session_name: &str,
        template: &SessionTemplate,
    ) -> Result<()> {
        tracing::debug!("create_session {} ({}) on {}", session_name, template.name, owner_uri);
        self.inner
            .create_session(owner_uri, session_name, template)
            .await
            .inspect_err(|e| tracing::error!("Failed to create session for {}: {}", owner_uri, e))
    }

    async fn start_profiling(
        &self,
        owner_uri: &str,
        session_name: &str,
        session_type: ProfilingSessionType,
    ) -> Result<StartProfilingResponse> {
        tracing::debug!("start_profiling {} on {}", session_name, owner_uri);
        self.inner
            .start_profiling(owner_uri, session_name, session_type)
            .await
            .inspect_err(|e| tracing::error!("Failed to start profiling for {}: {}", owner_uri, e))
    }

    async fn stop_profiling(&self, owner_uri: &str) -> Result<()> {
        self.inner
            .stop_profiling(owner_uri)
            .await
            .inspect_err(|e| tracing::error!("Failed to stop profiling for {}: {}", owner_uri, e))
    }

    async fn pause_profiling(&self, owner_uri: &str) -> Result<PauseProfilingResponse> {
        self.inner
            .pause_profiling(owner_uri)
            .await
            .inspect_err(|e| tracing::error!("Failed to pause profiling for {}: {}", owner_uri, e))
    }

    async fn disconnect_session(&self, owner_uri: &str) -> Result<()> {
        self.inner
            .disconnect_session(owner_uri)
            .await
            .inspect_err(|e| tracing::error!("Failed to disconnect {}: {}", owner_uri, e))
    }

    async fn list_sessions(&self, owner_uri: &str) -> Result<Vec<String>> {
        self.inner
            .list_sessions(owner_uri)
            .await
            .inspect_err(|e| tracing::error!("Failed to list sessions for {}: {}", owner_uri, e))
    }

    fn notifications(&self) -> &NotificationHub {
        self.inner.notifications()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfilerError;
    use crate::service::mock::MockService;

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let mock = MockService::new();
        mock.fail_next("stop_profiling", "server gone");
        let logged = LoggedService::new(mock);

        let err = logged.stop_profiling("u1").await.unwrap_err();
        assert!(matches!(err, ProfilerError::Rpc { operation: "stop_profiling", .. }));
        assert_eq!(err.to_string(), "stop_profiling failed: server gone");

        logged.stop_profiling("u1").await.unwrap();
        assert_eq!(logged.inner().calls(), vec!["stop_profiling u1", "stop_profiling u1"]);
    }
}
