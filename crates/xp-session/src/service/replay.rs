//! # File Replay Service
//!
//! Serves `File` sessions from disk. The owner URI names a JSON array of
//! wire events (optionally as a `file://` URI). Starting a session spawns a
//! task that pushes the events through the notification hub in batches and
//! finishes with a session-stopped notification, the same sequence a live
//! server produces.
//!
//! Handlers run on the replay task, which may deliver events and the stop
//! before `start_profiling` has replied.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use xp_core::ProfilerEvent;

use super::{
    lock, EventsAvailableParams, NotificationHub, PauseProfilingResponse, ProfilerService,
    ProfilingSessionType, SessionCreatedParams, SessionStoppedParams, StartProfilingResponse,
};
use crate::error::{ProfilerError, Result};
use crate::template::SessionTemplate;

const PAUSE_POLL: Duration = Duration::from_millis(25);

struct Replay {
    id: String,
    paused: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

type Replays = Arc<Mutex<HashMap<String, Replay>>>;

pub struct FileReplayService {
    hub: NotificationHub,
    batch_size: usize,
    replays: Replays,
}

impl FileReplayService {
    pub fn new(batch_size: usize) -> Self {
        Self {
            hub: NotificationHub::new(),
            batch_size: batch_size.max(1),
            replays: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn path_for(owner_uri: &str) -> PathBuf {
        PathBuf::from(owner_uri.strip_prefix("file://").unwrap_or(owner_uri))
    }

    async fn load(owner_uri: &str) -> Result<Vec<ProfilerEvent>> {
        let content = tokio::fs::read_to_string(Self::path_for(owner_uri)).await?;
        Ok(serde_json::from_str(&content)?)
    }

    fn abort(&self, owner_uri: &str) -> bool {
        match lock(&self.replays).remove(owner_uri) {
            Some(replay) => {
                replay.task.abort();
                tracing::debug!("Aborted replay {} for {}", replay.id, owner_uri);
                true
            }
            None => false,
        }
    }
}

impl Drop for FileReplayService {
    fn drop(&mut self) {
        for (_, replay) in lock(&self.replays).drain() {
            replay.task.abort();
        }
    }
}

async fn run_replay(
    hub: NotificationHub,
    replays: Replays,
    owner_uri: String,
    replay_id: String,
    events: Vec<ProfilerEvent>,
    batch_size: usize,
    paused: Arc<AtomicBool>,
) {
    let total = events.len();
    let mut events = events.into_iter().peekable();
    while events.peek().is_some() {
        while paused.load(Ordering::Acquire) {
            tokio::time::sleep(PAUSE_POLL).await;
        }
        let batch: Vec<ProfilerEvent> = events.by_ref().take(batch_size).collect();
        hub.emit_events_available(EventsAvailableParams {
            owner_uri: owner_uri.clone(),
            events: batch,
        });
        tokio::task::yield_now().await;
    }

    {
        let mut active = lock(&replays);
        if active.get(&owner_uri).is_some_and(|r| r.id == replay_id) {
            active.remove(&owner_uri);
        }
    }
    tracing::info!("Replay of {} finished ({} events)", owner_uri, total);
    hub.emit_session_stopped(SessionStoppedParams {
        owner_uri,
        error_message: None,
    });
}

#[async_trait::async_trait]
impl ProfilerService for FileReplayService {
    async fn create_session(
        &self,
        owner_uri: &str,
        session_name: &str,
        template: &SessionTemplate,
    ) -> Result<()> {
        self.hub.emit_session_created(SessionCreatedParams {
            owner_uri: owner_uri.to_string(),
            session_name: session_name.to_string(),
            template_name: template.name.clone(),
        });
        Ok(())
    }

    async fn start_profiling(
        &self,
        owner_uri: &str,
        _session_name: &str,
        session_type: ProfilingSessionType,
    ) -> Result<StartProfilingResponse> {
        if session_type != ProfilingSessionType::LocalFile {
            return Err(ProfilerError::rpc(
                "start_profiling",
                "file replay only serves local file sessions",
            ));
        }

        let events = Self::load(owner_uri).await?;
        tracing::info!("Replaying {} events from {}", events.len(), owner_uri);

        self.abort(owner_uri);
        let replay_id = uuid::Uuid::new_v4().to_string();
        let paused = Arc::new(AtomicBool::new(false));

        // Register before spawning so a short replay can deregister itself.
        let mut active = lock(&self.replays);
        let task = tokio::spawn(run_replay(
            self.hub.clone(),
            self.replays.clone(),
            owner_uri.to_string(),
            replay_id.clone(),
            events,
            self.batch_size,
            paused.clone(),
        ));
        active.insert(
            owner_uri.to_string(),
            Replay {
                id: replay_id.clone(),
                paused,
                task,
            },
        );

        Ok(StartProfilingResponse {
            unique_session_id: replay_id,
            can_pause: true,
        })
    }

    async fn stop_profiling(&self, owner_uri: &str) -> Result<()> {
        self.abort(owner_uri);
        Ok(())
    }

    async fn pause_profiling(&self, owner_uri: &str) -> Result<PauseProfilingResponse> {
        let active = lock(&self.replays);
        let replay = active.get(owner_uri).ok_or_else(|| {
            ProfilerError::rpc("pause_profiling", format!("no replay running for {owner_uri}"))
        })?;
        let is_paused = !replay.paused.load(Ordering::Acquire);
        replay.paused.store(is_paused, Ordering::Release);
        Ok(PauseProfilingResponse { is_paused })
    }

    async fn disconnect_session(&self, owner_uri: &str) -> Result<()> {
        self.abort(owner_uri);
        Ok(())
    }

    async fn list_sessions(&self, _owner_uri: &str) -> Result<Vec<String>> {
        let mut owners: Vec<String> = lock(&self.replays).keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }

    fn notifications(&self) -> &NotificationHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::Notify;

    fn write_events(count: usize) -> tempfile::NamedTempFile {
        let events: Vec<ProfilerEvent> = (0..count)
            .map(|n| ProfilerEvent {
                name: "sql_batch_completed".into(),
                timestamp: "2024-05-01T10:00:00Z".into(),
                values: [("event_sequence".to_string(), (n + 1).to_string())].into(),
                ..Default::default()
            })
            .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&events).unwrap()).unwrap();
        file
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_replays_in_batches_then_stops() {
        let file = write_events(7);
        let owner = file.path().to_string_lossy().to_string();
        let service = FileReplayService::new(3);

        let batches = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Notify::new());

        let sink = batches.clone();
        let _events = service
            .notifications()
            .events_available
            .subscribe(&owner, move |p| lock(&sink).push(p.events.len()));
        let finished = done.clone();
        let _stopped = service
            .notifications()
            .session_stopped
            .subscribe(&owner, move |p| {
                assert!(p.error_message.is_none());
                finished.notify_one();
            });

        let response = service
            .start_profiling(&owner, "replay", ProfilingSessionType::LocalFile)
            .await
            .unwrap();
        assert!(response.can_pause);

        done.notified().await;
        assert_eq!(*lock(&batches), vec![3, 3, 1]);
        assert!(service.list_sessions(&owner).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_rejects_remote_sessions_and_missing_files() {
        let service = FileReplayService::new(10);
        let err = service
            .start_profiling("u1", "s", ProfilingSessionType::RemoteSession)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Rpc { .. }));

        let err = service
            .start_profiling("/nonexistent/trace.json", "s", ProfilingSessionType::LocalFile)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Io(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pause_toggles_and_stop_aborts() {
        let file = write_events(5);
        let owner = format!("file://{}", file.path().to_string_lossy());
        let service = FileReplayService::new(1);

        service
            .start_profiling(&owner, "replay", ProfilingSessionType::LocalFile)
            .await
            .unwrap();
        // The task has not run yet on a current-thread runtime.
        assert!(service.pause_profiling(&owner).await.unwrap().is_paused);
        assert!(!service.pause_profiling(&owner).await.unwrap().is_paused);
        assert_eq!(service.list_sessions(&owner).await.unwrap(), vec![owner.clone()]);

        service.stop_profiling(&owner).await.unwrap();
        assert!(service.list_sessions(&owner).await.unwrap().is_empty());
        assert!(service.pause_profiling(&owner).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_session_emits_created() {
        let service = FileReplayService::new(10);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let _r = service
            .notifications()
            .session_created
            .subscribe("u1", move |p| *lock(&sink) = Some(p.session_name.clone()));

        let template = SessionTemplate::find("Standard_OnPrem").unwrap();
        service.create_session("u1", "XP", &template).await.unwrap();
        assert_eq!(lock(&seen).as_deref(), Some("XP"));
    }
}
