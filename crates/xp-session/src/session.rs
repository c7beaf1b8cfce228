//! # Profiler Session
//!
//! One capture session: an event ring, its filters and view, and the state
//! machine driven by local calls and tools-service round trips.
//!
//! ```text
//! NotStarted -> Creating -> Stopped <-> Running <-> Paused
//!                  |           |          |           |
//!                  +-----------+----> Failed <--------+
//! ```
//!
//! Notification handlers capture a weak reference to the session state, so
//! a handler that outlives its session does nothing. The state lock is
//! never held across an await or while a local callback runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use xp_buffer::{AddResult, FilteredBuffer, RingBuffer};
use xp_core::event::DEFAULT_SEQUENCE_FIELD;
use xp_core::filter::parse_clauses;
use xp_core::{EventRow, FilterClause, ProfilerEvent, ViewConfig};

use crate::config::{default_index_fields, ProfilerConfig, DEFAULT_BUFFER_CAPACITY};
use crate::error::{ProfilerError, Result};
use crate::service::{
    lock, EventsAvailableParams, ProfilerService, ProfilingSessionType, Registration,
    SessionCreatedParams, SessionStoppedParams,
};
use crate::template::SessionTemplate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Live,
    File,
}

impl From<SessionType> for ProfilingSessionType {
    fn from(session_type: SessionType) -> Self {
        match session_type {
            SessionType::Live => Self::RemoteSession,
            SessionType::File => Self::LocalFile,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    NotStarted,
    Creating,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Construction parameters for a [`ProfilerSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub id: String,
    pub owner_uri: String,
    pub session_name: String,
    pub session_type: SessionType,
    pub template_name: String,
    /// Defaults to true for file sessions.
    pub read_only: bool,
    pub view_config: Option<ViewConfig>,
    pub capacity: usize,
    pub index_fields: Vec<String>,
    pub sequence_field: String,
}

impl SessionOptions {
    pub fn new(
        id: impl Into<String>,
        owner_uri: impl Into<String>,
        session_type: SessionType,
    ) -> Self {
        let id = id.into();
        Self {
            session_name: id.clone(),
            id,
            owner_uri: owner_uri.into(),
            session_type,
            template_name: "Standard_OnPrem".into(),
            read_only: session_type == SessionType::File,
            view_config: None,
            capacity: DEFAULT_BUFFER_CAPACITY,
            index_fields: default_index_fields(),
            sequence_field: DEFAULT_SEQUENCE_FIELD.into(),
        }
    }

    /// Options seeded from the loaded configuration, including its default view.
    pub fn from_config(
        id: impl Into<String>,
        owner_uri: impl Into<String>,
        session_type: SessionType,
        config: &ProfilerConfig,
    ) -> Self {
        Self {
            template_name: config.default_template.clone(),
            view_config: config.view(&config.default_view),
            capacity: config.buffer_capacity,
            index_fields: config.index_fields.clone(),
            sequence_field: config.sequence_field.clone(),
            ..Self::new(id, owner_uri, session_type)
        }
    }

    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    pub fn with_template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = name.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_view(mut self, view: ViewConfig) -> Self {
        self.view_config = Some(view);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_index_fields(mut self, fields: Vec<String>) -> Self {
        self.index_fields = fields;
        self
    }

    pub fn with_sequence_field(mut self, field: impl Into<String>) -> Self {
        self.sequence_field = field.into();
        self
    }
}

type RowsCallback = Arc<dyn Fn(&[EventRow]) + Send + Sync>;
type StoppedCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

struct SessionInner {
    events: FilteredBuffer<EventRow>,
    state: SessionState,
    error_message: Option<String>,
    view_config: Option<ViewConfig>,
    last_event_timestamp: Option<DateTime<Utc>>,
    next_event_number: u64,
    unique_session_id: Option<String>,
    can_pause: bool,
    starting: Option<StartAttempt>,

    on_events_received: Option<RowsCallback>,
    on_events_removed: Option<RowsCallback>,
    on_session_stopped: Option<StoppedCallback>,

    created_registration: Option<Registration>,
    events_registration: Option<Registration>,
    stopped_registration: Option<Registration>,
}

/// A start round trip in flight. Events and a server stop can arrive before
/// the reply does.
#[derive(Debug, Clone, Copy)]
struct StartAttempt {
    was_paused: bool,
    stopped: bool,
}

impl SessionInner {
    fn begin_start(&mut self) {
        let was_paused = self.events.buffer().is_paused();
        self.starting = Some(StartAttempt {
            was_paused,
            stopped: false,
        });
        self.events.buffer_mut().set_paused(false);
    }

    /// Undo `begin_start` unless the server already reported a stop.
    fn abort_start(&mut self) {
        if let Some(attempt) = self.starting.take() {
            if !attempt.stopped {
                self.events.buffer_mut().set_paused(attempt.was_paused);
            }
        }
    }

    fn set_running(&mut self) {
        self.state = SessionState::Running;
        self.events.buffer_mut().set_paused(false);
    }

    fn set_paused(&mut self) {
        self.state = SessionState::Paused;
        self.events.buffer_mut().set_paused(true);
    }

    fn set_stopped(&mut self) {
        self.state = SessionState::Stopped;
        self.events.buffer_mut().set_paused(true);
    }

    fn set_failed(&mut self, message: Option<String>) {
        self.state = SessionState::Failed;
        self.error_message = message;
        self.events.buffer_mut().set_paused(true);
    }

    fn set_created(&mut self) {
        self.state = SessionState::Stopped;
        self.error_message = None;
    }

    /// Detach the events and stopped handlers; the caller drops them unlocked.
    fn take_stream_registrations(&mut self) -> [Option<Registration>; 2] {
        [
            self.events_registration.take(),
            self.stopped_registration.take(),
        ]
    }
}

/// Convert and store a batch, then report accepted and evicted rows.
fn ingest(
    inner: &Mutex<SessionInner>,
    sequence_field: &str,
    events: Vec<ProfilerEvent>,
) -> Vec<AddResult<EventRow>> {
    let (results, on_received, on_removed) = {
        let mut guard = lock(inner);
        let inner = &mut *guard;
        if inner.events.buffer().is_paused() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let row = EventRow::from_event(event, sequence_field, || {
                inner.next_event_number += 1;
                inner.next_event_number
            });
            if let Some(result) = inner.events.buffer_mut().add(row) {
                inner.last_event_timestamp = Some(result.added.timestamp);
                results.push(result);
            }
        }
        (
            results,
            inner.on_events_received.clone(),
            inner.on_events_removed.clone(),
        )
    };

    if results.is_empty() {
        return results;
    }
    if let Some(callback) = on_received {
        let added: Vec<EventRow> = results.iter().map(|r| r.added.clone()).collect();
        callback(added.as_slice());
    }
    if let Some(callback) = on_removed {
        let removed: Vec<EventRow> = results.iter().filter_map(|r| r.removed.clone()).collect();
        if !removed.is_empty() {
            callback(removed.as_slice());
        }
    }
    results
}

fn server_stopped(inner: &Mutex<SessionInner>, error_message: Option<String>) {
    let (callback, _registrations) = {
        let mut inner = lock(inner);
        if let Some(attempt) = inner.starting.as_mut() {
            attempt.stopped = true;
        }
        match error_message.clone() {
            Some(message) => inner.set_failed(Some(message)),
            None => inner.set_stopped(),
        }
        (
            inner.on_session_stopped.clone(),
            inner.take_stream_registrations(),
        )
    };
    if let Some(callback) = callback {
        callback(error_message.as_deref());
    }
}

/// Serializable view of a session for persistence and debugging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub owner_uri: String,
    pub session_name: String,
    pub session_type: SessionType,
    pub template_name: String,
    pub state: SessionState,
    pub event_count: usize,
    pub filters: Vec<FilterClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_filter: Option<String>,
    pub view_config: Option<ViewConfig>,
    pub created_at: DateTime<Utc>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub read_only: bool,
    pub unique_session_id: Option<String>,
    pub can_pause: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub struct ProfilerSession {
    id: String,
    owner_uri: String,
    session_name: String,
    session_type: SessionType,
    template_name: String,
    read_only: bool,
    sequence_field: String,
    created_at: DateTime<Utc>,
    service: Arc<dyn ProfilerService>,
    inner: Arc<Mutex<SessionInner>>,
}

impl ProfilerSession {
    pub fn new(options: SessionOptions, service: Arc<dyn ProfilerService>) -> Self {
        let capacity = if options.capacity == 0 {
            tracing::warn!(
                "Session {} requested zero capacity, using {}",
                options.id,
                DEFAULT_BUFFER_CAPACITY
            );
            DEFAULT_BUFFER_CAPACITY
        } else {
            options.capacity
        };

        let ring = RingBuffer::with_indexes(capacity, options.index_fields);
        let session = Self {
            id: options.id,
            owner_uri: options.owner_uri,
            session_name: options.session_name,
            session_type: options.session_type,
            template_name: options.template_name,
            read_only: options.read_only,
            sequence_field: options.sequence_field,
            created_at: Utc::now(),
            service,
            inner: Arc::new(Mutex::new(SessionInner {
                events: FilteredBuffer::new(ring),
                state: SessionState::Stopped,
                error_message: None,
                view_config: None,
                last_event_timestamp: None,
                next_event_number: 0,
                unique_session_id: None,
                can_pause: false,
                starting: None,
                on_events_received: None,
                on_events_removed: None,
                on_session_stopped: None,
                created_registration: None,
                events_registration: None,
                stopped_registration: None,
            })),
        };

        if let Some(view) = options.view_config {
            session.set_view_config(view);
        }

        let weak = Arc::downgrade(&session.inner);
        let session_name = session.session_name.clone();
        let registration = session
            .service
            .notifications()
            .session_created
            .subscribe(&session.owner_uri, move |params: &SessionCreatedParams| {
                if params.session_name != session_name {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).set_created();
                }
            });
        session.lock().created_registration = Some(registration);

        tracing::debug!("Created session {} for {}", session.id, session.owner_uri);
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock(&self.inner)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_uri(&self) -> &str {
        &self.owner_uri
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SessionState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    pub fn is_failed(&self) -> bool {
        self.state() == SessionState::Failed
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    pub fn last_event_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock().last_event_timestamp
    }

    pub fn unique_session_id(&self) -> Option<String> {
        self.lock().unique_session_id.clone()
    }

    pub fn can_pause(&self) -> bool {
        self.lock().can_pause
    }

    pub fn start(&self) {
        self.lock().set_running();
    }

    /// No-op for read-only sessions.
    pub fn pause(&self) {
        if self.read_only {
            tracing::debug!("Ignoring pause on read-only session {}", self.id);
            return;
        }
        self.lock().set_paused();
    }

    pub fn stop(&self) {
        self.lock().set_stopped();
    }

    pub fn set_creating(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Creating;
        inner.error_message = None;
    }

    pub fn set_created(&self) {
        self.lock().set_created();
    }

    pub fn set_failed(&self, message: Option<String>) {
        if let Some(message) = &message {
            tracing::warn!("Session {} failed: {}", self.id, message);
        }
        self.lock().set_failed(message);
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::NotStarted;
        inner.error_message = None;
    }

    // =========================================================================
    // Service Round Trips
    // =========================================================================

    /// Ask the server to create the XEvent session. The session stays in
    /// `Creating` until the matching session-created notification arrives.
    pub async fn create_xevent_session(&self, template: &SessionTemplate) -> Result<()> {
        self.set_creating();
        if let Err(e) = self
            .service
            .create_session(&self.owner_uri, &self.session_name, template)
            .await
        {
            self.set_failed(Some(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Subscribe to the event stream and start it server-side.
    ///
    /// Events that arrive before the reply are kept, and a server stop that
    /// beats the reply wins over `Running`. On failure the new subscriptions
    /// are released and the state is left unchanged.
    pub async fn start_profiling(&self) -> Result<()> {
        let previous = self.lock().take_stream_registrations();
        drop(previous);

        let events_registration = self.subscribe_events();
        let stopped_registration = self.subscribe_stopped();
        {
            let mut inner = self.lock();
            inner.begin_start();
            inner.events_registration = Some(events_registration);
            inner.stopped_registration = Some(stopped_registration);
        }

        let result = self
            .service
            .start_profiling(&self.owner_uri, &self.session_name, self.session_type.into())
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let registrations = {
                    let mut inner = self.lock();
                    inner.abort_start();
                    inner.take_stream_registrations()
                };
                drop(registrations);
                return Err(e);
            }
        };

        let mut inner = self.lock();
        inner.unique_session_id = Some(response.unique_session_id);
        inner.can_pause = response.can_pause;
        if inner.starting.take().is_some_and(|attempt| attempt.stopped) {
            tracing::info!("Session {} stopped before start completed", self.id);
        } else {
            inner.set_running();
            tracing::info!("Session {} is running", self.id);
        }
        Ok(())
    }

    /// Pause server-side. Returns the server's pause state.
    pub async fn pause_profiling(&self) -> Result<bool> {
        self.ensure_pausable()?;
        if self.is_paused() {
            return Ok(true);
        }
        self.round_trip_pause().await
    }

    /// Resume server-side. Returns the server's pause state.
    pub async fn resume_profiling(&self) -> Result<bool> {
        self.ensure_pausable()?;
        if !self.is_paused() {
            return Ok(false);
        }
        self.round_trip_pause().await
    }

    /// Flip the server-side pause state. Returns the server's pause state.
    pub async fn toggle_pause(&self) -> Result<bool> {
        self.ensure_pausable()?;
        self.round_trip_pause().await
    }

    pub async fn stop_profiling(&self) -> Result<()> {
        self.service.stop_profiling(&self.owner_uri).await?;
        self.detach();
        Ok(())
    }

    /// Stop listening without tearing down the server-side session.
    pub async fn disconnect(&self) -> Result<()> {
        self.service.disconnect_session(&self.owner_uri).await?;
        self.detach();
        Ok(())
    }

    /// Best-effort server stop, then release every notification handler.
    pub async fn dispose(&self) {
        if matches!(self.state(), SessionState::Running | SessionState::Paused) {
            if let Err(e) = self.stop_profiling().await {
                tracing::warn!("Failed to stop session {} during dispose: {}", self.id, e);
            }
        }
        let registrations = {
            let mut inner = self.lock();
            [
                inner.created_registration.take(),
                inner.events_registration.take(),
                inner.stopped_registration.take(),
            ]
        };
        drop(registrations);
    }

    fn ensure_pausable(&self) -> Result<()> {
        if self.read_only {
            return Err(ProfilerError::ReadOnlySession(self.id.clone()));
        }
        Ok(())
    }

    async fn round_trip_pause(&self) -> Result<bool> {
        let response = self.service.pause_profiling(&self.owner_uri).await?;
        let mut inner = self.lock();
        if response.is_paused {
            inner.set_paused();
        } else {
            inner.set_running();
        }
        Ok(response.is_paused)
    }

    fn detach(&self) {
        let registrations = {
            let mut inner = self.lock();
            inner.set_stopped();
            inner.take_stream_registrations()
        };
        drop(registrations);
    }

    fn subscribe_events(&self) -> Registration {
        let weak: Weak<Mutex<SessionInner>> = Arc::downgrade(&self.inner);
        let sequence_field = self.sequence_field.clone();
        self.service
            .notifications()
            .events_available
            .subscribe(&self.owner_uri, move |params: &EventsAvailableParams| {
                if let Some(inner) = weak.upgrade() {
                    ingest(&inner, &sequence_field, params.events.clone());
                }
            })
    }

    fn subscribe_stopped(&self) -> Registration {
        let weak: Weak<Mutex<SessionInner>> = Arc::downgrade(&self.inner);
        self.service
            .notifications()
            .session_stopped
            .subscribe(&self.owner_uri, move |params: &SessionStoppedParams| {
                if let Some(inner) = weak.upgrade() {
                    server_stopped(&inner, params.error_message.clone());
                }
            })
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Convert and store one wire event. `None` while the buffer is paused.
    pub fn add_event(&self, event: ProfilerEvent) -> Option<AddResult<EventRow>> {
        ingest(&self.inner, &self.sequence_field, vec![event])
            .into_iter()
            .next()
    }

    /// Convert and store a batch. Returns only the accepted rows.
    pub fn add_events(&self, events: Vec<ProfilerEvent>) -> Vec<AddResult<EventRow>> {
        ingest(&self.inner, &self.sequence_field, events)
    }

    pub fn on_events_received(&self, callback: impl Fn(&[EventRow]) + Send + Sync + 'static) {
        self.lock().on_events_received = Some(Arc::new(callback));
    }

    pub fn on_events_removed(&self, callback: impl Fn(&[EventRow]) + Send + Sync + 'static) {
        self.lock().on_events_removed = Some(Arc::new(callback));
    }

    pub fn on_session_stopped(&self, callback: impl Fn(Option<&str>) + Send + Sync + 'static) {
        self.lock().on_session_stopped = Some(Arc::new(callback));
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.total_count()
    }

    pub fn capacity(&self) -> usize {
        self.lock().events.buffer().capacity()
    }

    pub fn rows(&self) -> Vec<EventRow> {
        self.lock().events.buffer().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.lock().events.buffer_mut().clear();
    }

    pub fn find_by_index(&self, field: &str, value: &str) -> Vec<EventRow> {
        self.lock()
            .events
            .buffer()
            .find_by_index(field, value)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Run `f` against the filtered buffer without cloning rows.
    ///
    /// The session lock is held while `f` runs, so `f` must not call back
    /// into this session; doing so deadlocks.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&FilteredBuffer<EventRow>) -> R) -> R {
        f(&self.lock().events)
    }

    // =========================================================================
    // Filters & View
    // =========================================================================

    /// Use `view` for display and for filter field names.
    pub fn set_view_config(&self, view: ViewConfig) {
        let converter_view = view.clone();
        let mut inner = self.lock();
        inner
            .events
            .set_row_converter(move |row| converter_view.to_view_row(row));
        inner.view_config = Some(view);
    }

    pub fn view_config(&self) -> Option<ViewConfig> {
        self.lock().view_config.clone()
    }

    pub fn set_filters(&self, clauses: Vec<FilterClause>) {
        self.lock().events.set_column_filters(clauses);
    }

    /// Parse and apply a textual filter such as `duration > 1000 AND spid = 53`.
    pub fn set_filter_expression(&self, expression: &str) -> Result<()> {
        let clauses = parse_clauses(expression).map_err(ProfilerError::InvalidFilter)?;
        self.set_filters(clauses);
        Ok(())
    }

    pub fn filters(&self) -> Vec<FilterClause> {
        self.lock().events.column_filters().to_vec()
    }

    pub fn set_quick_filter(&self, term: impl Into<String>) {
        self.lock().events.set_quick_filter(term);
    }

    pub fn clear_filters(&self) {
        self.lock().events.clear_all_filters();
    }

    pub fn is_filter_active(&self) -> bool {
        self.lock().events.is_filter_active()
    }

    pub fn filtered_rows(&self) -> Vec<EventRow> {
        self.lock()
            .events
            .filtered_rows()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn filtered_count(&self) -> usize {
        self.lock().events.filtered_count()
    }

    pub fn filtered_range(&self, start: usize, count: usize) -> Vec<EventRow> {
        self.lock()
            .events
            .filtered_range(start, count)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn distinct_values(&self, field: &str) -> Vec<String> {
        self.lock().events.distinct_values_for_field(field)
    }

    pub fn to_snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            owner_uri: self.owner_uri.clone(),
            session_name: self.session_name.clone(),
            session_type: self.session_type,
            template_name: self.template_name.clone(),
            state: inner.state,
            event_count: inner.events.total_count(),
            filters: inner.events.column_filters().to_vec(),
            quick_filter: inner.events.quick_filter().map(str::to_string),
            view_config: inner.view_config.clone(),
            created_at: self.created_at,
            last_event_timestamp: inner.last_event_timestamp,
            read_only: self.read_only,
            unique_session_id: inner.unique_session_id.clone(),
            can_pause: inner.can_pause,
            error_message: inner.error_message.clone(),
        }
    }
}

impl std::fmt::Debug for ProfilerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerSession")
            .field("id", &self.id)
            .field("owner_uri", &self.owner_uri)
            .field("state", &self.state())
            .finish()
    }
}
