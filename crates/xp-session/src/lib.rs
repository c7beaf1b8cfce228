//! # xp-session — The "Control Center" of XP
//!
//! Profiler sessions and the registry that routes server notifications to
//! them. A [`ProfilerSession`] owns one event ring and bridges the
//! asynchronous tools-service contract ([`service::ProfilerService`]) into
//! buffer writes and local state transitions. The
//! [`ProfilerSessionManager`] indexes sessions by id and by owner URI.

pub mod config;
pub mod error;
pub mod manager;
pub mod service;
pub mod session;
pub mod template;

pub use config::ProfilerConfig;
pub use error::{ProfilerError, Result};
pub use manager::ProfilerSessionManager;
pub use session::{ProfilerSession, SessionOptions, SessionSnapshot, SessionState, SessionType};
pub use template::{EngineType, SessionTemplate};
