//! Session hosting: the writer runner, storage seams, locks, and views.
//!
//! A hosted session is event-sourced: the durable action log is the
//! source of truth, and any process that acquires the session's writer
//! lock can rebuild the live state by replaying it. The seams
//! (`ActionLog`, `SessionLockProvider`, `EventQueue`, `StatePublisher`,
//! `SessionStore`) keep the runner independent of the backing store;
//! in-memory implementations of each ship here for tests and
//! single-process deployments.

pub mod locks;
pub mod log;
pub mod queue;
pub mod runner;
pub mod view;

pub use locks::{ElementLockManager, MemorySessionLocks, SessionLockGuard, SessionLockProvider};
pub use log::{ActionLog, ActionLogEntry, MemoryActionLog};
pub use queue::{
    EventQueue, MemoryEventQueue, MemoryPublisher, Recipient, SessionEvent, SessionUpdate,
    StatePublisher,
};
pub use runner::{MemorySessionStore, RunnerConfig, SessionMeta, SessionRunner, SessionStore};
pub use view::{player_view, MaskPolicy, PlayerView};
