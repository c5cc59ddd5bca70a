//! # tabletop-core
//!
//! A hosting core for turn-based multiplayer board games.
//!
//! ## Design Principles
//!
//! 1. **Event-Sourced**: The durable action log is the source of truth.
//!    Any process can rebuild a session's live state by replaying it;
//!    shuffles replay identically from the session seed.
//!
//! 2. **Single-Writer**: A cluster-wide lock makes exactly one process
//!    the writer for a session. Each hosted session runs on its own
//!    thread with a single-threaded runtime, so game code never races.
//!
//! 3. **Rules As Modules**: Everything game-specific (the board, the
//!    action registry, the async play routine) lives behind the
//!    `RuleModule` trait. The host knows nothing about any one game.
//!
//! ## Architecture
//!
//! - **Positional Identity**: Board elements are addressed by their
//!   branch path in the tree (`$el(1-3-2)`), recomputed on demand, so
//!   clients and the log never hold stale element handles.
//!
//! - **Dry-Run Validation**: Offered actions are probed against a full
//!   state snapshot (tree, variables, RNG) that is restored afterwards,
//!   so advertising choices never perturbs the game.
//!
//! ## Modules
//!
//! - `core`: Session/user ids, deterministic RNG, attribute coding
//! - `document`: The element tree, branch paths, structural queries
//! - `actions`: Action specs, the pending slot, the commit path
//! - `rules`: The `RuleModule` trait and the handle play code uses
//! - `session`: The writer runner, storage seams, locks, player views
//! - `protocol`: Wire envelopes exchanged with clients
//! - `games`: Shipped rule modules

pub mod actions;
pub mod core;
pub mod document;
pub mod error;
pub mod games;
pub mod protocol;
pub mod rules;
pub mod session;

// Re-export commonly used types
pub use crate::core::{GameRng, SessionId, UserId};

pub use crate::document::{
    Branch, ElementKind, GameDocument, MaskAction, NodeId, Query, QueryCtx, SortKey, WrapperSet,
};

pub use crate::actions::{
    ActionFn, ActionRegistry, ActionSpec, ActionTest, ChoiceSource, Delivery, DragOptions,
    GameEngine, GameState, Phase,
};

pub use crate::rules::{GameHandle, RuleModule};

pub use crate::session::{
    ActionLog, ActionLogEntry, ElementLockManager, EventQueue, MaskPolicy, MemoryActionLog,
    MemoryEventQueue, MemoryPublisher, MemorySessionLocks, MemorySessionStore, PlayerView,
    Recipient, RunnerConfig, SessionEvent, SessionLockProvider, SessionMeta, SessionRunner,
    SessionStore, SessionUpdate, StatePublisher,
};

pub use crate::protocol::{ActionCall, ClientMessage, LockInfo, ServerMessage};

pub use crate::error::{DocumentError, EngineError, SessionError};
