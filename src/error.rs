//! Error taxonomy.
//!
//! Errors fall into three families:
//!
//! - **Recoverable player errors** produce a structured response to the
//!   acting player and leave committed state untouched
//!   (`IncompleteAction`, `InvalidChoice`, `NotYourTurn`, ...).
//! - **Fatal defects** flag a bug in the rule module or corruption of the
//!   element tree (`Reentrancy`, `NoWrapper`). They are logged and the
//!   offending request is dropped without mutation.
//! - **Transient infrastructure errors** are retried by the caller
//!   (`LockUnavailable`).

use crate::core::SessionId;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the document tree.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DocumentError {
    /// Move destination did not resolve to a space.
    #[error("no space found \"{0}\"")]
    NoSuchSpace(String),

    /// A node matched none of the registered element variants.
    /// Fatal: the tree is corrupt and the session unrecoverable.
    #[error("no wrapper for node <{tag}>")]
    NoWrapper { tag: String },

    /// Query string failed to parse.
    #[error("bad query \"{query}\": {reason}")]
    BadQuery { query: String, reason: String },

    /// Element reference string failed to parse or resolve.
    #[error("bad element reference \"{0}\"")]
    BadElementRef(String),

    /// Element names must start with '#'.
    #[error("element name {0} must start with #")]
    BadName(String),
}

/// Errors raised by the action protocol engine.
#[derive(Clone, Debug, Error)]
pub enum EngineError {
    /// The action needs one more choice from the player. Recoverable:
    /// the prompt and the serialized valid set go back to the player.
    #[error("action requires a choice: {prompt}")]
    IncompleteAction { prompt: String, choices: Vec<Value> },

    /// The supplied value is not among the valid serialized choices.
    #[error("choice is not among the valid options")]
    InvalidChoice,

    /// Submitted sequence is below the replay horizon: the durable log
    /// already holds a different entry there.
    #[error("sequence {got} conflicts with committed log (expected {expected})")]
    SequenceConflict { got: u64, expected: u64 },

    /// A second wait-for-action was requested while one is outstanding.
    /// Fatal defect: the rule module is missing an await in `play`.
    #[error("play has gotten ahead of itself; a wait is already outstanding")]
    Reentrancy,

    /// The play routine was torn down while waiting for an action.
    #[error("session stopped while waiting for an action")]
    Interrupted,

    #[error("game not active")]
    GameNotActive,

    #[error("it's not your turn")]
    NotYourTurn,

    #[error("game already full")]
    GameFull,

    #[error("not enough players")]
    NotEnoughPlayers,

    #[error("no such player {0}")]
    NoSuchPlayer(usize),

    #[error("no such action \"{0}\"")]
    UnknownAction(String),

    /// Action registry failed load-time validation.
    #[error("invalid action spec \"{name}\": {reason}")]
    InvalidSpec { name: String, reason: String },

    /// Error surfaced by rule-module code.
    #[error("rule error: {0}")]
    Rule(String),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl EngineError {
    /// True for defects that indicate a rule-module bug or tree
    /// corruption rather than a player mistake.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Reentrancy
                | EngineError::InvalidSpec { .. }
                | EngineError::Document(DocumentError::NoWrapper { .. })
        )
    }
}

/// Errors raised by the session runner and its storage seams.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The cluster-wide session lock is held elsewhere. Transient.
    #[error("session lock unavailable for {0}")]
    LockUnavailable(SessionId),

    /// Uniqueness violation on (session, sequence) in the durable log.
    #[error("duplicate log entry for {session} sequence {sequence}")]
    DuplicateLogEntry { session: SessionId, sequence: u64 },

    /// Append skipped a sequence number; the log must stay contiguous.
    #[error("log gap for {session}: appending {got}, expected {expected}")]
    LogGap {
        session: SessionId,
        got: u64,
        expected: u64,
    },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("failed to spawn session thread: {0}")]
    Spawn(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
