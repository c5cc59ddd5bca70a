//! Identifier newtypes shared across the crate.
//!
//! Sessions and users are rows owned by the external persistence layer;
//! here they are opaque numeric handles. Player *seats* (positions in a
//! session's turn order) are plain `usize` indices, 0-based.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a game session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Unique identifier of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}
