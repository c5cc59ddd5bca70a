//! The durable action log.
//!
//! One row per committed action, unique and contiguous per session.
//! Replaying the rows in order against a fresh engine reproduces the
//! session state exactly.

use crate::core::SessionId;
use crate::error::SessionError;
use crate::protocol::ActionCall;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// One committed action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub session: SessionId,
    pub sequence: u64,
    /// Acting seat, 0-based.
    pub player: usize,
    pub action: ActionCall,
}

/// Storage seam for the action log. Implementations must reject
/// duplicate and non-contiguous sequence numbers.
pub trait ActionLog: Send + Sync {
    fn append(&self, entry: ActionLogEntry) -> Result<(), SessionError>;

    /// All entries for a session, ordered by sequence.
    fn load(&self, session: SessionId) -> Result<Vec<ActionLogEntry>, SessionError>;
}

/// In-memory log for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryActionLog {
    entries: Mutex<HashMap<SessionId, Vec<ActionLogEntry>>>,
}

impl MemoryActionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActionLog for MemoryActionLog {
    fn append(&self, entry: ActionLogEntry) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().unwrap();
        let rows = entries.entry(entry.session).or_default();
        let expected = rows.len() as u64;
        if entry.sequence < expected {
            return Err(SessionError::DuplicateLogEntry {
                session: entry.session,
                sequence: entry.sequence,
            });
        }
        if entry.sequence > expected {
            return Err(SessionError::LogGap {
                session: entry.session,
                got: entry.sequence,
                expected,
            });
        }
        rows.push(entry);
        Ok(())
    }

    fn load(&self, session: SessionId) -> Result<Vec<ActionLogEntry>, SessionError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&session)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(sequence: u64, name: &str) -> ActionLogEntry {
        ActionLogEntry {
            session: SessionId(1),
            sequence,
            player: 0,
            action: ActionCall::new(name, vec![json!(sequence)]),
        }
    }

    #[test]
    fn test_append_and_load_in_order() {
        let log = MemoryActionLog::new();
        log.append(entry(0, "guess")).unwrap();
        log.append(entry(1, "guess")).unwrap();

        let rows = log.load(SessionId(1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].sequence, 1);
        assert!(log.load(SessionId(2)).unwrap().is_empty());
    }

    #[test]
    fn test_append_rejects_duplicate() {
        let log = MemoryActionLog::new();
        log.append(entry(0, "guess")).unwrap();
        assert!(matches!(
            log.append(entry(0, "guess")),
            Err(SessionError::DuplicateLogEntry { sequence: 0, .. })
        ));
    }

    #[test]
    fn test_append_rejects_gap() {
        let log = MemoryActionLog::new();
        log.append(entry(0, "guess")).unwrap();
        assert!(matches!(
            log.append(entry(2, "guess")),
            Err(SessionError::LogGap {
                got: 2,
                expected: 1,
                ..
            })
        ));
    }
}
