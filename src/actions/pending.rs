//! The single-slot pending action request.

use serde_json::Value;
use tokio::sync::oneshot;

/// What the play routine is currently waiting for.
///
/// At most one of these exists per engine; registering a second while
/// one is outstanding is a rule-module defect (a missing await).
pub(crate) struct PendingPlay {
    /// Action names the waiting point offers.
    pub names: Vec<String>,
    /// Seat allowed to act, or `None` for any seated player.
    pub seat: Option<usize>,
    /// Fulfilled with the committed `(name, args)` pair.
    pub tx: oneshot::Sender<(String, Vec<Value>)>,
}

impl PendingPlay {
    pub fn offers(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn allows_seat(&self, seat: usize) -> bool {
        self.seat.is_none() || self.seat == Some(seat)
    }
}
