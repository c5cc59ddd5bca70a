//! Wire protocol types.
//!
//! Both directions use `{type, payload}` JSON envelopes with camelCase
//! type tags. The transport itself (HTTP, websockets) is the embedder's
//! concern; this module only defines what the two sides exchange.

use crate::core::UserId;
use crate::session::view::PlayerView;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// An action submission: name plus collected arguments.
///
/// Wire form is a flat array, `["guess", 7]`, matching the log rows.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl ActionCall {
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl Serialize for ActionCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.args.len()))?;
        seq.serialize_element(&self.name)?;
        for arg in &self.args {
            seq.serialize_element(arg)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ActionCall {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CallVisitor;

        impl<'de> Visitor<'de> for CallVisitor {
            type Value = ActionCall;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array of [name, ...args]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let name: String = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let mut args = Vec::new();
                while let Some(arg) = seq.next_element()? {
                    args.push(arg);
                }
                Ok(ActionCall { name, args })
            }
        }

        deserializer.deserialize_seq(CallVisitor)
    }
}

/// A held element lock, as broadcast to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub user: UserId,
    /// `$el` path of the locked element.
    pub key: String,
}

/// Client → server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    StartGame,
    Action { sequence: u64, action: ActionCall },
    Refresh,
    RequestLock { key: String },
    ReleaseLock { key: String },
    Drag { key: String, x: f64, y: f64 },
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The recipient's masked view of the session.
    State(PlayerView),
    Players { players: Vec<UserId> },
    UpdateLocks { locks: Vec<LockInfo> },
    /// A freely moved element changed position.
    UpdateElement { key: String, x: f64, y: f64 },
    /// A submitted action was rejected; directed at the acting player.
    Error { message: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_call_wire_form() {
        let call = ActionCall::new("guess", vec![json!(7)]);
        assert_eq!(serde_json::to_value(&call).unwrap(), json!(["guess", 7]));

        let parsed: ActionCall = serde_json::from_value(json!(["guess", 7])).unwrap();
        assert_eq!(parsed, call);

        let bare: ActionCall = serde_json::from_value(json!(["pass"])).unwrap();
        assert_eq!(bare.args, Vec::<Value>::new());
    }

    #[test]
    fn test_action_call_rejects_empty() {
        assert!(serde_json::from_value::<ActionCall>(json!([])).is_err());
    }

    #[test]
    fn test_client_envelope_shape() {
        let msg = ClientMessage::Action {
            sequence: 3,
            action: ActionCall::new("guess", vec![json!(5)]),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "action",
                "payload": { "sequence": 3, "action": ["guess", 5] },
            })
        );

        let start: ClientMessage = serde_json::from_value(json!({"type": "startGame"})).unwrap();
        assert_eq!(start, ClientMessage::StartGame);

        let drag: ClientMessage = serde_json::from_value(json!({
            "type": "drag",
            "payload": { "key": "$el(1-2)", "x": 10.0, "y": 4.5 },
        }))
        .unwrap();
        assert_eq!(
            drag,
            ClientMessage::Drag {
                key: "$el(1-2)".to_string(),
                x: 10.0,
                y: 4.5,
            }
        );
    }

    #[test]
    fn test_server_envelope_shape() {
        let msg = ServerMessage::UpdateLocks {
            locks: vec![LockInfo {
                user: UserId(9),
                key: "$el(1-1)".to_string(),
            }],
        };
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["type"], json!("updateLocks"));
        assert_eq!(encoded["payload"]["locks"][0]["key"], json!("$el(1-1)"));

        let decoded: ServerMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
