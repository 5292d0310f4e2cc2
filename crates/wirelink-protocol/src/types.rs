//! Core protocol types for Wirelink's wire format.
//!
//! This module defines everything that travels "on the wire": the control
//! messages that drive the registration handshake, and the opaque user
//! payloads that carry application data.
//!
//! Think of this as the language the client and server speak before any
//! application handler ever runs.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The sentinel identity carried by a connection that has not been
/// assigned a permanent id by the server.
///
/// The server also echoes it in the final registration message of the
/// handshake, where it means "connection fully established, application
/// services may start" rather than "unassigned".
pub const UNASSIGNED_ID: i64 = -1;

/// A unique identifier for a logical connection, assigned by the server
/// when every configured channel has registered.
///
/// Newtype over `i64`: a connection id can't be confused with a temporary
/// registration identity or a channel index, even though all three are
/// integers underneath. Serialized transparently as the inner number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub i64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A dispatch key identifying the application-level type of a user
/// message.
///
/// Applications pick a `MessageKind` per message type at startup and
/// register listeners against it. The substrate never interprets the
/// payload bytes — it only routes by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKind(pub u16);

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Control messages
// ---------------------------------------------------------------------------

/// How a disconnect was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DisconnectKind {
    /// Something went wrong (transport fault, handshake mismatch, ...).
    Error,
    /// The connection was closed on purpose — a server eject or a
    /// client signing off.
    Kick,
}

/// Messages used by the substrate itself (never by applications).
///
/// These drive the registration handshake that unifies several physical
/// channels into one logical connection, and the disconnect path.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
/// `{ "type": "Register", "temp_id": 42, ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Registers one physical channel under a temporary identity.
    ///
    /// Client → Server on every channel, carrying the same `temp_id` so
    /// the server can stitch the channels together. `game_name` and
    /// `version` are only validated on channel 0.
    ///
    /// Server → Client on channel 0, twice: first with the permanent
    /// non-negative `assigned_id`, then once more with
    /// [`UNASSIGNED_ID`] as the start-of-service signal.
    Register {
        /// Client-generated identity, unique enough for the handshake
        /// window.
        temp_id: i64,
        /// Permanent identity assigned by the server; [`UNASSIGNED_ID`]
        /// until assignment (and in the start-of-service echo).
        #[serde(default = "default_assigned_id")]
        assigned_id: i64,
        /// The game this client wants to talk to.
        #[serde(default)]
        game_name: String,
        /// Protocol/game version; must match the server's on channel 0.
        #[serde(default)]
        version: i32,
    },

    /// Server → Client: the extra reliable channels this server hosts.
    ///
    /// Sent on channel 0 after a valid registration when alternate
    /// channels are configured. The client opens one connector per listed
    /// port and registers each with the same `temp_id`.
    ChannelInfo { temp_id: i64, ports: Vec<i32> },

    /// Either direction: "this connection is going away, and here's why."
    Disconnect { kind: DisconnectKind, reason: String },
}

fn default_assigned_id() -> i64 {
    UNASSIGNED_ID
}

// ---------------------------------------------------------------------------
// Payload — what's inside a frame
// ---------------------------------------------------------------------------

/// The content of a frame: either a control message or user data.
///
/// `#[serde(tag = "type", content = "data")]` produces adjacently tagged
/// JSON, so the dispatcher can cheaply check "is this handshake plumbing I
/// handle, or application data I pass through?":
///
/// ```json
/// { "type": "Control", "data": { "type": "Register", ... } }
/// { "type": "User", "data": { "kind": 3, "data": [1, 2, 3] } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A substrate-level message (registration, channel info, disconnect).
    Control(ControlMessage),

    /// Application data, opaque to the substrate.
    ///
    /// `kind` routes the message to type-keyed listeners; `data` is
    /// whatever the application's own codec produced.
    User { kind: MessageKind, data: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Message — a payload plus channel metadata
// ---------------------------------------------------------------------------

/// A payload together with the reliability of the channel that carries it.
///
/// `reliable` is NOT serialized: it describes the channel a message
/// arrived on (set by the receiving adapter) or the delivery the sender
/// wants (which selects the outbound channel). It is channel metadata,
/// not message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Whether this message travels (or travelled) on a reliable channel.
    pub reliable: bool,
    /// The actual content.
    pub payload: Payload,
}

impl Message {
    /// Creates a user message for reliable delivery.
    pub fn reliable(kind: MessageKind, data: Vec<u8>) -> Self {
        Self {
            reliable: true,
            payload: Payload::User { kind, data },
        }
    }

    /// Creates a user message for best-effort delivery.
    pub fn best_effort(kind: MessageKind, data: Vec<u8>) -> Self {
        Self {
            reliable: false,
            payload: Payload::User { kind, data },
        }
    }

    /// Wraps a control message (always sent reliably unless an adapter
    /// says otherwise).
    pub fn control(control: ControlMessage) -> Self {
        Self {
            reliable: true,
            payload: Payload::Control(control),
        }
    }

    /// The dispatch kind, if this is a user message.
    pub fn kind(&self) -> Option<MessageKind> {
        match &self.payload {
            Payload::User { kind, .. } => Some(*kind),
            Payload::Control(_) => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is a contract with every client implementation, so
    //! these tests pin the exact JSON shapes the serde attributes produce.

    use super::*;

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_connection_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ConnectionId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "C-7");
    }

    #[test]
    fn test_message_kind_serializes_as_plain_number() {
        let json = serde_json::to_string(&MessageKind(9)).unwrap();
        assert_eq!(json, "9");
    }

    #[test]
    fn test_message_kind_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(MessageKind(1), "position");
        map.insert(MessageKind(2), "chat");
        assert_eq!(map[&MessageKind(2)], "chat");
    }

    // =====================================================================
    // ControlMessage — JSON shapes
    // =====================================================================

    #[test]
    fn test_register_json_format() {
        let msg = ControlMessage::Register {
            temp_id: 42,
            assigned_id: UNASSIGNED_ID,
            game_name: "Demo".into(),
            version: 1,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Register");
        assert_eq!(json["temp_id"], 42);
        assert_eq!(json["assigned_id"], -1);
        assert_eq!(json["game_name"], "Demo");
        assert_eq!(json["version"], 1);
    }

    #[test]
    fn test_register_assigned_id_defaults_to_unassigned() {
        // A minimal registration (as sent on channels other than 0) omits
        // everything but the temporary identity.
        let json = r#"{ "type": "Register", "temp_id": 42 }"#;
        let msg: ControlMessage = serde_json::from_str(json).unwrap();

        match msg {
            ControlMessage::Register {
                temp_id,
                assigned_id,
                game_name,
                version,
            } => {
                assert_eq!(temp_id, 42);
                assert_eq!(assigned_id, UNASSIGNED_ID);
                assert_eq!(game_name, "");
                assert_eq!(version, 0);
            }
            other => panic!("expected Register, got {other:?}"),
        }
    }

    #[test]
    fn test_channel_info_round_trip() {
        let msg = ControlMessage::ChannelInfo {
            temp_id: 42,
            ports: vec![7001, 7002],
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ControlMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_disconnect_json_format() {
        let msg = ControlMessage::Disconnect {
            kind: DisconnectKind::Kick,
            reason: "cheating".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Disconnect");
        assert_eq!(json["kind"], "Kick");
        assert_eq!(json["reason"], "cheating");
    }

    // =====================================================================
    // Payload
    // =====================================================================

    #[test]
    fn test_payload_control_json_format() {
        let payload = Payload::Control(ControlMessage::Disconnect {
            kind: DisconnectKind::Error,
            reason: "gone".into(),
        });
        let json: serde_json::Value =
            serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "Control");
        assert!(json["data"].is_object());
    }

    #[test]
    fn test_payload_user_json_format() {
        let payload = Payload::User {
            kind: MessageKind(3),
            data: vec![1, 2, 3],
        };
        let json: serde_json::Value =
            serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "User");
        assert_eq!(json["data"]["kind"], 3);
        assert_eq!(json["data"]["data"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = Payload::User {
            kind: MessageKind(7),
            data: b"hello".to_vec(),
        };
        let bytes = serde_json::to_vec(&payload).unwrap();
        let decoded: Payload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }

    // =====================================================================
    // Message
    // =====================================================================

    #[test]
    fn test_message_reliable_constructor_sets_flag() {
        let msg = Message::reliable(MessageKind(1), vec![1]);
        assert!(msg.reliable);
        assert_eq!(msg.kind(), Some(MessageKind(1)));
    }

    #[test]
    fn test_message_best_effort_constructor_clears_flag() {
        let msg = Message::best_effort(MessageKind(1), vec![1]);
        assert!(!msg.reliable);
    }

    #[test]
    fn test_message_kind_is_none_for_control() {
        let msg = Message::control(ControlMessage::Disconnect {
            kind: DisconnectKind::Error,
            reason: "x".into(),
        });
        assert_eq!(msg.kind(), None);
    }

    // =====================================================================
    // Malformed input
    // =====================================================================

    #[test]
    fn test_decode_garbage_returns_error() {
        let garbage = b"not json at all";
        let result: Result<Payload, _> = serde_json::from_slice(garbage);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_unknown_control_type_returns_error() {
        let unknown = r#"{"type": "Teleport", "x": 9}"#;
        let result: Result<ControlMessage, _> =
            serde_json::from_str(unknown);
        assert!(result.is_err());
    }
}
