//! Wire types for the chat protocol: client/server frames carried as
//! newline-delimited JSON over a plain TCP socket (see `codec` in the
//! `chat-server` crate for the framing itself).
//!
//! Two tag fields are in play, matching the protocol as specified: frames
//! exchanged during authentication are tagged by `action`, frames exchanged
//! once a session is live are tagged by `type`.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client -> Server: authentication phase
// ---------------------------------------------------------------------------

/// A frame sent before login completes.
///
/// Any frame whose `action` doesn't match `REGISTER` or `LOGIN` fails to
/// parse here and is ignored by the caller, per the auth-phase contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum AuthRequest {
    #[serde(rename = "REGISTER")]
    Register { username: String, password: String },
    #[serde(rename = "LOGIN")]
    Login { username: String, password: String },
}

// ---------------------------------------------------------------------------
// Client -> Server: message phase
// ---------------------------------------------------------------------------

/// A frame sent after login, dispatched by `type`.
///
/// `Unknown` absorbs any `type` this server doesn't recognize so that an
/// unrecognized-but-well-formed frame is dropped rather than treated as a
/// framing error (see `codec` for the framing-error boundary).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "USERLIST")]
    UserList,
    #[serde(rename = "PUBLIC")]
    Public { message: String },
    #[serde(rename = "PRIVATE")]
    Private { recipient: String, message: String },
    #[serde(rename = "ROOM_MESSAGE")]
    RoomMessage { room: String, message: String },
    #[serde(rename = "TYPING_START")]
    TypingStart { recipient: String },
    #[serde(rename = "TYPING_STOP")]
    TypingStop { recipient: String },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Server -> Client: authentication phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    pub message: String,
}

impl AuthResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client: message phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "SYSTEM")]
    System { message: String },
    #[serde(rename = "PUBLIC")]
    Public {
        sender: String,
        message: String,
        timestamp: String,
    },
    #[serde(rename = "PRIVATE")]
    Private {
        sender: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        message: String,
        timestamp: String,
    },
    #[serde(rename = "ROOM_MESSAGE")]
    RoomMessage {
        sender: String,
        room: String,
        message: String,
        timestamp: String,
    },
    #[serde(rename = "USERLIST")]
    UserList { users: Vec<String> },
    #[serde(rename = "typing")]
    Typing { sender: String, status: bool },
}

/// The implicit public room every client joins at login.
pub const GERAL: &str = "Geral";
