use thiserror::Error;

use crate::link::LinkError;

/// Terminal session failures. Anything here ends the session and returns the
/// participant to the lobby; peer-local negotiation trouble stays inside the
/// mesh and never surfaces as a `SessionError`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("room does not exist")]
    RoomMissing,
    #[error("room name already exists")]
    NameTaken,
    #[error("relay rejected the request: {0}")]
    Rejected(String),
    #[error("relay channel closed")]
    ChannelClosed,
    #[error("relay closed the connection: {0}")]
    RelayClosed(String),
    #[error("room directory request failed: {0}")]
    Directory(#[from] reqwest::Error),
    #[error(transparent)]
    Link(#[from] LinkError),
}
