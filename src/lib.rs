//! Client-side coordinator for N-party voice rooms over a dumb fan-out
//! relay.
//!
//! Each participant keeps a direct peer link to every other participant; the
//! relay only carries signaling and chat. The crate covers room discovery,
//! the relay channel, the mesh negotiation state machine, and chat. Media
//! capture and playback live behind the seams in [`media`].

pub mod chat;
pub mod config;
pub mod error;
pub mod link;
pub mod media;
pub mod mesh;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod session;

pub use error::SessionError;
pub use session::{JoinParams, RoomSession, SessionHandle};
