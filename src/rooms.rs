//! HTTP client for the relay's room directory.
//!
//! The directory is a small REST surface next to the WebSocket endpoint:
//! list rooms, create one, verify a password before dialing in, and query a
//! room's current members.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SessionError;

#[derive(Debug, Clone, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub has_password: bool,
    pub is_private: bool,
    pub user_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRoom {
    pub id: String,
    pub name: String,
    pub is_private: bool,
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
    is_private: bool,
}

#[derive(Debug, Serialize)]
struct PasswordCheckRequest<'a> {
    room_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct RoomUsersResponse {
    #[allow(dead_code)]
    room_id: String,
    users: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RejectionBody {
    #[serde(default)]
    detail: String,
    #[serde(default)]
    error: String,
}

/// The relay answers 400 both for a name conflict (`detail`) and for
/// malformed payloads (`error`); only the former is `NameTaken`.
fn classify_create_rejection(body: &str) -> SessionError {
    let body: RejectionBody = serde_json::from_str(body).unwrap_or_default();
    if body.detail == "Room name already exists" {
        return SessionError::NameTaken;
    }
    let reason = if !body.detail.is_empty() {
        body.detail
    } else if !body.error.is_empty() {
        body.error
    } else {
        "bad request".to_string()
    };
    SessionError::Rejected(reason)
}

pub struct RoomDirectory {
    base: String,
    client: reqwest::Client,
}

impl RoomDirectory {
    pub fn new(server: &str) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()?;
        Ok(Self {
            base: server.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn list(&self) -> Result<Vec<RoomSummary>, SessionError> {
        let rooms = self
            .client
            .get(format!("{}/rooms", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rooms)
    }

    /// Public rooms only, for lobby display. Private rooms are reachable by
    /// id but never listed.
    pub async fn list_public(&self) -> Result<Vec<RoomSummary>, SessionError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|room| !room.is_private)
            .collect())
    }

    pub async fn create(
        &self,
        name: &str,
        password: &str,
        is_private: bool,
    ) -> Result<CreatedRoom, SessionError> {
        let response = self
            .client
            .post(format!("{}/rooms", self.base))
            .json(&CreateRoomRequest {
                name,
                password,
                is_private,
            })
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_create_rejection(&body));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    /// Verify a room password before opening the socket, so a wrong password
    /// fails with a clear error instead of a refused upgrade.
    pub async fn check_password(&self, room_id: &str, password: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(format!("{}/check_password", self.base))
            .json(&PasswordCheckRequest { room_id, password })
            .send()
            .await?;
        match response.status() {
            StatusCode::FORBIDDEN => Err(SessionError::InvalidPassword),
            StatusCode::NOT_FOUND => Err(SessionError::RoomMissing),
            _ => {
                response.error_for_status()?;
                Ok(())
            }
        }
    }

    /// Current member ids of a room. Used to seed the mesh roster at join.
    pub async fn users(&self, room_id: &str) -> Result<Vec<String>, SessionError> {
        let response = self
            .client
            .get(format!("{}/room/{}/users", self.base, room_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SessionError::RoomMissing);
        }
        let body: RoomUsersResponse = response.error_for_status()?.json().await?;
        Ok(body.users)
    }

    /// Look a room up by id or, failing that, by exact name.
    pub async fn find(&self, id_or_name: &str) -> Result<RoomSummary, SessionError> {
        let rooms = self.list().await?;
        rooms
            .iter()
            .find(|room| room.id == id_or_name)
            .or_else(|| rooms.iter().find(|room| room.name == id_or_name))
            .cloned()
            .ok_or(SessionError::RoomMissing)
    }
}
