use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::ClientInfo;

const LOG_TAG: &str = "[CoWatch Server]";
const MAX_ROOM_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room id must not be empty")]
    EmptyRoomId,
    #[error("Room id is longer than {MAX_ROOM_ID_LEN} characters")]
    RoomIdTooLong,
    #[error("Room id contains control characters")]
    InvalidRoomId,
    #[error("Not in a room")]
    NotInRoom,
    #[error("Unknown client")]
    UnknownClient,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub room_id: String,
    pub members: usize,
    /// Room the client was in before, if it switched rooms.
    pub previous: Option<Departure>,
}

/// A client leaving a room, and what the remaining members should hear
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: String,
    pub remaining: usize,
    pub observe_only: bool,
}

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// All connected clients: client_id -> ClientInfo
    pub clients: Arc<DashMap<Uuid, ClientInfo>>,
    /// Room membership: room_id -> Vec<client_id>. A room exists while it has members.
    pub room_members: Arc<DashMap<String, Arc<RwLock<Vec<Uuid>>>>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            room_members: Arc::new(DashMap::new()),
        }
    }

    pub fn validate_room_id(raw: &str) -> Result<String, RoomError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomError::EmptyRoomId);
        }
        if trimmed.chars().count() > MAX_ROOM_ID_LEN {
            return Err(RoomError::RoomIdTooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(RoomError::InvalidRoomId);
        }
        Ok(trimmed.to_string())
    }

    /// Join `room_id`, creating it if needed. Rejoining the same room is a no-op
    /// apart from updating `observe_only`.
    pub async fn join_room(
        &self,
        client_id: Uuid,
        room_id: &str,
        observe_only: bool,
    ) -> Result<Joined, RoomError> {
        let room_id = Self::validate_room_id(room_id)?;
        if !self.clients.contains_key(&client_id) {
            return Err(RoomError::UnknownClient);
        }

        let current = self.room_of(client_id);
        let previous = match current {
            Some(current) if current != room_id => self.leave_room(client_id).await,
            _ => None,
        };

        let members_lock = Arc::clone(
            &*self
                .room_members
                .entry(room_id.clone())
                .or_insert_with(|| Arc::new(RwLock::new(Vec::new()))),
        );
        let members = {
            let mut members = members_lock.write().await;
            if !members.contains(&client_id) {
                members.push(client_id);
            }
            members.len()
        };

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            client.room_id = Some(room_id.clone());
            client.observe_only = observe_only;
        }

        tracing::info!(
            "{LOG_TAG} Client {} joined room {} ({} members{})",
            client_id,
            room_id,
            members,
            if observe_only { ", observing" } else { "" }
        );
        Ok(Joined {
            room_id,
            members,
            previous,
        })
    }

    pub async fn leave_room(&self, client_id: Uuid) -> Option<Departure> {
        let (room_id, observe_only) = {
            let mut client = self.clients.get_mut(&client_id)?;
            let room_id = client.room_id.take()?;
            (room_id, client.observe_only)
        };

        let remaining = match self.room_members.get(&room_id).map(|m| Arc::clone(&*m)) {
            Some(members_lock) => {
                let mut members = members_lock.write().await;
                members.retain(|id| *id != client_id);
                members.len()
            }
            None => 0,
        };

        if remaining == 0 {
            // Re-check under the map lock so a concurrent join keeps the room.
            let removed = self
                .room_members
                .remove_if(&room_id, |_, members| {
                    members.try_read().map(|m| m.is_empty()).unwrap_or(false)
                })
                .is_some();
            if removed {
                tracing::info!(
                    "{LOG_TAG} Room {} deleted (empty, {} rooms active)",
                    room_id,
                    self.room_count()
                );
            }
        }

        tracing::info!("{LOG_TAG} Client {} left room {}", client_id, room_id);
        Some(Departure {
            room_id,
            remaining,
            observe_only,
        })
    }

    pub async fn get_room_members(&self, room_id: &str) -> Vec<Uuid> {
        if let Some(members_ref) = self.room_members.get(room_id) {
            let members_lock = Arc::clone(&*members_ref);
            drop(members_ref);
            let members = members_lock.read().await;
            members.clone()
        } else {
            Vec::new()
        }
    }

    pub fn room_of(&self, client_id: Uuid) -> Option<String> {
        self.clients.get(&client_id).and_then(|c| c.room_id.clone())
    }

    /// Room of `client_id`, or [`RoomError::NotInRoom`].
    pub fn require_room(&self, client_id: Uuid) -> Result<String, RoomError> {
        self.room_of(client_id).ok_or(RoomError::NotInRoom)
    }

    pub fn room_count(&self) -> usize {
        self.room_members.len()
    }

    pub fn add_client(&self, client_id: Uuid) {
        self.clients.insert(client_id, ClientInfo::default());
        tracing::info!("{LOG_TAG} Client {} connected", client_id);
    }

    pub async fn remove_client(&self, client_id: Uuid) -> Option<Departure> {
        let departure = self.leave_room(client_id).await;
        self.clients.remove(&client_id);
        tracing::info!("{LOG_TAG} Client {} disconnected", client_id);
        departure
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}
