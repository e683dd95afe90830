use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent between client and server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    // Client -> Server
    JoinRoom {
        room_id: String,
        #[serde(default)]
        observe_only: bool,
    },
    LeaveRoom,
    Command(Command),
    RequestInfo,
    ProvideInfo {
        requester: Uuid,
        info: Info,
    },

    // Server -> Client
    RoomJoined {
        room_id: String,
        client_id: Uuid,
        members: usize,
    },
    RoomLeft,
    CommandBroadcast {
        from_client: Uuid,
        command: Command,
    },
    InfoRequested {
        requester: Uuid,
    },
    InfoSnapshot {
        from_client: Uuid,
        info: Info,
    },
    RoomMemberUpdate {
        room_id: String,
        members: usize,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Change,
    Play,
    Pause,
    Speed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Position(f64),
    VideoId(String),
}

/// Relayed as-is; the server never interprets playback commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CommandValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub video_url: String,
    pub timestamp: u64,
    pub time: f64,
    pub paused: bool,
}

/// Connected client bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub room_id: Option<String>,
    pub observe_only: bool,
}
