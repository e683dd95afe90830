use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::youtube::VideoId;

/// Messages sent between client and server (must match server protocol)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    // Client -> Server
    JoinRoom {
        room_id: String,
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
    /// Reserved; receivers ignore it.
    Speed,
}

/// Payload of a command: a seek target in seconds or a video id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Position(f64),
    VideoId(String),
}

/// Playback intent broadcast to every member of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CommandValue>,
}

/// Typed view of a [`Command`] once its payload has been checked against its action.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Change(VideoId),
    Play { seek: Option<f64> },
    Pause { seek: Option<f64> },
    Speed,
}

impl Command {
    pub fn change(video_id: &VideoId) -> Self {
        Self {
            action: Action::Change,
            value: Some(CommandValue::VideoId(video_id.as_str().to_string())),
        }
    }

    pub fn play(position: Option<f64>) -> Self {
        Self {
            action: Action::Play,
            value: position.map(CommandValue::Position),
        }
    }

    pub fn pause(position: Option<f64>) -> Self {
        Self {
            action: Action::Pause,
            value: position.map(CommandValue::Position),
        }
    }

    /// Returns `None` for a `change` without a video id; stray payloads on
    /// play/pause/speed are dropped rather than rejected.
    pub fn intent(&self) -> Option<Intent> {
        match self.action {
            Action::Change => match &self.value {
                Some(CommandValue::VideoId(id)) if !id.is_empty() => {
                    Some(Intent::Change(VideoId::from_wire(id)))
                }
                _ => None,
            },
            Action::Play => Some(Intent::Play {
                seek: self.seek_target(),
            }),
            Action::Pause => Some(Intent::Pause {
                seek: self.seek_target(),
            }),
            Action::Speed => Some(Intent::Speed),
        }
    }

    /// A zero or non-finite position counts as "no seek".
    fn seek_target(&self) -> Option<f64> {
        match self.value {
            Some(CommandValue::Position(pos)) if pos.is_finite() && pos != 0.0 => Some(pos),
            _ => None,
        }
    }
}

/// Point-in-time snapshot of one viewer's playback, used for late-join catch-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub video_url: VideoId,
    /// Sender wall clock in epoch milliseconds.
    pub timestamp: u64,
    /// Sender playback position in seconds, sampled together with `timestamp`.
    pub time: f64,
    pub paused: bool,
}
