use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::{Command, Info, Message};

/// Inbound traffic from the room, as seen by the viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Joined {
        room_id: String,
        client_id: Uuid,
        members: usize,
    },
    Command {
        from: Uuid,
        command: Command,
    },
    InfoRequested {
        requester: Uuid,
    },
    Info {
        from: Uuid,
        info: Info,
    },
    MembersChanged {
        members: usize,
    },
    Left,
    Error {
        message: String,
    },
}

impl ChannelEvent {
    /// Map a server message onto a viewer event; client-bound only.
    pub fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::RoomJoined {
                room_id,
                client_id,
                members,
            } => Some(ChannelEvent::Joined {
                room_id,
                client_id,
                members,
            }),
            Message::RoomLeft => Some(ChannelEvent::Left),
            Message::CommandBroadcast {
                from_client,
                command,
            } => Some(ChannelEvent::Command {
                from: from_client,
                command,
            }),
            Message::InfoRequested { requester } => Some(ChannelEvent::InfoRequested { requester }),
            Message::InfoSnapshot { from_client, info } => Some(ChannelEvent::Info {
                from: from_client,
                info,
            }),
            Message::RoomMemberUpdate { members, .. } => {
                Some(ChannelEvent::MembersChanged { members })
            }
            Message::Error { message } => Some(ChannelEvent::Error { message }),
            Message::JoinRoom { .. }
            | Message::LeaveRoom
            | Message::Command(_)
            | Message::RequestInfo
            | Message::ProvideInfo { .. } => None,
        }
    }
}

/// Room-scoped message bus. Sends are fire-and-forget; inbound traffic
/// arrives separately as [`ChannelEvent`]s.
pub trait CommandChannel {
    fn join_room(&self, room_id: &str, observe_only: bool) -> Result<()>;
    fn leave_room(&self) -> Result<()>;
    fn send_command(&self, command: &Command) -> Result<()>;
    fn request_info(&self) -> Result<()>;
    fn send_info(&self, requester: Uuid, info: &Info) -> Result<()>;
}

impl<T: CommandChannel + ?Sized> CommandChannel for Arc<T> {
    fn join_room(&self, room_id: &str, observe_only: bool) -> Result<()> {
        (**self).join_room(room_id, observe_only)
    }

    fn leave_room(&self) -> Result<()> {
        (**self).leave_room()
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        (**self).send_command(command)
    }

    fn request_info(&self) -> Result<()> {
        (**self).request_info()
    }

    fn send_info(&self, requester: Uuid, info: &Info) -> Result<()> {
        (**self).send_info(requester, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_server_messages() {
        let from = Uuid::new_v4();
        let event = ChannelEvent::from_message(Message::CommandBroadcast {
            from_client: from,
            command: Command::pause(None),
        });
        assert_eq!(
            event,
            Some(ChannelEvent::Command {
                from,
                command: Command::pause(None)
            })
        );
        assert_eq!(ChannelEvent::from_message(Message::RequestInfo), None);
    }
}
