use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::Message;
use crate::state::{Departure, ServerState};

pub type Outbox = mpsc::UnboundedSender<Message>;

/// Routes client messages between the members of a room
#[derive(Clone)]
pub struct Relay {
    pub state: ServerState,
    outboxes: Arc<DashMap<Uuid, Outbox>>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            state: ServerState::new(),
            outboxes: Arc::new(DashMap::new()),
        }
    }

    pub fn attach(&self, client_id: Uuid, outbox: Outbox) {
        self.state.add_client(client_id);
        self.outboxes.insert(client_id, outbox);
    }

    pub async fn detach(&self, client_id: Uuid) {
        self.outboxes.remove(&client_id);
        if let Some(departure) = self.state.remove_client(client_id).await {
            self.announce_departure(&departure).await;
        }
    }

    /// Handle one text frame. Errors are meant for the sender.
    pub async fn handle_text(&self, client_id: Uuid, text: &str) -> anyhow::Result<()> {
        let msg: Message = serde_json::from_str(text)?;
        self.handle(client_id, msg).await
    }

    pub async fn handle(&self, client_id: Uuid, msg: Message) -> anyhow::Result<()> {
        match msg {
            Message::JoinRoom {
                room_id,
                observe_only,
            } => {
                let joined = self.state.join_room(client_id, &room_id, observe_only).await?;
                if let Some(previous) = &joined.previous {
                    self.announce_departure(previous).await;
                }
                self.send_to(
                    client_id,
                    Message::RoomJoined {
                        room_id: joined.room_id.clone(),
                        client_id,
                        members: joined.members,
                    },
                );
                // Observers stay invisible to the rest of the room.
                if !observe_only {
                    self.announce_members(&joined.room_id).await;
                }
            }

            Message::LeaveRoom => {
                if let Some(departure) = self.state.leave_room(client_id).await {
                    self.announce_departure(&departure).await;
                }
                self.send_to(client_id, Message::RoomLeft);
            }

            Message::Command(command) => {
                let room_id = self.state.require_room(client_id)?;
                tracing::debug!("Relaying {:?} from {} in room {}", command, client_id, room_id);
                self.send_to_others(
                    &room_id,
                    client_id,
                    Message::CommandBroadcast {
                        from_client: client_id,
                        command,
                    },
                )
                .await;
            }

            Message::RequestInfo => {
                let room_id = self.state.require_room(client_id)?;
                self.send_to_others(
                    &room_id,
                    client_id,
                    Message::InfoRequested {
                        requester: client_id,
                    },
                )
                .await;
            }

            Message::ProvideInfo { requester, info } => {
                let room_id = self.state.require_room(client_id)?;
                if self.state.room_of(requester).as_deref() == Some(room_id.as_str()) {
                    self.send_to(
                        requester,
                        Message::InfoSnapshot {
                            from_client: client_id,
                            info,
                        },
                    );
                } else {
                    tracing::debug!(
                        "Dropping snapshot from {} for {} (not in room {})",
                        client_id,
                        requester,
                        room_id
                    );
                }
            }

            other => tracing::warn!("Unexpected message from client: {:?}", other),
        }

        Ok(())
    }

    fn send_to(&self, client_id: Uuid, msg: Message) {
        if let Some(outbox) = self.outboxes.get(&client_id) {
            let _ = outbox.send(msg);
        }
    }

    async fn send_to_others(&self, room_id: &str, from_client: Uuid, msg: Message) {
        let members = self.state.get_room_members(room_id).await;
        for member_id in members.into_iter().filter(|id| *id != from_client) {
            self.send_to(member_id, msg.clone());
        }
    }

    async fn announce_members(&self, room_id: &str) {
        let members = self.state.get_room_members(room_id).await;
        let count = members.len();
        for member_id in members {
            self.send_to(
                member_id,
                Message::RoomMemberUpdate {
                    room_id: room_id.to_string(),
                    members: count,
                },
            );
        }
    }

    async fn announce_departure(&self, departure: &Departure) {
        if !departure.observe_only && departure.remaining > 0 {
            self.announce_members(&departure.room_id).await;
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, Info};
    use serde_json::json;

    struct Peer {
        id: Uuid,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn connect(relay: &Relay) -> Peer {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        relay.attach(id, tx);
        Peer { id, rx }
    }

    async fn send(relay: &Relay, from: Uuid, value: serde_json::Value) -> anyhow::Result<()> {
        relay.handle_text(from, &value.to_string()).await
    }

    fn join(room: &str, observe_only: bool) -> serde_json::Value {
        json!({ "type": "JoinRoom", "payload": { "room_id": room, "observe_only": observe_only } })
    }

    #[tokio::test]
    async fn test_commands_reach_other_members_only() {
        let relay = Relay::new();
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        let mut outsider = connect(&relay);

        send(&relay, a.id, join("movie", false)).await.unwrap();
        send(&relay, b.id, join("movie", false)).await.unwrap();
        send(&relay, outsider.id, join("other", false)).await.unwrap();
        assert!(matches!(
            b.drain().as_slice(),
            [Message::RoomJoined { members: 2, .. }, Message::RoomMemberUpdate { members: 2, .. }]
        ));
        a.drain();
        outsider.drain();

        send(
            &relay,
            a.id,
            json!({ "type": "Command", "payload": { "action": "pause", "value": 30.0 } }),
        )
        .await
        .unwrap();

        assert!(a.drain().is_empty());
        assert!(outsider.drain().is_empty());
        match b.drain().as_slice() {
            [Message::CommandBroadcast {
                from_client,
                command,
            }] => {
                assert_eq!(*from_client, a.id);
                assert_eq!(command.action, Action::Pause);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_observer_is_not_announced() {
        let relay = Relay::new();
        let mut host = connect(&relay);
        let mut observer = connect(&relay);

        send(&relay, host.id, join("movie", false)).await.unwrap();
        host.drain();

        send(&relay, observer.id, join("movie", true)).await.unwrap();
        assert!(host.drain().is_empty());
        assert!(matches!(
            observer.drain().as_slice(),
            [Message::RoomJoined { members: 2, .. }]
        ));

        send(&relay, observer.id, json!({ "type": "LeaveRoom" })).await.unwrap();
        assert!(host.drain().is_empty());
        assert!(matches!(observer.drain().as_slice(), [Message::RoomLeft]));
    }

    #[tokio::test]
    async fn test_disconnect_updates_remaining_members() {
        let relay = Relay::new();
        let mut host = connect(&relay);
        let guest = connect(&relay);
        send(&relay, host.id, join("movie", false)).await.unwrap();
        send(&relay, guest.id, join("movie", false)).await.unwrap();
        host.drain();

        relay.detach(guest.id).await;
        assert!(matches!(
            host.drain().as_slice(),
            [Message::RoomMemberUpdate { members: 1, .. }]
        ));
        assert_eq!(relay.state.room_of(guest.id), None);
    }

    #[tokio::test]
    async fn test_info_snapshot_goes_to_requester_only() {
        let relay = Relay::new();
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        let mut c = connect(&relay);
        for peer in [&a, &b, &c] {
            send(&relay, peer.id, join("movie", false)).await.unwrap();
        }
        a.drain();
        b.drain();
        c.drain();

        send(&relay, c.id, json!({ "type": "RequestInfo" })).await.unwrap();
        assert!(c.drain().is_empty());
        for peer in [&mut a, &mut b] {
            assert!(matches!(
                peer.drain().as_slice(),
                [Message::InfoRequested { requester }] if *requester == c.id
            ));
        }

        let info = Info {
            video_url: "dQw4w9WgXcQ".into(),
            timestamp: 1_000,
            time: 12.0,
            paused: true,
        };
        let provide = json!({ "type": "ProvideInfo", "payload": { "requester": c.id, "info": info } });
        send(&relay, a.id, provide.clone()).await.unwrap();

        assert!(b.drain().is_empty());
        match c.drain().as_slice() {
            [Message::InfoSnapshot { from_client, info: got }] => {
                assert_eq!(*from_client, a.id);
                assert_eq!(got, &info);
            }
            other => panic!("unexpected {other:?}"),
        }

        // A requester that left no longer receives snapshots.
        send(&relay, c.id, json!({ "type": "LeaveRoom" })).await.unwrap();
        c.drain();
        send(&relay, a.id, provide).await.unwrap();
        assert!(c.drain().is_empty());
    }

    #[tokio::test]
    async fn test_room_scoped_messages_need_a_room() {
        let relay = Relay::new();
        let a = connect(&relay);

        let err = send(&relay, a.id, json!({ "type": "RequestInfo" }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not in a room");
        assert!(send(&relay, a.id, join("  ", false)).await.is_err());
        assert!(send(&relay, a.id, json!({ "type": "Bogus" })).await.is_err());
    }
}
