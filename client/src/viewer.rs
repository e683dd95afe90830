use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::catchup::CatchUp;
use crate::channel::{ChannelEvent, CommandChannel};
use crate::engine::{Effects, Outbound, PlayerOp, SyncSession};
use crate::player::{PlayerAdapter, PlayerError, PlayerEvent, Quality};
use crate::utils::current_unix_millis;
use crate::youtube::is_youtube_url;

/// Input from the local user that is not a player interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalInput {
    ChangeVideo(String),
    Leave,
}

/// One viewer's membership in a room: session state, catch-up, the local
/// player and the room channel, driven by a single event loop.
pub struct Viewer<P, C> {
    session: SyncSession,
    catch_up: CatchUp,
    player: P,
    channel: C,
    catch_up_warn_after: Duration,
    quality: Quality,
    members: usize,
}

impl<P, C> Viewer<P, C>
where
    P: PlayerAdapter,
    C: CommandChannel,
{
    pub fn new(session: SyncSession, player: P, channel: C, catch_up_warn_after: Duration) -> Self {
        Self {
            session,
            catch_up: CatchUp::new(),
            player,
            channel,
            catch_up_warn_after,
            quality: Quality::Default,
            members: 0,
        }
    }

    /// Quality hint passed to every load.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn catch_up(&self) -> &CatchUp {
        &self.catch_up
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Process events until the user leaves or an event source closes, then
    /// leave the room.
    pub async fn run(
        mut self,
        mut player_events: UnboundedReceiver<PlayerEvent>,
        mut channel_events: UnboundedReceiver<ChannelEvent>,
        mut local_input: UnboundedReceiver<LocalInput>,
    ) -> Result<()> {
        let mut catch_up_check = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                event = player_events.recv() => match event {
                    Some(event) => self.handle_player_event(event),
                    None => {
                        tracing::info!("Player event stream closed");
                        break;
                    }
                },
                event = channel_events.recv() => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        tracing::info!("Room channel closed");
                        break;
                    }
                },
                input = local_input.recv() => match input {
                    Some(LocalInput::ChangeVideo(url)) => self.change_video(&url),
                    Some(LocalInput::Leave) | None => break,
                },
                _ = catch_up_check.tick() => {
                    self.catch_up.check_overdue(self.catch_up_warn_after);
                }
            }
        }

        self.leave();
        Ok(())
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Ready => {
                let mut effects = self.session.on_ready();
                if self.catch_up.begin(self.session.joined()) {
                    effects.outbound.push(Outbound::RequestInfo);
                }
                self.apply(effects);
            }
            PlayerEvent::StateChange {
                state,
                position,
                duration,
            } => {
                if let Some(command) = self.session.on_state_change(state, position, duration) {
                    self.dispatch(Outbound::Command(command));
                }
            }
            PlayerEvent::Error(code) => self.session.on_player_error(code),
            PlayerEvent::PlaybackRateChange(rate) => self.session.on_playback_rate_change(rate),
        }
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Joined {
                room_id,
                client_id,
                members,
            } => {
                self.members = members;
                tracing::info!(
                    "Joined room {} as {} ({} members)",
                    room_id,
                    client_id,
                    members
                );
            }
            ChannelEvent::Command { from, command } => {
                tracing::debug!("Command from {}: {:?}", from, command);
                let effects = self.session.on_inbound_command(&command);
                self.apply(effects);
            }
            ChannelEvent::InfoRequested { requester } => {
                let position = self.player.current_time();
                let effects =
                    self.session
                        .on_info_requested(requester, position, current_unix_millis());
                self.apply(effects);
            }
            ChannelEvent::Info { from, info } => {
                if let Some(info) = self.catch_up.accept(info) {
                    tracing::debug!("Using snapshot from {}", from);
                    let effects = self.session.apply_snapshot(&info, current_unix_millis());
                    self.apply(effects);
                }
            }
            ChannelEvent::MembersChanged { members } => {
                if members != self.members {
                    tracing::info!("Room now has {} members", members);
                }
                self.members = members;
            }
            ChannelEvent::Left => tracing::info!("Left room {}", self.session.room_id()),
            ChannelEvent::Error { message } => tracing::warn!("Server error: {}", message),
        }
    }

    /// The local user picked a new video. Unrecognized urls are ignored.
    pub fn change_video(&mut self, url: &str) {
        match self.session.on_local_change(url) {
            Some(effects) => self.apply(effects),
            None if is_youtube_url(url) => {
                tracing::warn!("No video id in YouTube link {:?}; ignoring", url)
            }
            None => tracing::warn!("Ignoring unrecognized video url {:?}", url),
        }
    }

    fn leave(&mut self) {
        if let Err(e) = self.channel.leave_room() {
            tracing::debug!("Leave not delivered: {}", e);
        }
        tracing::info!("Stopped syncing room {}", self.session.room_id());
    }

    fn apply(&mut self, effects: Effects) {
        for op in effects.player {
            if let Err(e) = self.run_player_op(&op) {
                tracing::warn!("Player operation {:?} failed: {}", op, e);
            }
        }
        for outbound in effects.outbound {
            self.dispatch(outbound);
        }
    }

    fn run_player_op(&self, op: &PlayerOp) -> Result<(), PlayerError> {
        match op {
            PlayerOp::Load { video_id, start } => {
                self.player.load_video_by_id(video_id, *start, self.quality)
            }
            PlayerOp::Play => self.player.play_video(),
            PlayerOp::Pause => self.player.pause_video(),
            PlayerOp::SeekTo { position } => self.player.seek_to(*position, true),
        }
    }

    fn dispatch(&self, outbound: Outbound) {
        let result = match &outbound {
            Outbound::Join {
                room_id,
                observe_only,
            } => self.channel.join_room(room_id, *observe_only),
            Outbound::Command(command) => self.channel.send_command(command),
            Outbound::RequestInfo => self.channel.request_info(),
            Outbound::Info { requester, info } => self.channel.send_info(*requester, info),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to send {:?}: {:#}", outbound, e);
        }
    }
}
