use uuid::Uuid;

use crate::catchup::catch_up_position;
use crate::player::{PlayerErrorCode, PlayerState};
use crate::protocol::{Command, Info, Intent};
use crate::youtube::{extract_video_id, VideoId};

/// How far the echoed transition may land from the seek target and still be
/// recognized as the echo.
pub const ECHO_TOLERANCE_SECS: f64 = 1.0;

/// Operation to run against the local player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerOp {
    Load { video_id: VideoId, start: f64 },
    Play,
    Pause,
    SeekTo { position: f64 },
}

/// Message to put on the command channel
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Join { room_id: String, observe_only: bool },
    Command(Command),
    RequestInfo,
    Info { requester: Uuid, info: Info },
}

/// Side effects produced by one step of the session, applied in order:
/// player operations first, then outbound messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub player: Vec<PlayerOp>,
    pub outbound: Vec<Outbound>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.player.is_empty() && self.outbound.is_empty()
    }

    fn op(mut self, op: PlayerOp) -> Self {
        self.player.push(op);
        self
    }

    fn send(mut self, outbound: Outbound) -> Self {
        self.outbound.push(outbound);
        self
    }
}

/// Local playback lifecycle. `Ended` lasts until the next load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOf {
    Play,
    Pause,
}

/// Single-shot guard against rebroadcasting the transition caused by an
/// inbound command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoGuard {
    Idle,
    AwaitingEcho { expected: EchoOf, target: f64 },
}

impl EchoGuard {
    fn arm(&mut self, expected: EchoOf, target: f64) {
        *self = EchoGuard::AwaitingEcho { expected, target };
    }

    /// Disarms unconditionally; reports whether the observed transition is
    /// the awaited echo.
    fn consume(&mut self, observed: EchoOf, position: f64) -> bool {
        match std::mem::replace(self, EchoGuard::Idle) {
            EchoGuard::Idle => false,
            EchoGuard::AwaitingEcho { expected, target } => {
                expected == observed && (position - target).abs() <= ECHO_TOLERANCE_SECS
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, EchoGuard::AwaitingEcho { .. })
    }
}

/// First play of a freshly loaded video: every viewer is already at zero.
pub fn is_anchor_start(position: f64) -> bool {
    position == 0.0
}

/// A pause reported at the very end is the stream finishing, not the user.
pub fn is_end_of_stream(position: f64, duration: f64) -> bool {
    duration - position == 0.0
}

/// Synchronization state for one room membership.
#[derive(Debug, Clone)]
pub struct SyncSession {
    room_id: String,
    joined: bool,
    current_video_id: VideoId,
    paused: bool,
    guard: EchoGuard,
    playback: Playback,
}

impl SyncSession {
    pub fn new(room_id: impl Into<String>, joined: bool, default_video: VideoId) -> Self {
        Self {
            room_id: room_id.into(),
            joined,
            current_video_id: default_video,
            paused: true,
            guard: EchoGuard::Idle,
            playback: Playback::Loading,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn joined(&self) -> bool {
        self.joined
    }

    pub fn current_video_id(&self) -> &VideoId {
        &self.current_video_id
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn guard(&self) -> EchoGuard {
        self.guard
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    /// The local player finished initializing.
    ///
    /// Every viewer starts the default video; a joining viewer that later
    /// receives a snapshot reloads at the room's position.
    pub fn on_ready(&mut self) -> Effects {
        self.playback = Playback::Ready;
        Effects::none()
            .op(PlayerOp::Play)
            .send(Outbound::Join {
                room_id: self.room_id.clone(),
                observe_only: !self.joined,
            })
    }

    /// The local user supplied a new video url. `None` when the url holds no
    /// recognizable identifier; nothing changes in that case.
    pub fn on_local_change(&mut self, url: &str) -> Option<Effects> {
        let video_id = extract_video_id(url)?;
        self.current_video_id = video_id.clone();
        self.reset_for_load();

        Some(
            Self::load_from_start(video_id.clone())
                .send(Outbound::Command(Command::change(&video_id))),
        )
    }

    /// Apply a command broadcast by another viewer. Never produces outbound
    /// messages; only the player's resulting transitions may.
    pub fn on_inbound_command(&mut self, command: &Command) -> Effects {
        let Some(intent) = command.intent() else {
            tracing::warn!("Ignoring malformed command {:?}", command);
            return Effects::none();
        };

        match intent {
            Intent::Change(video_id) => {
                self.current_video_id = video_id.clone();
                self.reset_for_load();
                Self::load_from_start(video_id)
            }
            Intent::Play { seek } => match seek {
                Some(position) => {
                    self.guard.arm(EchoOf::Play, position);
                    Effects::none()
                        .op(PlayerOp::SeekTo { position })
                        .op(PlayerOp::Play)
                }
                None => Effects::none().op(PlayerOp::Play),
            },
            Intent::Pause { seek } => match seek {
                Some(position) => {
                    self.guard.arm(EchoOf::Pause, position);
                    Effects::none()
                        .op(PlayerOp::SeekTo { position })
                        .op(PlayerOp::Pause)
                }
                None => Effects::none().op(PlayerOp::Pause),
            },
            Intent::Speed => {
                tracing::debug!("Speed commands are reserved; ignoring");
                Effects::none()
            }
        }
    }

    /// Feed a player state transition through the echo filter. Returns the
    /// command to broadcast, if any.
    pub fn on_state_change(
        &mut self,
        state: PlayerState,
        position: f64,
        duration: f64,
    ) -> Option<Command> {
        match state {
            PlayerState::Playing => self.on_playing(position),
            PlayerState::Paused => self.on_paused(position, duration),
            PlayerState::Ended => {
                tracing::debug!("Playback ended at {:.2}s", position);
                self.playback = Playback::Ended;
                None
            }
            PlayerState::Buffering | PlayerState::Unstarted | PlayerState::Cued => None,
        }
    }

    fn on_playing(&mut self, position: f64) -> Option<Command> {
        self.playback = Playback::Playing;
        self.paused = false;
        let echo = self.guard.consume(EchoOf::Play, position);

        if is_anchor_start(position) {
            tracing::debug!("Started from the beginning");
            return Some(Command::play(None));
        }
        if echo {
            tracing::debug!("Suppressing echo of play at {:.2}s", position);
            None
        } else {
            Some(Command::play(Some(position)))
        }
    }

    fn on_paused(&mut self, position: f64, duration: f64) -> Option<Command> {
        self.playback = Playback::Paused;
        let echo = self.guard.consume(EchoOf::Pause, position);

        if is_end_of_stream(position, duration) {
            tracing::debug!("Paused at end of stream; not reporting");
            return None;
        }
        self.paused = true;
        if echo {
            tracing::debug!("Suppressing echo of pause at {:.2}s", position);
            None
        } else {
            Some(Command::pause(None))
        }
    }

    /// Player errors never end the session.
    pub fn on_player_error(&self, code: PlayerErrorCode) {
        tracing::warn!("Player error for {}: {}", self.current_video_id, code);
    }

    pub fn on_playback_rate_change(&self, rate: f64) {
        tracing::info!("Playback rate changed to {}", rate);
    }

    /// Seed the local player from a room snapshot received during catch-up.
    pub fn apply_snapshot(&mut self, info: &Info, now_ms: u64) -> Effects {
        let position = catch_up_position(info, now_ms);
        tracing::info!(
            "Catching up to {} at {:.2}s ({})",
            info.video_url,
            position,
            if info.paused { "paused" } else { "playing" }
        );

        self.current_video_id = info.video_url.clone();
        self.paused = info.paused;
        self.playback = Playback::Loading;
        // Loading autoplays; that transition is ours, not the user's.
        self.guard.arm(EchoOf::Play, position);

        Effects::none()
            .op(PlayerOp::Load {
                video_id: info.video_url.clone(),
                start: position,
            })
            .op(if info.paused {
                PlayerOp::Pause
            } else {
                PlayerOp::Play
            })
    }

    /// Snapshot of local playback, `position` and `now_ms` sampled together.
    pub fn snapshot(&self, position: f64, now_ms: u64) -> Info {
        Info {
            video_url: self.current_video_id.clone(),
            timestamp: now_ms,
            time: position,
            paused: self.paused,
        }
    }

    /// Answer another viewer's info request.
    pub fn on_info_requested(&self, requester: Uuid, position: f64, now_ms: u64) -> Effects {
        Effects::none().send(Outbound::Info {
            requester,
            info: self.snapshot(position, now_ms),
        })
    }

    fn reset_for_load(&mut self) {
        self.guard = EchoGuard::Idle;
        self.playback = Playback::Loading;
    }

    fn load_from_start(video_id: VideoId) -> Effects {
        // Some players resume a previously watched video mid-way, hence the seek.
        Effects::none()
            .op(PlayerOp::Load {
                video_id,
                start: 0.0,
            })
            .op(PlayerOp::SeekTo { position: 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_video() -> VideoId {
        "XIMLoLxmTDw".parse().unwrap()
    }

    fn session() -> SyncSession {
        SyncSession::new("movie-night", true, default_video())
    }

    #[test]
    fn test_ready_joins_room() {
        let mut joined = session();
        let effects = joined.on_ready();
        assert_eq!(
            effects.outbound,
            vec![Outbound::Join {
                room_id: "movie-night".into(),
                observe_only: false,
            }]
        );
        assert_eq!(effects.player, vec![PlayerOp::Play]);

        let mut observer = SyncSession::new("movie-night", false, default_video());
        let effects = observer.on_ready();
        assert_eq!(effects.player, vec![PlayerOp::Play]);
        assert!(matches!(
            effects.outbound[..],
            [Outbound::Join {
                observe_only: true,
                ..
            }]
        ));
    }

    #[test]
    fn test_local_change_broadcasts_and_loads() {
        let mut session = session();
        let effects = session.on_local_change("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let id: VideoId = "dQw4w9WgXcQ".parse().unwrap();

        assert_eq!(session.current_video_id(), &id);
        assert_eq!(
            effects.player[0],
            PlayerOp::Load {
                video_id: id.clone(),
                start: 0.0
            }
        );
        assert_eq!(effects.outbound, vec![Outbound::Command(Command::change(&id))]);
    }

    #[test]
    fn test_local_change_rejects_invalid_url() {
        let mut session = session();
        assert_eq!(session.on_local_change("https://example.com/clip.mp4"), None);
        assert_eq!(session.current_video_id(), &default_video());
        assert_eq!(session.playback(), Playback::Loading);
    }

    #[test]
    fn test_inbound_change_never_echoes() {
        let mut session = session();
        let id: VideoId = "dQw4w9WgXcQ".parse().unwrap();
        let effects = session.on_inbound_command(&Command::change(&id));

        assert!(effects.outbound.is_empty());
        assert_eq!(
            effects.player,
            vec![
                PlayerOp::Load {
                    video_id: id.clone(),
                    start: 0.0
                },
                PlayerOp::SeekTo { position: 0.0 },
            ]
        );
        assert_eq!(session.current_video_id(), &id);
    }

    #[test]
    fn test_inbound_play_without_value_just_resumes() {
        let mut session = session();
        let effects = session.on_inbound_command(&Command::play(None));
        assert_eq!(effects.player, vec![PlayerOp::Play]);
        assert!(effects.outbound.is_empty());
        assert!(!session.guard().is_armed());
    }

    #[test]
    fn test_inbound_seek_suppresses_exactly_one_echo() {
        let mut session = session();
        let effects = session.on_inbound_command(&Command::play(Some(42.0)));
        assert_eq!(
            effects.player,
            vec![PlayerOp::SeekTo { position: 42.0 }, PlayerOp::Play]
        );
        assert!(effects.outbound.is_empty());
        assert!(session.guard().is_armed());

        assert_eq!(session.on_state_change(PlayerState::Playing, 42.0, 300.0), None);
        assert!(!session.guard().is_armed());

        // The flag does not leak into the next, unrelated transition.
        assert_eq!(
            session.on_state_change(PlayerState::Playing, 80.0, 300.0),
            Some(Command::play(Some(80.0)))
        );
    }

    #[test]
    fn test_inbound_pause_with_value_suppresses_pause_echo() {
        let mut session = session();
        session.on_inbound_command(&Command::pause(Some(30.0)));
        assert_eq!(session.on_state_change(PlayerState::Paused, 30.0, 300.0), None);
        assert!(session.paused());

        assert_eq!(
            session.on_state_change(PlayerState::Paused, 31.0, 300.0),
            Some(Command::pause(None))
        );
    }

    #[test]
    fn test_mismatched_transition_disarms_without_suppressing() {
        let mut session = session();
        session.on_inbound_command(&Command::pause(Some(30.0)));
        assert_eq!(
            session.on_state_change(PlayerState::Playing, 30.0, 300.0),
            Some(Command::play(Some(30.0)))
        );
        assert!(!session.guard().is_armed());
    }

    #[test]
    fn test_second_inbound_command_replaces_pending_echo() {
        let mut session = session();
        session.on_inbound_command(&Command::play(Some(10.0)));
        session.on_inbound_command(&Command::play(Some(50.0)));

        assert_eq!(session.on_state_change(PlayerState::Playing, 50.0, 300.0), None);
        assert_eq!(
            session.on_state_change(PlayerState::Playing, 10.0, 300.0),
            Some(Command::play(Some(10.0)))
        );
    }

    #[test]
    fn test_anchor_start_sends_play_without_value() {
        let mut session = session();
        assert_eq!(
            session.on_state_change(PlayerState::Playing, 0.0, 300.0),
            Some(Command::play(None))
        );
        assert_eq!(
            session.on_state_change(PlayerState::Playing, 12.25, 300.0),
            Some(Command::play(Some(12.25)))
        );
        assert!(!session.paused());
    }

    #[test]
    fn test_end_of_stream_pause_is_silent() {
        let mut session = session();
        session.on_state_change(PlayerState::Playing, 5.0, 300.0);
        assert_eq!(session.on_state_change(PlayerState::Paused, 300.0, 300.0), None);
        assert!(!session.paused());
        assert_eq!(
            session.on_state_change(PlayerState::Paused, 120.0, 300.0),
            Some(Command::pause(None))
        );
    }

    #[test]
    fn test_ended_and_buffering_are_informational() {
        let mut session = session();
        assert_eq!(session.on_state_change(PlayerState::Buffering, 3.0, 300.0), None);
        assert_eq!(session.on_state_change(PlayerState::Ended, 300.0, 300.0), None);
        assert_eq!(session.playback(), Playback::Ended);
    }

    #[test]
    fn test_speed_is_ignored() {
        let mut session = session();
        let speed: Command = serde_json::from_str(r#"{"action":"speed"}"#).unwrap();
        assert!(session.on_inbound_command(&speed).is_empty());
    }

    #[test]
    fn test_snapshot_reports_current_state() {
        let mut session = session();
        session.on_state_change(PlayerState::Playing, 7.0, 300.0);
        let requester = Uuid::new_v4();
        let effects = session.on_info_requested(requester, 7.5, 1_000);

        assert_eq!(
            effects.outbound,
            vec![Outbound::Info {
                requester,
                info: Info {
                    video_url: default_video(),
                    timestamp: 1_000,
                    time: 7.5,
                    paused: false,
                },
            }]
        );
    }

    #[test]
    fn test_apply_snapshot_seeds_player() {
        let mut session = session();
        let id: VideoId = "dQw4w9WgXcQ".parse().unwrap();
        let info = Info {
            video_url: id.clone(),
            timestamp: 10_000,
            time: 20.0,
            paused: true,
        };
        let effects = session.apply_snapshot(&info, 12_000);

        assert_eq!(
            effects.player,
            vec![
                PlayerOp::Load {
                    video_id: id.clone(),
                    start: 22.5
                },
                PlayerOp::Pause,
            ]
        );
        assert_eq!(session.current_video_id(), &id);
        assert!(session.paused());
        // The load's own autoplay is not rebroadcast.
        assert_eq!(session.on_state_change(PlayerState::Playing, 22.5, 300.0), None);
    }
}
