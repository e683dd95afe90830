use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::youtube::VideoId;

/// Playback quality hint passed through to the player on load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Default,
    Small,
    Medium,
    Large,
    Hd720,
    Hd1080,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Default => "default",
            Quality::Small => "small",
            Quality::Medium => "medium",
            Quality::Large => "large",
            Quality::Hd720 => "hd720",
            Quality::Hd1080 => "hd1080",
        }
    }
}

impl FromStr for Quality {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Quality::Default),
            "small" => Ok(Quality::Small),
            "medium" => Ok(Quality::Medium),
            "large" => Ok(Quality::Large),
            "hd720" => Ok(Quality::Hd720),
            "hd1080" => Ok(Quality::Hd1080),
            other => Err(PlayerError::UnknownQuality(other.to_string())),
        }
    }
}

/// Player state as reported by the embedded player. Adapters wrapping a
/// player that reports raw numeric codes translate them with
/// [`PlayerState::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(PlayerState::Unstarted),
            0 => Some(PlayerState::Ended),
            1 => Some(PlayerState::Playing),
            2 => Some(PlayerState::Paused),
            3 => Some(PlayerState::Buffering),
            5 => Some(PlayerState::Cued),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            PlayerState::Unstarted => -1,
            PlayerState::Ended => 0,
            PlayerState::Playing => 1,
            PlayerState::Paused => 2,
            PlayerState::Buffering => 3,
            PlayerState::Cued => 5,
        }
    }
}

/// Error codes delivered through the player's error event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorCode {
    InvalidParameter,
    Html5,
    NotFound,
    EmbedRestricted,
    Other(i32),
}

impl PlayerErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => PlayerErrorCode::InvalidParameter,
            5 => PlayerErrorCode::Html5,
            100 => PlayerErrorCode::NotFound,
            101 | 150 => PlayerErrorCode::EmbedRestricted,
            other => PlayerErrorCode::Other(other),
        }
    }
}

impl fmt::Display for PlayerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerErrorCode::InvalidParameter => f.write_str("invalid parameter"),
            PlayerErrorCode::Html5 => f.write_str("html5 player error"),
            PlayerErrorCode::NotFound => f.write_str("video not found"),
            PlayerErrorCode::EmbedRestricted => f.write_str("embedding not allowed"),
            PlayerErrorCode::Other(code) => write!(f, "player error {code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    #[error("no video loaded")]
    NoVideo,
    #[error("unknown quality {0:?}")]
    UnknownQuality(String),
}

/// Events emitted by a single local player instance
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready,
    /// `position` and `duration` are sampled when the transition fired.
    StateChange {
        state: PlayerState,
        position: f64,
        duration: f64,
    },
    Error(PlayerErrorCode),
    PlaybackRateChange(f64),
}

/// Operations the sync engine needs from a local player.
///
/// Implementations report state changes through their own event stream
/// ([`PlayerEvent`]); the methods here never call back into the engine.
pub trait PlayerAdapter {
    fn load_video_by_id(
        &self,
        id: &VideoId,
        start_seconds: f64,
        quality: Quality,
    ) -> Result<(), PlayerError>;
    fn play_video(&self) -> Result<(), PlayerError>;
    fn pause_video(&self) -> Result<(), PlayerError>;
    fn seek_to(&self, seconds: f64, allow_seek_ahead: bool) -> Result<(), PlayerError>;
    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
}

impl<T: PlayerAdapter + ?Sized> PlayerAdapter for Arc<T> {
    fn load_video_by_id(
        &self,
        id: &VideoId,
        start_seconds: f64,
        quality: Quality,
    ) -> Result<(), PlayerError> {
        (**self).load_video_by_id(id, start_seconds, quality)
    }

    fn play_video(&self) -> Result<(), PlayerError> {
        (**self).play_video()
    }

    fn pause_video(&self) -> Result<(), PlayerError> {
        (**self).pause_video()
    }

    fn seek_to(&self, seconds: f64, allow_seek_ahead: bool) -> Result<(), PlayerError> {
        (**self).seek_to(seconds, allow_seek_ahead)
    }

    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn duration(&self) -> f64 {
        (**self).duration()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

struct RuntimeInner {
    state: InitState,
    callbacks: Vec<ReadyCallback>,
}

/// Tracks one-time initialization of the player runtime shared by every
/// player instance in the process.
pub struct PlayerRuntime {
    inner: Mutex<RuntimeInner>,
}

static GLOBAL_RUNTIME: Lazy<PlayerRuntime> = Lazy::new(PlayerRuntime::new);

impl PlayerRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeInner {
                state: InitState::Uninitialized,
                callbacks: Vec::new(),
            }),
        }
    }

    pub fn global() -> &'static PlayerRuntime {
        &GLOBAL_RUNTIME
    }

    pub fn state(&self) -> InitState {
        self.inner.lock().state
    }

    /// Claim the initialization. Returns `true` for exactly one caller; every
    /// other caller should wait through [`PlayerRuntime::on_ready`].
    pub fn begin_init(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == InitState::Uninitialized {
            inner.state = InitState::Initializing;
            true
        } else {
            false
        }
    }

    /// Run `callback` once the runtime is ready, immediately if it already is.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state == InitState::Ready {
            drop(inner);
            callback();
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    pub fn mark_ready(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state == InitState::Ready {
                return;
            }
            inner.state = InitState::Ready;
            std::mem::take(&mut inner.callbacks)
        };
        tracing::debug!("Player runtime ready, running {} callbacks", callbacks.len());
        // Callbacks run outside the lock so they may register more work.
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for PlayerRuntime {
    fn default() -> Self {
        Self::new()
    }
}
