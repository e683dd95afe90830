use parking_lot::Mutex;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::player::{PlayerAdapter, PlayerError, PlayerEvent, PlayerState, Quality};
use crate::youtube::VideoId;

/// In-process player that simulates a playback clock instead of rendering.
///
/// Loading a video autoplays it, like the embedded player does. Seeks are
/// instantaneous and do not emit buffering transitions.
pub struct HeadlessPlayer {
    inner: Mutex<HeadlessState>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

struct HeadlessState {
    video: Option<VideoId>,
    state: PlayerState,
    /// Position at `resumed_at`, or the frozen position while not playing.
    base_position: f64,
    resumed_at: Option<Instant>,
    duration: f64,
}

impl HeadlessState {
    fn position(&self) -> f64 {
        let elapsed = self
            .resumed_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (self.base_position + elapsed).min(self.duration)
    }

    fn freeze(&mut self) {
        self.base_position = self.position();
        self.resumed_at = None;
    }
}

impl HeadlessPlayer {
    /// Every loaded video is assumed to be `duration` seconds long.
    pub fn new(duration: f64) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let player = Self {
            inner: Mutex::new(HeadlessState {
                video: None,
                state: PlayerState::Unstarted,
                base_position: 0.0,
                resumed_at: None,
                duration: duration.max(0.0),
            }),
            events,
        };
        (player, rx)
    }

    /// Load a video without starting it, as the embedded player does when
    /// created with an initial video.
    pub fn cue_video_by_id(&self, id: &VideoId) {
        let mut inner = self.inner.lock();
        inner.video = Some(id.clone());
        inner.base_position = 0.0;
        inner.resumed_at = None;
        self.transition(&mut inner, PlayerState::Cued);
    }

    /// Announce readiness, as the embedded player does once its iframe loads.
    pub fn announce_ready(&self) {
        self.emit(PlayerEvent::Ready);
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().state
    }

    pub fn video(&self) -> Option<VideoId> {
        self.inner.lock().video.clone()
    }

    /// Emit `Ended` once playback has run past the duration.
    pub fn poll_end(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PlayerState::Playing && inner.position() >= inner.duration {
            inner.freeze();
            self.transition(&mut inner, PlayerState::Ended);
        }
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.emit(PlayerEvent::PlaybackRateChange(rate));
    }

    /// Callers set or freeze `base_position` first, so it is the position at
    /// the instant of the transition.
    fn transition(&self, inner: &mut HeadlessState, state: PlayerState) {
        inner.state = state;
        self.emit(PlayerEvent::StateChange {
            state,
            position: inner.base_position,
            duration: inner.duration,
        });
    }

    fn emit(&self, event: PlayerEvent) {
        // The receiver is gone only when the viewer has shut down.
        let _ = self.events.send(event);
    }
}

impl PlayerAdapter for HeadlessPlayer {
    fn load_video_by_id(
        &self,
        id: &VideoId,
        start_seconds: f64,
        quality: Quality,
    ) -> Result<(), PlayerError> {
        tracing::debug!("Loading {} at {:.2}s ({})", id, start_seconds, quality.as_str());
        let mut inner = self.inner.lock();
        inner.video = Some(id.clone());
        inner.base_position = start_seconds.clamp(0.0, inner.duration);
        inner.resumed_at = Some(Instant::now());
        self.transition(&mut inner, PlayerState::Playing);
        Ok(())
    }

    fn play_video(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if inner.video.is_none() {
            return Err(PlayerError::NoVideo);
        }
        if inner.state != PlayerState::Playing {
            if inner.state == PlayerState::Ended {
                inner.base_position = 0.0;
            }
            inner.resumed_at = Some(Instant::now());
            self.transition(&mut inner, PlayerState::Playing);
        }
        Ok(())
    }

    fn pause_video(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if inner.video.is_none() {
            return Err(PlayerError::NoVideo);
        }
        if inner.state == PlayerState::Playing {
            inner.freeze();
            self.transition(&mut inner, PlayerState::Paused);
        }
        Ok(())
    }

    fn seek_to(&self, seconds: f64, _allow_seek_ahead: bool) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if inner.video.is_none() {
            return Err(PlayerError::NoVideo);
        }
        inner.base_position = seconds.clamp(0.0, inner.duration);
        if inner.resumed_at.is_some() {
            inner.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.inner.lock().position()
    }

    fn duration(&self) -> f64 {
        self.inner.lock().duration
    }
}
