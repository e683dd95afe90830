use std::time::{Duration, Instant};

use crate::protocol::Info;

/// Fixed allowance for local player initialization on top of transit time.
pub const LOADING_DELAY_SECS: f64 = 0.5;

/// Position to load at so a late joiner lands where the sender is now.
pub fn catch_up_position(info: &Info, now_ms: u64) -> f64 {
    let elapsed_ms = now_ms as f64 - info.timestamp as f64;
    info.time + elapsed_ms / 1000.0 + LOADING_DELAY_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpState {
    Idle,
    /// Observe-only viewers never ask for a snapshot.
    Skipped,
    Awaiting { since: Instant, warned: bool },
    Settled,
}

/// One-shot late-join exchange: ask once, take the first answer.
#[derive(Debug)]
pub struct CatchUp {
    state: CatchUpState,
}

impl CatchUp {
    pub fn new() -> Self {
        Self {
            state: CatchUpState::Idle,
        }
    }

    pub fn state(&self) -> CatchUpState {
        self.state
    }

    /// Returns `true` when an info request should go out.
    pub fn begin(&mut self, joined: bool) -> bool {
        if self.state != CatchUpState::Idle {
            return false;
        }
        if joined {
            self.state = CatchUpState::Awaiting {
                since: Instant::now(),
                warned: false,
            };
            true
        } else {
            tracing::info!("Watching without sync; skipping catch-up");
            self.state = CatchUpState::Skipped;
            false
        }
    }

    /// First responder wins; later snapshots are dropped.
    pub fn accept(&mut self, info: Info) -> Option<Info> {
        match self.state {
            CatchUpState::Awaiting { since, .. } => {
                tracing::debug!(
                    "Snapshot received after {:.0}ms",
                    since.elapsed().as_secs_f64() * 1000.0
                );
                self.state = CatchUpState::Settled;
                Some(info)
            }
            _ => {
                tracing::debug!("Ignoring snapshot of {} (catch-up not pending)", info.video_url);
                None
            }
        }
    }

    /// Log once when no snapshot arrived within `after`. The viewer keeps
    /// running unsynchronized either way.
    pub fn check_overdue(&mut self, after: Duration) -> bool {
        if let CatchUpState::Awaiting { since, warned } = &mut self.state {
            if !*warned && since.elapsed() >= after {
                *warned = true;
                tracing::warn!(
                    "No room snapshot after {}s; continuing unsynchronized",
                    after.as_secs()
                );
                return true;
            }
        }
        false
    }
}

impl Default for CatchUp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(timestamp: u64, time: f64) -> Info {
        Info {
            video_url: "dQw4w9WgXcQ".parse().unwrap(),
            timestamp,
            time,
            paused: false,
        }
    }

    #[test]
    fn test_position_arithmetic() {
        let cases = [
            (1_000_000, 10.0, 1_000_000, 10.5),
            (1_000_000, 10.0, 1_001_500, 12.0),
            (5_000, 0.0, 5_250, 0.75),
            (1_700_000_000_000, 123.456, 1_700_000_000_789, 124.745),
        ];
        for (t0, p, t1, expected) in cases {
            let got = catch_up_position(&info(t0, p), t1);
            assert!((got - expected).abs() < 1e-9, "{got} != {expected}");
        }
    }

    #[test]
    fn test_first_response_wins() {
        let mut catch_up = CatchUp::new();
        assert!(catch_up.begin(true));
        assert!(!catch_up.begin(true));

        assert_eq!(catch_up.accept(info(1, 1.0)), Some(info(1, 1.0)));
        assert_eq!(catch_up.accept(info(2, 2.0)), None);
        assert_eq!(catch_up.state(), CatchUpState::Settled);
    }

    #[test]
    fn test_observe_only_skips() {
        let mut catch_up = CatchUp::new();
        assert!(!catch_up.begin(false));
        assert_eq!(catch_up.state(), CatchUpState::Skipped);
        assert_eq!(catch_up.accept(info(1, 1.0)), None);
    }

    #[test]
    fn test_overdue_warns_once() {
        let mut catch_up = CatchUp::new();
        catch_up.begin(true);
        assert!(catch_up.check_overdue(Duration::ZERO));
        assert!(!catch_up.check_overdue(Duration::ZERO));

        let mut idle = CatchUp::new();
        assert!(!idle.check_overdue(Duration::ZERO));
    }
}
