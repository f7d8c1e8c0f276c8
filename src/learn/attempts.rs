//! Quiz retry ladder.
//!
//! A failed submission moves a part one rung up the ladder; a pass removes the track
//! entirely. The second failure stamps `window_closed_time`, from which callers derive a
//! cooldown before the final attempt. The engine reports the cooldown but never enforces it.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::PartId;

pub const MAX_ATTEMPTS: u8 = 3;

/// Stored row for one (user, course, part).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTrack {
    pub part_id: PartId,
    pub attempt_count: u8,
    pub window_closed_time: Option<DateTime<Utc>>,
}

impl AttemptTrack {
    pub fn state(&self) -> AttemptState {
        AttemptState::from_track(self)
    }

    /// Next rung after a failed submission. Saturates at [`MAX_ATTEMPTS`] and keeps the
    /// first window stamp.
    pub fn advance(existing: Option<&AttemptTrack>, part_id: PartId, now: DateTime<Utc>) -> Self {
        let (count, window) = existing
            .map(|t| (t.attempt_count, t.window_closed_time))
            .unwrap_or((0, None));

        let window_closed_time = if count == 1 { Some(now) } else { window };

        Self {
            part_id,
            attempt_count: count.saturating_add(1).min(MAX_ATTEMPTS),
            window_closed_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttemptState {
    NoRecord,
    FirstFailure,
    SecondFailure {
        window_closed_time: Option<DateTime<Utc>>,
    },
    LockedOut {
        window_closed_time: Option<DateTime<Utc>>,
    },
}

impl AttemptState {
    pub fn from_track(track: &AttemptTrack) -> Self {
        match track.attempt_count {
            0 => Self::NoRecord,
            1 => Self::FirstFailure,
            2 => Self::SecondFailure {
                window_closed_time: track.window_closed_time,
            },
            _ => Self::LockedOut {
                window_closed_time: track.window_closed_time,
            },
        }
    }

    pub fn from_track_opt(track: Option<&AttemptTrack>) -> Self {
        track.map(Self::from_track).unwrap_or(Self::NoRecord)
    }

    pub fn attempt_count(&self) -> u8 {
        match self {
            Self::NoRecord => 0,
            Self::FirstFailure => 1,
            Self::SecondFailure { .. } => 2,
            Self::LockedOut { .. } => MAX_ATTEMPTS,
        }
    }

    pub fn window_closed_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::SecondFailure { window_closed_time } | Self::LockedOut { window_closed_time } => {
                *window_closed_time
            }
            _ => None,
        }
    }

    /// A failed part that still has attempts left.
    pub fn is_retry_candidate(&self) -> bool {
        matches!(self, Self::FirstFailure | Self::SecondFailure { .. })
    }

    pub fn is_locked_out(&self) -> bool {
        matches!(self, Self::LockedOut { .. })
    }
}

/// Retry information surfaced with a navigation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryWindow {
    pub attempt_count: u8,
    pub attempts_remaining: u8,
    pub window_closed_time: Option<DateTime<Utc>>,
    pub elapsed_seconds: Option<i64>,
    pub retry_available_at: Option<DateTime<Utc>>,
}

impl RetryWindow {
    pub fn from_state(state: &AttemptState, now: DateTime<Utc>, cooldown: Duration) -> Option<Self> {
        if matches!(state, AttemptState::NoRecord) {
            return None;
        }

        let window = state.window_closed_time();
        let retry_available_at = match state {
            AttemptState::SecondFailure {
                window_closed_time: Some(closed),
            } => Some(*closed + cooldown),
            _ => None,
        };

        Some(Self {
            attempt_count: state.attempt_count(),
            attempts_remaining: MAX_ATTEMPTS.saturating_sub(state.attempt_count()),
            window_closed_time: window,
            elapsed_seconds: window.map(|closed| (now - closed).num_seconds()),
            retry_available_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, minute, 0).unwrap()
    }

    #[test]
    fn test_ladder_stamps_window_on_second_failure() {
        let first = AttemptTrack::advance(None, 5, at(0));
        assert_eq!(first.attempt_count, 1);
        assert!(first.window_closed_time.is_none());

        let second = AttemptTrack::advance(Some(&first), 5, at(2));
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.window_closed_time, Some(at(2)));

        let third = AttemptTrack::advance(Some(&second), 5, at(9));
        assert_eq!(third.attempt_count, 3);
        assert_eq!(third.window_closed_time, Some(at(2)));

        let saturated = AttemptTrack::advance(Some(&third), 5, at(20));
        assert_eq!(saturated.attempt_count, 3);
        assert_eq!(saturated.window_closed_time, Some(at(2)));
    }

    #[test]
    fn test_state_classification() {
        assert_eq!(AttemptState::from_track_opt(None), AttemptState::NoRecord);

        let locked = AttemptTrack {
            part_id: 1,
            attempt_count: 3,
            window_closed_time: Some(at(1)),
        };
        assert!(locked.state().is_locked_out());
        assert!(!locked.state().is_retry_candidate());

        let first = AttemptTrack {
            part_id: 1,
            attempt_count: 1,
            window_closed_time: None,
        };
        assert!(first.state().is_retry_candidate());
    }

    #[test]
    fn test_retry_window_reports_cooldown() {
        let state = AttemptState::SecondFailure {
            window_closed_time: Some(at(0)),
        };
        let window = RetryWindow::from_state(&state, at(3), Duration::seconds(300)).unwrap();
        assert_eq!(window.attempts_remaining, 1);
        assert_eq!(window.elapsed_seconds, Some(180));
        assert_eq!(window.retry_available_at, Some(at(5)));

        assert!(RetryWindow::from_state(&AttemptState::NoRecord, at(3), Duration::seconds(300))
            .is_none());
    }
}
