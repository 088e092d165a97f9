//! Event window state machine.
//!
//! An event opens on the first trigger frame and stays open until more than
//! `timeout` has passed since the last trigger. The timeout is checked first on
//! every frame, so a trigger frame arriving after the timeout closes the old
//! event and is consumed; the next trigger frame opens a new one.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    Recording {
        started_at: DateTime<Utc>,
        last_trigger: DateTime<Utc>,
    },
}

/// What the caller must do with the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// Idle and no trigger: drop the frame.
    Ignore,
    /// A new event opened: clear the buffer and append the frame.
    Start,
    /// Still recording: append the frame.
    Continue,
    /// The event timed out: snapshot and dispatch the buffer, drop the frame.
    End { started_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct EventWindowTracker {
    timeout: chrono::Duration,
    state: WindowState,
}

impl EventWindowTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX),
            state: WindowState::Idle,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, WindowState::Recording { .. })
    }

    /// Advance the state machine by one frame.
    pub fn observe(&mut self, trigger_present: bool, now: DateTime<Utc>) -> WindowDecision {
        match self.state {
            WindowState::Idle if trigger_present => {
                self.state = WindowState::Recording {
                    started_at: now,
                    last_trigger: now,
                };
                WindowDecision::Start
            }
            WindowState::Idle => WindowDecision::Ignore,
            WindowState::Recording {
                started_at,
                last_trigger,
            } => {
                if now.signed_duration_since(last_trigger) > self.timeout {
                    self.state = WindowState::Idle;
                    return WindowDecision::End { started_at };
                }
                if trigger_present {
                    self.state = WindowState::Recording {
                        started_at,
                        last_trigger: now,
                    };
                }
                WindowDecision::Continue
            }
        }
    }

    /// Close an open event regardless of the timeout.
    ///
    /// Returns the start time of the closed event, if one was open.
    pub fn force_close(&mut self) -> Option<DateTime<Utc>> {
        match std::mem::replace(&mut self.state, WindowState::Idle) {
            WindowState::Recording { started_at, .. } => Some(started_at),
            WindowState::Idle => None,
        }
    }
}
