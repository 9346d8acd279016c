//! GPS acquisition: a bounded-retry state machine over the modem's AT channel.
//!
//! ```text
//! Idle -> SessionStarted -> Polling -> Fixed | TimedOut -> SessionStopped
//!   \-> Failed --------------------------------------------^
//! ```
//!
//! Once the start command has been sent, the stop command is sent exactly
//! once: when a terminal state is stepped, or when the acquisition is dropped
//! early.

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::model::GpsFix;
use crate::modem::{self, AtChannel, GpsResponse, ModemError};

/// Polls before giving up on a fix.
pub const MAX_POLL_ATTEMPTS: u32 = 35;

/// Why no fix was acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpsError {
    #[error("no GPS fix after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("modem rejected GPS session: {0}")]
    SessionRejected(String),

    #[error("modem channel unavailable: {0}")]
    ChannelUnavailable(String),
}

impl From<ModemError> for GpsError {
    fn from(e: ModemError) -> Self {
        match e {
            ModemError::NotAcknowledged { response, .. } => {
                Self::SessionRejected(response.trim().to_string())
            }
            other => Self::ChannelUnavailable(other.to_string()),
        }
    }
}

/// Where the acquisition is.
#[derive(Debug, Clone, PartialEq)]
pub enum GpsState {
    Idle,
    SessionStarted,
    Polling { attempt: u32 },
    Fixed(GpsFix),
    TimedOut,
    Failed(GpsError),
    SessionStopped,
}

impl fmt::Display for GpsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::SessionStarted => f.write_str("session started"),
            Self::Polling { attempt } => write!(f, "polling ({attempt}/{MAX_POLL_ATTEMPTS})"),
            Self::Fixed(_) => f.write_str("fixed"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed(_) => f.write_str("failed"),
            Self::SessionStopped => f.write_str("session stopped"),
        }
    }
}

/// Sleeps between protocol steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsTiming {
    /// After the session starts, before the first poll.
    pub warmup: Duration,

    /// For the modem to answer each command.
    pub response: Duration,

    /// Between unsuccessful polls.
    pub backoff: Duration,
}

impl Default for GpsTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(2),
            response: modem::RESPONSE_WAIT,
            backoff: Duration::from_millis(1500),
        }
    }
}

#[cfg(test)]
impl GpsTiming {
    /// No sleeping at all.
    pub const IMMEDIATE: Self = Self {
        warmup: Duration::ZERO,
        response: Duration::ZERO,
        backoff: Duration::ZERO,
    };
}

/// One GPS acquisition, borrowing the AT channel for its lifetime.
pub struct GpsAcquisition<'c, C: AtChannel + ?Sized> {
    channel: &'c mut C,
    timing: GpsTiming,
    state: GpsState,
    session_open: bool,
    outcome: Option<Result<GpsFix, GpsError>>,
}

impl<'c, C: AtChannel + ?Sized> GpsAcquisition<'c, C> {
    pub fn new(channel: &'c mut C, timing: GpsTiming) -> Self {
        Self {
            channel,
            timing,
            state: GpsState::Idle,
            session_open: false,
            outcome: None,
        }
    }

    pub fn state(&self) -> &GpsState {
        &self.state
    }

    /// Advance by one transition. Stepping `SessionStopped` does nothing.
    pub fn step(&mut self) -> &GpsState {
        let next = match std::mem::replace(&mut self.state, GpsState::SessionStopped) {
            GpsState::Idle => self.start(),
            GpsState::SessionStarted => GpsState::Polling { attempt: 1 },
            GpsState::Polling { attempt } => self.poll(attempt),
            GpsState::Fixed(fix) => {
                self.outcome = Some(Ok(fix));
                self.stop();
                GpsState::SessionStopped
            }
            GpsState::TimedOut => {
                self.outcome = Some(Err(GpsError::Timeout {
                    attempts: MAX_POLL_ATTEMPTS,
                }));
                self.stop();
                GpsState::SessionStopped
            }
            GpsState::Failed(e) => {
                self.outcome = Some(Err(e));
                self.stop();
                GpsState::SessionStopped
            }
            GpsState::SessionStopped => GpsState::SessionStopped,
        };
        tracing::trace!(state = %next, "gps");
        self.state = next;
        &self.state
    }

    /// Step until the session is stopped and return the outcome.
    pub fn run(mut self) -> Result<GpsFix, GpsError> {
        while self.state != GpsState::SessionStopped {
            self.step();
        }
        self.outcome
            .take()
            .unwrap_or(Err(GpsError::ChannelUnavailable(
                "acquisition ended without an outcome".to_string(),
            )))
    }

    fn start(&mut self) -> GpsState {
        // A rejected start may still have half-opened a session.
        self.session_open = true;
        match self.channel.command(modem::START_GPS, self.timing.response) {
            Ok(_) => {
                tracing::debug!("GPS session started");
                thread::sleep(self.timing.warmup);
                GpsState::SessionStarted
            }
            Err(e) => GpsState::Failed(e.into()),
        }
    }

    fn poll(&mut self, attempt: u32) -> GpsState {
        let response = match self.channel.exchange(modem::QUERY_GPS, self.timing.response) {
            Ok(response) => response,
            Err(e) => return GpsState::Failed(GpsError::ChannelUnavailable(e.to_string())),
        };

        match modem::parse_gps_info(&response) {
            GpsResponse::Fix(fix) => {
                tracing::info!(
                    attempt,
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    "GPS fix"
                );
                return GpsState::Fixed(fix);
            }
            GpsResponse::NotReady => tracing::debug!(attempt, "no GPS fix yet"),
            GpsResponse::Malformed(text) => {
                tracing::debug!(attempt, response = %text, "malformed GPS response");
            }
        }

        if attempt >= MAX_POLL_ATTEMPTS {
            return GpsState::TimedOut;
        }
        thread::sleep(self.timing.backoff);
        GpsState::Polling {
            attempt: attempt + 1,
        }
    }

    fn stop(&mut self) {
        if !self.session_open {
            return;
        }
        self.session_open = false;
        if let Err(e) = self.channel.exchange(modem::STOP_GPS, self.timing.response) {
            tracing::warn!(error = %e, "failed to stop GPS session");
        }
    }
}

impl<C: AtChannel + ?Sized> Drop for GpsAcquisition<'_, C> {
    fn drop(&mut self) {
        self.stop();
    }
}
