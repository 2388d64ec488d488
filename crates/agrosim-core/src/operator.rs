//! Operator control state shared between the run loop and its caller.
//!
//! The run loop executes on a blocking thread; the caller (for example a
//! Ctrl-C handler in the binary) holds the same [`OperatorState`] behind an
//! [`std::sync::Arc`] and may request a stop at any time. The request is
//! honoured between days, never in the middle of one.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SimulationBoundsConfig;

/// Reason why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// The simulation received a `Terminate` signal.
    Terminated,
    /// The configured horizon day was simulated.
    HorizonReached,
    /// Reached the configured `max_days` limit.
    MaxDaysReached,
    /// No weather record for the next day.
    WeatherExhausted,
    /// An operator issued a stop command.
    OperatorStop,
}

impl RunEndReason {
    /// Short name for logging.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::HorizonReached => "horizon_reached",
            Self::MaxDaysReached => "max_days_reached",
            Self::WeatherExhausted => "weather_exhausted",
            Self::OperatorStop => "operator_stop",
        }
    }
}

/// Shared operator control state.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wall-clock time when the run started.
    started_at: DateTime<Utc>,

    /// Maximum number of days (0 = unlimited).
    max_days: u64,
}

impl OperatorState {
    /// Create operator state from the simulation bounds.
    pub fn new(bounds: &SimulationBoundsConfig) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            started_at: Utc::now(),
            max_days: bounds.max_days,
        }
    }

    /// Request a clean stop after the current day.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Check whether the day limit has been reached.
    ///
    /// Returns `true` if `max_days > 0` and `days_run >= max_days`.
    pub const fn day_limit_reached(&self, days_run: u64) -> bool {
        self.max_days > 0 && days_run >= self.max_days
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed milliseconds since the run started.
    pub fn elapsed_ms(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Get the configured max days.
    pub const fn max_days(&self) -> u64 {
        self.max_days
    }
}
