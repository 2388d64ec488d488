//! The two-phase simulation object protocol.
//!
//! Every stateful submodel implements [`SimulationObject`]. On each
//! simulated day the engine first calls `calc_rates` on the whole
//! component tree and then `integrate` on the same tree. Rates are
//! computed from a single consistent state snapshot before any state
//! changes.
//!
//! The [`Lifecycle`] guard embedded in each object turns protocol misuse
//! into a descriptive [`ProtocolError`] instead of silently corrupting
//! state.

use chrono::NaiveDate;

use agrosim_types::WeatherRecord;

use crate::dispatcher::Outbox;
use crate::kiosk::Kiosk;

/// Contract violations detected by [`Lifecycle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A call arrived before the object was initialized.
    #[error("{component}: not initialized")]
    NotInitialized {
        /// Component name.
        component: &'static str,
    },

    /// `integrate` without a same-day `calc_rates`.
    #[error("{component}: integrate on {day} without calc_rates for that day")]
    RatesNotComputed {
        /// Component name.
        component: &'static str,
        /// Day of the offending call.
        day: NaiveDate,
    },

    /// A second `calc_rates` for the same day.
    #[error("{component}: calc_rates called twice on {day}")]
    RatesAlreadyComputed {
        /// Component name.
        component: &'static str,
        /// Day of the offending call.
        day: NaiveDate,
    },

    /// Any call after `finalize`.
    #[error("{component}: already finalized")]
    AlreadyFinalized {
        /// Component name.
        component: &'static str,
    },
}

/// Lifecycle state of a simulation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed but not yet initialized.
    Uninitialized,
    /// Accepting daily `calc_rates` / `integrate` calls.
    Active,
    /// Finalized; no further calls accepted.
    Finalized,
}

/// Tracks protocol state for one simulation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    component: &'static str,
    state: LifecycleState,
    rates_for: Option<NaiveDate>,
}

impl Lifecycle {
    /// A fresh, uninitialized guard for `component`.
    pub const fn new(component: &'static str) -> Self {
        Self {
            component,
            state: LifecycleState::Uninitialized,
            rates_for: None,
        }
    }

    /// A guard that is already active.
    pub const fn active(component: &'static str) -> Self {
        Self {
            component,
            state: LifecycleState::Active,
            rates_for: None,
        }
    }

    /// Current state.
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Component name used in errors.
    pub const fn component(&self) -> &'static str {
        self.component
    }

    /// Transition to `Active`.
    pub const fn activate(&mut self) -> Result<(), ProtocolError> {
        if matches!(self.state, LifecycleState::Finalized) {
            return Err(ProtocolError::AlreadyFinalized {
                component: self.component,
            });
        }
        self.state = LifecycleState::Active;
        self.rates_for = None;
        Ok(())
    }

    const fn require_active(&self) -> Result<(), ProtocolError> {
        match self.state {
            LifecycleState::Uninitialized => Err(ProtocolError::NotInitialized {
                component: self.component,
            }),
            LifecycleState::Finalized => Err(ProtocolError::AlreadyFinalized {
                component: self.component,
            }),
            LifecycleState::Active => Ok(()),
        }
    }

    /// Guard the start of `calc_rates` for `day`.
    pub fn begin_rates(&mut self, day: NaiveDate) -> Result<(), ProtocolError> {
        self.require_active()?;
        if self.rates_for == Some(day) {
            return Err(ProtocolError::RatesAlreadyComputed {
                component: self.component,
                day,
            });
        }
        self.rates_for = Some(day);
        Ok(())
    }

    /// Guard the start of `integrate` for `day`. Consumes the rates.
    pub fn begin_integrate(&mut self, day: NaiveDate) -> Result<(), ProtocolError> {
        self.require_active()?;
        if self.rates_for != Some(day) {
            return Err(ProtocolError::RatesNotComputed {
                component: self.component,
                day,
            });
        }
        self.rates_for = None;
        Ok(())
    }

    /// Whether rates have been computed and not yet integrated.
    pub const fn has_pending_rates(&self) -> bool {
        self.rates_for.is_some()
    }

    /// Transition to `Finalized`.
    pub fn finalize(&mut self) -> Result<(), ProtocolError> {
        self.require_active()?;
        self.state = LifecycleState::Finalized;
        self.rates_for = None;
        Ok(())
    }

    /// Back to `Active` with no pending rates.
    pub const fn reset(&mut self) {
        self.state = LifecycleState::Active;
        self.rates_for = None;
    }
}

/// Everything a simulation object may touch during one call.
#[derive(Debug)]
pub struct DayContext<'a> {
    /// Current simulated day.
    pub day: NaiveDate,
    /// Shared variable registry.
    pub kiosk: &'a mut Kiosk,
    /// Signals to send once the current phase completes.
    pub outbox: &'a mut Outbox,
}

impl<'a> DayContext<'a> {
    /// Bundle the per-call context.
    pub const fn new(day: NaiveDate, kiosk: &'a mut Kiosk, outbox: &'a mut Outbox) -> Self {
        Self { day, kiosk, outbox }
    }
}

/// The two-phase contract every stateful submodel obeys.
pub trait SimulationObject {
    /// Error type of this object; must absorb protocol violations.
    type Error: From<ProtocolError>;

    /// Compute rates from current state, registry values and weather.
    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), Self::Error>;

    /// Apply the rates computed for the same day to produce new state.
    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), Self::Error>;

    /// Close the object, checking accumulated balances.
    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), Self::Error>;

    /// Return to the initial state for a fresh run.
    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), Self::Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 5, d).unwrap()
    }

    #[test]
    fn normal_day_cycle() {
        let mut guard = Lifecycle::new("test");
        guard.activate().unwrap();
        guard.begin_rates(day(1)).unwrap();
        assert!(guard.has_pending_rates());
        guard.begin_integrate(day(1)).unwrap();
        guard.begin_rates(day(2)).unwrap();
        guard.begin_integrate(day(2)).unwrap();
        guard.finalize().unwrap();
        assert_eq!(guard.state(), LifecycleState::Finalized);
    }

    #[test]
    fn calls_before_initialize_fail() {
        let mut guard = Lifecycle::new("phenology");
        assert_eq!(
            guard.begin_rates(day(1)).unwrap_err(),
            ProtocolError::NotInitialized {
                component: "phenology"
            }
        );
    }

    #[test]
    fn integrate_without_rates_fails() {
        let mut guard = Lifecycle::active("soil");
        assert!(matches!(
            guard.begin_integrate(day(1)),
            Err(ProtocolError::RatesNotComputed { .. })
        ));
        guard.begin_rates(day(1)).unwrap();
        assert!(matches!(
            guard.begin_integrate(day(2)),
            Err(ProtocolError::RatesNotComputed { .. })
        ));
    }

    #[test]
    fn double_integrate_fails() {
        let mut guard = Lifecycle::active("soil");
        guard.begin_rates(day(1)).unwrap();
        guard.begin_integrate(day(1)).unwrap();
        assert!(guard.begin_integrate(day(1)).is_err());
    }

    #[test]
    fn double_rates_fails() {
        let mut guard = Lifecycle::active("crop");
        guard.begin_rates(day(3)).unwrap();
        assert!(matches!(
            guard.begin_rates(day(3)),
            Err(ProtocolError::RatesAlreadyComputed { .. })
        ));
    }

    #[test]
    fn nothing_after_finalize() {
        let mut guard = Lifecycle::active("crop");
        guard.finalize().unwrap();
        assert!(matches!(
            guard.begin_rates(day(1)),
            Err(ProtocolError::AlreadyFinalized { .. })
        ));
        assert!(guard.finalize().is_err());
        assert!(guard.activate().is_err());
        guard.reset();
        assert!(guard.begin_rates(day(1)).is_ok());
    }
}
