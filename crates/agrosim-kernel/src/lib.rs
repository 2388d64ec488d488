//! Simulation kernel for agrosim.
//!
//! Independently written submodels cooperate through this crate without
//! holding references to one another: they share named values through the
//! [`kiosk::Kiosk`], read parameters from the layered
//! [`parameters::ParameterProvider`], exchange lifecycle signals through the
//! [`dispatcher::Dispatcher`], and all obey the two-phase
//! [`protocol::SimulationObject`] contract.
//!
//! # Modules
//!
//! - [`kiosk`] -- Owner-tracked shared variable registry with typed handles
//! - [`parameters`] -- Layered parameter lookup (override, site, timer, crop)
//! - [`dispatcher`] -- Synchronous, ordered, re-entrant signal dispatch
//! - [`protocol`] -- The `calc_rates` / `integrate` contract and its guard

pub mod dispatcher;
pub mod kiosk;
pub mod parameters;
pub mod protocol;

pub use dispatcher::{DEFAULT_RECURSION_LIMIT, DispatchError, Dispatcher, HandlerId, Outbox};
pub use kiosk::{Handle, Kiosk, KioskError, KioskValue, Value, VarKind};
pub use parameters::{
    CropLibrary, ParamSet, ParamValue, ParameterBundle, ParameterError, ParameterProvider,
    SoilLibrary,
};
pub use protocol::{DayContext, Lifecycle, LifecycleState, ProtocolError, SimulationObject};
