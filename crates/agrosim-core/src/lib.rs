//! Agro-management and the simulation driver for agrosim.
//!
//! This crate turns the kernel, soil and crop crates into a runnable
//! simulation. Calendars decide when soils and crops start and finish,
//! the [`engine::Engine`] advances one day at a time through the
//! two-phase protocol, and the [`runner`] loops over days with operator
//! controls.
//!
//! # Modules
//!
//! - [`config`] -- YAML run configuration
//! - [`calendar`] -- Soil and crop calendars
//! - [`agromanager`] -- Agro-management variants over one campaign
//! - [`actions`] -- Operator-issued actions (irrigate, fertilise, plant, harvest)
//! - [`weather`] -- Validated daily weather series
//! - [`engine`] -- The day-stepping driver and its external contract
//! - [`operator`] -- Stop requests and run bounds shared with the caller
//! - [`runner`] -- The run loop

pub mod actions;
pub mod agromanager;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod operator;
pub mod runner;
pub mod weather;

pub use actions::{ExternalAction, ScheduledAction};
pub use agromanager::{AgroManagementConfig, AgroManager, AgroManagerKind};
pub use calendar::CalendarError;
pub use config::{ConfigError, RunConfig};
pub use engine::{Engine, EngineError, EngineSetup, Observation, RunSummary};
pub use operator::{OperatorState, RunEndReason};
pub use runner::{DayCallback, NoOpCallback, RunInputs, RunResult, RunnerError, run_simulation};
pub use weather::{WeatherSeries, WeatherSeriesError};
