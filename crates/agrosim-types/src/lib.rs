//! Shared value types for the agrosim simulation kernel.
//!
//! Everything that crosses a crate boundary lives here: identifiers,
//! daily weather records, interpolation tables, and the closed set of
//! lifecycle signals exchanged between submodels.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for runs and components
//! - [`afgen`] -- Piecewise-linear interpolation tables (AFGEN)
//! - [`weather`] -- Daily driving variables and solar astronomy
//! - [`synthetic`] -- Seeded synthetic weather series
//! - [`signal`] -- Lifecycle and management signals with typed payloads
//! - [`util`] -- Small numeric helpers shared by all submodels

pub mod afgen;
pub mod ids;
pub mod signal;
pub mod synthetic;
pub mod util;
pub mod weather;

// Re-export all public types at crate root for convenience.
pub use afgen::{AfgenError, AgeTables, Afgen};
pub use ids::{ComponentId, RunId};
pub use signal::{
    CropEndType, CropStart, CropStartType, Envelope, Irrigation, NutrientApplication, Signal,
    SignalKind, SoilStart,
};
pub use synthetic::SyntheticWeather;
pub use util::limit;
pub use weather::{Astro, WeatherError, WeatherRecord, astro, daylength};
