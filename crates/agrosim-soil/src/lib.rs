//! Soil submodels for agrosim.
//!
//! A soil campaign is represented by a [`module::SoilModule`]: one water
//! balance plus one nutrient balance, advanced together through the
//! two-phase protocol. Three water balances exist: the layered
//! matric-flux-potential solver, the classic single-layer free-drainage
//! balance, and a potential balance that keeps the soil at field
//! capacity.
//!
//! # Modules
//!
//! - [`error`] -- Soil error taxonomy
//! - [`layer`] -- Hydraulic description of a single soil layer
//! - [`profile`] -- Ordered layers and rooting status
//! - [`layered`] -- Layered water balance with inter-layer flow
//! - [`free_drain`] -- Classic free-drainage water balance
//! - [`potential`] -- Water balance for unlimited water supply
//! - [`nutrients`] -- Soil N/P/K pools and fertiliser release
//! - [`module`] -- Water plus nutrient balance wrapper

pub mod error;
pub mod free_drain;
pub mod layer;
pub mod layered;
pub mod module;
pub mod nutrients;
pub mod potential;
pub mod profile;

pub use error::SoilError;
pub use free_drain::FreeDrainWaterBalance;
pub use layer::SoilLayer;
pub use layered::LayeredWaterBalance;
pub use module::{NutrientMode, SoilModule, SoilModuleConfig, WaterBalance, WaterMode};
pub use nutrients::{Nutrient, SoilNutrients};
pub use potential::PotentialWaterBalance;
pub use profile::{RootingStatus, SoilProfile};
