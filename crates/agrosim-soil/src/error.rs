//! Error types for the soil crate.

use chrono::NaiveDate;

use agrosim_kernel::{KioskError, ParameterError, ProtocolError};
use agrosim_types::AfgenError;

/// Errors raised by soil submodels.
#[derive(Debug, thiserror::Error)]
pub enum SoilError {
    /// A required parameter was missing or malformed.
    #[error("parameter error: {source}")]
    Parameter {
        /// Underlying parameter error.
        #[from]
        source: ParameterError,
    },

    /// A registry operation failed.
    #[error("kiosk error: {source}")]
    Kiosk {
        /// Underlying registry error.
        #[from]
        source: KioskError,
    },

    /// The two-phase protocol was violated.
    #[error("protocol error: {source}")]
    Protocol {
        /// Underlying protocol error.
        #[from]
        source: ProtocolError,
    },

    /// A hydraulic table could not be built or inverted.
    #[error("soil table error: {source}")]
    Table {
        /// Underlying table error.
        #[from]
        source: AfgenError,
    },

    /// The soil profile description is inconsistent.
    #[error("invalid soil profile: {reason}")]
    InvalidProfile {
        /// What is wrong with the profile.
        reason: String,
    },

    /// The maximum rooting depth does not fit the profile.
    #[error("maximum rooting depth {rdm} cm invalid: {reason}")]
    RootingDepth {
        /// Offending maximum rooting depth (cm).
        rdm: f64,
        /// What is wrong.
        reason: &'static str,
    },

    /// Shallow groundwater is configured but not supported.
    #[error("groundwater-influenced profiles are not supported")]
    GroundwaterUnsupported,

    /// An iterative search did not converge within its iteration budget.
    #[error(
        "{search} iteration at layer boundary {boundary} failed to converge on {day}; \
         are the retention and conductivity curves decreasing with increasing pF?"
    )]
    NonConvergence {
        /// Which search failed.
        search: &'static str,
        /// Index of the upper layer of the boundary.
        boundary: usize,
        /// Day of the failure.
        day: NaiveDate,
    },

    /// A water balance did not close at finalize.
    #[error("{scope} water balance not closing on {day} with checksum {checksum}")]
    WaterBalance {
        /// Which balance (profile, root zone, whole system).
        scope: &'static str,
        /// Day of the check.
        day: NaiveDate,
        /// Remaining imbalance (cm).
        checksum: f64,
    },

    /// A nutrient balance did not close at finalize.
    #[error("{nutrient} balance not closing on {day} with checksum {checksum}")]
    NutrientBalance {
        /// Nutrient symbol.
        nutrient: &'static str,
        /// Day of the check.
        day: NaiveDate,
        /// Remaining imbalance (kg/ha).
        checksum: f64,
    },
}
