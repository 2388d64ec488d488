//! Error types for the crop crate.

use chrono::NaiveDate;

use agrosim_kernel::{KioskError, ParameterError, ProtocolError};
use agrosim_types::AfgenError;

/// Errors raised by crop submodels.
#[derive(Debug, thiserror::Error)]
pub enum CropError {
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

    /// An interpolation table could not be built.
    #[error("crop table error: {source}")]
    Table {
        /// Underlying table error.
        #[from]
        source: AfgenError,
    },

    /// A parameter has a value the crop cannot work with.
    #[error("invalid crop parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Partitioning factors do not add up to one.
    #[error(
        "partitioning error on {day}: checksum {checksum}, \
         FR {fr:.3} FL {fl:.3} FS {fs:.3} FO {fo:.3}"
    )]
    Partitioning {
        /// Day of the check.
        day: NaiveDate,
        /// `FR + (FL + FS + FO)(1 - FR) - 1`.
        checksum: f64,
        /// Fraction to roots.
        fr: f64,
        /// Fraction to leaves.
        fl: f64,
        /// Fraction to stems.
        fs: f64,
        /// Fraction to storage organs.
        fo: f64,
    },

    /// Initial biomass was not distributed completely over the organs.
    #[error("initial biomass TDWI {tdwi} not distributed over organs, checksum {checksum}")]
    InitialBiomass {
        /// Total initial dry weight (kg/ha).
        tdwi: f64,
        /// Undistributed remainder (kg/ha).
        checksum: f64,
    },

    /// Carbon flows did not balance.
    #[error("carbon flows not balanced on {day}: checksum {checksum}, GASS {gass}, MRES {mres}")]
    CarbonBalance {
        /// Day of the check.
        day: NaiveDate,
        /// Relative imbalance.
        checksum: f64,
        /// Gross assimilation (kg CH2O/ha/day).
        gass: f64,
        /// Maintenance respiration (kg CH2O/ha/day).
        mres: f64,
    },

    /// A crop nutrient balance did not close at finalize.
    #[error("crop {nutrient} balance not closing on {day} with checksum {checksum}")]
    NutrientBalance {
        /// Nutrient symbol.
        nutrient: &'static str,
        /// Day of the check.
        day: NaiveDate,
        /// Remaining imbalance (kg/ha).
        checksum: f64,
    },

    /// Phenology was asked for something its state cannot do.
    #[error("phenology error on {day}: {reason}")]
    Phenology {
        /// Day of the failure.
        day: NaiveDate,
        /// What went wrong.
        reason: &'static str,
    },
}
