//! Parameters that may vary with crop age.
//!
//! Annual crops give a plain number (for example `CVL = 0.685`). Perennial
//! crops may give the same parameter as an interpolation table over the
//! age of the crop in years (`CVL = [1, 0.68, 10, 0.72]`). [`AgeCurve`]
//! accepts both, so the submodels never branch on the crop variant.

use agrosim_kernel::{Kiosk, ParamValue, ParameterError, ParameterProvider};
use agrosim_types::Afgen;

/// Kiosk name of the crop age published by perennial phenology.
pub const AGE: &str = "AGE";

/// A number, or a table of that number over crop age.
#[derive(Debug, Clone, PartialEq)]
pub enum AgeCurve {
    /// Same value at every age.
    Constant(f64),
    /// Interpolated over age in years.
    ByAge(Afgen),
}

impl AgeCurve {
    /// Read parameter `name` as a number or an age table.
    pub fn read(params: &ParameterProvider, name: &str) -> Result<Self, ParameterError> {
        match params.get(name) {
            Some(ParamValue::Table(_)) => Ok(Self::ByAge(params.table(name)?)),
            _ => Ok(Self::Constant(params.number(name)?)),
        }
    }

    /// Value at `age` years.
    pub fn at(&self, age: u32) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::ByAge(table) => table.eval(f64::from(age)),
        }
    }
}

/// Current crop age class; annual crops have no age and are class 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn crop_age(kiosk: &Kiosk) -> u32 {
    kiosk
        .find_scalar(AGE)
        .map_or(0, |age| age.clamp(0.0, f64::from(u32::MAX)) as u32)
}
