//! Daily driving variables and solar astronomy.
//!
//! A [`WeatherRecord`] is the opaque read-only input handed to every
//! submodel for one simulated day. Radiation is in J/m2/day, temperatures
//! in degrees Celsius, and rainfall plus reference evapotranspiration in
//! cm/day.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use core::f64::consts::PI;

const RAD: f64 = PI / 180.0;

/// Sun elevation (degrees) used for photoperiodic day length.
pub const PHOTOPERIOD_ANGLE: f64 = -4.0;

/// Errors raised when validating a weather record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    /// Minimum temperature above maximum temperature.
    #[error("weather on {day}: tmin {tmin} exceeds tmax {tmax}")]
    TemperatureOrder {
        /// Day of the record.
        day: NaiveDate,
        /// Minimum temperature.
        tmin: f64,
        /// Maximum temperature.
        tmax: f64,
    },

    /// A quantity that can only be non-negative was negative.
    #[error("weather on {day}: {field} must not be negative, got {value}")]
    Negative {
        /// Day of the record.
        day: NaiveDate,
        /// Name of the offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Latitude outside `[-90, 90]`.
    #[error("weather on {day}: latitude {lat} out of range")]
    Latitude {
        /// Day of the record.
        day: NaiveDate,
        /// Offending latitude.
        lat: f64,
    },
}

/// One day of weather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Calendar day.
    pub day: NaiveDate,
    /// Latitude of the site in degrees.
    pub lat: f64,
    /// Global radiation (J/m2/day).
    pub irrad: f64,
    /// Minimum temperature (C).
    pub tmin: f64,
    /// Maximum temperature (C).
    pub tmax: f64,
    /// Vapour pressure (hPa).
    #[serde(default)]
    pub vap: f64,
    /// Mean wind speed at 2 m (m/s).
    #[serde(default)]
    pub wind: f64,
    /// Rainfall (cm/day).
    pub rain: f64,
    /// Potential evaporation from open water (cm/day).
    pub e0: f64,
    /// Potential evaporation from bare soil (cm/day).
    pub es0: f64,
    /// Potential reference canopy transpiration (cm/day).
    pub et0: f64,
}

impl WeatherRecord {
    /// Mean daily temperature.
    pub fn temp(&self) -> f64 {
        f64::midpoint(self.tmin, self.tmax)
    }

    /// Mean daytime temperature.
    pub fn dtemp(&self) -> f64 {
        f64::midpoint(self.tmax, self.temp())
    }

    /// Check physical plausibility of the record.
    pub fn validate(&self) -> Result<(), WeatherError> {
        if self.tmin > self.tmax {
            return Err(WeatherError::TemperatureOrder {
                day: self.day,
                tmin: self.tmin,
                tmax: self.tmax,
            });
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(WeatherError::Latitude {
                day: self.day,
                lat: self.lat,
            });
        }
        for (field, value) in [
            ("irrad", self.irrad),
            ("rain", self.rain),
            ("e0", self.e0),
            ("es0", self.es0),
            ("et0", self.et0),
        ] {
            if value < 0.0 {
                return Err(WeatherError::Negative {
                    day: self.day,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Astronomical quantities for a day and latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Astro {
    /// Astronomical day length (hours).
    pub dayl: f64,
    /// Photoperiodic day length (hours).
    pub daylp: f64,
    /// Seasonal offset of sine of solar height.
    pub sinld: f64,
    /// Amplitude of sine of solar height.
    pub cosld: f64,
    /// Diffuse irradiation perpendicular to the direction of light (J/m2/s).
    pub difpp: f64,
    /// Atmospheric transmission coefficient.
    pub atmtr: f64,
    /// Daily integral of sine of solar height, corrected for atmospheric
    /// transmission.
    pub dsinbe: f64,
    /// Angot radiation at top of atmosphere (J/m2/day).
    pub angot: f64,
}

fn declination(day: NaiveDate) -> f64 {
    let doy = f64::from(day.ordinal());
    -((23.45 * RAD).sin() * (2.0 * PI * (doy + 10.0) / 365.0).cos()).asin()
}

fn hours_from_ratio(aob: f64) -> f64 {
    if aob > 1.0 {
        24.0
    } else if aob < -1.0 {
        0.0
    } else {
        12.0 * (1.0 + 2.0 * aob.asin() / PI)
    }
}

/// Day length in hours for a sun elevation `angle` (degrees).
///
/// Use [`PHOTOPERIOD_ANGLE`] for photoperiodic day length and `0.0` for
/// astronomical day length.
pub fn daylength(day: NaiveDate, lat: f64, angle: f64) -> f64 {
    let dec = declination(day);
    let sinld = (RAD * lat).sin() * dec.sin();
    let cosld = (RAD * lat).cos() * dec.cos();
    if cosld.abs() < f64::EPSILON {
        return if sinld > 0.0 { 24.0 } else { 0.0 };
    }
    let aob = (-(angle * RAD).sin() + sinld) / cosld;
    hours_from_ratio(aob)
}

/// Compute astronomy and diffuse radiation for a day.
///
/// `irrad` is the measured global radiation (J/m2/day).
pub fn astro(day: NaiveDate, lat: f64, irrad: f64) -> Astro {
    let doy = f64::from(day.ordinal());
    let dec = declination(day);
    let sinld = (RAD * lat).sin() * dec.sin();
    let cosld = (RAD * lat).cos() * dec.cos();
    let aob = if cosld.abs() < f64::EPSILON {
        sinld.signum() * 2.0
    } else {
        sinld / cosld
    };

    let dayl = hours_from_ratio(aob);
    let daylp = daylength(day, lat, PHOTOPERIOD_ANGLE);

    let (dsinb, dsinbe) = if aob.abs() <= 1.0 {
        let root = (1.0 - aob * aob).sqrt();
        let dsinb = 3600.0 * (dayl * sinld + 24.0 * cosld * root / PI);
        let dsinbe = 3600.0
            * (dayl * (sinld + 0.4 * (sinld * sinld + cosld * cosld * 0.5))
                + 12.0 * cosld * (2.0 + 3.0 * 0.4 * sinld) * root / PI);
        (dsinb, dsinbe)
    } else {
        let dsinb = 3600.0 * dayl * sinld;
        let dsinbe = 3600.0 * dayl * (sinld + 0.4 * (sinld * sinld + cosld * cosld * 0.5));
        (dsinb, dsinbe)
    };

    // Solar constant corrected for the eccentricity of the orbit.
    let sc = 1370.0 * (1.0 + 0.033 * (2.0 * PI * doy / 365.0).cos());
    let angot = sc * dsinb;

    let atmtr = if angot > 0.0 { irrad / angot } else { 0.0 };
    let frdif = if atmtr > 0.75 {
        0.23
    } else if atmtr > 0.35 {
        1.46f64.mul_add(-atmtr, 1.33)
    } else if atmtr > 0.07 {
        2.3f64.mul_add(-(atmtr - 0.07).powi(2), 1.0)
    } else {
        1.0
    };
    let difpp = frdif * atmtr * 0.5 * sc;

    Astro {
        dayl,
        daylp,
        sinld,
        cosld,
        difpp,
        atmtr,
        dsinbe,
        angot,
    }
}
