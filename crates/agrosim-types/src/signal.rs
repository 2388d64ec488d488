//! Lifecycle and management signals.
//!
//! The set of signals is closed: every kind that can travel through the
//! dispatcher is a variant of [`Signal`], carrying a typed payload. A
//! signal is always delivered wrapped in an [`Envelope`] that stamps the
//! simulated day on which it was sent.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a crop cycle begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropStartType {
    /// Crop starts from seed and must emerge first.
    Sowing,
    /// Crop starts at emergence.
    Emergence,
    /// Perennial crop starts in its dormant phase.
    Dormant,
}

impl CropStartType {
    /// Parameter-file spelling of the start type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sowing => "sowing",
            Self::Emergence => "emergence",
            Self::Dormant => "dormant",
        }
    }

    /// Parse the parameter-file spelling.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "sowing" => Some(Self::Sowing),
            "emergence" => Some(Self::Emergence),
            "dormant" => Some(Self::Dormant),
            _ => None,
        }
    }
}

/// How a crop cycle ends; also the reason carried by [`Signal::CropFinish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropEndType {
    /// Finish as soon as the crop emerges.
    Emergence,
    /// Finish at physiological maturity.
    Maturity,
    /// Finish at a harvest date or harvest action.
    Harvest,
    /// Finish when the crop dies.
    Death,
    /// Finish after a maximum number of days.
    MaxDuration,
}

impl CropEndType {
    /// Parameter-file spelling of the end type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emergence => "emergence",
            Self::Maturity => "maturity",
            Self::Harvest => "harvest",
            Self::Death => "death",
            Self::MaxDuration => "max_duration",
        }
    }

    /// Parse the parameter-file spelling.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "emergence" => Some(Self::Emergence),
            "maturity" => Some(Self::Maturity),
            "harvest" => Some(Self::Harvest),
            "death" => Some(Self::Death),
            "max_duration" => Some(Self::MaxDuration),
            _ => None,
        }
    }
}

/// Payload of [`Signal::CropStart`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropStart {
    /// Crop name in the crop library.
    pub crop_name: String,
    /// Variety name within the crop.
    pub variety: String,
    /// How the cycle starts.
    pub start_type: CropStartType,
    /// How the cycle ends.
    pub end_type: CropEndType,
}

/// Payload of [`Signal::SoilStart`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilStart {
    /// Soil name in the soil library.
    pub soil_name: String,
    /// Variation name within the soil.
    pub variation: String,
}

/// Payload of [`Signal::Irrigate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Irrigation {
    /// Gross irrigation depth (cm).
    pub amount: f64,
    /// Fraction of the gross amount that reaches the soil.
    pub efficiency: f64,
}

impl Irrigation {
    /// Depth that actually reaches the soil surface (cm).
    pub fn effective(self) -> f64 {
        self.amount * self.efficiency
    }
}

/// Payload of [`Signal::ApplyNutrients`].
///
/// Amounts are in kg/ha; recoveries are fractions of the amount that become
/// available to the soil nutrient pools.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NutrientApplication {
    /// Nitrogen amount.
    pub n_amount: f64,
    /// Phosphorus amount.
    pub p_amount: f64,
    /// Potassium amount.
    pub k_amount: f64,
    /// Nitrogen recovery fraction.
    pub n_recovery: f64,
    /// Phosphorus recovery fraction.
    pub p_recovery: f64,
    /// Potassium recovery fraction.
    pub k_recovery: f64,
}

impl NutrientApplication {
    /// A nitrogen-only application.
    pub const fn nitrogen(amount: f64, recovery: f64) -> Self {
        Self {
            n_amount: amount,
            p_amount: 0.0,
            k_amount: 0.0,
            n_recovery: recovery,
            p_recovery: 0.0,
            k_recovery: 0.0,
        }
    }
}

/// Discriminant of [`Signal`], used as the dispatch-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A crop cycle starts.
    CropStart,
    /// The crop emerged.
    CropEmerged,
    /// The crop cycle ends.
    CropFinish,
    /// A perennial crop enters dormancy.
    CropDormant,
    /// The soil campaign starts.
    SoilStart,
    /// The soil campaign ends.
    SoilFinish,
    /// Water is applied.
    Irrigate,
    /// Fertiliser is applied.
    ApplyNutrients,
    /// The simulation should stop.
    Terminate,
}

/// A lifecycle or management signal with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// A crop cycle starts.
    CropStart(CropStart),
    /// The crop emerged.
    CropEmerged,
    /// The crop cycle ends.
    CropFinish {
        /// Why the cycle ended.
        reason: CropEndType,
    },
    /// A perennial crop enters dormancy.
    CropDormant,
    /// The soil campaign starts.
    SoilStart(SoilStart),
    /// The soil campaign ends.
    SoilFinish,
    /// Water is applied.
    Irrigate(Irrigation),
    /// Fertiliser is applied.
    ApplyNutrients(NutrientApplication),
    /// The simulation should stop.
    Terminate,
}

impl Signal {
    /// Dispatch key of this signal.
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::CropStart(_) => SignalKind::CropStart,
            Self::CropEmerged => SignalKind::CropEmerged,
            Self::CropFinish { .. } => SignalKind::CropFinish,
            Self::CropDormant => SignalKind::CropDormant,
            Self::SoilStart(_) => SignalKind::SoilStart,
            Self::SoilFinish => SignalKind::SoilFinish,
            Self::Irrigate(_) => SignalKind::Irrigate,
            Self::ApplyNutrients(_) => SignalKind::ApplyNutrients,
            Self::Terminate => SignalKind::Terminate,
        }
    }
}

/// A signal stamped with the simulated day on which it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Day of sending.
    pub day: NaiveDate,
    /// The signal itself.
    pub signal: Signal,
}

impl Envelope {
    /// Wrap a signal for `day`.
    pub const fn new(day: NaiveDate, signal: Signal) -> Self {
        Self { day, signal }
    }

    /// Dispatch key of the wrapped signal.
    pub const fn kind(&self) -> SignalKind {
        self.signal.kind()
    }
}
