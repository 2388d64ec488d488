//! Operator-issued actions consumed at the start of a day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use agrosim_types::{Irrigation, NutrientApplication};

/// An action issued from outside the simulation (policy, GUI, schedule).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExternalAction {
    /// Apply water.
    Irrigate(Irrigation),
    /// Apply fertiliser.
    ApplyNutrients(NutrientApplication),
    /// Harvest the standing crop.
    Harvest,
    /// Plant the configured crop.
    Plant,
}

impl ExternalAction {
    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Irrigate(_) => "irrigate",
            Self::ApplyNutrients(_) => "apply_nutrients",
            Self::Harvest => "harvest",
            Self::Plant => "plant",
        }
    }
}

/// An action fixed to a day in the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    /// Day the action is applied.
    pub day: NaiveDate,
    /// The action.
    #[serde(flatten)]
    pub action: ExternalAction,
}

/// Actions scheduled for `day`, in configuration order.
pub fn actions_on(schedule: &[ScheduledAction], day: NaiveDate) -> Vec<ExternalAction> {
    schedule
        .iter()
        .filter(|s| s.day == day)
        .map(|s| s.action)
        .collect()
}
