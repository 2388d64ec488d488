//! Agro-management: one soil campaign with at most one crop in it.
//!
//! The variant decides how the crop cycle is driven. Plain variants run
//! the crop calendar as written; `plant` variants wait for an external
//! plant action, `harvest` variants for an external harvest (or the
//! maximum duration). Perennial variants create a perennial crop.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use agrosim_crop::CropVariant;
use agrosim_kernel::Outbox;
use agrosim_types::Signal;

use crate::calendar::{
    CalendarError, CropCalendar, CropCalendarConfig, CropCalendarKind, SoilCalendar,
    SoilCalendarConfig,
};

/// Agro-management variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgroManagerKind {
    /// Annual crop on calendar dates.
    #[default]
    Annual,
    /// Annual crop planted by an external action.
    Plant,
    /// Annual crop harvested by an external action.
    Harvest,
    /// Perennial crop on calendar dates.
    Perennial,
    /// Perennial crop planted by an external action.
    PlantPerennial,
    /// Perennial crop harvested by an external action.
    HarvestPerennial,
}

impl AgroManagerKind {
    /// Crop calendar variant driven by this agro-manager.
    pub const fn calendar_kind(self) -> CropCalendarKind {
        match self {
            Self::Annual => CropCalendarKind::Annual,
            Self::Plant | Self::PlantPerennial => CropCalendarKind::Plant,
            Self::Harvest | Self::HarvestPerennial => CropCalendarKind::Harvest,
            Self::Perennial => CropCalendarKind::Perennial,
        }
    }

    /// Crop variant created on crop start.
    pub const fn crop_variant(self) -> CropVariant {
        match self {
            Self::Annual | Self::Plant | Self::Harvest => CropVariant::Annual,
            Self::Perennial | Self::PlantPerennial | Self::HarvestPerennial => CropVariant::Perennial,
        }
    }
}

/// Agro-management block of the run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgroManagementConfig {
    /// Variant.
    #[serde(default)]
    pub variant: AgroManagerKind,
    /// Soil campaign.
    pub soil_calendar: SoilCalendarConfig,
    /// Crop grown in the campaign, if any.
    #[serde(default)]
    pub crop_calendar: Option<CropCalendarConfig>,
}

/// Sends the calendar-driven lifecycle signals of one campaign.
#[derive(Debug, Clone)]
pub struct AgroManager {
    kind: AgroManagerKind,
    soil: SoilCalendar,
    crop: Option<CropCalendar>,
}

impl AgroManager {
    /// Build and validate the calendars.
    pub fn new(config: &AgroManagementConfig) -> Result<Self, CalendarError> {
        let soil = SoilCalendar::new(config.soil_calendar.clone())?;
        let crop = config
            .crop_calendar
            .clone()
            .map(|crop| {
                CropCalendar::new(
                    config.variant.calendar_kind(),
                    crop,
                    soil.start_date(),
                    soil.end_date(),
                )
            })
            .transpose()?;
        Ok(Self {
            kind: config.variant,
            soil,
            crop,
        })
    }

    /// Variant.
    pub const fn kind(&self) -> AgroManagerKind {
        self.kind
    }

    /// First day of the campaign.
    pub const fn start_date(&self) -> NaiveDate {
        self.soil.start_date()
    }

    /// Last day of the campaign.
    pub const fn end_date(&self) -> NaiveDate {
        self.soil.end_date()
    }

    /// The soil calendar.
    pub const fn soil_calendar(&self) -> &SoilCalendar {
        &self.soil
    }

    /// The crop calendar, if a crop is configured.
    pub const fn crop_calendar(&self) -> Option<&CropCalendar> {
        self.crop.as_ref()
    }

    /// Whether a crop cycle is running.
    pub fn crop_in_cycle(&self) -> bool {
        self.crop.as_ref().is_some_and(CropCalendar::in_cycle)
    }

    /// Crop start signal for an external plant action.
    pub fn plant_signal(&self) -> Option<Signal> {
        self.crop
            .as_ref()
            .map(|crop| Signal::CropStart(crop.config().crop_start()))
    }

    /// Send the signals due on `day`: soil first, then crop.
    pub fn run(&mut self, day: NaiveDate, outbox: &mut Outbox) {
        self.soil.run(day, outbox);
        if let Some(crop) = &mut self.crop {
            crop.run(day, outbox);
        }
    }

    /// The soil campaign started.
    pub const fn on_soil_start(&mut self) {
        self.soil.on_soil_start();
    }

    /// The soil campaign ended; the simulation stops.
    pub fn on_soil_finish(&mut self, day: NaiveDate, outbox: &mut Outbox) {
        self.soil.on_soil_finish();
        tracing::info!(%day, duration = self.soil.duration(), "Soil campaign finished, terminating");
        outbox.send(Signal::Terminate);
    }

    /// A crop cycle started.
    pub const fn on_crop_start(&mut self) {
        if let Some(crop) = &mut self.crop {
            crop.on_crop_start();
        }
    }

    /// The crop cycle ended.
    pub const fn on_crop_finish(&mut self) {
        if let Some(crop) = &mut self.crop {
            crop.on_crop_finish();
        }
    }

    /// Back to the state before the first day.
    pub const fn reset(&mut self) {
        self.soil.reset();
        if let Some(crop) = &mut self.crop {
            crop.reset();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;

    const CONFIG: &str = r"
variant: harvest_perennial
soil_calendar:
  soil_name: loam
  soil_variation: default
  soil_start_date: 2021-03-01
  soil_end_date: 2021-10-01
crop_calendar:
  crop_name: grass
  crop_variety: perennial
  crop_start_date: 2021-03-05
  crop_start_type: emergence
  crop_end_type: harvest
  max_duration: 150
";

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, d).unwrap()
    }

    #[test]
    fn config_parses_from_yaml() {
        let config: AgroManagementConfig = serde_yml::from_str(CONFIG).unwrap();
        assert_eq!(config.variant, AgroManagerKind::HarvestPerennial);
        let crop = config.crop_calendar.as_ref().unwrap();
        assert_eq!(crop.crop_start_type, CropStartType::Emergence);
        assert_eq!(crop.crop_end_type, CropEndType::Harvest);
        assert_eq!(crop.crop_end_date, None);

        let manager = AgroManager::new(&config).unwrap();
        assert_eq!(manager.kind().crop_variant(), CropVariant::Perennial);
        assert_eq!(manager.crop_calendar().unwrap().kind(), CropCalendarKind::Harvest);
        assert_eq!(manager.start_date(), date(3, 1));
        assert_eq!(manager.end_date(), date(10, 1));
    }

    #[test]
    fn soil_starts_before_crop_on_the_same_day() {
        let mut config: AgroManagementConfig = serde_yml::from_str(CONFIG).unwrap();
        if let Some(crop) = &mut config.crop_calendar {
            crop.crop_start_date = date(3, 1);
        }
        let mut manager = AgroManager::new(&config).unwrap();
        let mut outbox = Outbox::new();
        manager.run(date(3, 1), &mut outbox);
        let signals = outbox.take();
        assert!(matches!(signals.as_slice(), [Signal::SoilStart(_), Signal::CropStart(_)]));
    }

    #[test]
    fn soil_finish_requests_termination() {
        let config: AgroManagementConfig = serde_yml::from_str(CONFIG).unwrap();
        let mut manager = AgroManager::new(&config).unwrap();
        manager.on_soil_start();
        let mut outbox = Outbox::new();
        manager.on_soil_finish(date(10, 1), &mut outbox);
        assert_eq!(outbox.take(), vec![Signal::Terminate]);
        assert!(!manager.soil_calendar().in_cycle());
    }

    #[test]
    fn plant_signal_carries_the_calendar_crop() {
        let config: AgroManagementConfig = serde_yml::from_str(CONFIG).unwrap();
        let manager = AgroManager::new(&config).unwrap();
        assert!(matches!(
            manager.plant_signal(),
            Some(Signal::CropStart(start)) if start.crop_name == "grass" && start.variety == "perennial"
        ));
    }

    #[test]
    fn campaign_without_crop_is_valid() {
        let mut config: AgroManagementConfig = serde_yml::from_str(CONFIG).unwrap();
        config.crop_calendar = None;
        let mut manager = AgroManager::new(&config).unwrap();
        assert!(manager.plant_signal().is_none());
        assert!(!manager.crop_in_cycle());
        let mut outbox = Outbox::new();
        manager.run(date(3, 5), &mut outbox);
        assert!(outbox.is_empty());
    }
}
