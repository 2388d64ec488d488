//! Soil and crop calendars.
//!
//! A calendar is called once per simulated day, before any rates are
//! computed, and sends the lifecycle signals its dates call for. Calendars
//! also listen to the signals they cause (and to finishes raised by crop
//! phenology) so their cycle counters stay in step with the components.
//!
//! Per-day sequence of a crop calendar:
//! 1. Count the day if a crop cycle is running.
//! 2. Send `CropStart` on the start date (not for the plant variant).
//! 3. Decide on a finish: harvest on the end date (annual variant with end
//!    type `harvest`), or `max_duration` once the counter equals it.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use agrosim_kernel::Outbox;
use agrosim_types::{CropEndType, CropStart, CropStartType, Signal, SoilStart};

/// Errors raised while validating calendars.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    /// A calendar ends on or before the day it starts.
    #[error("{what} calendar ends on {end}, not after its start {start}")]
    InvalidCalendar {
        /// Which calendar.
        what: &'static str,
        /// Start date.
        start: NaiveDate,
        /// End date.
        end: NaiveDate,
    },

    /// The crop starts outside the soil campaign.
    #[error("start date {start} of crop '{crop_name}' variety '{variety}' not within campaign window ({window_start} - {window_end})")]
    CampaignWindow {
        /// Crop name.
        crop_name: String,
        /// Variety name.
        variety: String,
        /// Crop start date.
        start: NaiveDate,
        /// First day of the campaign.
        window_start: NaiveDate,
        /// End of the campaign (exclusive).
        window_end: NaiveDate,
    },

    /// The crop calendar has no usable end.
    #[error("crop '{crop_name}' has end type {end_type} but no end date and no max_duration")]
    MissingEnd {
        /// Crop name.
        crop_name: String,
        /// Configured end type.
        end_type: &'static str,
    },
}

/// Soil calendar as written in the run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilCalendarConfig {
    /// Soil name in the soil library.
    pub soil_name: String,
    /// Variation name within the soil.
    #[serde(alias = "variation")]
    pub soil_variation: String,
    /// Day the soil campaign starts.
    pub soil_start_date: NaiveDate,
    /// Day the soil campaign ends.
    pub soil_end_date: NaiveDate,
}

/// Crop calendar as written in the run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropCalendarConfig {
    /// Crop name in the crop library.
    pub crop_name: String,
    /// Variety name within the crop.
    #[serde(alias = "variety")]
    pub crop_variety: String,
    /// Day the crop starts.
    pub crop_start_date: NaiveDate,
    /// How the crop starts.
    pub crop_start_type: CropStartType,
    /// Harvest date, used with end type `harvest`.
    #[serde(default)]
    pub crop_end_date: Option<NaiveDate>,
    /// How the crop ends.
    pub crop_end_type: CropEndType,
    /// Days after which the crop is finished regardless of development.
    #[serde(default)]
    pub max_duration: Option<u32>,
}

impl CropCalendarConfig {
    /// Payload of the `CropStart` signal for this crop.
    pub fn crop_start(&self) -> CropStart {
        CropStart {
            crop_name: self.crop_name.clone(),
            variety: self.crop_variety.clone(),
            start_type: self.crop_start_type,
            end_type: self.crop_end_type,
        }
    }
}

/// Which dates a crop calendar acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropCalendarKind {
    /// Starts on the start date, finishes on harvest date or max duration.
    Annual,
    /// Started externally, finishes on max duration.
    Plant,
    /// Starts on the start date, harvested externally or on max duration.
    Harvest,
    /// Like annual, for perennial crops.
    Perennial,
}

/// The soil campaign: start and end of the soil simulation.
#[derive(Debug, Clone)]
pub struct SoilCalendar {
    config: SoilCalendarConfig,
    duration: u32,
    in_cycle: bool,
}

impl SoilCalendar {
    /// Build and validate a soil calendar.
    pub fn new(config: SoilCalendarConfig) -> Result<Self, CalendarError> {
        if config.soil_start_date >= config.soil_end_date {
            return Err(CalendarError::InvalidCalendar {
                what: "soil",
                start: config.soil_start_date,
                end: config.soil_end_date,
            });
        }
        Ok(Self {
            config,
            duration: 0,
            in_cycle: false,
        })
    }

    /// First day of the campaign.
    pub const fn start_date(&self) -> NaiveDate {
        self.config.soil_start_date
    }

    /// Last day of the campaign.
    pub const fn end_date(&self) -> NaiveDate {
        self.config.soil_end_date
    }

    /// Days since the soil started.
    pub const fn duration(&self) -> u32 {
        self.duration
    }

    /// Whether the soil campaign is running.
    pub const fn in_cycle(&self) -> bool {
        self.in_cycle
    }

    /// Send the soil signals due on `day`.
    pub fn run(&mut self, day: NaiveDate, outbox: &mut Outbox) {
        if self.in_cycle {
            self.duration = self.duration.saturating_add(1);
        }
        if day == self.config.soil_start_date {
            tracing::info!(
                %day,
                soil = %self.config.soil_name,
                variation = %self.config.soil_variation,
                "Starting soil"
            );
            outbox.send(Signal::SoilStart(SoilStart {
                soil_name: self.config.soil_name.clone(),
                variation: self.config.soil_variation.clone(),
            }));
        }
        if day == self.config.soil_end_date {
            outbox.send(Signal::SoilFinish);
        }
    }

    /// The soil campaign started.
    pub const fn on_soil_start(&mut self) {
        self.in_cycle = true;
        self.duration = 0;
    }

    /// The soil campaign ended.
    pub const fn on_soil_finish(&mut self) {
        self.in_cycle = false;
    }

    /// Back to the state before the first day.
    pub const fn reset(&mut self) {
        self.duration = 0;
        self.in_cycle = false;
    }
}

/// The crop cycle: start, harvest and maximum duration of one crop.
#[derive(Debug, Clone)]
pub struct CropCalendar {
    kind: CropCalendarKind,
    config: CropCalendarConfig,
    duration: u32,
    in_cycle: bool,
}

impl CropCalendar {
    /// Build a crop calendar and validate it against the campaign
    /// `[window_start, window_end)`.
    pub fn new(
        kind: CropCalendarKind,
        config: CropCalendarConfig,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<Self, CalendarError> {
        let calendar = Self {
            kind,
            config,
            duration: 0,
            in_cycle: false,
        };
        calendar.validate(window_start, window_end)?;
        Ok(calendar)
    }

    fn validate(&self, window_start: NaiveDate, window_end: NaiveDate) -> Result<(), CalendarError> {
        let c = &self.config;
        let by_duration = c
            .max_duration
            .and_then(|days| c.crop_start_date.checked_add_days(Days::new(u64::from(days))));
        let end = match c.crop_end_type {
            CropEndType::Maturity => by_duration.or(c.crop_end_date),
            _ => c.crop_end_date.or(by_duration),
        };
        let Some(end) = end else {
            return Err(CalendarError::MissingEnd {
                crop_name: c.crop_name.clone(),
                end_type: c.crop_end_type.as_str(),
            });
        };
        if c.crop_start_date >= end {
            return Err(CalendarError::InvalidCalendar {
                what: "crop",
                start: c.crop_start_date,
                end,
            });
        }
        if c.crop_start_date < window_start || c.crop_start_date >= window_end {
            return Err(CalendarError::CampaignWindow {
                crop_name: c.crop_name.clone(),
                variety: c.crop_variety.clone(),
                start: c.crop_start_date,
                window_start,
                window_end,
            });
        }
        Ok(())
    }

    /// Calendar variant.
    pub const fn kind(&self) -> CropCalendarKind {
        self.kind
    }

    /// The configured crop.
    pub const fn config(&self) -> &CropCalendarConfig {
        &self.config
    }

    /// Days since the crop started.
    pub const fn duration(&self) -> u32 {
        self.duration
    }

    /// Whether a crop cycle is running.
    pub const fn in_cycle(&self) -> bool {
        self.in_cycle
    }

    /// Send the crop signals due on `day`.
    pub fn run(&mut self, day: NaiveDate, outbox: &mut Outbox) {
        if self.in_cycle {
            self.duration = self.duration.saturating_add(1);
        }

        if self.kind != CropCalendarKind::Plant && day == self.config.crop_start_date {
            tracing::info!(
                %day,
                crop = %self.config.crop_name,
                variety = %self.config.crop_variety,
                "Starting crop"
            );
            outbox.send(Signal::CropStart(self.config.crop_start()));
        }

        if !self.in_cycle {
            return;
        }
        let mut finish = None;
        if matches!(self.kind, CropCalendarKind::Annual | CropCalendarKind::Perennial)
            && self.config.crop_end_type == CropEndType::Harvest
            && self.config.crop_end_date == Some(day)
        {
            finish = Some(CropEndType::Harvest);
        }
        if self.config.max_duration == Some(self.duration) {
            finish = Some(CropEndType::MaxDuration);
        }
        if let Some(reason) = finish {
            tracing::info!(%day, crop = %self.config.crop_name, reason = reason.as_str(), duration = self.duration, "Crop calendar finishing crop");
            self.in_cycle = false;
            outbox.send(Signal::CropFinish { reason });
        }
    }

    /// A crop cycle started.
    pub const fn on_crop_start(&mut self) {
        self.in_cycle = true;
        self.duration = 0;
    }

    /// The crop cycle ended, for whatever reason.
    pub const fn on_crop_finish(&mut self) {
        self.in_cycle = false;
    }

    /// Back to the state before the first day.
    pub const fn reset(&mut self) {
        self.duration = 0;
        self.in_cycle = false;
    }
}
