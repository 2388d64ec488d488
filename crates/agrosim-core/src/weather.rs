//! A validated series of daily weather records, looked up by day.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;

use agrosim_types::{WeatherError, WeatherRecord};

/// Errors raised while building a weather series.
#[derive(Debug, thiserror::Error)]
pub enum WeatherSeriesError {
    /// Failed to read the weather file.
    #[error("failed to read weather file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse a JSON weather file.
    #[error("failed to parse weather JSON: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Failed to parse a YAML weather file.
    #[error("failed to parse weather YAML: {source}")]
    Yaml {
        /// The underlying YAML error.
        source: serde_yml::Error,
    },

    /// A record is physically implausible.
    #[error(transparent)]
    Invalid(#[from] WeatherError),

    /// Two records for the same day.
    #[error("duplicate weather record for {day}")]
    Duplicate {
        /// The repeated day.
        day: NaiveDate,
    },
}

impl From<serde_yml::Error> for WeatherSeriesError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Daily weather records keyed by day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherSeries {
    records: BTreeMap<NaiveDate, WeatherRecord>,
}

impl WeatherSeries {
    /// Validate and index `records`.
    pub fn from_records(records: Vec<WeatherRecord>) -> Result<Self, WeatherSeriesError> {
        let mut indexed = BTreeMap::new();
        for record in records {
            record.validate()?;
            let day = record.day;
            if indexed.insert(day, record).is_some() {
                return Err(WeatherSeriesError::Duplicate { day });
            }
        }
        Ok(Self { records: indexed })
    }

    /// Read a list of records from a `.json` file, or YAML otherwise.
    pub fn from_file(path: &Path) -> Result<Self, WeatherSeriesError> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let records: Vec<WeatherRecord> = if is_json {
            serde_json::from_str(&contents)?
        } else {
            serde_yml::from_str(&contents)?
        };
        let series = Self::from_records(records)?;
        tracing::info!(
            path = %path.display(),
            days = series.len(),
            first = ?series.first_day(),
            last = ?series.last_day(),
            "Weather loaded"
        );
        Ok(series)
    }

    /// Record for `day`.
    pub fn get(&self, day: NaiveDate) -> Option<&WeatherRecord> {
        self.records.get(&day)
    }

    /// Earliest day covered.
    pub fn first_day(&self) -> Option<NaiveDate> {
        self.records.keys().next().copied()
    }

    /// Latest day covered.
    pub fn last_day(&self) -> Option<NaiveDate> {
        self.records.keys().next_back().copied()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the series holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::SyntheticWeather;

    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 1).unwrap()
    }

    #[test]
    fn synthetic_series_is_indexed_by_day() {
        let series = WeatherSeries::from_records(SyntheticWeather::default().generate(start(), 30)).unwrap();
        assert_eq!(series.len(), 30);
        assert_eq!(series.first_day(), Some(start()));
        assert_eq!(series.last_day(), NaiveDate::from_ymd_opt(2021, 3, 30));
        assert_eq!(series.get(start()).map(|w| w.day), Some(start()));
        assert!(series.get(NaiveDate::from_ymd_opt(2021, 4, 1).unwrap()).is_none());
    }

    #[test]
    fn duplicate_days_are_rejected() {
        let mut records = SyntheticWeather::default().generate(start(), 2);
        records.push(records.first().cloned().unwrap());
        assert!(matches!(
            WeatherSeries::from_records(records),
            Err(WeatherSeriesError::Duplicate { .. })
        ));
    }

    #[test]
    fn implausible_records_are_rejected() {
        let mut records = SyntheticWeather::default().generate(start(), 1);
        if let Some(record) = records.first_mut() {
            record.tmin = record.tmax + 1.0;
        }
        assert!(matches!(
            WeatherSeries::from_records(records),
            Err(WeatherSeriesError::Invalid(WeatherError::TemperatureOrder { .. }))
        ));
    }

    #[test]
    fn records_parse_from_yaml() {
        let yaml = r"
- day: 2021-03-01
  lat: 52.0
  irrad: 12000000.0
  tmin: 2.0
  tmax: 11.0
  rain: 0.1
  e0: 0.2
  es0: 0.18
  et0: 0.15
";
        let records: Vec<WeatherRecord> = serde_yml::from_str(yaml).unwrap();
        let series = WeatherSeries::from_records(records).unwrap();
        assert!((series.get(start()).unwrap().temp() - 6.5).abs() < 1e-12);
    }
}
