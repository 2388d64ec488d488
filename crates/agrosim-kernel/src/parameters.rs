//! Layered parameter lookup.
//!
//! A [`ParameterProvider`] presents one dictionary-like view over four
//! layers searched in order: overrides, site (static site data plus the
//! active soil variation), timer (campaign data such as the crop start and
//! end types), and crop (the active crop variety).
//!
//! Outside the override layer a parameter name may appear in only one
//! layer. This is checked at construction and again every time a crop or
//! soil is activated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use agrosim_types::{AfgenError, AgeTables, Afgen, CropEndType, CropStartType};

/// Timer-layer key holding the active crop start type.
pub const CROP_START_TYPE: &str = "CROP_START_TYPE";

/// Timer-layer key holding the active crop end type.
pub const CROP_END_TYPE: &str = "CROP_END_TYPE";

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A number (integers and flags are stored as numbers).
    Number(f64),
    /// A flat `[x1, y1, x2, y2, ...]` interpolation table.
    Table(Vec<f64>),
    /// One interpolation table per crop age class.
    Tables(Vec<Vec<f64>>),
    /// A text value such as a start type.
    Text(String),
}

impl ParamValue {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Table(_) => "table",
            Self::Tables(_) => "age tables",
            Self::Text(_) => "text",
        }
    }
}

/// A set of named parameter values.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Crop parameters by crop name, then variety name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CropLibrary {
    /// Crop name -> variety name -> parameters.
    pub crops: BTreeMap<String, BTreeMap<String, ParamSet>>,
}

/// Soil parameters by soil name, then variation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoilLibrary {
    /// Soil name -> variation name -> parameters.
    pub soils: BTreeMap<String, BTreeMap<String, ParamSet>>,
}

/// Everything an external loader delivers to build a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterBundle {
    /// Static site parameters.
    pub site: ParamSet,
    /// Soil library.
    pub soils: SoilLibrary,
    /// Crop library.
    pub crops: CropLibrary,
    /// Initial overrides, applied without existence check.
    pub overrides: ParamSet,
}

/// Errors raised by the parameter provider.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    /// A parameter name appears in more than one layer.
    #[error("duplicate parameter found: {name}")]
    DuplicateParameter {
        /// Parameter name.
        name: String,
    },

    /// Lookup of an unknown parameter.
    #[error("parameter '{name}' not found")]
    Missing {
        /// Parameter name.
        name: String,
    },

    /// The parameter has a different shape than requested.
    #[error("parameter '{name}' is a {found}, expected {expected}")]
    WrongType {
        /// Parameter name.
        name: String,
        /// Requested shape.
        expected: &'static str,
        /// Stored shape.
        found: &'static str,
    },

    /// Override of a parameter that exists in no layer.
    #[error("cannot override '{name}': parameter does not already exist")]
    UnknownOverride {
        /// Parameter name.
        name: String,
    },

    /// Clearing an override that is not set.
    #[error("cannot clear '{name}' from overrides: not overridden")]
    NotOverridden {
        /// Parameter name.
        name: String,
    },

    /// Removal of a parameter that lives outside the override layer.
    #[error("cannot remove default parameter '{name}'")]
    NotRemovable {
        /// Parameter name.
        name: String,
    },

    /// Unknown crop or variety.
    #[error("crop '{crop}' variety '{variety}' not found in crop library")]
    UnknownCrop {
        /// Crop name.
        crop: String,
        /// Variety name.
        variety: String,
    },

    /// Unknown soil or variation.
    #[error("soil '{soil}' variation '{variation}' not found in soil library")]
    UnknownSoil {
        /// Soil name.
        soil: String,
        /// Variation name.
        variation: String,
    },

    /// A table parameter failed validation.
    #[error("parameter '{name}': {source}")]
    Table {
        /// Parameter name.
        name: String,
        /// Underlying table error.
        source: AfgenError,
    },
}

/// Layered parameter lookup for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct ParameterProvider {
    overrides: ParamSet,
    site: ParamSet,
    soil: ParamSet,
    timer: ParamSet,
    crop: ParamSet,
    soils: SoilLibrary,
    crops: CropLibrary,
    active_crop: Option<(String, String)>,
    active_soil: Option<(String, String)>,
}

impl ParameterProvider {
    /// Build a provider from a bundle. No crop or soil is active yet.
    pub fn new(bundle: ParameterBundle) -> Result<Self, ParameterError> {
        let provider = Self {
            overrides: bundle.overrides,
            site: bundle.site,
            soils: bundle.soils,
            crops: bundle.crops,
            ..Self::default()
        };
        provider.check_uniqueness()?;
        Ok(provider)
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Activate a crop variety and record its start and end types.
    pub fn set_active_crop(
        &mut self,
        crop_name: &str,
        variety: &str,
        start_type: CropStartType,
        end_type: CropEndType,
    ) -> Result<(), ParameterError> {
        let params = self
            .crops
            .crops
            .get(crop_name)
            .and_then(|varieties| varieties.get(variety))
            .ok_or_else(|| ParameterError::UnknownCrop {
                crop: crop_name.to_owned(),
                variety: variety.to_owned(),
            })?;

        self.crop = params.clone();
        self.timer.insert(
            CROP_START_TYPE.to_owned(),
            ParamValue::Text(start_type.as_str().to_owned()),
        );
        self.timer.insert(
            CROP_END_TYPE.to_owned(),
            ParamValue::Text(end_type.as_str().to_owned()),
        );
        self.active_crop = Some((crop_name.to_owned(), variety.to_owned()));
        tracing::debug!(crop_name, variety, "Activated crop parameters");
        self.check_uniqueness()
    }

    /// Drop the active crop layer and its timer entries.
    pub fn clear_active_crop(&mut self) {
        self.crop.clear();
        self.timer.remove(CROP_START_TYPE);
        self.timer.remove(CROP_END_TYPE);
        self.active_crop = None;
    }

    /// Activate a soil variation in the site layer.
    pub fn set_active_soil(&mut self, soil_name: &str, variation: &str) -> Result<(), ParameterError> {
        let params = self
            .soils
            .soils
            .get(soil_name)
            .and_then(|variations| variations.get(variation))
            .ok_or_else(|| ParameterError::UnknownSoil {
                soil: soil_name.to_owned(),
                variation: variation.to_owned(),
            })?;

        self.soil = params.clone();
        self.active_soil = Some((soil_name.to_owned(), variation.to_owned()));
        tracing::debug!(soil_name, variation, "Activated soil parameters");
        self.check_uniqueness()
    }

    /// Active crop name and variety.
    pub fn active_crop(&self) -> Option<(&str, &str)> {
        self.active_crop
            .as_ref()
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }

    /// Active soil name and variation.
    pub fn active_soil(&self) -> Option<(&str, &str)> {
        self.active_soil
            .as_ref()
            .map(|(s, v)| (s.as_str(), v.as_str()))
    }

    fn check_uniqueness(&self) -> Result<(), ParameterError> {
        let mut seen = BTreeSet::new();
        for layer in [&self.site, &self.soil, &self.timer, &self.crop] {
            for name in layer.keys() {
                if !seen.insert(name.as_str()) {
                    return Err(ParameterError::DuplicateParameter { name: name.clone() });
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    /// Override a parameter. With `check`, only existing names are accepted.
    pub fn set_override(
        &mut self,
        name: &str,
        value: ParamValue,
        check: bool,
    ) -> Result<(), ParameterError> {
        if check && !self.contains(name) {
            return Err(ParameterError::UnknownOverride {
                name: name.to_owned(),
            });
        }
        self.overrides.insert(name.to_owned(), value);
        Ok(())
    }

    /// Clear one override, or all of them with `None`.
    pub fn clear_override(&mut self, name: Option<&str>) -> Result<(), ParameterError> {
        match name {
            None => {
                self.overrides.clear();
                Ok(())
            }
            Some(name) => self
                .overrides
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ParameterError::NotOverridden {
                    name: name.to_owned(),
                }),
        }
    }

    /// Remove a parameter. Only overrides can be removed.
    pub fn remove(&mut self, name: &str) -> Result<ParamValue, ParameterError> {
        if let Some(value) = self.overrides.remove(name) {
            return Ok(value);
        }
        if self.contains(name) {
            Err(ParameterError::NotRemovable {
                name: name.to_owned(),
            })
        } else {
            Err(ParameterError::Missing {
                name: name.to_owned(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    fn layers(&self) -> [&ParamSet; 5] {
        [&self.overrides, &self.site, &self.soil, &self.timer, &self.crop]
    }

    /// Raw value of `name`, searching layers in priority order.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.layers().into_iter().find_map(|layer| layer.get(name))
    }

    /// Whether `name` exists in any layer.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sorted union of all parameter names.
    pub fn keys(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self
            .layers()
            .into_iter()
            .flat_map(|layer| layer.keys().map(String::as_str))
            .collect();
        names.into_iter().collect()
    }

    /// Number of distinct parameter names.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether no parameters exist.
    pub fn is_empty(&self) -> bool {
        self.layers().iter().all(|layer| layer.is_empty())
    }

    /// Number of active overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    fn require(&self, name: &str) -> Result<&ParamValue, ParameterError> {
        self.get(name).ok_or_else(|| ParameterError::Missing {
            name: name.to_owned(),
        })
    }

    fn wrong_type(name: &str, expected: &'static str, found: &ParamValue) -> ParameterError {
        ParameterError::WrongType {
            name: name.to_owned(),
            expected,
            found: found.type_name(),
        }
    }

    /// Numeric parameter.
    pub fn number(&self, name: &str) -> Result<f64, ParameterError> {
        match self.require(name)? {
            ParamValue::Number(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "number", other)),
        }
    }

    /// Numeric parameter with a default when it is absent.
    pub fn number_or(&self, name: &str, default: f64) -> Result<f64, ParameterError> {
        if self.contains(name) {
            self.number(name)
        } else {
            Ok(default)
        }
    }

    /// Integral parameter; the stored number must have no fractional part.
    #[allow(clippy::cast_possible_truncation)]
    pub fn integer(&self, name: &str) -> Result<i64, ParameterError> {
        let value = self.number(name)?;
        if value.fract().abs() > f64::EPSILON || !value.is_finite() {
            return Err(ParameterError::WrongType {
                name: name.to_owned(),
                expected: "integer",
                found: "number",
            });
        }
        Ok(value as i64)
    }

    /// Flag parameter; any non-zero number is `true`.
    pub fn flag(&self, name: &str) -> Result<bool, ParameterError> {
        Ok(self.number(name)?.abs() > f64::EPSILON)
    }

    /// Text parameter.
    pub fn text(&self, name: &str) -> Result<&str, ParameterError> {
        match self.require(name)? {
            ParamValue::Text(v) => Ok(v),
            other => Err(Self::wrong_type(name, "text", other)),
        }
    }

    /// Interpolation table parameter.
    pub fn table(&self, name: &str) -> Result<Afgen, ParameterError> {
        match self.require(name)? {
            ParamValue::Table(flat) => Afgen::new(flat).map_err(|source| ParameterError::Table {
                name: name.to_owned(),
                source,
            }),
            other => Err(Self::wrong_type(name, "table", other)),
        }
    }

    fn table_rows(&self, name: &str, expected: &'static str) -> Result<Vec<Vec<f64>>, ParameterError> {
        match self.require(name)? {
            ParamValue::Tables(rows) => Ok(rows.clone()),
            ParamValue::Table(flat) => Ok(vec![flat.clone()]),
            other => Err(Self::wrong_type(name, expected, other)),
        }
    }

    /// Age-indexed table parameter. A single table is accepted as a set
    /// with one age class.
    pub fn age_tables(&self, name: &str) -> Result<AgeTables, ParameterError> {
        let rows = self.table_rows(name, "age tables")?;
        AgeTables::new(&rows).map_err(|source| ParameterError::Table {
            name: name.to_owned(),
            source,
        })
    }

    /// A list of tables, e.g. one retention curve per soil layer. A single
    /// table yields a list of one.
    pub fn table_list(&self, name: &str) -> Result<Vec<Afgen>, ParameterError> {
        self.table_rows(name, "table list")?
            .iter()
            .map(|row| {
                Afgen::new(row).map_err(|source| ParameterError::Table {
                    name: name.to_owned(),
                    source,
                })
            })
            .collect()
    }

    /// Per-age numbers stored as a list (e.g. initial biomass by age).
    pub fn age_numbers(&self, name: &str) -> Result<Vec<f64>, ParameterError> {
        match self.require(name)? {
            ParamValue::Number(v) => Ok(vec![*v]),
            ParamValue::Table(values) => Ok(values.clone()),
            other => Err(Self::wrong_type(name, "number list", other)),
        }
    }

    /// Active crop start type from the timer layer.
    pub fn crop_start_type(&self) -> Result<CropStartType, ParameterError> {
        let text = self.text(CROP_START_TYPE)?;
        CropStartType::parse(text).ok_or_else(|| ParameterError::WrongType {
            name: CROP_START_TYPE.to_owned(),
            expected: "crop start type",
            found: "text",
        })
    }

    /// Active crop end type from the timer layer.
    pub fn crop_end_type(&self) -> Result<CropEndType, ParameterError> {
        let text = self.text(CROP_END_TYPE)?;
        CropEndType::parse(text).ok_or_else(|| ParameterError::WrongType {
            name: CROP_END_TYPE.to_owned(),
            expected: "crop end type",
            found: "text",
        })
    }
}

impl core::fmt::Display for ParameterProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ParameterProvider providing {} parameters, {} overridden",
            self.len(),
            self.overrides.len()
        )
    }
}
