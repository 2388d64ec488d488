//! Ordered soil layers and their rooting status.

use agrosim_kernel::ParameterProvider;
use serde::Serialize;

use crate::error::SoilError;
use crate::layer::{PF_FIELD_CAPACITY, PF_WILTING_POINT, SoilLayer};

/// Tolerance for matching a rooting depth to a layer boundary (cm).
const BOUNDARY_TOLERANCE: f64 = 0.01;

/// How accessible a layer is to the current crop roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootingStatus {
    /// Entirely inside the current root zone.
    Rooted,
    /// Crossed by the current rooting depth.
    PartiallyRooted,
    /// Between the rooting depth and the maximum rooting depth.
    PotentiallyRooted,
    /// Below the maximum rooting depth.
    Unrooted,
}

/// An ordered stack of soil layers, top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilProfile {
    layers: Vec<SoilLayer>,
    surface_conductivity: f64,
}

impl SoilProfile {
    /// Build a profile from explicit layers.
    pub fn new(layers: Vec<SoilLayer>, surface_conductivity: f64) -> Result<Self, SoilError> {
        if layers.is_empty() {
            return Err(SoilError::InvalidProfile {
                reason: "profile has no layers".to_owned(),
            });
        }
        Ok(Self {
            layers,
            surface_conductivity,
        })
    }

    /// Build a profile from the active soil parameters.
    ///
    /// Expects `THICKNESS` (one value per layer), `SMTAB` and `CONTAB`
    /// (one table per layer, or a single table shared by all layers),
    /// `SURFACE_CONDUCTIVITY`, and optionally `PFFC`, `PFWP` and
    /// `GROUNDWATER`.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, SoilError> {
        if params.contains("GROUNDWATER") && params.flag("GROUNDWATER")? {
            return Err(SoilError::GroundwaterUnsupported);
        }

        let thickness = params.age_numbers("THICKNESS")?;
        let sm_tables = params.table_list("SMTAB")?;
        let cond_tables = params.table_list("CONTAB")?;
        let pf_fc = params.number_or("PFFC", PF_FIELD_CAPACITY)?;
        let pf_wp = params.number_or("PFWP", PF_WILTING_POINT)?;

        let pick = |tables: &[agrosim_types::Afgen], index: usize, name: &str| {
            let table = if tables.len() == 1 { tables.first() } else { tables.get(index) };
            table.cloned().ok_or_else(|| SoilError::InvalidProfile {
                reason: format!(
                    "{name} has {} tables for {} layers",
                    tables.len(),
                    thickness.len()
                ),
            })
        };

        let layers = thickness
            .iter()
            .enumerate()
            .map(|(index, tsl)| {
                SoilLayer::new(
                    *tsl,
                    pick(&sm_tables, index, "SMTAB")?,
                    pick(&cond_tables, index, "CONTAB")?,
                    pf_fc,
                    pf_wp,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(layers, params.number("SURFACE_CONDUCTIVITY")?)
    }

    /// Layers, top to bottom.
    pub fn layers(&self) -> &[SoilLayer] {
        &self.layers
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the profile has no layers (never true once constructed).
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Maximum infiltration rate at the surface (cm/day).
    pub const fn surface_conductivity(&self) -> f64 {
        self.surface_conductivity
    }

    /// Total depth of the profile (cm).
    pub fn max_rootable_depth(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    /// Lower boundary of each layer (cm below surface).
    pub fn lower_boundaries(&self) -> Vec<f64> {
        self.layers
            .iter()
            .scan(0.0, |depth, layer| {
                *depth += layer.thickness;
                Some(*depth)
            })
            .collect()
    }

    /// Check that `rdm` lies within the profile on a layer boundary.
    pub fn validate_max_rooting_depth(&self, rdm: f64) -> Result<(), SoilError> {
        let boundaries = self.lower_boundaries();
        if rdm > self.max_rootable_depth() + BOUNDARY_TOLERANCE {
            return Err(SoilError::RootingDepth {
                rdm,
                reason: "exceeds the depth of the soil profile",
            });
        }
        if !boundaries.iter().any(|b| (b - rdm).abs() < BOUNDARY_TOLERANCE) {
            return Err(SoilError::RootingDepth {
                rdm,
                reason: "must coincide with a layer boundary",
            });
        }
        Ok(())
    }

    /// Classify every layer for rooting depth `rd` and maximum `rdm`, and
    /// assign the `wtop`/`wpot`/`wund` weights.
    pub fn determine_rooting_status(&mut self, rd: f64, rdm: f64) {
        let mut upper = 0.0;
        for layer in &mut self.layers {
            let lower = upper + layer.thickness;
            let t = layer.thickness;
            let (status, wtop, wpot) = if lower <= rd {
                (RootingStatus::Rooted, 1.0, 0.0)
            } else if upper < rd {
                let wtop = (rd - upper) / t;
                let wpot = ((rdm.min(lower) - rd) / t).max(0.0);
                (RootingStatus::PartiallyRooted, wtop, wpot)
            } else if lower <= rdm {
                (RootingStatus::PotentiallyRooted, 0.0, 1.0)
            } else if upper < rdm {
                (RootingStatus::PotentiallyRooted, 0.0, (rdm - upper) / t)
            } else {
                (RootingStatus::Unrooted, 0.0, 0.0)
            };
            layer.rooting_status = status;
            layer.wtop = wtop;
            layer.wpot = wpot;
            layer.wund = (1.0 - wtop - wpot).max(0.0);
            upper = lower;
        }
    }

    /// Root-zone depth covered by the layers (sum of thickness times `wtop`).
    pub fn rooted_depth(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness * l.wtop).sum()
    }
}
