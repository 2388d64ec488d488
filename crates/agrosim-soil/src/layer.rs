//! Hydraulic description of a single soil layer.
//!
//! A layer is defined by its thickness and two curves over pF (log10 of
//! suction in cm): volumetric moisture content `SMfromPF` and log10
//! conductivity `CONDfromPF`. From these the layer derives its
//! characteristic moisture contents, the inverse curve `PFfromSM`, and the
//! matric flux potential `MFPfromPF`.

use core::f64::consts::LN_10;

use agrosim_types::Afgen;

use crate::error::SoilError;
use crate::profile::RootingStatus;

/// pF at saturation.
pub const PF_SATURATION: f64 = -1.0;

/// Default pF at field capacity.
pub const PF_FIELD_CAPACITY: f64 = 2.0;

/// Default pF at wilting point.
pub const PF_WILTING_POINT: f64 = 4.2;

// Three-point Gauss-Legendre on [0, 1].
const GAUSS_POINTS: [f64; 3] = [0.112_701_665_4, 0.5, 0.887_298_334_6];
const GAUSS_WEIGHTS: [f64; 3] = [0.277_777_777_8, 0.444_444_444_4, 0.277_777_777_8];

/// One soil layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilLayer {
    /// Layer thickness (cm).
    pub thickness: f64,
    sm_from_pf: Afgen,
    pf_from_sm: Afgen,
    cond_from_pf: Afgen,
    mfp_from_pf: Afgen,
    /// Moisture content at saturation.
    pub sm0: f64,
    /// Moisture content at field capacity.
    pub smfcf: f64,
    /// Moisture content at wilting point.
    pub smw: f64,
    /// Conductivity at field capacity (cm/day).
    pub cond_fc: f64,
    /// Conductivity at saturation (cm/day).
    pub cond_k0: f64,
    /// Water amount at saturation (cm).
    pub wc0: f64,
    /// Water amount at field capacity (cm).
    pub wcfc: f64,
    /// Water amount at wilting point (cm).
    pub wcw: f64,
    /// Rooting status, recomputed when rooting depth changes.
    pub rooting_status: RootingStatus,
    /// Fraction of the layer inside the current root zone.
    pub wtop: f64,
    /// Fraction between the root zone and the maximum rooting depth.
    pub wpot: f64,
    /// Fraction below the maximum rooting depth.
    pub wund: f64,
}

impl SoilLayer {
    /// Build a layer from its curves.
    pub fn new(
        thickness: f64,
        sm_from_pf: Afgen,
        cond_from_pf: Afgen,
        pf_field_capacity: f64,
        pf_wilting_point: f64,
    ) -> Result<Self, SoilError> {
        if thickness <= 0.0 {
            return Err(SoilError::InvalidProfile {
                reason: format!("layer thickness must be positive, got {thickness}"),
            });
        }

        let pf_from_sm = sm_from_pf.inverted()?;
        let sm0 = sm_from_pf.eval(PF_SATURATION);
        let smfcf = sm_from_pf.eval(pf_field_capacity);
        let smw = sm_from_pf.eval(pf_wilting_point);
        if !(sm0 > smfcf && smfcf > smw && smw >= 0.0) {
            return Err(SoilError::InvalidProfile {
                reason: format!(
                    "moisture contents must satisfy SM0 > SMFCF > SMW >= 0, got {sm0}, {smfcf}, {smw}"
                ),
            });
        }

        let mfp_from_pf = build_mfp(&sm_from_pf, &cond_from_pf)?;

        Ok(Self {
            thickness,
            cond_fc: 10f64.powf(cond_from_pf.eval(pf_field_capacity)),
            cond_k0: 10f64.powf(cond_from_pf.eval(PF_SATURATION)),
            sm_from_pf,
            pf_from_sm,
            cond_from_pf,
            mfp_from_pf,
            sm0,
            smfcf,
            smw,
            wc0: sm0 * thickness,
            wcfc: smfcf * thickness,
            wcw: smw * thickness,
            rooting_status: RootingStatus::Unrooted,
            wtop: 0.0,
            wpot: 0.0,
            wund: 1.0,
        })
    }

    /// Moisture content at `pf`.
    pub fn sm_from_pf(&self, pf: f64) -> f64 {
        self.sm_from_pf.eval(pf)
    }

    /// pF at moisture content `sm`.
    pub fn pf_from_sm(&self, sm: f64) -> f64 {
        self.pf_from_sm.eval(sm)
    }

    /// Hydraulic conductivity at `pf` (cm/day).
    pub fn conductivity(&self, pf: f64) -> f64 {
        10f64.powf(self.cond_from_pf.eval(pf))
    }

    /// Matric flux potential at `pf` (cm2/day).
    pub fn mfp_from_pf(&self, pf: f64) -> f64 {
        self.mfp_from_pf.eval(pf)
    }

    /// Whether both layers share the same hydraulic curves.
    pub fn same_hydraulics(&self, other: &Self) -> bool {
        self.sm_from_pf == other.sm_from_pf && self.cond_from_pf == other.cond_from_pf
    }
}

/// Integrate conductivity over suction from each pF node to the driest node.
fn build_mfp(sm_from_pf: &Afgen, cond_from_pf: &Afgen) -> Result<Afgen, SoilError> {
    let nodes = sm_from_pf.xs();
    let mut mfp = vec![0.0; nodes.len()];

    let mut acc = 0.0;
    for (i, pair) in nodes.windows(2).enumerate().rev() {
        let [lo, hi] = pair else { continue };
        let width = hi - lo;
        let delta: f64 = GAUSS_POINTS
            .iter()
            .zip(GAUSS_WEIGHTS.iter())
            .map(|(point, weight)| {
                let pf = point.mul_add(width, *lo);
                let suction = 10f64.powf(pf);
                weight * 10f64.powf(cond_from_pf.eval(pf)) * suction * LN_10
            })
            .sum();
        acc += delta * width;
        if let Some(slot) = mfp.get_mut(i) {
            *slot = acc;
        }
    }

    let flat: Vec<f64> = nodes
        .iter()
        .zip(mfp.iter())
        .flat_map(|(x, y)| [*x, *y])
        .collect();
    Ok(Afgen::new(&flat)?)
}
