//! Layered soil water balance.
//!
//! Water moves between layers according to two flow limits per layer
//! boundary:
//!
//! - a "wet" limit, the harmonic mean of the adjoining conductivities,
//!   representing gravity-dominated flow (always downward);
//! - a "dry" limit, the matric flux potential gradient across the
//!   boundary, representing suction-dominated flow (may be upward).
//!
//! The larger of the two is the candidate downward flow. Upward flow is
//! bounded by a fraction of the amount needed to bring both layers to
//! equal potential. All flows are then capped so that no layer
//! oversaturates and no layer drains below field capacity.
//!
//! Where adjoining layers have different curves, the boundary pF and the
//! equal-potential amount are found by bisection with a fixed iteration
//! budget. Failure to converge is a [`SoilError::NonConvergence`].

use chrono::NaiveDate;

use agrosim_kernel::{
    DayContext, Handle, Kiosk, Lifecycle, ParameterProvider, SimulationObject,
    VarKind,
};
use agrosim_types::{Afgen, ComponentId, WeatherRecord, limit};

use crate::error::SoilError;
use crate::profile::{RootingStatus, SoilProfile};

const MAX_FLOW_ITER: usize = 50;
const TINY_FLOW: f64 = 0.001;
/// Upward flow is at most this fraction of the equal-potential amount.
const UPWARD_FLOW_LIMIT: f64 = 0.5;
/// Rooting depth used when no crop publishes `RD` (cm).
pub const DEFAULT_RD: f64 = 10.0;
const BALANCE_TOLERANCE: f64 = 1e-4;
const NINFTB: [f64; 6] = [0.0, 0.0, 0.5, 0.0, 1.5, 1.0];

fn at(values: &[f64], index: usize) -> f64 {
    values.get(index).copied().unwrap_or(0.0)
}

fn put(values: &mut [f64], index: usize, value: f64) {
    if let Some(slot) = values.get_mut(index) {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Parameters, states, rates
// ---------------------------------------------------------------------------

/// Site parameters of the layered balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayeredParameters {
    /// Non-infiltrating fraction depends on storm size.
    pub ifunrn: bool,
    /// Maximum non-infiltrating fraction of rain.
    pub notinf: f64,
    /// Initial surface storage (cm).
    pub ssi: f64,
    /// Maximum surface storage (cm).
    pub ssmax: f64,
    /// Maximum initial moisture content of the rooted layers.
    pub smlim: f64,
    /// Initial available water in the profile (cm).
    pub wav: f64,
}

impl LayeredParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, SoilError> {
        Ok(Self {
            ifunrn: params.flag("IFUNRN")?,
            notinf: params.number("NOTINF")?,
            ssi: params.number("SSI")?,
            ssmax: params.number("SSMAX")?,
            smlim: params.number("SMLIM")?,
            wav: params.number("WAV")?,
        })
    }
}

/// State variables of the layered balance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayeredStates {
    /// Volumetric moisture content per layer.
    pub sm: Vec<f64>,
    /// Water amount per layer (cm).
    pub wc: Vec<f64>,
    /// Surface storage (cm).
    pub ss: f64,
    /// Water in the root zone (cm).
    pub w: f64,
    /// Water between root zone and maximum rooting depth (cm).
    pub wlow: f64,
    /// `w + wlow` (cm).
    pub wwlow: f64,
    /// Water below the maximum rooting depth (cm).
    pub wbot: f64,
    /// Available water in the root zone (cm).
    pub wavupp: f64,
    /// Available water in the potential root zone (cm).
    pub wavlow: f64,
    /// Available water below the maximum rooting depth (cm).
    pub wavbot: f64,
    /// Mean moisture content of the root zone.
    pub sm_mean: f64,
    /// Total transpiration (cm).
    pub wtrat: f64,
    /// Total transpiration demand that could not be met (cm).
    pub unmet_trat: f64,
    /// Total soil evaporation (cm).
    pub evst: f64,
    /// Total open water evaporation (cm).
    pub evwt: f64,
    /// Total surface runoff (cm).
    pub tsr: f64,
    /// Total rainfall (cm).
    pub raint: f64,
    /// Total infiltration (cm).
    pub totinf: f64,
    /// Total effective irrigation (cm).
    pub totirr: f64,
    /// Total outflow through the profile bottom (cm).
    pub bottomflowt: f64,
}

/// Rate variables of the layered balance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayeredRates {
    /// Flow through each layer's top boundary plus the bottom (cm/day).
    pub flow: Vec<f64>,
    /// Infiltration at the surface (cm/day).
    pub rin: f64,
    /// Transpiration drawn from each layer (cm/day).
    pub wtraly: Vec<f64>,
    /// Total transpiration (cm/day).
    pub wtra: f64,
    /// Transpiration demand not met by the profile (cm/day).
    pub unmet_tra: f64,
    /// Soil evaporation (cm/day).
    pub evs: f64,
    /// Open water evaporation (cm/day).
    pub evw: f64,
    /// Effective irrigation (cm/day).
    pub rirr: f64,
    /// Net change of water per layer (cm/day).
    pub dwc: Vec<f64>,
    /// Change in surface storage (cm/day).
    pub dss: f64,
    /// Surface runoff (cm/day).
    pub dtsr: f64,
    /// Rainfall (cm/day).
    pub draint: f64,
    /// Outflow through the profile bottom (cm/day).
    pub bottomflow: f64,
    /// Days since last rain once this step is integrated.
    pub dslr: f64,
}

#[derive(Debug, Clone, Copy)]
struct Published {
    sm: Handle<f64>,
    smw: Handle<f64>,
    smfcf: Handle<f64>,
    sm0: Handle<f64>,
    sm_mean: Handle<f64>,
    sm_layers: Handle<Vec<f64>>,
    wc_layers: Handle<Vec<f64>>,
    w: Handle<f64>,
    wlow: Handle<f64>,
    wwlow: Handle<f64>,
    wbot: Handle<f64>,
    wavupp: Handle<f64>,
    wavlow: Handle<f64>,
    wavbot: Handle<f64>,
    ss: Handle<f64>,
    wtrat: Handle<f64>,
    unmet_trat: Handle<f64>,
    evst: Handle<f64>,
    evwt: Handle<f64>,
    tsr: Handle<f64>,
    raint: Handle<f64>,
    totinf: Handle<f64>,
    totirr: Handle<f64>,
    bottomflowt: Handle<f64>,
    rin: Handle<f64>,
    evs: Handle<f64>,
    evw: Handle<f64>,
    wtra: Handle<f64>,
    rirr: Handle<f64>,
    bottomflow: Handle<f64>,
    flow: Handle<Vec<f64>>,
    wtraly: Handle<Vec<f64>>,
}

// ---------------------------------------------------------------------------
// Flow limits
// ---------------------------------------------------------------------------

struct Hydraulics {
    pf: Vec<f64>,
    conductivity: Vec<f64>,
    mfp: Vec<f64>,
}

fn hydraulics(profile: &SoilProfile, sm: &[f64]) -> Hydraulics {
    let pf: Vec<f64> = profile
        .layers()
        .iter()
        .zip(sm.iter())
        .map(|(layer, sm)| layer.pf_from_sm(*sm))
        .collect();
    let conductivity = profile
        .layers()
        .iter()
        .zip(pf.iter())
        .map(|(layer, pf)| layer.conductivity(*pf))
        .collect();
    let mfp = profile
        .layers()
        .iter()
        .zip(pf.iter())
        .map(|(layer, pf)| layer.mfp_from_pf(*pf))
        .collect();
    Hydraulics {
        pf,
        conductivity,
        mfp,
    }
}

/// Wet limit, dry limit and equal-potential amount at the top of layer `il` (`il >= 1`).
fn boundary_limits(
    profile: &SoilProfile,
    h: &Hydraulics,
    wc: &[f64],
    il: usize,
    day: NaiveDate,
) -> Result<(f64, f64, f64), SoilError> {
    let above = il.saturating_sub(1);
    let layers = profile.layers();
    let (Some(upper), Some(lower)) = (layers.get(above), layers.get(il)) else {
        return Ok((0.0, 0.0, 0.0));
    };
    let (tsl1, tsl2) = (upper.thickness, lower.thickness);

    let limwet = (tsl1 + tsl2)
        / (tsl1 / at(&h.conductivity, above) + tsl2 / at(&h.conductivity, il));

    if upper.same_hydraulics(lower) {
        let limdry = 2.0 * (at(&h.mfp, above) - at(&h.mfp, il)) / (tsl1 + tsl2);
        let equal_amount = if limdry < 0.0 {
            let mean_sm = (at(wc, above) + at(wc, il)) / (tsl1 + tsl2);
            tsl1.mul_add(-mean_sm, at(wc, above))
        } else {
            0.0
        };
        return Ok((limwet, limdry, equal_amount));
    }

    // Bisection on the boundary pF until both sides carry the same flow.
    let (mut pf1, mut pf2) = (at(&h.pf, above), at(&h.pf, il));
    let (mfp1, mfp2) = (at(&h.mfp, above), at(&h.mfp, il));
    let mut limdry = None;
    for _ in 0..MAX_FLOW_ITER {
        let pfx = f64::midpoint(pf1, pf2);
        let flow1 = 2.0 * (mfp1 - upper.mfp_from_pf(pfx)) / tsl1;
        let flow2 = 2.0 * (lower.mfp_from_pf(pfx) - mfp2) / tsl2;
        if (flow1 - flow2).abs() < TINY_FLOW {
            limdry = Some(f64::midpoint(flow1, flow2));
            break;
        } else if flow1.abs() > flow2.abs() {
            pf2 = pfx;
        } else if flow1.abs() < flow2.abs() {
            pf1 = pfx;
        }
    }
    let limdry = limdry.ok_or(SoilError::NonConvergence {
        search: "dry flow",
        boundary: above,
        day,
    })?;

    if limdry >= 0.0 {
        return Ok((limwet, limdry, 0.0));
    }

    // Bisection on the transferred amount that equalises potential.
    let (mut eq1, mut eq2) = (-at(wc, il), 0.0_f64);
    for _ in 0..MAX_FLOW_ITER {
        let amount = f64::midpoint(eq1, eq2);
        if (eq1 - eq2).abs() < TINY_FLOW {
            return Ok((limwet, limdry, amount));
        }
        let pf_upper = upper.pf_from_sm((at(wc, above) - amount) / tsl1);
        let pf_lower = lower.pf_from_sm((at(wc, il) + amount) / tsl2);
        if pf_upper > pf_lower {
            eq2 = amount;
        } else {
            eq1 = amount;
        }
    }
    Err(SoilError::NonConvergence {
        search: "equilibrium amount",
        boundary: above,
        day,
    })
}

/// Maximum flow through the top boundary of every layer, plus the bottom
/// boundary as the last element (cm/day).
///
/// `wtraly` is the transpiration drawn from each layer on this day.
pub fn flow_limits(
    profile: &SoilProfile,
    wc: &[f64],
    wtraly: &[f64],
    delt: f64,
    day: NaiveDate,
) -> Result<Vec<f64>, SoilError> {
    let layers = profile.layers();
    let n = layers.len();
    let sm: Vec<f64> = layers
        .iter()
        .zip(wc.iter())
        .map(|(layer, wc)| wc / layer.thickness)
        .collect();
    let h = hydraulics(profile, &sm);

    let mut flow_mx = vec![0.0; n.saturating_add(1)];
    if let Some(bottom) = layers.last() {
        let k = h.conductivity.last().copied().unwrap_or(0.0);
        put(&mut flow_mx, n, bottom.cond_fc.max(k));
    }

    for (il, layer) in layers.iter().enumerate().rev() {
        let (limwet, limdry, equal_amount) = if il == 0 {
            (profile.surface_conductivity(), 0.0, 0.0)
        } else {
            boundary_limits(profile, &h, wc, il, day)?
        };
        let below = at(&flow_mx, il.saturating_add(1));
        let sink = at(wtraly, il);
        let water = at(wc, il);

        let mut limit_here = None;
        if limdry < 0.0 && il > 0 {
            // Upward flow, bounded by a fraction of the equal-potential amount.
            let mut flow_max = limdry.max(equal_amount * UPWARD_FLOW_LIMIT);
            let above = il.saturating_sub(1);
            let target_fc = layers.get(above).map_or(0.0, |l| l.wcfc);
            let target_limit = at(wtraly, above) + target_fc - at(wc, above) / delt;
            if target_limit > 0.0 {
                // Target layer below field capacity: accept upward flow,
                // without emptying this layer.
                flow_max = flow_max.max(-target_limit);
                limit_here = Some(flow_max.max(below + sink - water / delt));
            }
        }

        let value = limit_here.unwrap_or_else(|| {
            let flow_max = limdry.max(limwet);
            flow_max.min(below + (layer.wc0 - water) / delt + sink)
        });
        put(&mut flow_mx, il, value);
    }

    Ok(flow_mx)
}

// ---------------------------------------------------------------------------
// Water balance
// ---------------------------------------------------------------------------

/// Layered soil water balance.
#[derive(Debug, Clone)]
pub struct LayeredWaterBalance {
    id: ComponentId,
    lifecycle: Lifecycle,
    profile: SoilProfile,
    params: LayeredParameters,
    /// Current state.
    pub states: LayeredStates,
    /// Rates of the current day.
    pub rates: LayeredRates,
    initial: LayeredStates,
    wci: f64,
    rdm: f64,
    rdm_initial: f64,
    rd_old: f64,
    dslr: f64,
    dslr_initial: f64,
    rin_old: f64,
    pending_irrigation: f64,
    pending_rdm: Option<f64>,
    published: Published,
}

impl LayeredWaterBalance {
    /// Build the profile, set initial water contents and publish.
    pub fn initialize(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
    ) -> Result<Self, SoilError> {
        let profile = SoilProfile::from_parameters(params)?;
        Self::with_profile(day, kiosk, profile, LayeredParameters::from_parameters(params)?)
    }

    /// Initialize from an explicit profile and parameters.
    pub fn with_profile(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        mut profile: SoilProfile,
        params: LayeredParameters,
    ) -> Result<Self, SoilError> {
        let rdm = profile.max_rootable_depth();
        profile.validate_max_rooting_depth(rdm)?;
        profile.determine_rooting_status(DEFAULT_RD, rdm);

        let (states, dslr) = initial_states(&profile, &params);
        let id = ComponentId::new();
        let published = publish(kiosk, id, &profile, &states)?;
        let wci: f64 = states.wc.iter().sum();

        tracing::info!(
            %day,
            layers = profile.len(),
            depth = rdm,
            initial_water = wci,
            "Layered water balance initialized"
        );

        let mut balance = Self {
            id,
            lifecycle: Lifecycle::active("layered water balance"),
            profile,
            params,
            initial: LayeredStates::default(),
            states,
            rates: LayeredRates::default(),
            wci,
            rdm,
            rdm_initial: rdm,
            rd_old: DEFAULT_RD,
            dslr,
            dslr_initial: dslr,
            rin_old: 0.0,
            pending_irrigation: 0.0,
            pending_rdm: None,
            published,
        };
        balance.update_aggregates(DEFAULT_RD);
        balance.initial = balance.states.clone();
        balance.write_states(kiosk)?;
        Ok(balance)
    }

    /// Registry owner id of this balance.
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The soil profile with its current rooting status.
    pub const fn profile(&self) -> &SoilProfile {
        &self.profile
    }

    /// Queue effective irrigation for the next rates computation.
    pub fn on_irrigate(&mut self, effective_amount: f64) {
        self.pending_irrigation += effective_amount;
    }

    /// Re-evaluate the rooting setup from the new crop's `RDMCR`.
    pub fn on_crop_start(&mut self, params: &ParameterProvider) -> Result<(), SoilError> {
        let rdmcr = params.number("RDMCR")?;
        self.pending_rdm = Some(rdmcr.min(self.profile.max_rootable_depth()));
        Ok(())
    }

    /// Closing balance: initial + inputs - outputs - final (cm).
    pub fn checksum(&self) -> f64 {
        let s = &self.states;
        let stored: f64 = s.wc.iter().sum();
        self.params.ssi - s.ss + self.wci - stored + s.raint + s.totirr
            - s.wtrat
            - s.evwt
            - s.evst
            - s.tsr
            - s.bottomflowt
    }

    fn setup_new_crop(&mut self, rdm: f64) -> Result<(), SoilError> {
        self.profile.validate_max_rooting_depth(rdm)?;
        self.rdm = rdm;
        self.profile.determine_rooting_status(DEFAULT_RD, rdm);
        self.rd_old = DEFAULT_RD;
        tracing::debug!(rdm, "Rooting setup updated for new crop");
        Ok(())
    }

    /// Transpiration demand per layer plus maximum evaporation rates.
    fn demand(&self, kiosk: &Kiosk, weather: &WeatherRecord) -> Result<(Vec<f64>, f64, f64), SoilError> {
        let n = self.profile.len();
        let Some(tra) = kiosk.find_scalar("TRA") else {
            return Ok((vec![0.0; n], weather.e0, weather.es0));
        };
        let evwmx = kiosk.scalar("EVWMX")?;
        let evsmx = kiosk.scalar("EVSMX")?;
        let traly = match kiosk.find_profile("TRALY") {
            Some(per_layer) if per_layer.len() == n => per_layer.to_vec(),
            _ => self.distribute_transpiration(tra),
        };
        Ok((traly, evwmx, evsmx))
    }

    /// Spread scalar transpiration over rooted layers by available water.
    fn distribute_transpiration(&self, tra: f64) -> Vec<f64> {
        let weights: Vec<f64> = self
            .profile
            .layers()
            .iter()
            .zip(self.states.wc.iter())
            .map(|(layer, wc)| (wc - layer.wcw).max(0.0) * layer.wtop)
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return vec![0.0; weights.len()];
        }
        weights.iter().map(|w| tra * w / total).collect()
    }

    fn root_zone_limits(&self) -> (f64, f64, f64) {
        let depth = self.profile.rooted_depth();
        let layers = self.profile.layers();
        if depth <= 0.0 {
            return layers
                .first()
                .map_or((0.0, 0.0, 0.0), |l| (l.smw, l.smfcf, l.sm0));
        }
        let weighted = |f: fn(&crate::layer::SoilLayer) -> f64| {
            layers.iter().map(|l| f(l) * l.thickness * l.wtop).sum::<f64>() / depth
        };
        (weighted(|l| l.smw), weighted(|l| l.smfcf), weighted(|l| l.sm0))
    }

    fn update_aggregates(&mut self, rd: f64) {
        let s = &mut self.states;
        let (mut w, mut wlow, mut wbot) = (0.0, 0.0, 0.0);
        let (mut wavupp, mut wavlow, mut wavbot) = (0.0, 0.0, 0.0);
        for (layer, wc) in self.profile.layers().iter().zip(s.wc.iter()) {
            let available = wc - layer.wcw;
            w += wc * layer.wtop;
            wlow += wc * layer.wpot;
            wbot += wc * layer.wund;
            wavupp += available * layer.wtop;
            wavlow += available * layer.wpot;
            wavbot += available * layer.wund;
        }
        s.w = w;
        s.wlow = wlow;
        s.wwlow = w + wlow;
        s.wbot = wbot;
        s.wavupp = wavupp;
        s.wavlow = wavlow;
        s.wavbot = wavbot;
        s.sm_mean = if rd > 0.0 { w / rd } else { 0.0 };
    }

    fn write_states(&self, kiosk: &mut Kiosk) -> Result<(), SoilError> {
        let (p, s, id) = (&self.published, &self.states, self.id);
        let (smw, smfcf, sm0) = self.root_zone_limits();
        kiosk.set(p.sm, s.sm_mean, id)?;
        kiosk.set(p.sm_mean, s.sm_mean, id)?;
        kiosk.set(p.smw, smw, id)?;
        kiosk.set(p.smfcf, smfcf, id)?;
        kiosk.set(p.sm0, sm0, id)?;
        kiosk.set(p.sm_layers, s.sm.clone(), id)?;
        kiosk.set(p.wc_layers, s.wc.clone(), id)?;
        for (handle, value) in [
            (p.w, s.w),
            (p.wlow, s.wlow),
            (p.wwlow, s.wwlow),
            (p.wbot, s.wbot),
            (p.wavupp, s.wavupp),
            (p.wavlow, s.wavlow),
            (p.wavbot, s.wavbot),
            (p.ss, s.ss),
            (p.wtrat, s.wtrat),
            (p.unmet_trat, s.unmet_trat),
            (p.evst, s.evst),
            (p.evwt, s.evwt),
            (p.tsr, s.tsr),
            (p.raint, s.raint),
            (p.totinf, s.totinf),
            (p.totirr, s.totirr),
            (p.bottomflowt, s.bottomflowt),
        ] {
            kiosk.set(handle, value, id)?;
        }
        Ok(())
    }

    fn write_rates(&self, kiosk: &mut Kiosk) -> Result<(), SoilError> {
        let (p, r, id) = (&self.published, &self.rates, self.id);
        for (handle, value) in [
            (p.rin, r.rin),
            (p.evs, r.evs),
            (p.evw, r.evw),
            (p.wtra, r.wtra),
            (p.rirr, r.rirr),
            (p.bottomflow, r.bottomflow),
        ] {
            kiosk.set(handle, value, id)?;
        }
        kiosk.set(p.flow, r.flow.clone(), id)?;
        kiosk.set(p.wtraly, r.wtraly.clone(), id)?;
        Ok(())
    }
}

fn initial_states(profile: &SoilProfile, params: &LayeredParameters) -> (LayeredStates, f64) {
    let layers = profile.layers();

    // Maximum available water per layer, split over the rooted and
    // potentially rooted zones.
    let (mut toplim, mut lowlim) = (0.0, 0.0);
    let avmax: Vec<f64> = layers
        .iter()
        .map(|layer| match layer.rooting_status {
            RootingStatus::Rooted | RootingStatus::PartiallyRooted => {
                let sml = limit(layer.smw, layer.sm0, params.smlim);
                let value = (sml - layer.smw) * layer.thickness;
                toplim += value;
                value
            }
            RootingStatus::PotentiallyRooted => {
                let value = (layer.sm0 - layer.smw) * layer.thickness;
                lowlim += value;
                value
            }
            RootingStatus::Unrooted => 0.0,
        })
        .collect();

    let (topred, lowred) = if params.wav <= 0.0 || toplim <= 0.0 {
        (0.0, 0.0)
    } else if params.wav <= toplim {
        (params.wav / toplim, 0.0)
    } else if params.wav < toplim + lowlim {
        (1.0, (params.wav - toplim) / lowlim)
    } else {
        (1.0, 1.0)
    };

    let sm: Vec<f64> = layers
        .iter()
        .zip(avmax.iter())
        .map(|(layer, avmax)| match layer.rooting_status {
            RootingStatus::Rooted | RootingStatus::PartiallyRooted => {
                layer.smw + avmax * topred / layer.thickness
            }
            RootingStatus::PotentiallyRooted => layer.smw + avmax * lowred / layer.thickness,
            RootingStatus::Unrooted => layer.smw,
        })
        .collect();
    let wc: Vec<f64> = layers
        .iter()
        .zip(sm.iter())
        .map(|(layer, sm)| sm * layer.thickness)
        .collect();

    let dslr = layers.first().map_or(1.0, |top| {
        let half_wet = 0.5f64.mul_add(top.smfcf - top.smw, top.smw);
        if sm.first().copied().unwrap_or(0.0) <= half_wet { 5.0 } else { 1.0 }
    });

    let states = LayeredStates {
        sm,
        wc,
        ss: params.ssi,
        ..LayeredStates::default()
    };
    (states, dslr)
}

fn publish(
    kiosk: &mut Kiosk,
    id: ComponentId,
    profile: &SoilProfile,
    s: &LayeredStates,
) -> Result<Published, SoilError> {
    let n = profile.len();
    let state = |kiosk: &mut Kiosk, name: &str, value: f64| kiosk.publish(name, value, VarKind::State, id);
    let rate = |kiosk: &mut Kiosk, name: &str| kiosk.publish(name, 0.0, VarKind::Rate, id);
    Ok(Published {
        sm: state(kiosk, "SM", s.sm_mean)?,
        smw: state(kiosk, "SMW", 0.0)?,
        smfcf: state(kiosk, "SMFCF", 0.0)?,
        sm0: state(kiosk, "SM0", 0.0)?,
        sm_mean: state(kiosk, "SM_MEAN", s.sm_mean)?,
        sm_layers: kiosk.publish("SM_LAYERS", s.sm.clone(), VarKind::State, id)?,
        wc_layers: kiosk.publish("WC_LAYERS", s.wc.clone(), VarKind::State, id)?,
        w: state(kiosk, "W", s.w)?,
        wlow: state(kiosk, "WLOW", s.wlow)?,
        wwlow: state(kiosk, "WWLOW", s.wwlow)?,
        wbot: state(kiosk, "WBOT", s.wbot)?,
        wavupp: state(kiosk, "WAVUPP", s.wavupp)?,
        wavlow: state(kiosk, "WAVLOW", s.wavlow)?,
        wavbot: state(kiosk, "WAVBOT", s.wavbot)?,
        ss: state(kiosk, "SS", s.ss)?,
        wtrat: state(kiosk, "WTRAT", 0.0)?,
        unmet_trat: state(kiosk, "UNMET_TRAT", 0.0)?,
        evst: state(kiosk, "EVST", 0.0)?,
        evwt: state(kiosk, "EVWT", 0.0)?,
        tsr: state(kiosk, "TSR", 0.0)?,
        raint: state(kiosk, "RAINT", 0.0)?,
        totinf: state(kiosk, "TOTINF", 0.0)?,
        totirr: state(kiosk, "TOTIRR", 0.0)?,
        bottomflowt: state(kiosk, "BOTTOMFLOWT", 0.0)?,
        rin: rate(kiosk, "RIN")?,
        evs: rate(kiosk, "EVS")?,
        evw: rate(kiosk, "EVW")?,
        wtra: rate(kiosk, "WTRA")?,
        rirr: rate(kiosk, "RIRR")?,
        bottomflow: rate(kiosk, "BOTTOMFLOW")?,
        flow: kiosk.publish("FLOW", vec![0.0; n.saturating_add(1)], VarKind::Rate, id)?,
        wtraly: kiosk.publish("WTRALY", vec![0.0; n], VarKind::Rate, id)?,
    })
}

impl SimulationObject for LayeredWaterBalance {
    type Error = SoilError;

    #[allow(clippy::too_many_lines)]
    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), SoilError> {
        self.lifecycle.begin_rates(ctx.day)?;
        let delt = 1.0;

        if let Some(rdm) = self.pending_rdm.take() {
            self.setup_new_crop(rdm)?;
        }

        let rirr = core::mem::take(&mut self.pending_irrigation);
        let (demand, evwmx, evsmx) = self.demand(ctx.kiosk, weather)?;
        let layers = self.profile.layers();
        let n = layers.len();
        let wc = &self.states.wc;

        // Transpiration cannot take a layer below wilting point.
        let mut unmet_tra = 0.0;
        let wtraly: Vec<f64> = layers
            .iter()
            .zip(wc.iter())
            .zip(demand.iter())
            .map(|((layer, wc), wanted)| {
                let taken = wanted.min((wc - layer.wcw).max(0.0) / delt).max(0.0);
                unmet_tra += wanted - taken;
                taken
            })
            .collect();
        let wtra: f64 = wtraly.iter().sum();

        // Evaporation from surface water, else from soil by days since last rain.
        let (evw, mut evs, dslr) = if self.states.ss > 1.0 {
            (evwmx, 0.0, self.dslr)
        } else if self.rin_old >= 1.0 {
            (0.0, evsmx, 1.0)
        } else {
            let evsmxt = evsmx * ((self.dslr + 1.0).sqrt() - self.dslr.sqrt());
            (0.0, evsmx.min(evsmxt + self.rin_old), self.dslr + 1.0)
        };

        // Potentially infiltrating water.
        let rain = weather.rain;
        let mut rinpre = if self.params.ifunrn {
            let ninftb = Afgen::new(&NINFTB)?;
            self.params.notinf.mul_add(-ninftb.eval(rain), 1.0) * rain
        } else {
            (1.0 - self.params.notinf) * rain
        };
        rinpre += rirr + self.states.ss;
        if self.states.ss > 0.1 {
            rinpre = self.profile.surface_conductivity().min(rinpre - evw);
        }

        let flow_mx = flow_limits(&self.profile, wc, &wtraly, delt, ctx.day)?;
        let rin = rinpre.min(at(&flow_mx, 0));

        // Evaporation drawn from the top layer first, then deeper layers.
        let mut evsl = vec![0.0; n];
        let mut evrest = 0.0;
        for (il, layer) in layers.iter().enumerate() {
            let water = at(wc, il);
            let sink = at(&wtraly, il);
            if il == 0 {
                let from_top = evs.min((water - layer.wcw) / delt + rin - sink);
                put(&mut evsl, 0, from_top);
                evrest = evs - from_top;
            } else {
                let available = ((water - layer.wcw) / delt - sink).max(0.0);
                if available >= evrest {
                    put(&mut evsl, il, evrest);
                    evrest = 0.0;
                    break;
                }
                put(&mut evsl, il, available);
                evrest -= available;
            }
        }
        // Demand beyond what the profile holds is dropped.
        evs -= evrest;

        let mut evflow = vec![0.0; n.saturating_add(1)];
        put(&mut evflow, 0, evs);
        for il in 1..n {
            let above = il.saturating_sub(1);
            let carried = at(&evflow, above) - at(&evsl, above);
            put(&mut evflow, il, carried);
        }

        // Cap downward flows so no layer drains below field capacity.
        let mut flow = vec![0.0; n.saturating_add(1)];
        let mut dwc = vec![0.0; n];
        put(&mut flow, 0, rin - evs);
        for (il, layer) in layers.iter().enumerate() {
            let next = il.saturating_add(1);
            let mxloss = (at(wc, il) - layer.wcfc) / delt;
            let excess = (mxloss + at(&flow, il) - at(&wtraly, il)).max(0.0);
            let down = at(&flow_mx, next).min(excess - at(&evflow, next));
            put(&mut flow, next, down);
            put(&mut dwc, il, at(&flow, il) - down - at(&wtraly, il));
        }

        // Surface storage and runoff.
        let sstmp = rain + rirr - evw - rin;
        let dss = sstmp.min(self.params.ssmax - self.states.ss);

        self.rates = LayeredRates {
            bottomflow: at(&flow, n),
            flow,
            rin,
            wtraly,
            wtra,
            unmet_tra,
            evs,
            evw,
            rirr,
            dwc,
            dss,
            dtsr: sstmp - dss,
            draint: rain,
            dslr,
        };
        self.write_rates(ctx.kiosk)
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        let r = &self.rates;
        let s = &mut self.states;

        for ((wc, sm), (layer, dwc)) in s
            .wc
            .iter_mut()
            .zip(s.sm.iter_mut())
            .zip(self.profile.layers().iter().zip(r.dwc.iter()))
        {
            *wc += dwc * delt;
            *sm = *wc / layer.thickness;
        }

        s.wtrat += r.wtra * delt;
        s.unmet_trat += r.unmet_tra * delt;
        s.evwt += r.evw * delt;
        s.evst += r.evs * delt;
        s.raint += r.draint * delt;
        s.totinf += r.rin * delt;
        s.totirr += r.rirr * delt;
        s.ss += r.dss * delt;
        s.tsr += r.dtsr * delt;
        s.bottomflowt += r.bottomflow * delt;
        self.dslr = r.dslr;
        self.rin_old = r.rin;

        let rd = ctx.kiosk.find_scalar("RD").unwrap_or(DEFAULT_RD);
        if (rd - self.rd_old).abs() > 0.001 {
            self.profile.determine_rooting_status(rd, self.rdm);
        }
        self.update_aggregates(rd);
        self.rd_old = rd;

        self.write_states(ctx.kiosk)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.finalize()?;
        let checksum = self.checksum();
        if checksum.abs() > BALANCE_TOLERANCE {
            return Err(SoilError::WaterBalance {
                scope: "layered profile",
                day: ctx.day,
                checksum,
            });
        }
        tracing::info!(day = %ctx.day, checksum, "Layered water balance closed");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.reset();
        self.rdm = self.rdm_initial;
        self.profile.determine_rooting_status(DEFAULT_RD, self.rdm);
        self.states = self.initial.clone();
        self.rates = LayeredRates::default();
        self.rd_old = DEFAULT_RD;
        self.dslr = self.dslr_initial;
        self.rin_old = 0.0;
        self.pending_irrigation = 0.0;
        self.pending_rdm = None;
        self.write_states(ctx.kiosk)
    }
}
