//! Test fixtures: a small crop library, constant weather, a stand-in soil
//! and a day stepper that drives any simulation object.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use agrosim_kernel::{
    DayContext, Handle, Kiosk, Outbox, ParameterBundle, ParameterProvider, SimulationObject,
    VarKind,
};
use agrosim_types::{ComponentId, CropEndType, CropStartType, Signal, WeatherRecord};

/// Annual crop in [`LIBRARY`].
pub(crate) const ANNUAL: &str = "wheat";

/// Perennial crop in [`LIBRARY`].
pub(crate) const PERENNIAL: &str = "grass";

pub(crate) const LIBRARY: &str = r"
site:
  RDMSOL: 120.0
crops:
  wheat:
    winter:
      TSUMEM: 120.0
      TBASEM: 0.0
      TEFFMX: 30.0
      TSUM1: 800.0
      TSUM2: 1000.0
      TSUM3: 200.0
      IDSL: 0
      DLO: 16.0
      DLC: 8.0
      DVSI: 0.0
      DVSM: 2.0
      DVSEND: 2.5
      DTSMTB: [0.0, 0.0, 30.0, 30.0, 45.0, 30.0]
      DTBEM: 0
      VERNSAT: 50.0
      VERNBASE: 10.0
      VERNDVS: 0.3
      VERNRTB: [-8.0, 0.0, -4.0, 0.0, 3.0, 1.0, 10.0, 1.0, 17.0, 0.0, 20.0, 0.0]
      TDWI: 210.0
      RGRLAI: 0.0082
      SLATB: [0.0, 0.00212, 2.0, 0.00212]
      SPA: 0.0
      SSATB: [0.0, 0.0, 2.0, 0.0]
      SPAN: 31.3
      TBASE: 0.0
      PERDL: 0.03
      KDIFTB: [0.0, 0.6, 2.0, 0.6]
      EFFTB: [0.0, 0.45, 40.0, 0.45]
      AMAXTB: [0.0, 35.83, 1.0, 35.83, 1.3, 35.83, 2.0, 4.48]
      TMPFTB: [0.0, 0.01, 10.0, 0.6, 15.0, 1.0, 25.0, 1.0, 35.0, 0.0]
      TMNFTB: [0.0, 0.0, 3.0, 1.0]
      CVL: 0.685
      CVO: 0.709
      CVR: 0.694
      CVS: 0.662
      Q10: 2.0
      RML: 0.03
      RMO: 0.01
      RMR: 0.015
      RMS: 0.015
      RFSETB: [0.0, 1.0, 2.0, 1.0]
      FRTB: [0.0, 0.5, 0.1, 0.5, 0.2, 0.4, 0.35, 0.22, 0.4, 0.17, 0.5, 0.13, 0.7, 0.07, 0.9, 0.03, 1.2, 0.0, 2.0, 0.0]
      FLTB: [0.0, 0.65, 0.1, 0.65, 0.25, 0.7, 0.5, 0.5, 0.646, 0.3, 0.95, 0.0, 2.0, 0.0]
      FSTB: [0.0, 0.35, 0.1, 0.35, 0.25, 0.3, 0.5, 0.5, 0.646, 0.7, 0.95, 1.0, 1.0, 0.0, 2.0, 0.0]
      FOTB: [0.0, 0.0, 0.95, 0.0, 1.0, 1.0, 2.0, 1.0]
      NPART: 1.0
      NTHRESH: 100.0
      RDRRTB: [0.0, 0.0, 1.5, 0.0, 1.5001, 0.02, 2.0, 0.02]
      RDRSTB: [0.0, 0.0, 1.5, 0.0, 1.5001, 0.02, 2.0, 0.02]
      CFET: 1.0
      DEPNR: 4.5
      IAIRDU: 0
      IOX: 0
      CRAIRC: 0.06
      RDI: 10.0
      RRI: 1.2
      RDMCR: 125.0
      NMAXLV_TB: [0.0, 0.06, 0.4, 0.04, 0.7, 0.03, 1.0, 0.028, 2.0, 0.026]
      PMAXLV_TB: [0.0, 0.011, 0.4, 0.008, 0.7, 0.0055, 1.0, 0.0045, 2.0, 0.004]
      KMAXLV_TB: [0.0, 0.12, 0.4, 0.1, 0.7, 0.06, 1.0, 0.04, 2.0, 0.03]
      NMAXRT_FR: 0.5
      PMAXRT_FR: 0.5
      KMAXRT_FR: 0.5
      NMAXST_FR: 0.5
      PMAXST_FR: 0.5
      KMAXST_FR: 0.5
      NMAXSO: 0.0176
      PMAXSO: 0.0026
      KMAXSO: 0.0048
      NRESIDLV: 0.004
      NRESIDST: 0.002
      NRESIDRT: 0.002
      PRESIDLV: 0.0005
      PRESIDST: 0.0003
      PRESIDRT: 0.0003
      KRESIDLV: 0.009
      KRESIDST: 0.005
      KRESIDRT: 0.005
      NCRIT_FR: 1.0
      PCRIT_FR: 1.0
      KCRIT_FR: 1.0
      TCNT: 10.0
      TCPT: 10.0
      TCKT: 10.0
      RNUPTAKEMAX: 7.2
      RPUPTAKEMAX: 0.8
      RKUPTAKEMAX: 7.4
      NFIX_FR: 0.0
      DVS_NPK_STOP: 1.3
      DVS_NPK_TRANSL: 0.8
      NPK_TRANSLRT_FR: 0.15
      NLUE_NPK: 1.1
  grass:
    perennial:
      TSUMEM: 120.0
      TBASEM: 0.0
      TEFFMX: 30.0
      TSUM1: 800.0
      TSUM2: 1000.0
      TSUM3: 200.0
      IDSL: 0
      DLO: 16.0
      DLC: 8.0
      DVSI: 0.0
      DVSM: 2.0
      DVSEND: 2.5
      DTSMTB: [0.0, 0.0, 30.0, 30.0, 45.0, 30.0]
      DTBEM: 0
      DORM: 30
      DORMCD: 30
      AGEI: 3
      DCYCLEMAX: 365
      MLDORM: 6.0
      TDWI: [0.0, 100.0, 10.0, 300.0]
      RGRLAI: 0.0082
      SLATB: [[0.0, 0.0025, 2.0, 0.0025], [0.0, 0.002, 2.0, 0.002]]
      SPA: 0.0
      SSATB: [0.0, 0.0, 2.0, 0.0]
      SPAN: [0.0, 30.0, 10.0, 40.0]
      TBASE: 0.0
      PERDL: 0.03
      KDIFTB: [0.0, 0.6, 2.0, 0.6]
      EFFTB: [0.0, 0.45, 40.0, 0.45]
      AMAXTB: [0.0, 35.83, 1.0, 35.83, 1.3, 35.83, 2.0, 4.48]
      TMPFTB: [0.0, 0.01, 10.0, 0.6, 15.0, 1.0, 25.0, 1.0, 35.0, 0.0]
      TMNFTB: [0.0, 0.0, 3.0, 1.0]
      CVL: [0.0, 0.685, 10.0, 0.72]
      CVO: 0.709
      CVR: 0.694
      CVS: 0.662
      Q10: 2.0
      RML: 0.03
      RMO: 0.01
      RMR: 0.015
      RMS: 0.015
      RFSETB: [0.0, 1.0, 2.0, 1.0]
      FRTB: [[0.0, 0.5, 1.0, 0.3, 2.0, 0.1], [0.0, 0.4, 1.0, 0.2, 2.0, 0.1]]
      FLTB: [[0.0, 0.6, 1.0, 0.5, 2.0, 0.2], [0.0, 0.6, 1.0, 0.4, 2.0, 0.2]]
      FSTB: [[0.0, 0.4, 1.0, 0.4, 2.0, 0.3], [0.0, 0.4, 1.0, 0.4, 2.0, 0.3]]
      FOTB: [[0.0, 0.0, 1.0, 0.1, 2.0, 0.5], [0.0, 0.0, 1.0, 0.2, 2.0, 0.5]]
      NPART: 1.0
      NTHRESH: 100.0
      RDRRTB: [0.0, 0.0, 2.0, 0.01]
      RDRSTB: [0.0, 0.0, 2.0, 0.01]
      CFET: 1.0
      DEPNR: 3.5
      IAIRDU: 0
      IOX: 0
      CRAIRC: 0.06
      RDI: 30.0
      RRI: 1.0
      RDMCR: 100.0
      NMAXLV_TB: [0.0, 0.05, 2.0, 0.03]
      PMAXLV_TB: [0.0, 0.008, 2.0, 0.005]
      KMAXLV_TB: [0.0, 0.08, 2.0, 0.04]
      NMAXRT_FR: 0.5
      PMAXRT_FR: 0.5
      KMAXRT_FR: 0.5
      NMAXST_FR: 0.5
      PMAXST_FR: 0.5
      KMAXST_FR: 0.5
      NMAXSO: 0.02
      PMAXSO: 0.003
      KMAXSO: 0.005
      NRESIDLV: 0.004
      NRESIDST: 0.002
      NRESIDRT: 0.002
      PRESIDLV: 0.0005
      PRESIDST: 0.0003
      PRESIDRT: 0.0003
      KRESIDLV: 0.009
      KRESIDST: 0.005
      KRESIDRT: 0.005
      NCRIT_FR: 1.0
      PCRIT_FR: 1.0
      KCRIT_FR: 1.0
      TCNT: 10.0
      TCPT: 10.0
      TCKT: 10.0
      RNUPTAKEMAX: 5.0
      RPUPTAKEMAX: 0.6
      RKUPTAKEMAX: 5.0
      NFIX_FR: 0.0
      DVS_NPK_STOP: 1.8
      DVS_NPK_TRANSL: 1.0
      NPK_TRANSLRT_FR: 0.15
      NLUE_NPK: 1.1
";

/// First simulated day of every test.
pub(crate) fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 4, 1).unwrap()
}

/// Parameters with `crop` active.
pub(crate) fn provider(crop: &str, start_type: CropStartType, end_type: CropEndType) -> ParameterProvider {
    let bundle: ParameterBundle = serde_yml::from_str(LIBRARY).unwrap();
    let mut params = ParameterProvider::new(bundle).unwrap();
    let variety = if crop == PERENNIAL { "perennial" } else { "winter" };
    params.set_active_crop(crop, variety, start_type, end_type).unwrap();
    params
}

/// A clear day with mean temperature `temp` at 52N.
pub(crate) fn weather(day: NaiveDate, temp: f64) -> WeatherRecord {
    WeatherRecord {
        day,
        lat: 52.0,
        irrad: 18.0e6,
        tmin: temp - 5.0,
        tmax: temp + 5.0,
        vap: 12.0,
        wind: 2.0,
        rain: 0.0,
        e0: 0.5,
        es0: 0.45,
        et0: 0.4,
    }
}

/// Soil stand-in publishing what the crop reads from the soil.
pub(crate) struct FakeSoil {
    id: ComponentId,
    handles: BTreeMap<&'static str, Handle<f64>>,
}

impl FakeSoil {
    pub(crate) fn new(kiosk: &mut Kiosk) -> Self {
        let id = ComponentId::new();
        let mut handles = BTreeMap::new();
        for (name, value, kind) in [
            ("SM", 0.3, VarKind::State),
            ("SMW", 0.1, VarKind::State),
            ("SMFCF", 0.3, VarKind::State),
            ("SM0", 0.45, VarKind::State),
            ("NAVAIL", 100.0, VarKind::State),
            ("PAVAIL", 50.0, VarKind::State),
            ("KAVAIL", 100.0, VarKind::State),
            ("SURFACE_N", 0.0, VarKind::State),
            ("EVS", 0.1, VarKind::Rate),
        ] {
            handles.insert(name, kiosk.publish(name, value, kind, id).unwrap());
        }
        Self { id, handles }
    }

    pub(crate) fn set(&self, kiosk: &mut Kiosk, name: &str, value: f64) {
        kiosk.set(*self.handles.get(name).unwrap(), value, self.id).unwrap();
    }
}

/// Drives simulation objects one day at a time and collects their signals.
pub(crate) struct Stepper {
    pub(crate) day: NaiveDate,
    pub(crate) kiosk: Kiosk,
    pub(crate) outbox: Outbox,
    pub(crate) signals: Vec<Signal>,
}

impl Stepper {
    pub(crate) fn new() -> Self {
        Self {
            day: start(),
            kiosk: Kiosk::new(),
            outbox: Outbox::new(),
            signals: Vec::new(),
        }
    }

    pub(crate) fn with_context<R>(&mut self, f: impl FnOnce(&mut DayContext<'_>) -> R) -> R {
        let mut ctx = DayContext::new(self.day, &mut self.kiosk, &mut self.outbox);
        let result = f(&mut ctx);
        self.signals.extend(self.outbox.take());
        result
    }

    /// Rates, then states, then move to the next day.
    pub(crate) fn step<O: SimulationObject>(&mut self, object: &mut O, weather: &WeatherRecord) -> Result<(), O::Error> {
        self.kiosk.begin_rates();
        let rates = self.with_context(|ctx| object.calc_rates(ctx, weather));
        self.kiosk.end_rates();
        rates?;
        self.with_context(|ctx| object.integrate(ctx, 1.0))?;
        self.day = self.day.checked_add_days(Days::new(1)).unwrap();
        Ok(())
    }
}
