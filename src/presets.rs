use std::{fmt::Display, str::FromStr};

use crate::{
    binning::BinSpecRegistry,
    catalog::{Color, Normalization, Process, SampleCatalog},
    config::PipelineConfig,
    selection::{NotEqual, OppositeSign, Selection},
    stack::StackStyle,
    StackhistError, StackhistResult,
};

const DEFAULT_NBINS: usize = 30;
// Azimuthal plots stop just short of ±π.
#[allow(clippy::approx_constant)]
const PHI_EDGE: f64 = 3.14;

/// The lepton flavour of a `W → lν` mass-slice scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    /// `W → eν`
    Electron,
    /// `W → μν`
    Muon,
    /// `W → τν`
    Tau,
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Electron => write!(f, "electron"),
            Channel::Muon => write!(f, "muon"),
            Channel::Tau => write!(f, "tau"),
        }
    }
}

impl FromStr for Channel {
    type Err = StackhistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "e" | "ele" | "electron" | "enu" => Ok(Self::Electron),
            "m" | "mu" | "muon" | "mnu" => Ok(Self::Muon),
            "t" | "tau" | "tnu" => Ok(Self::Tau),
            _ => Err(StackhistError::ParseError {
                name: s.to_string(),
                object: "Channel".to_string(),
            }),
        }
    }
}

impl Channel {
    /// The built-in configuration of this channel.
    pub fn config(&self) -> StackhistResult<PipelineConfig> {
        match self {
            Channel::Electron => electron(),
            Channel::Muon => muon(),
            Channel::Tau => tau(),
        }
    }
}

const SLICE_COLORS: [Color; 9] = [
    Color::rgb(100, 192, 232),
    Color::rgb(248, 206, 104),
    Color::rgb(200, 106, 100),
    Color::rgb(0xBF, 0x22, 0x29),
    Color::rgb(0x00, 0xA8, 0x8F),
    Color::rgb(155, 152, 204),
    Color::rgb(222, 90, 106),
    Color::rgb(250, 202, 255),
    Color::rgb(190, 110, 200),
];

// Lepton and neutrino kinematics in 500 bins up to 5 TeV, transverse and invariant masses up to
// 10 TeV.
fn fine_observables() -> StackhistResult<BinSpecRegistry> {
    BinSpecRegistry::new()
        .with("pt_l", 500, 0.0, 5000.0)?
        .with("pt_n", 500, 0.0, 5000.0)?
        .with("eta_l", DEFAULT_NBINS, -2.5, 2.5)?
        .with("eta_n", DEFAULT_NBINS, -2.5, 2.5)?
        .with("phi_l", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("phi_n", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("pdgId_l", 40, -20.0, 20.0)?
        .with("pdgId_n", 40, -20.0, 20.0)?
        .with("pt_genmet", 500, 0.0, 5000.0)?
        .with("phi_genmet", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("m_l", DEFAULT_NBINS, 0.0, 2.0)?
        .with("m_n", DEFAULT_NBINS, 0.0, 2.0)?
        .with("mt", 500, 0.0, 10000.0)?
        .with("mt_met", 500, 0.0, 10000.0)?
        .with("m_inv", 500, 0.0, 10000.0)
}

// Coarser momenta (100 bins) and masses up to 8 TeV, plus the generator PDF scale.
fn coarse_observables() -> StackhistResult<BinSpecRegistry> {
    BinSpecRegistry::new()
        .with("pt_l", 100, 0.0, 5000.0)?
        .with("pt_n", 100, 0.0, 5000.0)?
        .with("eta_l", DEFAULT_NBINS, -2.5, 2.5)?
        .with("eta_n", DEFAULT_NBINS, -2.5, 2.5)?
        .with("phi_l", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("phi_n", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("pdgId_l", 40, -20.0, 20.0)?
        .with("pdgId_n", 40, -20.0, 20.0)?
        .with("pt_genmet", 100, 0.0, 5000.0)?
        .with("phi_genmet", DEFAULT_NBINS, -PHI_EDGE, PHI_EDGE)?
        .with("mass_l", DEFAULT_NBINS, 0.0, 2.0)?
        .with("mass_n", DEFAULT_NBINS, 0.0, 2.0)?
        .with("mt", 400, 0.0, 8000.0)?
        .with("mt_met", 400, 0.0, 8000.0)?
        .with("m_inv", 400, 0.0, 8000.0)?
        .with("scalePDF", 400, 0.0, 8000.0)
}

fn style(level: &str, lepton: &str) -> StackStyle {
    StackStyle::default().with_axis_titles([
        ("pt_l", format!("{level} {lepton} p_{{T}} / GeV")),
        ("pt_n", format!("{level} Neutrino p_{{T}} / GeV")),
        ("eta_l", format!("{level} {lepton} #eta")),
        ("eta_n", format!("{level} Neutrino #eta")),
        ("phi_l", format!("{level} {lepton} #phi")),
        ("phi_n", format!("{level} Neutrino #phi")),
        ("mass_l", format!("{lepton} mass / GeV")),
        ("mass_n", "Neutrino mass / GeV".to_string()),
        ("m_l", format!("{lepton} mass / GeV")),
        ("m_n", "Neutrino mass / GeV".to_string()),
        ("mt", format!("{level} M_{{T}} / GeV")),
        ("mt_met", "Gen-level Transverse mass / GeV".to_string()),
        ("m_inv", format!("{level} invariant M(l#nu) / GeV")),
    ])
}

// Cross-section and generated event count of each mass slice of the MadGraph W → lν samples.
// The 200-400 cross-section is only known for the electron and muon generation.
const ELECTRON_SLICES: [(&str, usize, Option<(f64, f64)>); 6] = [
    ("120-200", 0, Some((471.507, 123093091.0))),
    ("200-400", 1, Some((74.0872, 1460015.0))),
    ("800-1500", 3, Some((0.690298, 3295801.0))),
    ("1500-2500", 4, Some((0.0482412, 3302117.0))),
    ("2500-4000", 5, Some((0.00298857, 3351427.0))),
    ("4000-6000", 6, Some((0.00011405, 3222531.0))),
];

const TAU_SLICES: [(&str, usize, Option<(f64, f64)>); 7] = [
    ("120-200", 0, Some((1.672e2, 123093091.0))),
    ("200-400", 1, None),
    ("800-1500", 3, Some((1.091e-1, 3295801.0))),
    ("1500-2500", 4, Some((6.536e-3, 3302117.0))),
    ("2500-4000", 5, Some((3.484e-4, 3351427.0))),
    ("4000-6000", 6, Some((1.077e-5, 3222531.0))),
    ("6000-inf", 7, Some((4.209e-7, 3668638.0))),
];

// The Pythia muon samples carry their own weights.
const MUON_SLICES: [(&str, usize, Option<(f64, f64)>); 9] = [
    ("100to200", 0, None),
    ("200to500", 1, None),
    ("500to1000", 2, None),
    ("1000to2000", 3, None),
    ("2000to3000", 4, None),
    ("3000to4000", 5, None),
    ("4000to5000", 6, None),
    ("5000to6000", 7, None),
    ("6000", 8, None),
];

// Each slice names its slot in the colour table, so dropping a slice keeps the colours of the
// others.
fn process(
    name: &str,
    slices: &[(&str, usize, Option<(f64, f64)>)],
    locator_suffix: &str,
) -> Process {
    slices
        .iter()
        .fold(Process::new(name), |process, (slice, slot, normalization)| {
            let label = format!("{name}_{slice}");
            let locator = format!("{slice}{locator_suffix}");
            let color = SLICE_COLORS[*slot % SLICE_COLORS.len()];
            match normalization {
                Some((cross_section, n_generated)) => process.with_normalized_sample(
                    label,
                    locator,
                    color,
                    Normalization::new(*cross_section, *n_generated),
                ),
                None => process.with_sample(label, locator, color),
            }
        })
}

fn single_process(observables: BinSpecRegistry, process: Process) -> PipelineConfig {
    PipelineConfig::new(observables, SampleCatalog::new().with_process(process))
}

/// The generator-level selection of a charged lepton and its neutrino: both indices valid and
/// opposite-sign PDG ids. Intended for unskimmed inputs which still carry the `mu_idx`,
/// `nu_idx`, `pid1` and `pid2` columns.
pub fn lepton_selection() -> Selection {
    Selection::new()
        .then("Valid lepton in selected idx", NotEqual::new("mu_idx", -1.0))
        .then("Valid nu in selected idx", NotEqual::new("nu_idx", -1.0))
        .then("opposite charge pid1 * pid2 < 0", OppositeSign::new("pid1", "pid2"))
}

/// `W → eν` in six mass slices from 120 GeV to 6 TeV.
///
/// Every slice is normalized, so files without a `weight` column are weighted by cross-section.
pub fn electron() -> StackhistResult<PipelineConfig> {
    let process = process("enu", &ELECTRON_SLICES, "_Skim_e");
    let mut config = single_process(fine_observables()?, process);
    config.suffix = "_e".to_string();
    config.style = style("Gen-level", "Electron");
    Ok(config)
}

/// `W → μν` in nine mass slices from 100 GeV upwards, with the coarser binning.
pub fn muon() -> StackhistResult<PipelineConfig> {
    let process = process("mnu", &MUON_SLICES, "_Skim_m_pythia");
    let mut config = single_process(coarse_observables()?, process);
    config.suffix = "_m".to_string();
    config.style = style("Gen-level", "Muon")
        .with_axis_titles([("scalePDF", "invariant M(l#nu) / GeV")]);
    Ok(config)
}

/// `W → τν` in seven mass slices from 120 GeV upwards.
pub fn tau() -> StackhistResult<PipelineConfig> {
    let process = process("tnu", &TAU_SLICES, "_Skim_t");
    let mut config = single_process(fine_observables()?, process);
    config.suffix = "_t".to_string();
    config.style = style("LHE-level", "Tau");
    Ok(config)
}
