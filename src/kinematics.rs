use std::{f64::consts::PI, fmt::Debug};

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{data::Dataset, StackhistResult};

/// The azimuthal difference `phi2 - phi1`, wrapped into `[-π, π]`.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let r = (phi2 - phi1) % (2.0 * PI);
    if r < -PI {
        r + 2.0 * PI
    } else if r > PI {
        r - 2.0 * PI
    } else {
        r
    }
}

/// The transverse mass of two objects given their transverse momenta and azimuths.
pub fn transverse_mass(pt1: f64, phi1: f64, pt2: f64, phi2: f64) -> f64 {
    (2.0 * pt1 * pt2 * (1.0 - delta_phi(phi1, phi2).cos())).sqrt()
}

/// The invariant mass of two objects, each given as `[pt, eta, phi, mass]`.
///
/// A negative squared mass (from rounding on massless inputs) gives a negative mass.
pub fn invariant_mass(a: [f64; 4], b: [f64; 4]) -> f64 {
    let p4 = |[pt, eta, phi, mass]: [f64; 4]| {
        let (px, py, pz) = (pt * phi.cos(), pt * phi.sin(), pt * eta.sinh());
        let e = (px * px + py * py + pz * pz + mass * mass).sqrt();
        [e, px, py, pz]
    };
    let ([ea, xa, ya, za], [eb, xb, yb, zb]) = (p4(a), p4(b));
    let (e, x, y, z) = (ea + eb, xa + xb, ya + yb, za + zb);
    let m2 = e * e - x * x - y * y - z * z;
    if m2 < 0.0 {
        -(-m2).sqrt()
    } else {
        m2.sqrt()
    }
}

/// A per-event quantity computed from named columns.
///
/// Works like [`Cut`](crate::selection::Cut): [`Derivation::columns`] names the inputs and
/// [`Derivation::compute`] receives their values for one event, in that order.
#[typetag::serde(tag = "type")]
pub trait Derivation: DynClone + Send + Sync + Debug {
    /// The columns this derivation reads.
    fn columns(&self) -> Vec<String>;
    /// The derived value of one event.
    fn compute(&self, values: &[f64]) -> f64;
}

dyn_clone::clone_trait_object!(Derivation);

/// [`delta_phi`] of two azimuth columns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaPhi {
    phi1: String,
    phi2: String,
}

impl DeltaPhi {
    /// Create a new [`DeltaPhi`].
    pub fn new<S: Into<String>, T: Into<String>>(phi1: S, phi2: T) -> Self {
        Self {
            phi1: phi1.into(),
            phi2: phi2.into(),
        }
    }
}

#[typetag::serde]
impl Derivation for DeltaPhi {
    fn columns(&self) -> Vec<String> {
        vec![self.phi1.clone(), self.phi2.clone()]
    }

    fn compute(&self, values: &[f64]) -> f64 {
        delta_phi(values[0], values[1])
    }
}

/// [`transverse_mass`] of a lepton and a neutrino (or missing momentum).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransverseMass {
    pt1: String,
    phi1: String,
    pt2: String,
    phi2: String,
}

impl TransverseMass {
    /// Create a new [`TransverseMass`] from the `pt` and `phi` columns of both objects.
    pub fn new<S: Into<String>>(pt1: S, phi1: S, pt2: S, phi2: S) -> Self {
        Self {
            pt1: pt1.into(),
            phi1: phi1.into(),
            pt2: pt2.into(),
            phi2: phi2.into(),
        }
    }
}

#[typetag::serde]
impl Derivation for TransverseMass {
    fn columns(&self) -> Vec<String> {
        vec![
            self.pt1.clone(),
            self.phi1.clone(),
            self.pt2.clone(),
            self.phi2.clone(),
        ]
    }

    fn compute(&self, values: &[f64]) -> f64 {
        transverse_mass(values[0], values[1], values[2], values[3])
    }
}

/// [`invariant_mass`] of two objects, each named by its `pt`, `eta`, `phi` and `mass` columns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvariantMass {
    a: [String; 4],
    b: [String; 4],
}

impl InvariantMass {
    /// Create a new [`InvariantMass`].
    pub fn new<S: Into<String>>(a: [S; 4], b: [S; 4]) -> Self {
        Self {
            a: a.map(Into::into),
            b: b.map(Into::into),
        }
    }
}

#[typetag::serde]
impl Derivation for InvariantMass {
    fn columns(&self) -> Vec<String> {
        self.a.iter().chain(&self.b).cloned().collect()
    }

    fn compute(&self, values: &[f64]) -> f64 {
        invariant_mass(
            [values[0], values[1], values[2], values[3]],
            [values[4], values[5], values[6], values[7]],
        )
    }
}

/// One named output column of [`DerivedColumns`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DerivedColumn {
    /// The name of the new column.
    pub name: String,
    /// How it is computed.
    pub derivation: Box<dyn Derivation>,
}

/// An ordered list of columns to compute from stored ones. Later columns may read earlier
/// ones.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivedColumns {
    columns: Vec<DerivedColumn>,
}

impl DerivedColumns {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn with<S, D>(mut self, name: S, derivation: D) -> Self
    where
        S: Into<String>,
        D: Derivation + 'static,
    {
        self.columns.push(DerivedColumn {
            name: name.into(),
            derivation: Box::new(derivation),
        });
        self
    }

    /// The columns, in computation order.
    pub fn columns(&self) -> &[DerivedColumn] {
        &self.columns
    }

    /// Returns `true` if nothing is derived.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Compute every column and add (or replace) it in the dataset.
    ///
    /// Fails with [`StackhistError::MissingField`](crate::StackhistError::MissingField) if an
    /// input column is absent.
    pub fn apply(&self, dataset: &mut Dataset) -> StackhistResult<()> {
        let mut values = Vec::new();
        for column in &self.columns {
            let inputs = column
                .derivation
                .columns()
                .iter()
                .map(|name| dataset.require_column(name))
                .collect::<StackhistResult<Vec<&[f64]>>>()?;
            let derived: Vec<f64> = (0..dataset.n_events())
                .map(|event| {
                    values.clear();
                    values.extend(inputs.iter().map(|input| input[event]));
                    column.derivation.compute(&values)
                })
                .collect();
            debug!(dataset = dataset.name(), column = column.name.as_str(), "derived column");
            dataset.insert_column(column.name.clone(), derived)?;
        }
        Ok(())
    }
}

/// `mt`, `mt_met` and `m_inv` of a lepton (`*_l`) and its neutrino (`*_n`), with the missing
/// transverse momentum in `pt_genmet` and `phi_genmet`.
pub fn lepton_neutrino_columns() -> DerivedColumns {
    DerivedColumns::new()
        .with("mt", TransverseMass::new("pt_l", "phi_l", "pt_n", "phi_n"))
        .with(
            "mt_met",
            TransverseMass::new("pt_l", "phi_l", "pt_genmet", "phi_genmet"),
        )
        .with(
            "m_inv",
            InvariantMass::new(
                ["pt_l", "eta_l", "phi_l", "mass_l"],
                ["pt_n", "eta_n", "phi_n", "mass_n"],
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StackhistError;
    use approx::assert_relative_eq;

    #[test]
    fn test_delta_phi_wraps() {
        assert_relative_eq!(delta_phi(0.0, 1.0), 1.0);
        assert_relative_eq!(delta_phi(1.0, 0.0), -1.0);
        assert_relative_eq!(delta_phi(-3.0, 3.0), 6.0 - 2.0 * PI, epsilon = 1e-12);
        assert_relative_eq!(delta_phi(3.0, -3.0), 2.0 * PI - 6.0, epsilon = 1e-12);
        assert!(delta_phi(0.0, 7.0).abs() <= PI);
    }

    #[test]
    fn test_transverse_mass() {
        assert_relative_eq!(transverse_mass(40.0, 0.0, 40.0, PI), 80.0);
        assert_relative_eq!(transverse_mass(40.0, 1.0, 40.0, 1.0), 0.0);
        assert_relative_eq!(
            transverse_mass(30.0, 0.5, 50.0, 0.5 + PI / 2.0),
            (2.0f64 * 30.0 * 50.0).sqrt(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_invariant_mass() {
        // back to back, massless, same momentum
        assert_relative_eq!(
            invariant_mass([40.0, 0.0, 0.0, 0.0], [40.0, 0.0, PI, 0.0]),
            80.0,
            epsilon = 1e-9
        );
        // a single massive object at rest in the transverse plane
        assert_relative_eq!(
            invariant_mass([0.0, 0.0, 0.0, 1.5], [0.0, 0.0, 0.0, 0.0]),
            1.5,
            epsilon = 1e-12
        );
        // at central rapidity the invariant mass of massless objects is the transverse mass
        assert_relative_eq!(
            invariant_mass([30.0, 0.0, 0.2, 0.0], [50.0, 0.0, 1.9, 0.0]),
            transverse_mass(30.0, 0.2, 50.0, 1.9),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_lepton_neutrino_columns() {
        let mut dataset = Dataset::new("d");
        for (name, values) in [
            ("pt_l", vec![40.0, 30.0]),
            ("eta_l", vec![0.0, 0.0]),
            ("phi_l", vec![0.0, 0.2]),
            ("mass_l", vec![0.0, 0.0]),
            ("pt_n", vec![40.0, 50.0]),
            ("eta_n", vec![0.0, 0.0]),
            ("phi_n", vec![PI, 1.9]),
            ("mass_n", vec![0.0, 0.0]),
            ("pt_genmet", vec![40.0, 0.0]),
            ("phi_genmet", vec![0.0, 0.0]),
        ] {
            dataset.insert_column(name, values).unwrap();
        }
        lepton_neutrino_columns().apply(&mut dataset).unwrap();
        let mt = dataset.column("mt").unwrap();
        assert_relative_eq!(mt[0], 80.0);
        assert_relative_eq!(mt[1], transverse_mass(30.0, 0.2, 50.0, 1.9));
        assert_relative_eq!(dataset.column("mt_met").unwrap()[0], 0.0);
        assert_relative_eq!(dataset.column("m_inv").unwrap()[1], mt[1], epsilon = 1e-9);
    }

    #[test]
    fn test_missing_input_column() {
        let mut dataset = Dataset::new("d").with_column("pt_l", vec![1.0]).unwrap();
        match lepton_neutrino_columns().apply(&mut dataset) {
            Err(StackhistError::MissingField { field, .. }) => assert_eq!(field, "phi_l"),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_columns_serde() {
        let columns = DerivedColumns::new()
            .with("dphi", DeltaPhi::new("phi_l", "phi_n"))
            .with("mt", TransverseMass::new("pt_l", "phi_l", "pt_n", "phi_n"));
        let json = serde_json::to_string(&columns).unwrap();
        let restored: DerivedColumns = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.columns().len(), 2);
        assert_eq!(restored.columns()[0].name, "dphi");
        let mut dataset = Dataset::new("d")
            .with_column("phi_l", vec![0.5])
            .unwrap()
            .with_column("phi_n", vec![-0.5])
            .unwrap()
            .with_column("pt_l", vec![10.0])
            .unwrap()
            .with_column("pt_n", vec![10.0])
            .unwrap();
        restored.apply(&mut dataset).unwrap();
        assert_relative_eq!(dataset.column("dphi").unwrap()[0], -1.0);
    }
}
