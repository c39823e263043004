use std::fmt::Debug;

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

use crate::{data::Dataset, StackhistResult};

/// The name of the stage which every [`Selection`] reports before its first cut.
pub const ALL_EVENTS: &str = "All events";

/// A per-event predicate over named columns.
///
/// Implementors declare the columns they read through [`Cut::columns`]; [`Cut::passes`] then
/// receives the values of those columns for one event, in the same order. Cuts are serialized
/// with [`typetag`] so they can be written into a pipeline configuration file.
#[typetag::serde(tag = "type")]
pub trait Cut: DynClone + Send + Sync + Debug {
    /// The columns this cut reads.
    fn columns(&self) -> Vec<String>;
    /// Decide whether an event passes, given the values of [`Cut::columns`].
    fn passes(&self, values: &[f64]) -> bool;
}

dyn_clone::clone_trait_object!(Cut);

/// Keep events with `min <= column < max`. Either bound may be left open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeCut {
    column: String,
    min: Option<f64>,
    max: Option<f64>,
}

impl RangeCut {
    /// Create a new [`RangeCut`].
    pub fn new<S: Into<String>>(column: S, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            column: column.into(),
            min,
            max,
        }
    }
}

#[typetag::serde]
impl Cut for RangeCut {
    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn passes(&self, values: &[f64]) -> bool {
        let value = values[0];
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// Keep events where a column differs from a sentinel value (for instance an index of `-1`
/// which marks "no candidate found").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotEqual {
    column: String,
    value: f64,
}

impl NotEqual {
    /// Create a new [`NotEqual`] cut.
    pub fn new<S: Into<String>>(column: S, value: f64) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

#[typetag::serde]
impl Cut for NotEqual {
    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn passes(&self, values: &[f64]) -> bool {
        values[0] != self.value
    }
}

/// Keep events where two signed quantities (charges or PDG ids) have opposite signs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OppositeSign {
    a: String,
    b: String,
}

impl OppositeSign {
    /// Create a new [`OppositeSign`] cut.
    pub fn new<S: Into<String>, T: Into<String>>(a: S, b: T) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }
}

#[typetag::serde]
impl Cut for OppositeSign {
    fn columns(&self) -> Vec<String> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn passes(&self, values: &[f64]) -> bool {
        values[0] * values[1] < 0.0
    }
}

/// One named stage of a [`Selection`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectionStage {
    /// The name reported in the cut-flow.
    pub name: String,
    /// The predicate applied at this stage.
    pub cut: Box<dyn Cut>,
}

/// An ordered list of named cuts which are applied one after another.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    stages: Vec<SelectionStage>,
}

impl Selection {
    /// Create an empty [`Selection`] which keeps every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named cut.
    pub fn then<S: Into<String>, C: Cut + 'static>(mut self, name: S, cut: C) -> Self {
        self.stages.push(SelectionStage {
            name: name.into(),
            cut: Box::new(cut),
        });
        self
    }

    /// The stages of this selection, in application order.
    pub fn stages(&self) -> &[SelectionStage] {
        &self.stages
    }

    /// Returns `true` if the selection has no cuts.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Apply every cut in order and return the surviving events with the resulting
    /// [`CutFlow`].
    ///
    /// The cut-flow always begins with an [`ALL_EVENTS`] stage. Every column named by a cut (and
    /// `weight`) must exist in the dataset, otherwise a
    /// [`StackhistError::MissingField`](crate::StackhistError::MissingField) is returned before any
    /// event is looked at.
    pub fn apply(&self, dataset: &Dataset) -> StackhistResult<(Dataset, CutFlow)> {
        let weights = dataset.weights()?;
        let mut stage_columns = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let columns = stage
                .cut
                .columns()
                .iter()
                .map(|name| dataset.require_column(name))
                .collect::<StackhistResult<Vec<&[f64]>>>()?;
            stage_columns.push(columns);
        }

        let mut cut_flow = CutFlow::new();
        cut_flow.push(ALL_EVENTS, dataset.n_events() as u64, dataset.n_events_weighted()?);

        let mut mask = vec![true; dataset.n_events()];
        let mut values = Vec::new();
        for (stage, columns) in self.stages.iter().zip(&stage_columns) {
            let mut passed = 0u64;
            let mut sumw = 0.0;
            for (event, keep) in mask.iter_mut().enumerate() {
                if !*keep {
                    continue;
                }
                values.clear();
                values.extend(columns.iter().map(|column| column[event]));
                if stage.cut.passes(&values) {
                    passed += 1;
                    sumw += weights[event];
                } else {
                    *keep = false;
                }
            }
            cut_flow.push(stage.name.clone(), passed, sumw);
        }
        Ok((dataset.select(&mask), cut_flow))
    }
}

/// The outcome of one selection stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CutFlowStage {
    /// The name of the stage.
    pub name: String,
    /// The number of events surviving this and every earlier stage.
    pub passed: u64,
    /// The sum of weights of those events.
    pub sumw: f64,
}

/// The sequential record of how many (weighted) events survive each selection stage.
///
/// A [`CutFlow`] only grows; once a source has handed it to the
/// [`Aggregator`](crate::aggregate::Aggregator) it is passed along unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CutFlow {
    stages: Vec<CutFlowStage>,
}

impl CutFlow {
    /// Create an empty [`CutFlow`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Append a stage.
    pub fn push<S: Into<String>>(&mut self, name: S, passed: u64, sumw: f64) {
        self.stages.push(CutFlowStage {
            name: name.into(),
            passed,
            sumw,
        });
    }
    /// The recorded stages, in order.
    pub fn stages(&self) -> &[CutFlowStage] {
        &self.stages
    }
    /// The number of recorded stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }
    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
    /// The last recorded stage, which describes the events that reach aggregation.
    pub fn last(&self) -> Option<&CutFlowStage> {
        self.stages.last()
    }
}

impl<S: Into<String>> FromIterator<(S, u64, f64)> for CutFlow {
    fn from_iter<T: IntoIterator<Item = (S, u64, f64)>>(iter: T) -> Self {
        let mut cut_flow = CutFlow::new();
        for (name, passed, sumw) in iter {
            cut_flow.push(name, passed, sumw);
        }
        cut_flow
    }
}
