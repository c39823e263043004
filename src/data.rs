use std::sync::Arc;

use accurate::{sum::Klein, traits::*};
use indexmap::IndexMap;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    catalog::Sample,
    kinematics::DerivedColumns,
    selection::{CutFlow, Selection},
    StackhistError, StackhistResult,
};

/// Dataset I/O implementations.
pub mod io;

pub use io::{read_parquet, write_parquet};

/// The name of the column which holds the per-event weight.
pub const WEIGHT_COLUMN: &str = "weight";

/// A columnar set of events with named `f64` columns.
///
/// Every column has one entry per event. The per-event weight lives in the column named
/// [`WEIGHT_COLUMN`] and may be negative.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    name: String,
    columns: IndexMap<String, Vec<f64>>,
    n_events: usize,
}

impl Dataset {
    /// Create an empty [`Dataset`]. The name is used in error messages.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            n_events: 0,
        }
    }

    /// Add (or replace) a column. The first column fixes the number of events; every later
    /// column must have the same length.
    pub fn with_column<S: Into<String>>(
        mut self,
        name: S,
        values: Vec<f64>,
    ) -> StackhistResult<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// In-place variant of [`Dataset::with_column`].
    pub fn insert_column<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<f64>,
    ) -> StackhistResult<()> {
        let name = name.into();
        let replaces_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if self.columns.is_empty() || replaces_only_column {
            self.n_events = values.len();
        } else if values.len() != self.n_events {
            return Err(StackhistError::LengthMismatch {
                context: format!("Column '{name}' of dataset '{}'", self.name),
                expected: self.n_events,
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// The name of the dataset.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// The column names, in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Get a column by name, or fail with [`StackhistError::MissingField`].
    pub fn require_column(&self, name: &str) -> StackhistResult<&[f64]> {
        self.column(name).ok_or_else(|| StackhistError::MissingField {
            sample: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// The per-event weights.
    pub fn weights(&self) -> StackhistResult<&[f64]> {
        self.require_column(WEIGHT_COLUMN)
    }

    /// Returns the sum of the weights of every event.
    pub fn n_events_weighted(&self) -> StackhistResult<f64> {
        let weights = self.weights()?;
        #[cfg(feature = "rayon")]
        return Ok(weights
            .par_iter()
            .copied()
            .parallel_sum_with_accumulator::<Klein<f64>>());
        #[cfg(not(feature = "rayon"))]
        return Ok(weights.iter().copied().sum_with_accumulator::<Klein<f64>>());
    }

    /// Keep only the events whose entry in `mask` is `true`.
    pub fn select(&self, mask: &[bool]) -> Dataset {
        debug_assert_eq!(mask.len(), self.n_events);
        let columns: IndexMap<String, Vec<f64>> = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept = values
                    .iter()
                    .zip(mask)
                    .filter_map(|(v, keep)| keep.then_some(*v))
                    .collect();
                (name.clone(), kept)
            })
            .collect();
        Dataset {
            name: self.name.clone(),
            columns,
            n_events: mask.iter().filter(|keep| **keep).count(),
        }
    }
}

/// The events of one sample after the source's selection, with the cut-flow describing how
/// they were selected.
#[derive(Clone, Debug)]
pub struct LoadedSample {
    /// Surviving events.
    pub dataset: Dataset,
    /// Counts reported by the source for each of its selection stages.
    pub cut_flow: CutFlow,
}

/// How a source settles the `weight` column of a sample before its selection runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    /// Keep a stored `weight` column. A sample without one gets its
    /// [`Normalization`](crate::catalog::Normalization) weight if it has a normalization.
    #[default]
    Stored,
    /// Replace the `weight` column of every sample with its
    /// [`Normalization`](crate::catalog::Normalization) weight.
    Normalized,
}

fn default_luminosity() -> f64 {
    1.0
}

/// The event weighting applied by a source: a [`WeightMode`] and the integrated luminosity
/// every [`Normalization`](crate::catalog::Normalization) is scaled to.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weighting {
    /// Where the weights come from.
    #[serde(default)]
    pub mode: WeightMode,
    /// Integrated luminosity, in the inverse unit of the cross-sections.
    #[serde(default = "default_luminosity")]
    pub luminosity: f64,
}

impl Default for Weighting {
    fn default() -> Self {
        Self {
            mode: WeightMode::default(),
            luminosity: default_luminosity(),
        }
    }
}

impl Weighting {
    /// Always weight from normalizations, at the given luminosity.
    pub fn normalized(luminosity: f64) -> Self {
        Self {
            mode: WeightMode::Normalized,
            luminosity,
        }
    }

    /// Settle the `weight` column of a sample's events.
    ///
    /// A normalization weight is constant over the sample. In [`WeightMode::Normalized`] a sample
    /// without a normalization is an error; in [`WeightMode::Stored`] it is left alone and a
    /// missing column surfaces later as [`StackhistError::MissingField`].
    pub fn apply(&self, dataset: &mut Dataset, sample: &Sample) -> StackhistResult<()> {
        let stored = dataset.column(WEIGHT_COLUMN).is_some();
        if stored && self.mode == WeightMode::Stored {
            return Ok(());
        }
        match sample.normalization() {
            Some(normalization) => {
                let weight = normalization.event_weight(self.luminosity);
                debug!(sample = sample.label(), weight, replaced = stored, "normalizing sample");
                dataset.insert_column(WEIGHT_COLUMN, vec![weight; dataset.n_events()])
            }
            None if self.mode == WeightMode::Normalized => Err(StackhistError::Custom(format!(
                "Sample \"{}\" has no normalization",
                sample.label()
            ))),
            None => Ok(()),
        }
    }
}

/// What a source does to the raw events of a sample, in order: add derived columns, settle
/// the weights, then apply the selection.
#[derive(Clone, Debug, Default)]
pub struct Preparation {
    /// Columns computed from stored ones.
    pub columns: DerivedColumns,
    /// Weight settlement.
    pub weighting: Weighting,
    /// Selection and cut-flow.
    pub selection: Selection,
}

impl Preparation {
    /// Prepare the raw events of a sample.
    pub fn run(&self, mut dataset: Dataset, sample: &Sample) -> StackhistResult<LoadedSample> {
        self.columns.apply(&mut dataset)?;
        self.weighting.apply(&mut dataset, sample)?;
        let (dataset, cut_flow) = self.selection.apply(&dataset)?;
        Ok(LoadedSample { dataset, cut_flow })
    }
}

/// Something which can resolve a [`Sample`]'s locator into events.
pub trait EventSource: Send + Sync {
    /// Load the events of a sample. Implementations apply their own selection and report its
    /// cut-flow; the caller must not alter either.
    fn load(&self, sample: &Sample) -> StackhistResult<LoadedSample>;
}

/// An [`EventSource`] over datasets which are already in memory, keyed by locator.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    datasets: IndexMap<String, Arc<Dataset>>,
    preparation: Preparation,
}

impl InMemorySource {
    /// Create an empty source which applies the given selection.
    pub fn new(selection: Selection) -> Self {
        Self {
            datasets: IndexMap::new(),
            preparation: Preparation {
                selection,
                ..Preparation::default()
            },
        }
    }
    /// Derive these columns before selecting.
    pub fn with_columns(mut self, columns: DerivedColumns) -> Self {
        self.preparation.columns = columns;
        self
    }
    /// Weight samples this way before selecting.
    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.preparation.weighting = weighting;
        self
    }
    /// Register a dataset under a locator.
    pub fn insert<S: Into<String>>(&mut self, locator: S, dataset: Dataset) {
        self.datasets.insert(locator.into(), Arc::new(dataset));
    }
    /// Builder-style variant of [`InMemorySource::insert`].
    pub fn with<S: Into<String>>(mut self, locator: S, dataset: Dataset) -> Self {
        self.insert(locator, dataset);
        self
    }
}

impl EventSource for InMemorySource {
    fn load(&self, sample: &Sample) -> StackhistResult<LoadedSample> {
        let dataset = self.datasets.get(sample.locator()).ok_or_else(|| {
            StackhistError::Custom(format!(
                "No dataset registered for locator \"{}\"",
                sample.locator()
            ))
        })?;
        self.preparation.run(Dataset::clone(dataset), sample)
    }
}

/// An [`EventSource`] which reads one Parquet file per sample from a base directory.
///
/// The locator `L` of a sample resolves to `{base_dir}/L`, or `{base_dir}/L.parquet` if `L` has
/// no extension. The base directory is shell-expanded (`~` and `$VAR` are allowed).
#[derive(Clone, Debug)]
pub struct ParquetSource {
    base_dir: String,
    preparation: Preparation,
}

impl ParquetSource {
    /// Create a new [`ParquetSource`].
    pub fn new<S: Into<String>>(base_dir: S, selection: Selection) -> Self {
        Self {
            base_dir: base_dir.into(),
            preparation: Preparation {
                selection,
                ..Preparation::default()
            },
        }
    }

    /// Derive these columns before selecting.
    pub fn with_columns(mut self, columns: DerivedColumns) -> Self {
        self.preparation.columns = columns;
        self
    }

    /// Weight samples this way before selecting.
    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.preparation.weighting = weighting;
        self
    }

    /// The path a sample's locator resolves to (before shell expansion).
    pub fn path_for(&self, sample: &Sample) -> String {
        let locator = sample.locator();
        let file = if std::path::Path::new(locator).extension().is_some() {
            locator.to_string()
        } else {
            format!("{locator}.parquet")
        };
        format!("{}/{file}", self.base_dir.trim_end_matches('/'))
    }
}

impl EventSource for ParquetSource {
    fn load(&self, sample: &Sample) -> StackhistResult<LoadedSample> {
        let path = self.path_for(sample);
        debug!(sample = sample.label(), path = %path, "reading sample");
        self.preparation.run(read_parquet(&path, sample.label())?, sample)
    }
}
