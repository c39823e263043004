use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{StackhistError, StackhistResult};

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
///
/// # See Also
/// [`Binning::edges`]
/// [`get_bin_location`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// Where a value lands relative to an evenly spaced binning.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinLocation {
    /// Below the lower edge (or not a number).
    Underflow,
    /// Inside the range, in the bin with the given index.
    Bin(usize),
    /// At or above the upper edge.
    Overflow,
}

/// A helper method to locate the bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// The index is `floor((value - lower) / width)`, clamped to the last bin so that rounding in
/// the division can never push a value just below the upper edge out of range. NaN compares
/// false against every edge and is counted as underflow.
pub fn get_bin_location(value: f64, bins: usize, range: (f64, f64)) -> BinLocation {
    if value >= range.1 {
        BinLocation::Overflow
    } else if value >= range.0 {
        let bin_width = (range.1 - range.0) / bins as f64;
        let bin_index = ((value - range.0) / bin_width).floor() as usize;
        BinLocation::Bin(bin_index.min(bins - 1))
    } else {
        BinLocation::Underflow
    }
}

/// An evenly spaced binning of one observable.
///
/// Serialized as the `(bins, lower, upper)` triple; deserialization checks the same invariants
/// as [`Binning::new`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(usize, f64, f64)", into = "(usize, f64, f64)")]
pub struct Binning {
    bins: usize,
    lower: f64,
    upper: f64,
}

impl Binning {
    /// Create a new [`Binning`] with `bins` bins spanning `[lower, upper)`.
    ///
    /// The `name` is only used to report an [`StackhistError::InvalidBinning`] when `bins` is zero
    /// or the range is empty (or not finite).
    pub fn new(name: &str, bins: usize, lower: f64, upper: f64) -> StackhistResult<Self> {
        if bins == 0 || !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(StackhistError::InvalidBinning {
                name: name.to_string(),
                bins,
                lower,
                upper,
            });
        }
        Ok(Self { bins, lower, upper })
    }
    /// The number of bins (not counting underflow and overflow).
    pub fn bins(&self) -> usize {
        self.bins
    }
    /// The lower edge of the first bin.
    pub fn lower(&self) -> f64 {
        self.lower
    }
    /// The upper edge of the last bin.
    pub fn upper(&self) -> f64 {
        self.upper
    }
    /// The `(lower, upper)` range.
    pub fn range(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
    /// The width of every bin.
    pub fn width(&self) -> f64 {
        (self.upper - self.lower) / self.bins as f64
    }
    /// All `bins + 1` bin edges.
    pub fn edges(&self) -> Vec<f64> {
        get_bin_edges(self.bins, self.range())
    }
    /// The center of the bin with the given index.
    pub fn center(&self, index: usize) -> f64 {
        self.lower + (index as f64 + 0.5) * self.width()
    }
    /// Locate the bin a value falls into.
    pub fn locate(&self, value: f64) -> BinLocation {
        get_bin_location(value, self.bins, self.range())
    }
}

impl TryFrom<(usize, f64, f64)> for Binning {
    type Error = StackhistError;

    fn try_from(value: (usize, f64, f64)) -> Result<Self, Self::Error> {
        Binning::new("<unnamed>", value.0, value.1, value.2)
    }
}

impl From<Binning> for (usize, f64, f64) {
    fn from(binning: Binning) -> Self {
        (binning.bins, binning.lower, binning.upper)
    }
}

/// The fixed set of observables and their binnings for one pipeline run.
///
/// Observables keep the order in which they were registered. A registry is built once and then
/// shared (usually behind an [`Arc`]); nothing can be added after [`BinSpecRegistry::freeze`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinSpecRegistry {
    binnings: IndexMap<String, Binning>,
}

impl BinSpecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observable. Registering the same name twice replaces its binning but keeps
    /// its original position.
    pub fn register<S: Into<String>>(
        &mut self,
        name: S,
        bins: usize,
        lower: f64,
        upper: f64,
    ) -> StackhistResult<()> {
        let name = name.into();
        let binning = Binning::new(&name, bins, lower, upper)?;
        self.binnings.insert(name, binning);
        Ok(())
    }

    /// Builder-style variant of [`BinSpecRegistry::register`].
    pub fn with<S: Into<String>>(
        mut self,
        name: S,
        bins: usize,
        lower: f64,
        upper: f64,
    ) -> StackhistResult<Self> {
        self.register(name, bins, lower, upper)?;
        Ok(self)
    }

    /// Finish building and share the registry.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Look up the binning of an observable.
    pub fn get(&self, name: &str) -> StackhistResult<Binning> {
        self.binnings
            .get(name)
            .copied()
            .ok_or_else(|| StackhistError::UnknownObservable {
                name: name.to_string(),
            })
    }

    /// Check whether an observable is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.binnings.contains_key(name)
    }

    /// The registered observable names, in registration order.
    pub fn observables(&self) -> Vec<String> {
        self.binnings.keys().cloned().collect()
    }

    /// Iterate over `(name, binning)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binning)> {
        self.binnings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of registered observables.
    pub fn len(&self) -> usize {
        self.binnings.len()
    }

    /// Returns `true` if no observable is registered.
    pub fn is_empty(&self) -> bool {
        self.binnings.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Binning)> for BinSpecRegistry {
    fn from_iter<T: IntoIterator<Item = (S, Binning)>>(iter: T) -> Self {
        Self {
            binnings: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
