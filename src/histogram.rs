use accurate::{sum::Klein, traits::*};
use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

use crate::{
    binning::{BinLocation, Binning},
    StackhistError, StackhistResult,
};

/// A weighted one-dimensional histogram with evenly spaced bins.
///
/// Every fill adds its weight to exactly one of the regular bins, the underflow or the
/// overflow, and its squared weight to the matching sum-of-squares. The total weight of all
/// fills is therefore always
///
/// ```math
/// \sum_i \text{sumw}_i + \text{underflow} + \text{overflow}
/// ```
///
/// # Panics
///
/// `+` and `+=` panic if the two histograms have different binnings. Use
/// [`Histogram::merge`] to get [`StackhistError::IncompatibleBinning`] instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    name: String,
    binning: Binning,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    underflow_sumw2: f64,
    overflow_sumw2: f64,
    entries: u64,
}

impl Histogram {
    /// Create an empty [`Histogram`] with the given name and binning.
    pub fn new<S: Into<String>>(name: S, binning: Binning) -> Self {
        let bins = binning.bins();
        Self {
            name: name.into(),
            binning,
            sumw: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            underflow_sumw2: 0.0,
            overflow_sumw2: 0.0,
            entries: 0,
        }
    }

    /// Add one weighted value.
    #[inline]
    pub fn fill(&mut self, value: f64, weight: f64) {
        let w2 = weight * weight;
        match self.binning.locate(value) {
            BinLocation::Bin(index) => {
                self.sumw[index] += weight;
                self.sumw2[index] += w2;
            }
            BinLocation::Underflow => {
                self.underflow += weight;
                self.underflow_sumw2 += w2;
            }
            BinLocation::Overflow => {
                self.overflow += weight;
                self.overflow_sumw2 += w2;
            }
        }
        self.entries += 1;
    }

    /// Add the contents of another histogram with the same binning, bin by bin.
    ///
    /// The combination is commutative and associative (up to floating-point rounding), so
    /// partial histograms filled from disjoint parts of a sample can be merged in any order.
    pub fn merge(&mut self, other: &Histogram) -> StackhistResult<()> {
        if self.binning != other.binning {
            return Err(StackhistError::IncompatibleBinning {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        self.add_unchecked(other);
        Ok(())
    }

    fn add_unchecked(&mut self, other: &Histogram) {
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_sumw2 += other.underflow_sumw2;
        self.overflow_sumw2 += other.overflow_sumw2;
        self.entries += other.entries;
    }

    /// Return a copy of this histogram under a different name.
    pub fn renamed<S: Into<String>>(&self, name: S) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// The histogram's name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The binning of this histogram.
    pub fn binning(&self) -> &Binning {
        &self.binning
    }
    /// The number of regular bins.
    pub fn bins(&self) -> usize {
        self.binning.bins()
    }
    /// All `bins + 1` bin edges.
    pub fn edges(&self) -> Vec<f64> {
        self.binning.edges()
    }
    /// The center of every regular bin.
    pub fn centers(&self) -> Vec<f64> {
        (0..self.bins()).map(|i| self.binning.center(i)).collect()
    }
    /// Sum of weights per regular bin.
    pub fn contents(&self) -> &[f64] {
        &self.sumw
    }
    /// Sum of weights in one regular bin.
    pub fn content(&self, index: usize) -> f64 {
        self.sumw[index]
    }
    /// Sum of squared weights per regular bin.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }
    /// Statistical uncertainty of every regular bin, `sqrt(sumw2)`.
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|w2| w2.sqrt()).collect()
    }
    /// Sum of weights below the lower edge.
    pub fn underflow(&self) -> f64 {
        self.underflow
    }
    /// Sum of weights at or above the upper edge.
    pub fn overflow(&self) -> f64 {
        self.overflow
    }
    /// Sum of squared weights below the lower edge.
    pub fn underflow_sumw2(&self) -> f64 {
        self.underflow_sumw2
    }
    /// Sum of squared weights at or above the upper edge.
    pub fn overflow_sumw2(&self) -> f64 {
        self.overflow_sumw2
    }
    /// The number of fills, regardless of weight.
    pub fn entries(&self) -> u64 {
        self.entries
    }
    /// The largest regular-bin content.
    pub fn maximum(&self) -> f64 {
        self.sumw.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
    /// Sum of weights in the regular bins only.
    pub fn integral(&self) -> f64 {
        self.sumw
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }
    /// Sum of weights of every fill, including underflow and overflow.
    pub fn total_weight(&self) -> f64 {
        self.sumw
            .iter()
            .copied()
            .chain([self.underflow, self.overflow])
            .sum_with_accumulator::<Klein<f64>>()
    }
}

impl_op_ex!(+ |a: &Histogram, b: &Histogram| -> Histogram {
    let mut sum = a.clone();
    sum += b;
    sum
});

impl_op_ex!(+= |a: &mut Histogram, b: &Histogram| {
    if let Err(err) = a.merge(b) {
        panic!("{err}");
    }
});
