use std::{ops::Range, sync::Arc};

use indexmap::IndexMap;
#[cfg(feature = "rayon")]
use rayon::{prelude::*, ThreadPool};
use tracing::{debug, info};

use crate::{
    binning::{BinSpecRegistry, Binning},
    catalog::Sample,
    data::{Dataset, EventSource},
    histogram::Histogram,
    selection::CutFlow,
    StackhistError, StackhistResult,
};

/// The histograms of one sample (keyed by observable, in the requested order) and the cut-flow
/// its source reported.
#[derive(Clone, Debug)]
pub struct Aggregation {
    /// One histogram per requested observable.
    pub histograms: IndexMap<String, Histogram>,
    /// The source's cut-flow, unchanged.
    pub cut_flow: CutFlow,
}

/// Fills one weighted histogram per observable from a sample's events.
///
/// All observables are filled during the same pass over the events. The events are cut into
/// `partitions` contiguous ranges which are filled independently (in parallel when the `rayon`
/// feature is enabled) and then merged in range order, so the result for a given configuration
/// is deterministic.
#[derive(Clone)]
pub struct Aggregator {
    registry: Arc<BinSpecRegistry>,
    partitions: usize,
    #[cfg(feature = "rayon")]
    pool: Option<Arc<ThreadPool>>,
}

impl Aggregator {
    /// Create an [`Aggregator`] which uses the binnings of the given registry.
    pub fn new(registry: Arc<BinSpecRegistry>) -> Self {
        Self {
            registry,
            partitions: 1,
            #[cfg(feature = "rayon")]
            pool: None,
        }
    }

    /// Split every sample into this many partial fills (at least one).
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Run partial fills on the given thread pool instead of the global one.
    #[cfg(feature = "rayon")]
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// The registry this aggregator reads binnings from.
    pub fn registry(&self) -> &Arc<BinSpecRegistry> {
        &self.registry
    }

    /// Load a sample from its source and fill the given observables.
    ///
    /// Fails without producing anything if an observable is unknown to the registry or if the
    /// sample lacks an observable column or the `weight` column. A missing column is reported
    /// under the sample's label, whether the source or the fill noticed it.
    pub fn aggregate<S: AsRef<str>>(
        &self,
        sample: &Sample,
        observables: &[S],
        source: &dyn EventSource,
    ) -> StackhistResult<Aggregation> {
        let loaded = source
            .load(sample)
            .map_err(|err| relabel_missing_field(err, sample))?;
        let histograms = self
            .fill(&loaded.dataset, observables)
            .map_err(|err| relabel_missing_field(err, sample))?;
        if let Some(stage) = loaded.cut_flow.last() {
            info!(
                sample = sample.label(),
                events = stage.passed,
                sumw = stage.sumw,
                "aggregated sample"
            );
        }
        Ok(Aggregation {
            histograms,
            cut_flow: loaded.cut_flow,
        })
    }

    /// [`Aggregator::aggregate`] over every registered observable.
    pub fn aggregate_all(
        &self,
        sample: &Sample,
        source: &dyn EventSource,
    ) -> StackhistResult<Aggregation> {
        self.aggregate(sample, &self.registry.observables(), source)
    }

    /// Fill the given observables from a dataset which is already in memory.
    pub fn fill<S: AsRef<str>>(
        &self,
        dataset: &Dataset,
        observables: &[S],
    ) -> StackhistResult<IndexMap<String, Histogram>> {
        let binnings = observables
            .iter()
            .map(|name| Ok((name.as_ref().to_string(), self.registry.get(name.as_ref())?)))
            .collect::<StackhistResult<Vec<(String, Binning)>>>()?;
        let columns = binnings
            .iter()
            .map(|(name, _)| dataset.require_column(name))
            .collect::<StackhistResult<Vec<&[f64]>>>()?;
        let weights = dataset.weights()?;

        let ranges = partition(dataset.n_events(), self.partitions);
        debug!(
            dataset = dataset.name(),
            events = dataset.n_events(),
            partitions = ranges.len(),
            observables = binnings.len(),
            "filling histograms"
        );
        let fill_partition = |range: Range<usize>| fill_range(&binnings, &columns, weights, range);

        #[cfg(feature = "rayon")]
        let partials: Vec<Vec<Histogram>> = {
            let run = || -> Vec<Vec<Histogram>> {
                ranges.into_par_iter().map(fill_partition).collect()
            };
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        };
        #[cfg(not(feature = "rayon"))]
        let partials: Vec<Vec<Histogram>> = ranges.into_iter().map(fill_partition).collect();

        let mut partials = partials.into_iter();
        let mut merged = partials
            .next()
            .unwrap_or_else(|| empty_histograms(&binnings));
        for partial in partials {
            for (total, part) in merged.iter_mut().zip(&partial) {
                total.merge(part)?;
            }
        }
        Ok(binnings
            .into_iter()
            .map(|(name, _)| name)
            .zip(merged)
            .collect())
    }
}

fn relabel_missing_field(err: StackhistError, sample: &Sample) -> StackhistError {
    match err {
        StackhistError::MissingField { field, .. } => StackhistError::MissingField {
            sample: sample.label().to_string(),
            field,
        },
        other => other,
    }
}

fn empty_histograms(binnings: &[(String, Binning)]) -> Vec<Histogram> {
    binnings
        .iter()
        .map(|(name, binning)| Histogram::new(name.clone(), *binning))
        .collect()
}

fn fill_range(
    binnings: &[(String, Binning)],
    columns: &[&[f64]],
    weights: &[f64],
    range: Range<usize>,
) -> Vec<Histogram> {
    let mut histograms = empty_histograms(binnings);
    for event in range {
        let weight = weights[event];
        for (histogram, column) in histograms.iter_mut().zip(columns) {
            histogram.fill(column[event], weight);
        }
    }
    histograms
}

/// Split `0..n` into at most `parts` contiguous, non-empty ranges whose lengths differ by at
/// most one.
pub(crate) fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(n.max(1));
    let base = n / parts;
    let rem = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = if i < rem { base + 1 } else { base };
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemorySource;
    use crate::selection::{NotEqual, Selection};
    use approx::assert_relative_eq;

    fn registry() -> Arc<BinSpecRegistry> {
        BinSpecRegistry::new()
            .with("pt_l", 500, 0.0, 5000.0)
            .unwrap()
            .with("eta_l", 30, -2.5, 2.5)
            .unwrap()
            .freeze()
    }

    fn random_dataset(n: usize, seed: u64) -> Dataset {
        let mut rng = fastrand::Rng::with_seed(seed);
        let pt = (0..n).map(|_| rng.f64() * 6000.0 - 100.0).collect();
        let eta = (0..n).map(|_| rng.f64() * 6.0 - 3.0).collect();
        let weight = (0..n).map(|_| rng.f64() * 2.0 - 0.5).collect();
        Dataset::new("random")
            .with_column("pt_l", pt)
            .unwrap()
            .with_column("eta_l", eta)
            .unwrap()
            .with_column("weight", weight)
            .unwrap()
    }

    #[test]
    fn test_scenario_single_sample() {
        let dataset = Dataset::new("p_100")
            .with_column("pt_l", vec![10.0, 10.0, 6000.0])
            .unwrap()
            .with_column("weight", vec![1.0, 2.0, 1.0])
            .unwrap();
        let histograms = Aggregator::new(registry())
            .fill(&dataset, &["pt_l"])
            .unwrap();
        let h = &histograms["pt_l"];
        assert_eq!(h.bins(), 500);
        assert_relative_eq!(h.content(0), 0.0);
        assert_relative_eq!(h.content(1), 3.0);
        assert_relative_eq!(h.overflow(), 1.0);
        assert_relative_eq!(h.underflow(), 0.0);
    }

    #[test]
    fn test_weight_conservation() {
        let dataset = random_dataset(5_000, 7);
        let total = dataset.n_events_weighted().unwrap();
        let histograms = Aggregator::new(registry())
            .with_partitions(4)
            .fill(&dataset, &["pt_l", "eta_l"])
            .unwrap();
        for histogram in histograms.values() {
            assert_relative_eq!(histogram.total_weight(), total, epsilon = 1e-9);
            assert_eq!(histogram.entries(), 5_000);
        }
    }

    #[test]
    fn test_partition_invariance() {
        let dataset = random_dataset(3_001, 11);
        let single = Aggregator::new(registry())
            .fill(&dataset, &["pt_l", "eta_l"])
            .unwrap();
        for partitions in [2, 3, 7, 64] {
            let split = Aggregator::new(registry())
                .with_partitions(partitions)
                .fill(&dataset, &["pt_l", "eta_l"])
                .unwrap();
            for (name, expected) in &single {
                let actual = &split[name];
                assert_eq!(actual.entries(), expected.entries());
                for (a, e) in actual.contents().iter().zip(expected.contents()) {
                    assert_relative_eq!(*a, *e, epsilon = 1e-9);
                }
                for (a, e) in actual.sumw2().iter().zip(expected.sumw2()) {
                    assert_relative_eq!(*a, *e, epsilon = 1e-9);
                }
                assert_relative_eq!(actual.overflow(), expected.overflow(), epsilon = 1e-9);
                assert_relative_eq!(actual.underflow(), expected.underflow(), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_repeatable() {
        let dataset = random_dataset(1_000, 3);
        let aggregator = Aggregator::new(registry()).with_partitions(5);
        let first = aggregator.fill(&dataset, &["pt_l"]).unwrap();
        let second = aggregator.fill(&dataset, &["pt_l"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_field_aborts_sample() {
        let source = InMemorySource::default().with(
            "100to200",
            Dataset::new("100to200")
                .with_column("pt_l", vec![1.0])
                .unwrap()
                .with_column("weight", vec![1.0])
                .unwrap(),
        );
        let sample = Sample::new("mnu_100to200", "100to200");
        match Aggregator::new(registry()).aggregate_all(&sample, &source) {
            Err(StackhistError::MissingField { sample, field }) => {
                assert_eq!(sample, "mnu_100to200");
                assert_eq!(field, "eta_l");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_source_missing_field_uses_label() {
        let selection = Selection::new().then("Valid lepton", NotEqual::new("mu_idx", -1.0));
        let source = InMemorySource::new(selection)
            .with("weighted", random_dataset(4, 2))
            .with(
                "unweighted",
                Dataset::new("d").with_column("pt_l", vec![1.0]).unwrap(),
            );
        let aggregator = Aggregator::new(registry());
        for (locator, field) in [("weighted", "mu_idx"), ("unweighted", "weight")] {
            let sample = Sample::new(format!("mnu_{locator}"), locator);
            match aggregator.aggregate_all(&sample, &source) {
                Err(StackhistError::MissingField {
                    sample: label,
                    field: missing,
                }) => {
                    assert_eq!(label, sample.label());
                    assert_eq!(missing, field);
                }
                other => panic!("expected MissingField, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_observable() {
        let dataset = random_dataset(10, 1);
        assert!(matches!(
            Aggregator::new(registry()).fill(&dataset, &["m_inv"]),
            Err(StackhistError::UnknownObservable { .. })
        ));
    }

    #[test]
    fn test_cut_flow_passthrough_and_empty_sample() {
        let dataset = Dataset::new("x")
            .with_column("pt_l", vec![10.0, 20.0])
            .unwrap()
            .with_column("eta_l", vec![0.0, 0.0])
            .unwrap()
            .with_column("mu_idx", vec![-1.0, -1.0])
            .unwrap()
            .with_column("weight", vec![1.0, 1.0])
            .unwrap();
        let source = InMemorySource::new(
            Selection::new().then("Valid lepton", NotEqual::new("mu_idx", -1.0)),
        )
        .with("x", dataset);
        let aggregation = Aggregator::new(registry())
            .with_partitions(4)
            .aggregate_all(&Sample::new("s", "x"), &source)
            .unwrap();
        assert_eq!(aggregation.cut_flow.len(), 2);
        assert_eq!(aggregation.cut_flow.last().unwrap().passed, 0);
        assert_eq!(aggregation.histograms.len(), 2);
        assert_relative_eq!(aggregation.histograms["pt_l"].total_weight(), 0.0);
    }

    #[test]
    fn test_partition_ranges() {
        assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 8), vec![0..1, 1..2]);
        assert_eq!(partition(0, 4), vec![0..0]);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_explicit_pool() {
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let dataset = random_dataset(100, 5);
        let histograms = Aggregator::new(registry())
            .with_partitions(4)
            .with_pool(pool)
            .fill(&dataset, &["eta_l"])
            .unwrap();
        assert_eq!(histograms["eta_l"].entries(), 100);
    }
}
