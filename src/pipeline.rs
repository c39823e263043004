use std::{fmt::Display, path::PathBuf, sync::Arc};

#[cfg(feature = "rayon")]
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use tracing::{error, info};

use crate::{
    aggregate::Aggregator,
    binning::BinSpecRegistry,
    catalog::{Process, Sample},
    config::PipelineConfig,
    data::{Dataset, EventSource, InMemorySource, ParquetSource},
    render::StackRenderer,
    report::{format_cut_flow, format_pool_size},
    selection::CutFlow,
    stack::StackBuilder,
    store::HistogramStore,
    StackhistResult,
};

/// The result of aggregating one sample.
#[derive(Clone, Debug)]
pub struct SampleOutcome {
    /// The process the sample belongs to.
    pub process: String,
    /// The sample label.
    pub label: String,
    /// The sample's cut-flow, or why nothing was stored for it.
    pub result: StackhistResult<CutFlow>,
}

/// The result of stacking and rendering one observable of one process.
#[derive(Clone, Debug)]
pub struct StackOutcome {
    /// The stacked process.
    pub process: String,
    /// The stacked observable.
    pub observable: String,
    /// The written artifact, or why none was written.
    pub result: StackhistResult<PathBuf>,
}

/// What happened to every unit of work of a [`Pipeline`] run.
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    /// One entry per sample, in catalog order.
    pub samples: Vec<SampleOutcome>,
    /// One entry per process and observable, in catalog then observable order.
    pub stacks: Vec<StackOutcome>,
}

/// A failed unit of work.
#[derive(Clone, Debug)]
pub struct Failure {
    /// `"sample <label>"` or `"stack <process>/<observable>"`.
    pub unit: String,
    /// The error which stopped it.
    pub message: String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.message)
    }
}

impl PipelineReport {
    /// Every failed sample and stack.
    pub fn failures(&self) -> Vec<Failure> {
        let samples = self.samples.iter().filter_map(|outcome| {
            outcome.result.as_ref().err().map(|err| Failure {
                unit: format!("sample {}", outcome.label),
                message: err.to_string(),
            })
        });
        let stacks = self.stacks.iter().filter_map(|outcome| {
            outcome.result.as_ref().err().map(|err| Failure {
                unit: format!("stack {}/{}", outcome.process, outcome.observable),
                message: err.to_string(),
            })
        });
        samples.chain(stacks).collect()
    }

    /// Returns `true` if every sample and every stack succeeded.
    pub fn is_success(&self) -> bool {
        self.samples.iter().all(|o| o.result.is_ok())
            && self.stacks.iter().all(|o| o.result.is_ok())
    }

    /// The cut-flow of a successfully aggregated sample.
    pub fn cut_flow(&self, label: &str) -> Option<&CutFlow> {
        self.samples
            .iter()
            .find(|o| o.label == label)
            .and_then(|o| o.result.as_ref().ok())
    }

    /// Every written artifact, in report order.
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.stacks
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect()
    }
}

/// Aggregates every sample of a configuration into a [`HistogramStore`], then stacks and renders
/// every observable of every process.
///
/// The two phases are separated by a barrier: stacking starts only after every sample has either
/// been stored or failed. A failing sample or stack is logged and recorded in the
/// [`PipelineReport`] without stopping the others.
pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<BinSpecRegistry>,
    store: Arc<HistogramStore>,
    workers: usize,
    #[cfg(feature = "rayon")]
    pool: Arc<ThreadPool>,
}

impl Pipeline {
    /// Validate a configuration and start its worker pool.
    pub fn new(config: PipelineConfig) -> StackhistResult<Self> {
        config.validate()?;
        let workers = config.worker_count();
        #[cfg(feature = "rayon")]
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(workers).build()?);
        info!("{}", format_pool_size(workers));
        Ok(Self {
            registry: config.observables.clone().freeze(),
            config,
            store: Arc::new(HistogramStore::new()),
            workers,
            #[cfg(feature = "rayon")]
            pool,
        })
    }

    /// Use an existing store, for instance one loaded with [`HistogramStore::load`] to stack
    /// without aggregating again.
    pub fn with_store(mut self, store: Arc<HistogramStore>) -> Self {
        self.store = store;
        self
    }

    /// The configuration of this pipeline.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The store which receives every sample's histograms.
    pub fn store(&self) -> &Arc<HistogramStore> {
        &self.store
    }

    /// The size of the worker pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// An [`Aggregator`] over the configured observables, sharing this pipeline's pool.
    pub fn aggregator(&self) -> Aggregator {
        let aggregator =
            Aggregator::new(Arc::clone(&self.registry)).with_partitions(self.config.partitions);
        #[cfg(feature = "rayon")]
        let aggregator = aggregator.with_pool(Arc::clone(&self.pool));
        aggregator
    }

    /// A [`ParquetSource`] over the configured data directory, derived columns, weighting and
    /// selection.
    pub fn parquet_source(&self) -> ParquetSource {
        ParquetSource::new(self.config.data_dir.clone(), self.config.selection.clone())
            .with_columns(self.config.columns.clone())
            .with_weighting(self.config.weighting)
    }

    /// An [`InMemorySource`] over the given datasets (keyed by locator) which prepares them the
    /// way [`Pipeline::parquet_source`] prepares files.
    pub fn in_memory_source<I, S>(&self, datasets: I) -> InMemorySource
    where
        I: IntoIterator<Item = (S, Dataset)>,
        S: Into<String>,
    {
        datasets.into_iter().fold(
            InMemorySource::new(self.config.selection.clone())
                .with_columns(self.config.columns.clone())
                .with_weighting(self.config.weighting),
            |source, (locator, dataset)| source.with(locator, dataset),
        )
    }

    /// Run both phases and save the store if a store path is configured.
    ///
    /// Only an unwritable store file fails the whole run; every other error is confined to its
    /// sample or stack and reported.
    pub fn run(
        &self,
        source: &dyn EventSource,
        renderer: &dyn StackRenderer,
        output_dir: &str,
    ) -> StackhistResult<PipelineReport> {
        let samples = self.aggregate(source);
        if let Some(path) = &self.config.store_path {
            self.store.save(path)?;
        }
        let stacks = self.stack(renderer, output_dir);
        let report = PipelineReport { samples, stacks };
        info!(
            samples = report.samples.len(),
            stacks = report.stacks.len(),
            failures = report.failures().len(),
            "pipeline finished"
        );
        Ok(report)
    }

    /// Aggregate every sample of the catalog and publish the histograms of each successful one.
    pub fn aggregate(&self, source: &dyn EventSource) -> Vec<SampleOutcome> {
        let aggregator = self.aggregator();
        let units: Vec<(&Process, &Sample)> = self.config.processes.samples().collect();
        let run_unit = |(process, sample): &(&Process, &Sample)| {
            let result = aggregator.aggregate_all(sample, source).map(|aggregation| {
                info!(
                    sample = sample.label(),
                    "Cut-flow report:\n{}",
                    format_cut_flow(&aggregation.cut_flow)
                );
                self.store.publish(sample.label(), aggregation.histograms);
                aggregation.cut_flow
            });
            if let Err(err) = &result {
                error!(sample = sample.label(), "{err}");
            }
            SampleOutcome {
                process: process.name().to_string(),
                label: sample.label().to_string(),
                result,
            }
        };
        #[cfg(feature = "rayon")]
        return self.pool.install(|| units.par_iter().map(run_unit).collect());
        #[cfg(not(feature = "rayon"))]
        return units.iter().map(run_unit).collect();
    }

    /// Stack and render every configured observable of every process from the store.
    pub fn stack(&self, renderer: &dyn StackRenderer, output_dir: &str) -> Vec<StackOutcome> {
        let observables = self.config.stacked_observables();
        let units: Vec<(StackBuilder, &Process, &String)> = self
            .config
            .processes
            .processes()
            .iter()
            .flat_map(|process| {
                let builder = StackBuilder::for_process(
                    process,
                    Arc::clone(&self.store),
                    self.config.style.clone(),
                );
                observables
                    .iter()
                    .map(move |observable| (builder.clone(), process, observable))
            })
            .collect();
        let run_unit = |(builder, process, observable): &(StackBuilder, &Process, &String)| {
            let result = builder
                .build_process(observable)
                .and_then(|stack| renderer.render(&stack, output_dir));
            if let Err(err) = &result {
                error!(process = process.name(), observable = observable.as_str(), "{err}");
            }
            StackOutcome {
                process: process.name().to_string(),
                observable: observable.to_string(),
                result,
            }
        };
        #[cfg(feature = "rayon")]
        return self.pool.install(|| units.par_iter().map(run_unit).collect());
        #[cfg(not(feature = "rayon"))]
        return units.iter().map(run_unit).collect();
    }
}
