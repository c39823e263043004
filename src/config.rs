use std::fs;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    binning::BinSpecRegistry,
    catalog::SampleCatalog,
    data::{
        io::{canonicalize_path, expand_output_path},
        WeightMode, Weighting,
    },
    kinematics::DerivedColumns,
    selection::Selection,
    stack::StackStyle,
    StackhistError, StackhistResult,
};

fn default_partitions() -> usize {
    1
}

fn default_output_dir() -> String {
    String::from(".")
}

/// Everything a [`Pipeline`](crate::pipeline::Pipeline) run needs to know, usually read from a
/// JSON file.
///
/// ```json
/// {
///   "workers": 8,
///   "data_dir": "~/skims",
///   "observables": { "pt_l": [500, 0.0, 5000.0] },
///   "processes": [
///     { "name": "tnu", "samples": [{ "label": "tnu_120-200", "locator": "120-200_Skim_t" }],
///       "colors": { "tnu_120-200": "#64C0E8" } }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Size of the worker pool. Defaults to the number of logical CPUs.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Number of partial fills per sample.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Base directory of the per-sample event files.
    #[serde(default)]
    pub data_dir: String,
    /// Where the filled histograms are saved between the two phases, if anywhere.
    #[serde(default)]
    pub store_path: Option<String>,
    /// Directory receiving one artifact per process and observable.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Appended to every artifact name.
    #[serde(default)]
    pub suffix: String,
    /// Display settings of every stack.
    #[serde(default)]
    pub style: StackStyle,
    /// Columns the event source computes before selecting.
    #[serde(default)]
    pub columns: DerivedColumns,
    /// How the event source settles every sample's `weight` column.
    #[serde(default)]
    pub weighting: Weighting,
    /// Selection applied by the event source to every sample.
    #[serde(default)]
    pub selection: Selection,
    /// Observable → `[bins, lower, upper]`.
    pub observables: BinSpecRegistry,
    /// Processes and their ordered samples.
    pub processes: SampleCatalog,
    /// Observables to stack. Defaults to every registered observable.
    #[serde(default)]
    pub plot_observables: Option<Vec<String>>,
}

impl PipelineConfig {
    /// Create a configuration with default settings.
    pub fn new(observables: BinSpecRegistry, processes: SampleCatalog) -> Self {
        Self {
            workers: None,
            partitions: default_partitions(),
            data_dir: String::new(),
            store_path: None,
            output_dir: default_output_dir(),
            suffix: String::new(),
            style: StackStyle::default(),
            columns: DerivedColumns::default(),
            weighting: Weighting::default(),
            selection: Selection::default(),
            observables,
            processes,
            plot_observables: None,
        }
    }

    /// Read a configuration from a JSON file and [`validate`](PipelineConfig::validate) it.
    pub fn load(file_path: &str) -> StackhistResult<Self> {
        let path = canonicalize_path(file_path)?;
        debug!(path = %path.display(), "reading configuration");
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, file_path: &str) -> StackhistResult<()> {
        let path = expand_output_path(file_path)?;
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// The configuration as pretty-printed JSON.
    pub fn to_json(&self) -> StackhistResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The configured pool size, or the number of logical CPUs.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// The observables to stack, in order.
    pub fn stacked_observables(&self) -> Vec<String> {
        self.plot_observables
            .clone()
            .unwrap_or_else(|| self.observables.observables())
    }

    /// Check the catalog (see [`SampleCatalog::validate`]), that every stacked observable is
    /// registered, and that the luminosity and display bounds are positive.
    pub fn validate(&self) -> StackhistResult<()> {
        self.processes.validate()?;
        if !(self.weighting.luminosity > 0.0) {
            return Err(StackhistError::Custom(format!(
                "Integrated luminosity must be positive (found {})",
                self.weighting.luminosity
            )));
        }
        if self.weighting.mode == WeightMode::Normalized {
            if let Some((_, sample)) = self
                .processes
                .samples()
                .find(|(_, sample)| sample.normalization().is_none())
            {
                return Err(StackhistError::Custom(format!(
                    "Normalized weighting needs a normalization for sample \"{}\"",
                    sample.label()
                )));
            }
        }
        for observable in self.stacked_observables() {
            if !self.observables.contains(&observable) {
                return Err(StackhistError::UnknownObservable { name: observable });
            }
        }
        if !(self.style.floor > 0.0) || !(self.style.headroom > 0.0) {
            return Err(StackhistError::Custom(format!(
                "Stack floor and headroom must be positive (found {} and {})",
                self.style.floor, self.style.headroom
            )));
        }
        Ok(())
    }

    /// Builder-style setter for [`PipelineConfig::workers`].
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Builder-style setter for [`PipelineConfig::partitions`].
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Builder-style setter for [`PipelineConfig::data_dir`].
    pub fn with_data_dir<S: Into<String>>(mut self, data_dir: S) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Builder-style setter for [`PipelineConfig::store_path`].
    pub fn with_store_path<S: Into<String>>(mut self, store_path: S) -> Self {
        self.store_path = Some(store_path.into());
        self
    }

    /// Builder-style setter for [`PipelineConfig::weighting`].
    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Builder-style setter for [`PipelineConfig::output_dir`].
    pub fn with_output_dir<S: Into<String>>(mut self, output_dir: S) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}
