//! # stackhist
//!
//! Weighted histogramming of simulated collider samples and mass-slice stacking.
//!
//! A physics process is usually simulated in several slices of some generator-level mass
//! window, each with its own cross-section weight. `stackhist` fills one weighted histogram per
//! observable for every slice in a single pass over the events, keeps them in a keyed
//! [`HistogramStore`](crate::store::HistogramStore), and then composes the slices of each
//! observable into an ordered [`Stack`](crate::stack::Stack) which describes the total expected
//! yield of the process.
//!
//! ```no_run
//! use stackhist::prelude::*;
//!
//! # fn main() -> StackhistResult<()> {
//! let config = stackhist::presets::tau()?.with_data_dir("~/skims");
//! let pipeline = Pipeline::new(config)?;
//! let source = pipeline.parquet_source();
//! let report = pipeline.run(&source, &JsonRenderer::new("_t"), "plots")?;
//! for failure in report.failures() {
//!     eprintln!("{failure}");
//! }
//! # Ok(())
//! # }
//! ```
#![warn(clippy::perf, clippy::style)]

use thiserror::Error;

/// Single-pass, partitioned aggregation of events into weighted histograms.
pub mod aggregate;
/// Evenly spaced binnings and the registry which maps observables onto them.
pub mod binning;
/// Samples, processes and the colour table used to draw them.
pub mod catalog;
/// Pipeline configuration and its on-disk representation.
pub mod config;
/// Columnar event datasets, event sources and dataset I/O.
pub mod data;
/// The weighted one-dimensional [`Histogram`](crate::histogram::Histogram).
pub mod histogram;
/// Azimuthal differences, transverse and invariant masses, and columns derived from them.
pub mod kinematics;
/// Logging setup for binaries and tests.
pub mod logging;
/// The two-phase aggregate-then-stack driver.
pub mod pipeline;
/// Built-in configurations for the electron, muon and tau channels.
pub mod presets;
/// Text formatting of cut-flows and histogram contents.
pub mod report;
/// Output of finished stacks.
pub mod render;
/// Named sequential selections and the cut-flow they produce.
pub mod selection;
/// Keyed storage for histograms between the aggregation and stacking phases.
pub mod store;
/// Ordered composition of sample histograms for display.
pub mod stack;

/// Commonly used items.
pub mod prelude {
    pub use crate::aggregate::Aggregator;
    pub use crate::binning::{BinLocation, BinSpecRegistry, Binning};
    pub use crate::catalog::{Color, Normalization, Process, Sample};
    pub use crate::config::PipelineConfig;
    pub use crate::data::{
        Dataset, EventSource, InMemorySource, ParquetSource, WeightMode, Weighting,
    };
    pub use crate::histogram::Histogram;
    pub use crate::kinematics::{DerivedColumns, InvariantMass, TransverseMass};
    pub use crate::pipeline::{Pipeline, PipelineReport};
    pub use crate::render::{JsonRenderer, StackRenderer, TextDumpRenderer};
    pub use crate::selection::{
        Cut, CutFlow, CutFlowStage, NotEqual, OppositeSign, RangeCut, Selection,
    };
    pub use crate::stack::{Stack, StackBuilder, StackStyle};
    pub use crate::store::{histogram_key, HistogramStore};
    pub use crate::{StackhistError, StackhistResult};
}

/// The `Result` type returned by fallible `stackhist` operations.
pub type StackhistResult<T> = Result<T, StackhistError>;

/// The error type used by all `stackhist` methods
#[derive(Error, Debug)]
pub enum StackhistError {
    /// An observable was requested which was never registered with the
    /// [`BinSpecRegistry`](crate::binning::BinSpecRegistry).
    #[error("No binning registered for observable \"{name}\"!")]
    UnknownObservable {
        /// Name of the observable which failed lookup
        name: String,
    },
    /// An event source does not provide a column which the current operation requires.
    #[error("Sample \"{sample}\" has no column named \"{field}\"!")]
    MissingField {
        /// Label (or locator) of the sample being read
        sample: String,
        /// Name of the missing column
        field: String,
    },
    /// A histogram was requested from a store which never received it.
    #[error("Failed to load histogram \"{key}\"!")]
    HistogramNotFound {
        /// Store key of the missing histogram
        key: String,
    },
    /// A sample has no colour registered with its process.
    #[error("No colour registered for sample \"{label}\"!")]
    UnknownSampleColor {
        /// Label of the sample
        label: String,
    },
    /// A binning was declared with no bins or an empty range.
    #[error("Invalid binning for \"{name}\": {bins} bins over [{lower}, {upper})")]
    InvalidBinning {
        /// Name of the observable
        name: String,
        /// Number of bins requested
        bins: usize,
        /// Lower edge requested
        lower: f64,
        /// Upper edge requested
        upper: f64,
    },
    /// Two histograms with different binnings were combined.
    #[error("Cannot combine histograms \"{left}\" and \"{right}\" with different binnings")]
    IncompatibleBinning {
        /// Name of the first histogram
        left: String,
        /// Name of the second histogram
        right: String,
    },
    /// Columns of one dataset disagree on the number of events.
    #[error("{context}: expected {expected} rows but found {actual}")]
    LengthMismatch {
        /// What was being built when the mismatch was found
        context: String,
        /// The number of rows expected
        expected: usize,
        /// The number of rows found
        actual: usize,
    },
    /// A column exists but is not a floating-point column.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the column
        name: String,
        /// The arrow data type which was found
        datatype: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error returned by the store (de)serializer
    #[error("Encoding error: {0}")]
    BincodeError(#[from] bincode::Error),
    /// An error returned while reading or writing JSON
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl Clone for StackhistError {
    // Most wrapped error types are not cloneable, but pipeline reports hand out owned copies
    fn clone(&self) -> Self {
        match self {
            Self::UnknownObservable { name } => Self::UnknownObservable { name: name.clone() },
            Self::MissingField { sample, field } => Self::MissingField {
                sample: sample.clone(),
                field: field.clone(),
            },
            Self::HistogramNotFound { key } => Self::HistogramNotFound { key: key.clone() },
            Self::UnknownSampleColor { label } => Self::UnknownSampleColor {
                label: label.clone(),
            },
            other => Self::Custom(other.to_string()),
        }
    }
}
