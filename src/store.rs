use std::{
    fs::File,
    io::{BufReader, BufWriter},
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    data::io::{canonicalize_path, expand_output_path},
    histogram::Histogram,
    StackhistError, StackhistResult,
};

/// Form the store key of a sample's histogram of an observable: `"{label}_{observable}"`.
///
/// Keys are case sensitive and nothing is escaped, so a label ending in `_x` and an observable
/// starting with `x_` can collide; sample labels and observable names should be chosen so that
/// they don't.
pub fn histogram_key(label: &str, observable: &str) -> String {
    format!("{label}_{observable}")
}

/// A flat, keyed collection of histograms shared between the aggregation and stacking phases.
///
/// Writers of different keys never block each other for longer than one map insertion. Writing a
/// key twice keeps the last histogram. The store can be saved to and loaded from a single file.
#[derive(Debug, Default)]
pub struct HistogramStore {
    histograms: RwLock<IndexMap<String, Histogram>>,
}

impl HistogramStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a histogram under `key`, replacing any previous histogram with that key.
    pub fn write<S: Into<String>>(&self, key: S, histogram: Histogram) {
        let key = key.into();
        debug!(key = %key, "storing histogram");
        self.histograms.write().insert(key, histogram);
    }

    /// Store every histogram of one sample under `"{label}_{observable}"` at once, so readers
    /// never see only part of a sample.
    pub fn publish<I>(&self, label: &str, histograms: I)
    where
        I: IntoIterator<Item = (String, Histogram)>,
    {
        let entries: Vec<(String, Histogram)> = histograms
            .into_iter()
            .map(|(observable, histogram)| {
                let key = histogram_key(label, &observable);
                let histogram = histogram.renamed(key.clone());
                (key, histogram)
            })
            .collect();
        debug!(label, count = entries.len(), "publishing sample histograms");
        self.histograms.write().extend(entries);
    }

    /// Get a copy of the histogram stored under `key`.
    pub fn read(&self, key: &str) -> StackhistResult<Histogram> {
        self.histograms
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StackhistError::HistogramNotFound {
                key: key.to_string(),
            })
    }

    /// Check whether a key has been written.
    pub fn contains(&self, key: &str) -> bool {
        self.histograms.read().contains_key(key)
    }

    /// Every key, in the order in which it was first written.
    pub fn keys(&self) -> Vec<String> {
        self.histograms.read().keys().cloned().collect()
    }

    /// The number of stored histograms.
    pub fn len(&self) -> usize {
        self.histograms.read().len()
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.histograms.read().is_empty()
    }

    /// Write the whole store to a file, replacing its previous contents.
    pub fn save(&self, file_path: &str) -> StackhistResult<()> {
        let path = expand_output_path(file_path)?;
        let writer = BufWriter::new(File::create(&path)?);
        let histograms = self.histograms.read();
        bincode::serialize_into(writer, &*histograms)?;
        info!(path = %path.display(), count = histograms.len(), "saved histogram store");
        Ok(())
    }

    /// Load a store previously written by [`HistogramStore::save`].
    pub fn load(file_path: &str) -> StackhistResult<Self> {
        let path = canonicalize_path(file_path)?;
        let reader = BufReader::new(File::open(&path)?);
        let histograms: IndexMap<String, Histogram> = bincode::deserialize_from(reader)?;
        info!(path = %path.display(), count = histograms.len(), "loaded histogram store");
        Ok(Self {
            histograms: RwLock::new(histograms),
        })
    }
}

impl FromIterator<(String, Histogram)> for HistogramStore {
    fn from_iter<T: IntoIterator<Item = (String, Histogram)>>(iter: T) -> Self {
        Self {
            histograms: RwLock::new(iter.into_iter().collect()),
        }
    }
}
