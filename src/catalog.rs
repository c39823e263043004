use std::{collections::HashSet, fmt::Display, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{StackhistError, StackhistResult};

/// An RGB draw colour.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Create a colour from its channels.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = StackhistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_error = || StackhistError::ParseError {
            name: s.to_string(),
            object: "Color".to_string(),
        };
        let hex = s.trim().strip_prefix('#').ok_or_else(parse_error)?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(parse_error());
        }
        let channel =
            |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| parse_error());
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Color {
    type Error = StackhistError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

/// The cross-section normalization of a simulated sample.
///
/// Every event of the sample weighs `cross_section / n_generated * luminosity`, so that the
/// sample's total weight is its expected yield at that luminosity.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Production cross-section.
    pub cross_section: f64,
    /// Number of generated events before any skimming.
    pub n_generated: f64,
}

impl Normalization {
    /// Create a new [`Normalization`].
    pub fn new(cross_section: f64, n_generated: f64) -> Self {
        Self {
            cross_section,
            n_generated,
        }
    }

    /// The weight of one event at the given integrated luminosity.
    pub fn event_weight(&self, luminosity: f64) -> f64 {
        self.cross_section / self.n_generated * luminosity
    }
}

/// One mass slice of a simulated process.
///
/// The `label` identifies the slice in the histogram store and in the colour table; the
/// `locator` is handed to the [`EventSource`](crate::data::EventSource) unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    label: String,
    locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    normalization: Option<Normalization>,
}

impl Sample {
    /// Create a new [`Sample`].
    pub fn new<L: Into<String>, S: Into<String>>(label: L, locator: S) -> Self {
        Self {
            label: label.into(),
            locator: locator.into(),
            normalization: None,
        }
    }
    /// Attach a cross-section normalization.
    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = Some(normalization);
        self
    }
    /// The label of this sample.
    pub fn label(&self) -> &str {
        &self.label
    }
    /// The dataset locator of this sample.
    pub fn locator(&self) -> &str {
        &self.locator
    }
    /// The cross-section normalization of this sample, if it has one.
    pub fn normalization(&self) -> Option<Normalization> {
        self.normalization
    }
}

/// A physics process made of mass-sliced samples.
///
/// The order of the samples is physically meaningful (usually ascending mass) and is the order
/// in which their histograms are stacked; it is never re-sorted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Process {
    name: String,
    samples: Vec<Sample>,
    #[serde(default)]
    colors: IndexMap<String, Color>,
}

impl Process {
    /// Create a process with no samples.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            samples: Vec::new(),
            colors: IndexMap::new(),
        }
    }

    /// Append a sample together with the colour used to draw it.
    pub fn with_sample<L: Into<String>, S: Into<String>>(
        mut self,
        label: L,
        locator: S,
        color: Color,
    ) -> Self {
        let sample = Sample::new(label, locator);
        self.colors.insert(sample.label.clone(), color);
        self.samples.push(sample);
        self
    }

    /// Append a normalized sample together with the colour used to draw it.
    pub fn with_normalized_sample<L: Into<String>, S: Into<String>>(
        self,
        label: L,
        locator: S,
        color: Color,
        normalization: Normalization,
    ) -> Self {
        let mut process = self.with_sample(label, locator, color);
        if let Some(sample) = process.samples.last_mut() {
            sample.normalization = Some(normalization);
        }
        process
    }

    /// Append a sample without registering a colour for it.
    pub fn with_uncolored_sample<L: Into<String>, S: Into<String>>(
        mut self,
        label: L,
        locator: S,
    ) -> Self {
        self.samples.push(Sample::new(label, locator));
        self
    }

    /// The name of the process.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The samples, in declaration order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The sample labels, in declaration order.
    pub fn labels(&self) -> Vec<&str> {
        self.samples.iter().map(Sample::label).collect()
    }

    /// The label → colour table.
    pub fn colors(&self) -> &IndexMap<String, Color> {
        &self.colors
    }

    /// The colour registered for a sample label.
    pub fn color(&self, label: &str) -> StackhistResult<Color> {
        self.colors
            .get(label)
            .copied()
            .ok_or_else(|| StackhistError::UnknownSampleColor {
                label: label.to_string(),
            })
    }
}

/// Every process a pipeline run knows about.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleCatalog {
    processes: Vec<Process>,
}

impl SampleCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a process.
    pub fn with_process(mut self, process: Process) -> Self {
        self.processes.push(process);
        self
    }
    /// The processes, in declaration order.
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }
    /// Find a process by name.
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }
    /// Every `(process, sample)` pair, in declaration order.
    pub fn samples(&self) -> impl Iterator<Item = (&Process, &Sample)> {
        self.processes
            .iter()
            .flat_map(|p| p.samples.iter().map(move |s| (p, s)))
    }
    /// Check that no process name and no sample label appears twice, and that every
    /// normalization is usable.
    ///
    /// Labels form the prefix of store keys and process names the prefix of artifact names, so a
    /// duplicate of either would silently overwrite another unit's output.
    pub fn validate(&self) -> StackhistResult<()> {
        let mut names = HashSet::new();
        for process in &self.processes {
            if !names.insert(process.name()) {
                return Err(StackhistError::Custom(format!(
                    "Process name \"{}\" is used more than once",
                    process.name()
                )));
            }
        }
        let mut labels = HashSet::new();
        for (_, sample) in self.samples() {
            if !labels.insert(sample.label()) {
                return Err(StackhistError::Custom(format!(
                    "Sample label \"{}\" is used more than once",
                    sample.label()
                )));
            }
            if let Some(normalization) = sample.normalization() {
                if !(normalization.n_generated > 0.0) || !normalization.cross_section.is_finite() {
                    return Err(StackhistError::Custom(format!(
                        "Sample \"{}\" has an invalid normalization {normalization:?}",
                        sample.label()
                    )));
                }
            }
        }
        Ok(())
    }
}
