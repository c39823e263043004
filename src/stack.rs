use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    catalog::{Color, Process},
    histogram::Histogram,
    store::{histogram_key, HistogramStore},
    StackhistError, StackhistResult,
};

/// The default factor applied to the largest stacked bin to leave room above the stack.
pub const DEFAULT_HEADROOM: f64 = 50.0;
/// The default lower display bound on a logarithmic axis.
pub const DEFAULT_FLOOR: f64 = 1e-11;
/// The default y-axis title.
pub const DEFAULT_Y_TITLE: &str = "N_{Events}";

fn default_headroom() -> f64 {
    DEFAULT_HEADROOM
}

fn default_floor() -> f64 {
    DEFAULT_FLOOR
}

fn default_y_title() -> String {
    DEFAULT_Y_TITLE.to_string()
}

fn default_axis_titles() -> IndexMap<String, String> {
    [
        ("pt_l", "Lepton p_{T} / GeV"),
        ("pt_n", "Neutrino p_{T} / GeV"),
        ("eta_l", "Lepton #eta"),
        ("eta_n", "Neutrino #eta"),
        ("phi_l", "Lepton #phi"),
        ("phi_n", "Neutrino #phi"),
        ("pt_genmet", "GenMET (p_{T}) / GeV"),
        ("phi_genmet", "GenMET (#phi)"),
        ("pdgId_l", "pdgId"),
        ("pdgId_n", "pdgId"),
        ("mt", "M_{T} / GeV"),
        ("mt_met", "Transverse mass / GeV"),
        ("m_inv", "Invariant M(l#nu) / GeV"),
        ("scalePDF", "Invariant M(l#nu) / GeV"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Display settings shared by every stack of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackStyle {
    /// Factor applied to the largest stacked bin content.
    #[serde(default = "default_headroom")]
    pub headroom: f64,
    /// Positive value used as the lower bound when the stacked minimum is not positive.
    #[serde(default = "default_floor")]
    pub floor: f64,
    /// Title of the vertical axis.
    #[serde(default = "default_y_title")]
    pub y_title: String,
    /// Observable name → horizontal axis title. Observables without an entry use their name.
    #[serde(default = "default_axis_titles")]
    pub axis_titles: IndexMap<String, String>,
}

impl Default for StackStyle {
    fn default() -> Self {
        Self {
            headroom: DEFAULT_HEADROOM,
            floor: DEFAULT_FLOOR,
            y_title: default_y_title(),
            axis_titles: default_axis_titles(),
        }
    }
}

impl StackStyle {
    /// The horizontal axis title of an observable.
    pub fn axis_title(&self, observable: &str) -> String {
        self.axis_titles
            .get(observable)
            .cloned()
            .unwrap_or_else(|| observable.to_string())
    }

    /// Replace (or add) axis titles.
    pub fn with_axis_titles<I, K, V>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.axis_titles
            .extend(titles.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// One sample's contribution to a [`Stack`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackLayer {
    /// The sample label.
    pub label: String,
    /// The fill colour of the layer.
    pub color: Color,
    /// The sample's histogram of the stacked observable.
    pub histogram: Histogram,
}

/// The histograms of one observable for an ordered list of samples, ready to be drawn on top
/// of each other.
///
/// The first layer is the base of the stack. Layers are never reordered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    /// The process the layers belong to, empty for an ad hoc list of samples.
    #[serde(default)]
    pub process: String,
    /// The stacked observable.
    pub observable: String,
    /// Title of the horizontal axis.
    pub x_title: String,
    /// Title of the vertical axis.
    pub y_title: String,
    /// Shared bin edges of every layer.
    pub edges: Vec<f64>,
    /// Layers, base first.
    pub layers: Vec<StackLayer>,
    /// Bin-wise sum of every layer.
    pub total: Vec<f64>,
    /// Upper display bound: the largest entry of `total` times the headroom.
    pub maximum: f64,
    /// Lower display bound: the smallest entry of `total` if it is positive, otherwise the floor.
    pub minimum: f64,
}

impl Stack {
    /// The number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }
    /// Returns `true` if the stack has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
    /// The layer labels, base first.
    pub fn labels(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.label.as_str()).collect()
    }
    /// Cumulative bin contents: entry `k` is the sum of layers `0..=k`, the upper outline of
    /// layer `k` when drawn.
    pub fn cumulative(&self) -> Vec<Vec<f64>> {
        let mut running = vec![0.0; self.total.len()];
        self.layers
            .iter()
            .map(|layer| {
                for (r, c) in running.iter_mut().zip(layer.histogram.contents()) {
                    *r += c;
                }
                running.clone()
            })
            .collect()
    }
}

/// Composes histograms from a [`HistogramStore`] into [`Stack`]s.
#[derive(Clone, Debug)]
pub struct StackBuilder {
    process: String,
    store: Arc<HistogramStore>,
    colors: IndexMap<String, Color>,
    labels: Vec<String>,
    style: StackStyle,
}

impl StackBuilder {
    /// Create a builder with an explicit colour table.
    pub fn new(
        store: Arc<HistogramStore>,
        colors: IndexMap<String, Color>,
        style: StackStyle,
    ) -> Self {
        Self {
            process: String::new(),
            store,
            colors,
            labels: Vec::new(),
            style,
        }
    }

    /// Create a builder which stacks the samples of a process in declaration order using its
    /// colour table.
    pub fn for_process(process: &Process, store: Arc<HistogramStore>, style: StackStyle) -> Self {
        Self {
            process: process.name().to_string(),
            store,
            colors: process.colors().clone(),
            labels: process.labels().into_iter().map(String::from).collect(),
            style,
        }
    }

    /// Name the process every built [`Stack`] belongs to.
    pub fn with_process<S: Into<String>>(mut self, process: S) -> Self {
        self.process = process.into();
        self
    }

    /// The style used for every stack.
    pub fn style(&self) -> &StackStyle {
        &self.style
    }

    /// Stack the samples the builder was created for (see [`StackBuilder::for_process`]).
    pub fn build_process(&self, observable: &str) -> StackhistResult<Stack> {
        self.build(&self.labels, observable)
    }

    /// Stack the given samples, in the given order, for one observable.
    ///
    /// Fails with [`StackhistError::HistogramNotFound`] if any sample's histogram was never
    /// stored, [`StackhistError::UnknownSampleColor`] if a sample has no colour, and
    /// [`StackhistError::IncompatibleBinning`] if the histograms disagree on their binning.
    pub fn build<S: AsRef<str>>(&self, labels: &[S], observable: &str) -> StackhistResult<Stack> {
        let layers = labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                let histogram = self.store.read(&histogram_key(label, observable))?;
                let color = self.colors.get(label).copied().ok_or_else(|| {
                    StackhistError::UnknownSampleColor {
                        label: label.to_string(),
                    }
                })?;
                Ok(StackLayer {
                    label: label.to_string(),
                    color,
                    histogram,
                })
            })
            .collect::<StackhistResult<Vec<StackLayer>>>()?;

        let mut layer_iter = layers.iter();
        let (edges, total) = match layer_iter.next() {
            Some(base) => {
                let mut total = base.histogram.clone();
                for layer in layer_iter {
                    total.merge(&layer.histogram)?;
                }
                (total.edges(), total.contents().to_vec())
            }
            None => (Vec::new(), Vec::new()),
        };
        let maximum = total.iter().copied().fold(0.0, f64::max) * self.style.headroom;
        let smallest = total.iter().copied().fold(f64::INFINITY, f64::min);
        let minimum = if smallest > 0.0 && smallest.is_finite() {
            smallest
        } else {
            self.style.floor
        };
        debug!(
            process = self.process.as_str(),
            observable,
            layers = layers.len(),
            maximum,
            minimum,
            "built stack"
        );
        Ok(Stack {
            process: self.process.clone(),
            observable: observable.to_string(),
            x_title: self.style.axis_title(observable),
            y_title: self.style.y_title.clone(),
            edges,
            layers,
            total,
            maximum,
            minimum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::Binning;
    use approx::assert_relative_eq;

    fn pt_binning() -> Binning {
        Binning::new("pt_l", 500, 0.0, 5000.0).unwrap()
    }

    fn filled(fills: &[(f64, f64)]) -> Histogram {
        let mut h = Histogram::new("pt_l", pt_binning());
        for (value, weight) in fills {
            h.fill(*value, *weight);
        }
        h
    }

    fn store() -> Arc<HistogramStore> {
        let store = HistogramStore::new();
        let p100 = filled(&[(15.0, 3.0), (25.0, 1.0)]);
        let p200 = filled(&[(15.0, 2.0), (35.0, 4.5)]);
        store.publish("p_100", vec![("pt_l".to_string(), p100)]);
        store.publish("p_200", vec![("pt_l".to_string(), p200)]);
        Arc::new(store)
    }

    fn colors() -> IndexMap<String, Color> {
        [
            ("p_100".to_string(), Color::rgb(100, 192, 232)),
            ("p_200".to_string(), Color::rgb(248, 206, 104)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_two_sample_stack() {
        let builder = StackBuilder::new(store(), colors(), StackStyle::default());
        let stack = builder.build(&["p_100", "p_200"], "pt_l").unwrap();
        assert_eq!(stack.labels(), vec!["p_100", "p_200"]);
        assert_relative_eq!(stack.total[1], 5.0);
        assert_relative_eq!(stack.total[3], 4.5);
        assert_relative_eq!(stack.maximum, 5.0 * DEFAULT_HEADROOM);
        assert_relative_eq!(stack.minimum, DEFAULT_FLOOR);
        assert_eq!(stack.x_title, "Lepton p_{T} / GeV");
        assert_eq!(stack.y_title, "N_{Events}");
        assert_eq!(stack.edges.len(), 501);
        let cumulative = stack.cumulative();
        assert_relative_eq!(cumulative[0][1], 3.0);
        assert_relative_eq!(cumulative[1][1], 5.0);
    }

    #[test]
    fn test_order_preserved() {
        let builder = StackBuilder::new(store(), colors(), StackStyle::default());
        let stack = builder.build(&["p_200", "p_100"], "pt_l").unwrap();
        assert_eq!(stack.labels(), vec!["p_200", "p_100"]);
        assert_eq!(stack.layers[0].color, Color::rgb(248, 206, 104));
    }

    #[test]
    fn test_missing_sample() {
        let builder = StackBuilder::new(store(), colors(), StackStyle::default());
        match builder.build(&["p_100", "p_300"], "pt_l") {
            Err(StackhistError::HistogramNotFound { key }) => assert_eq!(key, "p_300_pt_l"),
            other => panic!("expected HistogramNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_color() {
        let store = store();
        store.publish("p_300", vec![("pt_l".to_string(), filled(&[(15.0, 1.0)]))]);
        let builder = StackBuilder::new(store, colors(), StackStyle::default());
        assert!(matches!(
            builder.build(&["p_100", "p_300"], "pt_l"),
            Err(StackhistError::UnknownSampleColor { .. })
        ));
    }

    #[test]
    fn test_incompatible_binning() {
        let store = store();
        let mut coarse = Histogram::new("pt_l", Binning::new("pt_l", 100, 0.0, 5000.0).unwrap());
        coarse.fill(10.0, 1.0);
        store.publish("p_200", vec![("pt_l".to_string(), coarse)]);
        let builder = StackBuilder::new(store, colors(), StackStyle::default());
        assert!(matches!(
            builder.build(&["p_100", "p_200"], "pt_l"),
            Err(StackhistError::IncompatibleBinning { .. })
        ));
    }

    #[test]
    fn test_positive_minimum_and_custom_style() {
        let store = HistogramStore::new();
        let mut h = Histogram::new("x", Binning::new("x", 2, 0.0, 2.0).unwrap());
        h.fill(0.5, 2.0);
        h.fill(1.5, 0.25);
        store.publish("a", vec![("x".to_string(), h)]);
        let style = StackStyle {
            headroom: 10.0,
            ..StackStyle::default()
        };
        let colors = [("a".to_string(), Color::rgb(0, 0, 0))].into_iter().collect();
        let stack = StackBuilder::new(Arc::new(store), colors, style)
            .with_process("q")
            .build(&["a"], "x")
            .unwrap();
        assert_eq!(stack.process, "q");
        assert_relative_eq!(stack.maximum, 20.0);
        assert_relative_eq!(stack.minimum, 0.25);
        assert_eq!(stack.x_title, "x");
    }

    #[test]
    fn test_for_process() {
        let process = Process::new("p")
            .with_sample("p_100", "100", Color::rgb(1, 1, 1))
            .with_sample("p_200", "200", Color::rgb(2, 2, 2));
        let stack = StackBuilder::for_process(&process, store(), StackStyle::default())
            .build_process("pt_l")
            .unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.process, "p");
        assert_eq!(stack.layers[1].color, Color::rgb(2, 2, 2));
        let adhoc = StackBuilder::new(store(), colors(), StackStyle::default())
            .build(&["p_100"], "pt_l")
            .unwrap();
        assert!(adhoc.process.is_empty());
    }
}
