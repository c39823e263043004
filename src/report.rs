use std::fmt::Write;

use crate::{histogram::Histogram, selection::CutFlow};

fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        100.0 * numerator / denominator
    }
}

/// Render a cut-flow as one line per stage:
///
/// ```text
/// <name>: pass=<n> sumw=<w> eff=<pct>% cumulative=<pct>%
/// ```
///
/// `eff` is relative to the previous stage and `cumulative` to the first stage; both read
/// `0.00%` when the reference stage passed no events. An empty cut-flow renders as an empty
/// string.
pub fn format_cut_flow(cut_flow: &CutFlow) -> String {
    let mut out = String::new();
    let Some(first) = cut_flow.stages().first() else {
        return out;
    };
    let mut previous = first.passed;
    for stage in cut_flow.stages() {
        let eff = percent(stage.passed as f64, previous as f64);
        let cumulative = percent(stage.passed as f64, first.passed as f64);
        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "{}: pass={} sumw={} eff={:.2}% cumulative={:.2}%",
            stage.name, stage.passed, stage.sumw, eff, cumulative
        );
        previous = stage.passed;
    }
    out
}

/// The worker-count diagnostic line.
pub fn format_pool_size(workers: usize) -> String {
    format!("Pool size: {workers}")
}

/// One `<bin center> <bin content>` line per regular bin.
pub fn format_bin_dump(histogram: &Histogram) -> String {
    histogram
        .centers()
        .iter()
        .zip(histogram.contents())
        .fold(String::new(), |mut out, (center, content)| {
            let _ = writeln!(out, "{center} {content}");
            out
        })
}
