use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use serde::Serialize;
use tracing::info;

use crate::{
    data::io::expand_output_path, report::format_bin_dump, stack::Stack, StackhistResult,
};

/// Something which turns a finished [`Stack`] into an artifact on disk.
pub trait StackRenderer: Send + Sync {
    /// Write one artifact for `stack` into `output_dir` (created if needed) and return its path.
    ///
    /// The file name depends only on the stack's process and observable and the renderer's
    /// settings (see [`artifact_name`]), so stacks of different processes never share a file.
    fn render(&self, stack: &Stack, output_dir: &str) -> StackhistResult<PathBuf>;
}

/// The file name of a stack's artifact: `{process}_{observable}{suffix}.{extension}`, or
/// `{observable}{suffix}.{extension}` for a stack without a process.
pub fn artifact_name(stack: &Stack, suffix: &str, extension: &str) -> String {
    if stack.process.is_empty() {
        format!("{}{suffix}.{extension}", stack.observable)
    } else {
        format!("{}_{}{suffix}.{extension}", stack.process, stack.observable)
    }
}

fn artifact_path(
    output_dir: &str,
    stack: &Stack,
    suffix: &str,
    extension: &str,
) -> StackhistResult<PathBuf> {
    let dir = expand_output_path(output_dir)?;
    fs::create_dir_all(&dir)?;
    Ok(dir.join(artifact_name(stack, suffix, extension)))
}

#[derive(Serialize)]
struct JsonLayer<'a> {
    label: &'a str,
    color: String,
    contents: &'a [f64],
    errors: Vec<f64>,
    underflow: f64,
    overflow: f64,
}

#[derive(Serialize)]
struct JsonStack<'a> {
    process: &'a str,
    observable: &'a str,
    x_title: &'a str,
    y_title: &'a str,
    log_y: bool,
    edges: &'a [f64],
    maximum: f64,
    minimum: f64,
    total: &'a [f64],
    layers: Vec<JsonLayer<'a>>,
}

/// Writes each stack as a JSON document `{process}_{observable}{suffix}.json` for an external
/// plotting tool. Colours are written as `#RRGGBB`.
#[derive(Clone, Debug, Default)]
pub struct JsonRenderer {
    suffix: String,
}

impl JsonRenderer {
    /// Create a renderer which appends `suffix` (for instance `"_e"`) to every file name.
    pub fn new<S: Into<String>>(suffix: S) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl StackRenderer for JsonRenderer {
    fn render(&self, stack: &Stack, output_dir: &str) -> StackhistResult<PathBuf> {
        let path = artifact_path(output_dir, stack, &self.suffix, "json")?;
        let document = JsonStack {
            process: &stack.process,
            observable: &stack.observable,
            x_title: &stack.x_title,
            y_title: &stack.y_title,
            log_y: true,
            edges: &stack.edges,
            maximum: stack.maximum,
            minimum: stack.minimum,
            total: &stack.total,
            layers: stack
                .layers
                .iter()
                .map(|layer| JsonLayer {
                    label: &layer.label,
                    color: layer.color.to_string(),
                    contents: layer.histogram.contents(),
                    errors: layer.histogram.errors(),
                    underflow: layer.histogram.underflow(),
                    overflow: layer.histogram.overflow(),
                })
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.flush()?;
        info!(path = %path.display(), "rendered stack");
        Ok(path)
    }
}

/// Writes the bin centres and contents of every layer as plain text, one block per layer
/// headed by `# <label>`.
#[derive(Clone, Debug, Default)]
pub struct TextDumpRenderer {
    suffix: String,
}

impl TextDumpRenderer {
    /// Create a renderer which appends `suffix` to every file name.
    pub fn new<S: Into<String>>(suffix: S) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl StackRenderer for TextDumpRenderer {
    fn render(&self, stack: &Stack, output_dir: &str) -> StackhistResult<PathBuf> {
        let path = artifact_path(output_dir, stack, &self.suffix, "txt")?;
        let mut writer = BufWriter::new(File::create(&path)?);
        for layer in &stack.layers {
            writeln!(writer, "# {}", layer.label)?;
            write!(writer, "{}", format_bin_dump(&layer.histogram))?;
        }
        writer.flush()?;
        info!(path = %path.display(), "dumped stack");
        Ok(path)
    }
}
