//! The `stackhist` command-line driver.

use std::{process::ExitCode, sync::Arc};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use stackhist::{
    config::PipelineConfig,
    data::WeightMode,
    logging,
    pipeline::{Pipeline, PipelineReport},
    presets::Channel,
    render::{JsonRenderer, StackRenderer, TextDumpRenderer},
    report::format_bin_dump,
    store::HistogramStore,
    StackhistError, StackhistResult,
};

/// Weighted histogramming and mass-slice stacking of simulated samples.
#[derive(Debug, Parser)]
#[command(name = "stackhist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Aggregate every sample, then stack and render every observable.
    Run(RunArgs),
    /// Stack and render from a previously saved histogram store.
    Plot(PlotArgs),
    /// Print the configuration of a built-in channel as JSON.
    Preset {
        /// Channel name (electron, muon or tau).
        #[arg(value_parser = parse_channel)]
        channel: Channel,
    },
    /// Print the bin centres and contents of one stored histogram.
    Dump {
        /// Histogram store file.
        #[arg(long)]
        store: String,
        /// Histogram key, `<label>_<observable>`.
        key: String,
    },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// One JSON document per stack.
    #[default]
    Json,
    /// Plain-text bin dumps.
    Text,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// JSON configuration file.
    #[arg(long, conflicts_with = "preset")]
    config: Option<String>,
    /// Built-in channel configuration.
    #[arg(long, value_parser = parse_channel)]
    preset: Option<Channel>,
    /// Worker pool size.
    #[arg(long)]
    workers: Option<usize>,
    /// Directory receiving the artifacts.
    #[arg(long)]
    output_dir: Option<String>,
    /// Artifact format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Directory holding the per-sample Parquet files.
    #[arg(long)]
    data_dir: Option<String>,
    /// Number of partial fills per sample.
    #[arg(long)]
    partitions: Option<usize>,
    /// Save the filled histograms to this file.
    #[arg(long)]
    store: Option<String>,
    /// Integrated luminosity applied to cross-section normalizations.
    #[arg(long)]
    luminosity: Option<f64>,
    /// Replace stored weights with cross-section normalizations.
    #[arg(long)]
    normalize: bool,
}

#[derive(Debug, Args)]
struct PlotArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Histogram store file written by `run`.
    #[arg(long)]
    store: String,
}

fn parse_channel(s: &str) -> Result<Channel, String> {
    s.parse().map_err(|err: StackhistError| err.to_string())
}

impl ConfigArgs {
    fn load(&self) -> StackhistResult<PipelineConfig> {
        let mut config = match (&self.config, self.preset) {
            (Some(path), _) => PipelineConfig::load(path)?,
            (None, Some(channel)) => channel.config()?,
            (None, None) => {
                return Err(StackhistError::Custom(
                    "Either --config or --preset is required".to_string(),
                ))
            }
        };
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        Ok(config)
    }

    fn renderer(&self, suffix: &str) -> Box<dyn StackRenderer> {
        match self.format {
            OutputFormat::Json => Box::new(JsonRenderer::new(suffix)),
            OutputFormat::Text => Box::new(TextDumpRenderer::new(suffix)),
        }
    }
}

fn summarize(report: &PipelineReport) -> ExitCode {
    for path in report.artifacts() {
        info!(path = %path.display(), "written");
    }
    let failures = report.failures();
    for failure in &failures {
        error!("{failure}");
    }
    if failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(args: RunArgs) -> StackhistResult<ExitCode> {
    let mut config = args.config.load()?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(partitions) = args.partitions {
        config.partitions = partitions;
    }
    if let Some(store) = args.store {
        config.store_path = Some(store);
    }
    if let Some(luminosity) = args.luminosity {
        config.weighting.luminosity = luminosity;
    }
    if args.normalize {
        config.weighting.mode = WeightMode::Normalized;
    }
    let renderer = args.config.renderer(&config.suffix);
    let output_dir = config.output_dir.clone();
    let pipeline = Pipeline::new(config)?;
    let source = pipeline.parquet_source();
    let report = pipeline.run(&source, renderer.as_ref(), &output_dir)?;
    Ok(summarize(&report))
}

fn plot(args: PlotArgs) -> StackhistResult<ExitCode> {
    let config = args.config.load()?;
    let renderer = args.config.renderer(&config.suffix);
    let output_dir = config.output_dir.clone();
    let store = Arc::new(HistogramStore::load(&args.store)?);
    let pipeline = Pipeline::new(config)?.with_store(store);
    let report = PipelineReport {
        samples: Vec::new(),
        stacks: pipeline.stack(renderer.as_ref(), &output_dir),
    };
    Ok(summarize(&report))
}

fn main() -> StackhistResult<ExitCode> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Plot(args) => plot(args),
        Commands::Preset { channel } => {
            println!("{}", channel.config()?.to_json()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dump { store, key } => {
            let histogram = HistogramStore::load(&store)?.read(&key)?;
            print!("{}", format_bin_dump(&histogram));
            Ok(ExitCode::SUCCESS)
        }
    }
}
