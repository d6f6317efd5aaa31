//! sldc-bench: CLI tool for timing SLDC workflows.
//!
//! Runs a binary SLDC workflow (threshold segmentation, one catch-all
//! classifier) on an image file or on a synthetic disc, and prints the
//! number of detected objects together with the hierarchical timing
//! report. Useful for:
//!
//! - Measuring how tile size and worker count affect throughput
//! - Checking that objects spanning many tiles are merged back
//! - Comparing border tile policies
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin sldc-bench -- [OPTIONS] [IMAGE_PATH]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::f64::consts::PI;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use geo::{Area, Polygon};
use image::{DynamicImage, GrayImage, Luma};
use sldc::{
    BorderTiles, Label, PolygonClassifier, SldcWorkflow, ThresholdSegmenter, View, Workflow,
    WorkflowConfig, WorkflowError, WorkflowInformation, WorkflowTiming,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Tiled workflow timing and diagnostics for sldc.
///
/// Without an image path, a white disc on a black background is rendered
/// in memory and the area of the detected object is compared with the
/// area of the disc.
#[derive(Parser)]
#[command(name = "sldc-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: Option<PathBuf>,

    /// Side of the synthetic square image.
    #[arg(long, default_value_t = 4096)]
    size: u32,

    /// Radius of the synthetic disc.
    #[arg(long, default_value_t = 1500)]
    radius: u32,

    /// Maximum tile width and height.
    #[arg(long, default_value_t = WorkflowConfig::DEFAULT_TILE_WIDTH)]
    tile_size: u32,

    /// Pixels shared by adjacent tiles.
    #[arg(long, default_value_t = WorkflowConfig::DEFAULT_OVERLAP)]
    overlap: u32,

    /// Merge distance tolerance in pixels.
    #[arg(long, default_value_t = WorkflowConfig::DEFAULT_DISTANCE_TOLERANCE)]
    distance_tolerance: f64,

    /// Number of workers.
    #[arg(long, default_value_t = WorkflowConfig::DEFAULT_N_JOBS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    n_jobs: usize,

    /// Tiles per segmentation call.
    #[arg(long, default_value_t = WorkflowConfig::DEFAULT_SEG_BATCH_SIZE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    seg_batch_size: usize,

    /// Undersized border tile policy.
    #[arg(long, value_enum, default_value_t = Border::Keep)]
    border_tiles: Border,

    /// Also dispatch and classify on the workers.
    #[arg(long)]
    parallel_dispatch_classify: bool,

    /// Luminance threshold of the foreground.
    #[arg(long, default_value_t = 128)]
    threshold: u8,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output results as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full workflow config as a JSON string.
    ///
    /// When provided, all other workflow parameter flags are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Log workflow progress (repeat for more detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Border tile policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Border {
    /// Keep undersized tiles as they are.
    Keep,
    /// Drop undersized tiles.
    Skip,
    /// Shift undersized tiles back to full size.
    Extend,
}

/// Build a [`WorkflowConfig`] from CLI arguments.
fn config_from_cli(cli: &Cli) -> Result<WorkflowConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(WorkflowConfig {
        tile_width: cli.tile_size,
        tile_height: cli.tile_size,
        overlap: cli.overlap,
        distance_tolerance: cli.distance_tolerance,
        n_jobs: cli.n_jobs,
        seg_batch_size: cli.seg_batch_size,
        border_tiles: match cli.border_tiles {
            Border::Keep => BorderTiles::Keep,
            Border::Skip => BorderTiles::Skip,
            Border::Extend => BorderTiles::Extend,
        },
        parallel_dispatch_classify: cli.parallel_dispatch_classify,
        ..WorkflowConfig::default()
    })
}

/// Labels every polygon as foreground with full confidence.
struct Foreground;

impl PolygonClassifier for Foreground {
    fn predict_batch(
        &self,
        _image: &View,
        polygons: &[&Polygon<f64>],
    ) -> Result<(Vec<Label>, Vec<f64>), WorkflowError> {
        Ok((vec![1; polygons.len()], vec![1.0; polygons.len()]))
    }
}

/// White disc of `radius` pixels centred in a black `size` x `size` image.
fn render_disc(size: u32, radius: u32) -> DynamicImage {
    let centre = i64::from(size / 2);
    let r2 = i64::from(radius).pow(2);
    DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
        let dx = i64::from(x) - centre;
        let dy = i64::from(y) - centre;
        Luma([if dx * dx + dy * dy <= r2 { 255 } else { 0 }])
    }))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let (pixels, expected_area) = match cli.image_path {
        Some(ref path) => match image::open(path) {
            Ok(pixels) => {
                eprintln!("Image: {} ({}x{})", path.display(), pixels.width(), pixels.height());
                (pixels, None)
            }
            Err(e) => {
                eprintln!("Error reading {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => {
            eprintln!("Image: synthetic disc r={} in {}x{}", cli.radius, cli.size, cli.size);
            let radius = f64::from(cli.radius);
            (render_disc(cli.size, cli.radius), Some(PI * radius * radius))
        }
    };
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let workflow = match SldcWorkflow::builder()
        .config(config)
        .segmenter(ThresholdSegmenter::new(cli.threshold))
        .add_catchall_classifier(Foreground)
        .build()
    {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("Invalid workflow: {e}");
            return ExitCode::FAILURE;
        }
    };
    let view = View::from(pixels);

    let mut timings = Vec::with_capacity(cli.runs);
    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let info = match workflow.process(&view) {
            Ok(info) => info,
            Err(e) => {
                eprintln!("Workflow error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&info) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing results: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            print_summary(&info, expected_area);
            println!("{}", info.timing().report());
        }
        timings.push(info.timing().clone());
    }

    if cli.runs > 1 && !cli.json {
        print_multi_run_summary(&timings);
    }

    ExitCode::SUCCESS
}

/// Object count and, for the synthetic disc, the area error.
fn print_summary(info: &WorkflowInformation, expected_area: Option<f64>) {
    println!("Objects: {}", info.len());
    let detected: f64 = info.polygons().iter().map(Area::unsigned_area).sum();
    println!("Detected area: {detected:.1} px");
    if let Some(expected) = expected_area {
        let error = (detected - expected).abs() / expected * 100.0;
        println!("Disc area: {expected:.1} px (error {error:.3}%)");
    }
    println!();
}

/// Print per-phase statistics aggregated over every run.
fn print_multi_run_summary(timings: &[WorkflowTiming]) {
    println!();
    println!("Summary ({} runs)\n{}", timings.len(), "=".repeat(60));

    let total = WorkflowTiming::merge_all(None, timings);
    println!("{:<48} {:>12} {:>12}", "Phase", "Mean (ms)", "Max (ms)");
    println!("{}", "-".repeat(74));
    for (phase, stats) in total.stats() {
        println!(
            "{phase:<48} {:>10.3}ms {:>10.3}ms",
            stats.mean.as_secs_f64() * 1000.0,
            stats.max.as_secs_f64() * 1000.0,
        );
    }
}
