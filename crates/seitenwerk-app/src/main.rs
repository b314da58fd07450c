// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seitenwerk — page-processing scheduler for scanned document projects
//
// Entry point. Initialises logging, loads the project from a directory of
// page images and runs it through the pipeline in batch mode.

mod project;
mod report;
mod stages;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::PageId;
use seitenwerk_pipeline::Controller;
use tracing::{error, info, warn};

use report::BatchReport;
use stages::{STAGE_NAMES, StageOptions};

#[derive(Parser, Debug)]
#[command(name = "seitenwerk")]
#[command(about = "Run a directory of scanned pages through the page pipeline", long_about = None)]
struct Args {
    /// Directory holding the page images
    input: PathBuf,

    /// Directory processed pages are written to
    output: PathBuf,

    /// Scheduler configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads, overriding the config file (0: one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Last stage to run (default: output)
    #[arg(long)]
    stage: Option<String>,

    /// Treat every image as a two-page spread
    #[arg(long)]
    spreads: bool,

    /// Clockwise rotation for every page (0, 90, 180 or 270)
    #[arg(long, default_value = "0")]
    rotate: u16,

    /// Deskew angle in degrees
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    deskew: f32,

    /// White margin around the detected content, in pixels
    #[arg(long, default_value = "20")]
    margin: u32,
}

/// What one run produced.
#[derive(Debug)]
struct RunSummary {
    report: BatchReport,
    /// Pages whose results are not up to date after the run.
    outdated: Vec<PageId>,
}

fn build_controller(args: &Args) -> Result<Controller<BatchReport>> {
    let mut config = project::load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }

    std::fs::create_dir_all(&args.output)?;
    let options = StageOptions {
        rotation: args.rotate,
        deskew_degrees: args.deskew,
        margin: args.margin,
        ..StageOptions::new(&args.output)
    };
    let registry = stages::registry(&options)?;

    match &args.stage {
        Some(name) => {
            config.terminal_stage = registry.find(name).ok_or_else(|| {
                SeitenwerkError::Config(format!(
                    "unknown stage {name:?}, expected one of: {}",
                    STAGE_NAMES.join(", ")
                ))
            })?;
        }
        // Without a config file the whole pipeline runs.
        None if args.config.is_none() => config.terminal_stage = registry.len() - 1,
        None => {}
    }

    let pages = project::scan_pages(&args.input, args.spreads)?;
    Controller::new(registry, pages, &config, BatchReport::default())
}

async fn run(args: &Args) -> Result<RunSummary> {
    let mut controller = build_controller(args)?;

    let queued = controller.start_batch()?;
    info!(queued, terminal_stage = controller.terminal_stage(), "processing pages");
    controller.run_batch().await;
    // Nobody is looking at the selection the finished batch reloads.
    controller.shutdown();

    let terminal = controller.terminal_stage();
    let mut outdated = Vec::new();
    for page in controller.pages().iter() {
        let probe = controller.probe_page(page, terminal)?;
        if let Some(stage) = probe.first_invalid() {
            warn!(page = %page, stage = STAGE_NAMES[stage], "page not up to date");
            outdated.push(page.clone());
        }
    }

    let report = std::mem::take(controller.sink_mut());
    Ok(RunSummary { report, outdated })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Seitenwerk starting");

    match run(&args).await {
        Ok(summary) => {
            info!(
                written = summary.report.written.len(),
                completed = summary.report.completed.len(),
                failed = summary.report.failed.len(),
                outdated = summary.outdated.len(),
                "run complete"
            );
            if !summary.report.failed.is_empty() {
                process::exit(1);
            }
        }
        Err(e) => {
            error!(error = %e, "run aborted");
            process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::path::Path;

    fn write_page(dir: &Path, name: &str) {
        let mut img = GrayImage::from_pixel(40, 40, Luma([255u8]));
        for y in 8..20 {
            for x in 8..30 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        img.save(dir.join(name)).expect("write page");
    }

    fn args(input: &Path, output: &Path) -> Args {
        Args {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            config: None,
            workers: Some(2),
            stage: None,
            spreads: false,
            rotate: 0,
            deskew: 0.0,
            margin: 2,
        }
    }

    fn project() -> (tempfile::TempDir, tempfile::TempDir) {
        let input = tempfile::tempdir().expect("input dir");
        let output = tempfile::tempdir().expect("output dir");
        for name in ["p1.png", "p2.png", "p3.png"] {
            write_page(input.path(), name);
        }
        std::fs::write(input.path().join("p0-broken.png"), b"garbage").expect("write");
        (input, output)
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "seitenwerk", "in", "out", "--stage", "deskew", "--deskew", "-1.5", "--spreads",
        ])
        .expect("parse");
        assert_eq!(args.stage.as_deref(), Some("deskew"));
        assert_eq!(args.deskew, -1.5);
        assert!(args.spreads);
        assert_eq!(args.margin, 20);
    }

    #[tokio::test]
    async fn full_run_writes_every_readable_page() {
        let (input, output) = project();

        let summary = run(&args(input.path(), output.path())).await.expect("run");

        let mut written = summary.report.written.clone();
        written.sort();
        assert_eq!(
            written,
            ["p1.png", "p2.png", "p3.png"].map(|n| output.path().join(n))
        );
        assert!(written.iter().all(|p| p.exists()));

        assert_eq!(summary.report.failed.len(), 1);
        assert_eq!(summary.report.failed[0].stage, 0);
        assert!(summary.report.batch_finished);
        assert_eq!(
            summary.outdated,
            [PageId::single(input.path().join("p0-broken.png"))]
        );
    }

    #[tokio::test]
    async fn stage_option_stops_early() {
        let (input, output) = project();
        let mut args = args(input.path(), output.path());
        args.stage = Some("select-content".to_string());

        let summary = run(&args).await.expect("run");

        assert_eq!(summary.report.completed.len(), 3);
        assert!(summary.report.written.is_empty());
        assert_eq!(summary.outdated.len(), 1);
        assert!(!output.path().join("p1.png").exists());
    }

    #[tokio::test]
    async fn unknown_stage_is_a_config_error() {
        let (input, output) = project();
        let mut args = args(input.path(), output.path());
        args.stage = Some("sharpen".to_string());

        assert!(matches!(run(&args).await, Err(SeitenwerkError::Config(_))));
    }

    #[tokio::test]
    async fn spreads_produce_two_outputs_per_image() {
        let input = tempfile::tempdir().expect("input dir");
        let output = tempfile::tempdir().expect("output dir");
        write_page(input.path(), "spread.png");
        let mut args = args(input.path(), output.path());
        args.spreads = true;

        let summary = run(&args).await.expect("run");

        let mut written = summary.report.written.clone();
        written.sort();
        assert_eq!(
            written,
            [
                output.path().join("spread_left.png"),
                output.path().join("spread_right.png"),
            ]
        );
        assert!(summary.outdated.is_empty());
    }
}
