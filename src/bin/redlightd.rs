//! redlightd - process one traffic-camera video into red-light violation
//! evidence.
//!
//! Frames are analyzed with the selected perception backends; every first
//! violation of a tracked vehicle produces a crop, a context image and a
//! signed ledger entry under `<output_dir>/violations/`.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use redlight_witness::config::DEFAULT_DEVICE_KEY_SEED;
use redlight_witness::detect::{light_from_spec, plates_from_spec, vehicles_from_spec};
use redlight_witness::{CancelToken, Pipeline, PipelineConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "redlightd",
    about = "Detect red-light stop-line violations in a video and record signed evidence"
)]
struct Args {
    /// Video file to analyze (or a stub:// URL)
    #[arg(long)]
    video: String,

    /// Config file (JSON or TOML); defaults to $REDLIGHT_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Vehicle detector backend (none | scripted:<json> | tract:<onnx>)
    #[arg(long, default_value = "none", env = "REDLIGHT_VEHICLES")]
    vehicles: String,

    /// Traffic light backend (hsv | scripted:<json> | fixed:<state>)
    #[arg(long, default_value = "hsv", env = "REDLIGHT_LIGHT")]
    light: String,

    /// Plate reader backend (none | fixed:<TEXT> | scripted:<json> | tract:<onnx>)
    #[arg(long, default_value = "none", env = "REDLIGHT_PLATES")]
    plates: String,

    /// Do not write the annotated output video
    #[arg(long)]
    no_video: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("Load config");
        match &args.config {
            Some(path) => PipelineConfig::load_from(path)?,
            None => PipelineConfig::load()?,
        }
    };
    if args.no_video {
        cfg.save_video = false;
    }
    if cfg.device_key_seed == DEFAULT_DEVICE_KEY_SEED {
        log::warn!(
            "using the built-in device key seed; set REDLIGHT_DEVICE_KEY_SEED for real deployments"
        );
    }

    let mut pipeline = {
        let _stage = ui.stage("Load perception backends");
        Pipeline::new(
            cfg,
            vehicles_from_spec(&args.vehicles)?,
            light_from_spec(&args.light)?,
            plates_from_spec(&args.plates)?,
        )?
    };
    log::info!("device public key: {}", pipeline.public_key_hex());

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received; stopping after the current frame");
            cancel.cancel();
        })
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let progress = ui.frames(None);
    let summary = {
        let _stage = ui.stage("Analyze video");
        pipeline.run(&args.video, &cancel, |_| progress.inc(1))?
    };
    progress.finish_and_clear();

    println!("redlightd: {}", args.video);
    println!(
        "frames: {} total, {} processed, {} dropped",
        summary.total_frames, summary.processed_frames, summary.dropped_frames
    );
    println!("tracks: {}", summary.tracks);
    println!(
        "violations: {} {:?}",
        summary.violations.len(),
        summary.violations
    );
    match &summary.output_path {
        Some(path) => println!("output: {}", path.display()),
        None => println!("output: none"),
    }
    println!(
        "evidence: {}",
        pipeline.config().violations_dir().display()
    );
    if summary.cancelled {
        println!("run cancelled before end of stream");
    }
    Ok(())
}
