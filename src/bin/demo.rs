//! demo - end-to-end synthetic run of the red-light witness
//!
//! Drives the full pipeline over a `stub://` video with scripted perception:
//! - a car crossing the stop line under red (one violation)
//! - a truck moving sideways through the junction (ignored)
//! - a second car crossing after the light turned green (no violation)
//!
//! The resulting ledger is then verified with the device key.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use redlight_witness::detect::backends::{ScriptedLight, ScriptedPlates, ScriptedVehicles};
use redlight_witness::{verify, BBox, CancelToken, Detection, LightState, Pipeline, PipelineConfig};

#[path = "../ui.rs"]
mod ui;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const RED_UNTIL: u64 = 24;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames.
    #[arg(long, default_value_t = 60)]
    frames: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for evidence, ledger and zones.
    #[arg(long, default_value = "demo_out")]
    out: PathBuf,
    /// Also write the annotated output video (needs the ffmpeg CLI).
    #[arg(long)]
    video: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Box of `w` x `h` whose top-left corner is at `(x, y)`.
fn bbox(x: i32, y: i32, w: i32, h: i32) -> BBox {
    BBox::new(x, y, x + w, y + h)
}

fn scripted_vehicles(frames: u64) -> ScriptedVehicles {
    let mut vehicles = ScriptedVehicles::default();
    for index in 1..=frames {
        let mut detections = Vec::new();
        let step = index as i32 - 1;
        if index <= 30 {
            // Northbound car, bottom edge 380 -> 148.
            detections.push(Detection::new("car", bbox(120, 320 - 8 * step, 80, 60), 0.9));
            // Truck crossing left to right.
            detections.push(Detection::new("truck", bbox(260 + 10 * step, 150, 160, 60), 0.8));
        }
        if (26..=55).contains(&index) {
            let step = index as i32 - 26;
            detections.push(Detection::new("car", bbox(420, 320 - 8 * step, 80, 60), 0.9));
        }
        vehicles = vehicles.with_frame(index, detections);
    }
    vehicles
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());
    if args.frames == 0 {
        return Err(anyhow!("--frames must be at least 1"));
    }

    let cfg = PipelineConfig {
        output_dir: args.out.clone(),
        zones_path: args.out.join("video_zones.json"),
        save_video: args.video,
        ..PipelineConfig::default()
    };

    let light = ScriptedLight::new(LightState::Green).with_span(1, RED_UNTIL, LightState::Red);
    let plates = ScriptedPlates::new(Vec::new())
        .with_read(1, "30A-12345", 0.9)
        .with_read(2, "29C99999", 0.7)
        .with_read(3, "51G1234S", 0.8);

    let mut pipeline = Pipeline::new(
        cfg,
        Box::new(scripted_vehicles(args.frames)),
        Box::new(light),
        Arc::new(plates),
    )?;

    let video = format!(
        "stub://demo.mp4?frames={}&width={}&height={}&fps={}",
        args.frames, WIDTH, HEIGHT, args.fps
    );
    let summary = {
        let _stage = ui.stage("Run pipeline");
        pipeline.run(&video, &CancelToken::new(), |_| {})?
    };

    println!("demo: {}", video);
    println!(
        "frames: {} processed, {} dropped; tracks: {}",
        summary.processed_frames, summary.dropped_frames, summary.tracks
    );
    println!("violations: {:?}", summary.violations);
    if let Some(path) = &summary.output_path {
        println!("output video: {}", path.display());
    }

    let ledger = pipeline
        .config()
        .violations_dir()
        .join(pipeline.config().ledger_backend.file_name());
    let public_key = verify::parse_public_key_hex(&pipeline.public_key_hex())?;
    let report = {
        let _stage = ui.stage("Verify ledger");
        verify::verify_ledger(&ledger, &public_key, true)?
    };
    println!(
        "ledger: {} entries verified ({} images) in {}",
        report.entries,
        report.images_checked,
        ledger.display()
    );
    println!("device public key: {}", pipeline.public_key_hex());
    Ok(())
}
