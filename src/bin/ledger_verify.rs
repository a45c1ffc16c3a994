//! ledger_verify - external verifier for the violation ledger
//!
//! Checks that the ledger is hash-chained and that every entry is signed by
//! the device key. With `--check-images` the evidence images on disk must
//! still match their recorded digests.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use redlight_witness::signing_key_from_seed;
use redlight_witness::verify::{self, parse_public_key_hex};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "ledger_verify",
    about = "Verify violation ledger integrity (hash-chain + signatures)"
)]
struct Args {
    /// Ledger file (violations.json or violations.db)
    #[arg(long, default_value = "output/violations/violations.json")]
    ledger: PathBuf,

    /// Device public key (hex-encoded Ed25519 verifying key)
    #[arg(long, value_name = "HEX", conflicts_with = "seed")]
    public_key: Option<String>,

    /// Device key seed, when the verifier is trusted with it
    #[arg(long, env = "REDLIGHT_DEVICE_KEY_SEED", hide_env_values = true)]
    seed: Option<String>,

    /// Also check crop/context image digests
    #[arg(long)]
    check_images: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let verifying_key = {
        let _stage = ui.stage("Load verifying key");
        match (&args.public_key, &args.seed) {
            (Some(hex), _) => parse_public_key_hex(hex)?,
            (None, Some(seed)) => signing_key_from_seed(seed)?.verifying_key(),
            (None, None) => {
                return Err(anyhow!(
                    "provide --public-key or --seed (or REDLIGHT_DEVICE_KEY_SEED)"
                ))
            }
        }
    };

    println!("ledger_verify: checking {}", args.ledger.display());
    println!();

    let report = {
        let _stage = ui.stage("Verify ledger");
        verify::verify_ledger(&args.ledger, &verifying_key, args.check_images)?
    };

    println!("verified {} ledger entries", report.entries);
    if args.verbose {
        for (video, count) in &report.violations_by_video {
            println!("  {}: {} violations", video, count);
        }
    }
    if args.check_images {
        println!("verified {} evidence images", report.images_checked);
    }
    match &report.head {
        Some(head) => println!("chain head: {}", head),
        None => println!("chain head: genesis (empty ledger)"),
    }
    println!();
    println!("OK: ledger integrity verified");
    Ok(())
}
