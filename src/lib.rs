//! Red-light stop-line witness
//!
//! This crate turns traffic-camera video into tamper-evident red-light
//! violation evidence.
//!
//! # Architecture
//!
//! Frames are decoded on a reader thread into a bounded queue. A single
//! consumer loop owns all per-vehicle state:
//!
//! 1. **Perception**: pluggable vehicle, light and plate adapters, each behind
//!    one error boundary that turns failures into fallback observations.
//! 2. **Light stabilizer**: debounces per-frame light readings.
//! 3. **Track manager**: nearest-center association into monotonic track ids.
//! 4. **Violation evaluator**: ROI membership + stop-line crossing under red.
//! 5. **Plate arbiter**: confidence-weighted voting over OCR reads.
//! 6. **Evidence**: crop/context images and a hash-chained, signed ledger.
//! 7. **Frame sink**: annotated frames to a callback and an output video.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (`stub://` synthetic, FFmpeg files) and the reader thread
//! - `detect`: adapter traits, result types, the guard, and built-in backends
//! - `pipeline`: stabilizer, tracker, evaluator, arbiter, OCR pool, and the run loop
//! - `evidence`: evidence writer and ledger stores
//! - `output`: overlays, frame sink, output video
//! - `verify`: offline ledger verification

pub mod cancel;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod seal;
pub mod verify;
pub mod zones;

pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use detect::{
    AdapterGuard, BBox, Detection, LightClassifier, LightState, PlateRead, PlateReader,
    PlateRequest, VehicleDetector,
};
pub use evidence::{LedgerEntry, ViolationRecord};
pub use frame::{Frame, FrameMessage};
pub use ingest::{FileSource, VideoInfo};
pub use pipeline::{
    Direction, LightStabilizer, Pipeline, PlateArbiter, RunSummary, Track, TrackId, TrackManager,
    TravelDirection, ViolationEvaluator,
};
pub use seal::{hash_entry, sign_entry, signing_key_from_seed, verify_entry_signature};
pub use zones::{ZoneConfig, ZoneStore};
