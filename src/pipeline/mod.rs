//! Per-video violation pipeline.
//!
//! `Pipeline::run` drives one video end to end: the reader thread fills a
//! bounded frame queue and the calling thread consumes it, owning every
//! track, the light stabilizer and the violation flags. Plate reads go to a
//! worker pool; evidence is written synchronously when a track first
//! violates.

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use image::RgbImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub mod light;
pub mod ocr;
pub mod plate;
pub mod tracker;
pub mod violation;

pub use light::LightStabilizer;
pub use ocr::OcrPool;
pub use plate::{display_plate, normalize_plate, PlateArbiter};
pub use tracker::{classify_direction, Direction, PlateVote, Track, TrackId, TrackManager};
pub use violation::{tolerance_px, TravelDirection, ViolationEvaluator};

pub use crate::evidence::SharedLedger;

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::detect::{
    AdapterGuard, LightClassifier, LightState, PlateReader, PlateRequest, VehicleDetector,
};
use crate::evidence::{open_ledger, EvidenceWriter, ViolationEvent};
use crate::frame::{Frame, FrameMessage};
use crate::ingest::{spawn_reader, video_key, video_stem};
use crate::output::{FrameSink, Overlay, TrackLabel, VideoWriter};
use crate::seal::signing_key_from_seed;
use crate::zones::{ZoneConfig, ZoneStore};

/// Outcome of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Frames taken off the queue, skipped ones included. `frame_skip`
    /// counts against this, not the decoder's frame index.
    pub total_frames: u64,
    pub processed_frames: u64,
    /// Frames the reader dropped because the queue stayed full.
    pub dropped_frames: u64,
    /// Track ids in the order their violations fired.
    pub violations: Vec<TrackId>,
    pub tracks: usize,
    pub output_path: Option<PathBuf>,
    pub cancelled: bool,
}

pub struct Pipeline {
    config: PipelineConfig,
    vehicles: Box<dyn VehicleDetector>,
    light: Box<dyn LightClassifier>,
    plates: Arc<dyn PlateReader>,
    arbiter: PlateArbiter,
    signing_key: SigningKey,
    ledger: Option<SharedLedger>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        vehicles: Box<dyn VehicleDetector>,
        light: Box<dyn LightClassifier>,
        plates: Arc<dyn PlateReader>,
    ) -> Result<Self> {
        let arbiter = PlateArbiter::new(&config.plate_format)?;
        let signing_key =
            signing_key_from_seed(&config.device_key_seed).context("derive device signing key")?;
        Ok(Self {
            config,
            vehicles,
            light,
            plates,
            arbiter,
            signing_key,
            ledger: None,
        })
    }

    /// Uses `ledger` instead of opening the configured one. Pipelines that
    /// open the same configured ledger already share one handle.
    pub fn with_ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Processes `video` until end of stream or cancellation.
    ///
    /// `on_frame` receives every processed, annotated frame. Only a video
    /// that cannot be opened is an error; adapter, callback and persistence
    /// failures are logged and the run continues.
    pub fn run(
        &mut self,
        video: &str,
        cancel: &CancelToken,
        on_frame: impl FnMut(&RgbImage),
    ) -> Result<RunSummary> {
        let cfg = &self.config;
        let mut reader = spawn_reader(
            video,
            cfg.queue_capacity,
            cfg.queue_timeout,
            cancel.clone(),
        )?;
        let info = reader.info.clone();
        log::info!(
            "run start: {} ({}x{} @ {:.2} fps, travel {}, ledger {})",
            video,
            info.width,
            info.height,
            info.fps,
            cfg.camera_direction,
            cfg.ledger_backend
        );

        let zones = ZoneStore::new(&cfg.zones_path).load_or_create(
            &video_key(video),
            info.width,
            info.height,
        );

        let overlay = Overlay::load(cfg.font_path.as_deref()).unwrap_or_else(|e| {
            log::warn!("overlay text disabled: {:#}", e);
            Overlay::default()
        });

        let violations_dir = cfg.violations_dir();
        let ledger = match self.ledger.clone() {
            Some(ledger) => Some(ledger),
            None => match open_ledger(cfg.ledger_backend, &violations_dir) {
                Ok(ledger) => Some(ledger),
                Err(e) => {
                    log::error!("evidence disabled, ledger unavailable: {:#}", e);
                    None
                }
            },
        };
        let evidence = ledger.map(|ledger| {
            EvidenceWriter::new(
                violations_dir.clone(),
                video,
                &cfg.image_ext,
                self.signing_key.clone(),
                overlay.clone(),
                ledger,
            )
        });

        let mut sink = FrameSink::new().with_callback(on_frame);
        if cfg.save_video {
            let target = VideoWriter::target_path(&violations_dir, &video_stem(video));
            match VideoWriter::create(target, info.fps) {
                Ok(writer) => sink = sink.with_video(writer),
                Err(e) => log::error!("output video disabled: {:#}", e),
            }
        }

        let vehicle_guard = AdapterGuard::new(format!("vehicle:{}", self.vehicles.name()));
        let light_guard = AdapterGuard::new(format!("light:{}", self.light.name()));
        let vehicles = &mut self.vehicles;
        vehicle_guard.call(|| (), || vehicles.warm_up());

        let mut state = RunState {
            config: cfg,
            cancel,
            arbiter: &self.arbiter,
            zones,
            tracker: TrackManager::new(cfg.track_distance_px),
            stabilizer: LightStabilizer::new(cfg.light_debounce),
            evaluator: ViolationEvaluator::new(cfg.camera_direction),
            ocr: OcrPool::new(Arc::clone(&self.plates), cfg.ocr_workers, cfg.ocr_timeout),
            evidence,
            overlay,
            sink,
            vehicle_guard,
            light_guard,
            summary: RunSummary::default(),
        };

        let frame_skip = u64::from(cfg.frame_skip.max(1));
        loop {
            if cancel.is_cancelled() {
                state.summary.cancelled = true;
                break;
            }
            let frame = match reader.frames.recv_timeout(cfg.queue_timeout) {
                Ok(FrameMessage::Frame(frame)) => frame,
                Ok(FrameMessage::End) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            };
            state.summary.total_frames += 1;
            if state.summary.total_frames % frame_skip != 0 {
                continue;
            }
            state.process(&frame, self.vehicles.as_mut(), self.light.as_mut());
        }

        // Reader and OCR workers share one stop deadline.
        let stop_deadline = Instant::now() + cfg.queue_timeout;
        let RunState {
            mut summary,
            tracker,
            sink,
            mut ocr,
            ..
        } = state;
        ocr.close();
        reader.join();
        ocr.join_until(stop_deadline);
        summary.dropped_frames = reader.stats.frames_dropped();
        summary.tracks = tracker.len();
        summary.output_path = sink.finish();

        log::info!(
            "run finish: {} frames ({} processed, {} dropped), {} tracks, {} violations{}",
            summary.total_frames,
            summary.processed_frames,
            summary.dropped_frames,
            summary.tracks,
            summary.violations.len(),
            if summary.cancelled { ", cancelled" } else { "" }
        );
        Ok(summary)
    }
}

/// Everything the consumer loop mutates during one run.
struct RunState<'r> {
    config: &'r PipelineConfig,
    cancel: &'r CancelToken,
    arbiter: &'r PlateArbiter,
    zones: ZoneConfig,
    tracker: TrackManager,
    stabilizer: LightStabilizer,
    evaluator: ViolationEvaluator,
    ocr: OcrPool,
    evidence: Option<EvidenceWriter>,
    overlay: Overlay,
    sink: FrameSink<'r>,
    vehicle_guard: AdapterGuard,
    light_guard: AdapterGuard,
    summary: RunSummary,
}

impl RunState<'_> {
    fn process(
        &mut self,
        frame: &Frame,
        vehicles: &mut dyn VehicleDetector,
        light: &mut dyn LightClassifier,
    ) {
        self.summary.processed_frames += 1;

        let raw = self
            .light_guard
            .call(|| LightState::Unknown, || light.classify(frame));
        let light_state = self.stabilizer.update(raw);

        let detections = self.vehicle_guard.call(Vec::new, || vehicles.detect(frame));
        let live = self.tracker.update_frame(&detections, frame.index);

        self.read_plates(frame, &live);

        let mut fired = Vec::new();
        for &id in &live {
            let Some(track) = self.tracker.get_mut(id) else {
                continue;
            };
            if track.direction == Direction::Side {
                continue;
            }
            if self.evaluator.evaluate(track, light_state, &self.zones) {
                fired.push(id);
            }
        }
        for id in fired {
            self.record_violation(frame, id);
        }

        let labels: Vec<TrackLabel> = live
            .iter()
            .filter_map(|&id| self.tracker.get(id))
            .map(|track| TrackLabel {
                bbox: track.bbox,
                text: format!(
                    "{} | {}",
                    track.label,
                    display_plate(&self.arbiter.resolve(&track.plate_votes))
                ),
                violated: track.violated,
            })
            .collect();
        let mut annotated = frame.image.as_ref().clone();
        self.overlay
            .draw_frame(&mut annotated, &self.zones, &labels, light_state);
        self.sink.deliver(&annotated);
    }

    /// One read per live, non-side track. Failed reads are not votes.
    fn read_plates(&mut self, frame: &Frame, live: &[TrackId]) {
        let (width, height) = (frame.width(), frame.height());
        let requests: Vec<PlateRequest> = live
            .iter()
            .filter_map(|&id| {
                let track = self.tracker.get(id)?;
                if track.direction == Direction::Side {
                    return None;
                }
                let b = track.bbox.clamp_to(width, height)?;
                let crop = image::imageops::crop_imm(
                    frame.image.as_ref(),
                    b.x1 as u32,
                    b.y1 as u32,
                    b.width() as u32,
                    b.height() as u32,
                )
                .to_image();
                Some(PlateRequest {
                    frame_index: frame.index,
                    track_id: id,
                    crop,
                })
            })
            .collect();
        if requests.is_empty() {
            return;
        }

        for (id, read) in self.ocr.read_all(requests, self.cancel) {
            if read.is_unknown() || read.text.trim().is_empty() {
                continue;
            }
            self.tracker.add_vote(
                id,
                PlateVote {
                    text: read.text,
                    confidence: read.confidence,
                },
                self.config.max_plate_votes,
            );
        }
    }

    fn record_violation(&mut self, frame: &Frame, id: TrackId) {
        let Some(track) = self.tracker.get(id) else {
            return;
        };
        let plate = self.arbiter.resolve(&track.plate_votes);
        let region = self.arbiter.region(&plate);
        log::warn!(
            "red-light violation: track {} ({}) plate {} at frame {}",
            id,
            track.label,
            plate,
            frame.index
        );
        self.summary.violations.push(id);

        let Some(evidence) = &self.evidence else {
            return;
        };
        let event = ViolationEvent {
            frame: frame.image.as_ref(),
            track_id: id,
            bbox: track.bbox,
            vehicle_type: &track.label,
            license_plate: &plate,
            region,
        };
        match evidence.write(&event) {
            Ok(entry) => log::info!(
                "evidence saved for track {}: {} (entry {})",
                id,
                entry.record.context_image,
                entry.entry_hash
            ),
            Err(e) => log::error!("failed to persist evidence for track {}: {:#}", id, e),
        }
    }
}
