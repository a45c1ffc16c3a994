//! Evidence persistence for a track's first violation.
//!
//! Writes the vehicle crop and an annotated context image under
//! `<violations_dir>/<video_stem>/`, then appends a sealed entry to the
//! shared ledger. The ledger lock is held for the whole read-modify-write.

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::ledger::SharedLedger;
use super::{LedgerEntry, UnsealedEntry, ViolationRecord, SAVED_AT_FORMAT, TIMESTAMP_FORMAT};
use crate::detect::BBox;
use crate::output::Overlay;
use crate::pipeline::TrackId;
use crate::seal::sha256_hex;

/// Everything known about a violation at the moment it fires.
pub struct ViolationEvent<'a> {
    pub frame: &'a RgbImage,
    pub track_id: TrackId,
    pub bbox: BBox,
    pub vehicle_type: &'a str,
    pub license_plate: &'a str,
    pub region: Option<String>,
}

#[derive(Clone)]
pub struct EvidenceWriter {
    violations_dir: PathBuf,
    video: String,
    video_stem: String,
    image_ext: String,
    signing_key: SigningKey,
    overlay: Overlay,
    ledger: SharedLedger,
}

impl EvidenceWriter {
    pub fn new(
        violations_dir: PathBuf,
        video: &str,
        image_ext: &str,
        signing_key: SigningKey,
        overlay: Overlay,
        ledger: SharedLedger,
    ) -> Self {
        Self {
            violations_dir,
            video: crate::ingest::video_key(video),
            video_stem: crate::ingest::video_stem(video),
            image_ext: image_ext.to_string(),
            signing_key,
            overlay,
            ledger,
        }
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.violations_dir.join(&self.video_stem)
    }

    /// Saves both images and appends the ledger entry.
    ///
    /// No ledger entry is written if either image cannot be saved.
    pub fn write(&self, event: &ViolationEvent<'_>) -> Result<LedgerEntry> {
        let now = chrono::Local::now();
        let dir = self.evidence_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let stamp = now.format("%H%M%S");
        let crop_path = dir.join(format!("{}_{}_crop.{}", event.track_id, stamp, self.image_ext));
        let context_path = dir.join(format!(
            "{}_{}_context.{}",
            event.track_id, stamp, self.image_ext
        ));

        let crop = crop_image(event.frame, event.bbox)?;
        let mut context = event.frame.clone();
        self.overlay.draw_violation(&mut context, event.bbox);

        let crop_sha256 = save_image(&crop, &crop_path)?;
        let context_sha256 = save_image(&context, &context_path)?;

        let record = ViolationRecord {
            video: self.video.clone(),
            track_id: event.track_id,
            vehicle_type: event.vehicle_type.to_string(),
            license_plate: event.license_plate.to_string(),
            region: event.region.clone(),
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            crop_image: crop_path.display().to_string(),
            context_image: context_path.display().to_string(),
        };
        let unsealed = UnsealedEntry {
            record,
            saved_at: now.format(SAVED_AT_FORMAT).to_string(),
            crop_sha256,
            context_sha256,
        };

        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| anyhow!("ledger lock poisoned"))?;
        ledger.append(unsealed, &self.signing_key)
    }
}

/// Crops `bbox` clamped to the frame.
pub fn crop_image(frame: &RgbImage, bbox: BBox) -> Result<RgbImage> {
    let b = bbox
        .clamp_to(frame.width(), frame.height())
        .ok_or_else(|| anyhow!("bbox {:?} lies outside the frame", bbox))?;
    Ok(image::imageops::crop_imm(
        frame,
        b.x1 as u32,
        b.y1 as u32,
        b.width() as u32,
        b.height() as u32,
    )
    .to_image())
}

/// Encodes `image` by the path's extension, writes it, and returns the
/// SHA-256 of the written bytes.
fn save_image(image: &RgbImage, path: &Path) -> Result<String> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unsupported image type {}", path.display()))?;
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .with_context(|| format!("encode {}", path.display()))?;
    let bytes = bytes.into_inner();
    fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::ledger::{open_ledger, InMemoryLedger, LedgerBackend};
    use crate::seal::signing_key_from_seed;
    use crate::verify::verify_ledger;
    use image::Rgb;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::tempdir;

    fn writer(dir: &Path, ledger: SharedLedger) -> EvidenceWriter {
        writer_for(dir, "/clips/junction.mp4", ledger)
    }

    fn writer_for(dir: &Path, video: &str, ledger: SharedLedger) -> EvidenceWriter {
        EvidenceWriter::new(
            dir.to_path_buf(),
            video,
            "png",
            signing_key_from_seed("devkey:test").unwrap(),
            Overlay::default(),
            ledger,
        )
    }

    #[test]
    fn writes_images_and_sealed_entry() {
        let dir = tempdir().unwrap();
        let ledger: SharedLedger = Arc::new(Mutex::new(Box::new(InMemoryLedger::default())));
        let writer = writer(dir.path(), Arc::clone(&ledger));

        let frame = RgbImage::from_pixel(100, 80, Rgb([10, 20, 30]));
        let entry = writer
            .write(&ViolationEvent {
                frame: &frame,
                track_id: 7,
                bbox: BBox::new(20, 10, 60, 90),
                vehicle_type: "car",
                license_plate: "30A12345",
                region: Some("30".to_string()),
            })
            .unwrap();

        assert_eq!(entry.record.video, "junction.mp4");
        assert_eq!(entry.record.track_id, 7);
        let crop_path = PathBuf::from(&entry.record.crop_image);
        assert!(crop_path.starts_with(dir.path().join("junction")));
        assert!(crop_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_crop.png"));

        let crop = image::open(&crop_path).unwrap().to_rgb8();
        assert_eq!(crop.dimensions(), (40, 70));
        let bytes = fs::read(&entry.record.context_image).unwrap();
        assert_eq!(sha256_hex(&bytes), entry.context_sha256);

        let context = image::open(&entry.record.context_image).unwrap().to_rgb8();
        assert_eq!(*context.get_pixel(20, 40), Rgb([255, 0, 0]));

        assert_eq!(ledger.lock().unwrap().entries().unwrap().len(), 1);
    }

    #[test]
    fn out_of_frame_bbox_writes_nothing() {
        let dir = tempdir().unwrap();
        let ledger: SharedLedger = Arc::new(Mutex::new(Box::new(InMemoryLedger::default())));
        let writer = writer(dir.path(), Arc::clone(&ledger));

        let frame = RgbImage::new(50, 50);
        let result = writer.write(&ViolationEvent {
            frame: &frame,
            track_id: 1,
            bbox: BBox::new(60, 60, 80, 80),
            vehicle_type: "car",
            license_plate: "unknown",
            region: None,
        });
        assert!(result.is_err());
        assert!(ledger.lock().unwrap().entries().unwrap().is_empty());
    }

    #[test]
    fn writers_for_two_videos_share_the_ledger_file() {
        let dir = tempdir().unwrap();
        let videos = ["/clips/north.mp4", "/clips/south.mp4"];
        let handles: Vec<_> = videos
            .iter()
            .map(|video| {
                // Each writer opens the ledger itself, as a separate run would.
                let ledger = open_ledger(LedgerBackend::Json, dir.path()).unwrap();
                let writer = writer_for(dir.path(), video, ledger);
                thread::spawn(move || {
                    let frame = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));
                    for track_id in 1..=40 {
                        writer
                            .write(&ViolationEvent {
                                frame: &frame,
                                track_id,
                                bbox: BBox::new(4, 4, 20, 20),
                                vehicle_type: "car",
                                license_plate: "unknown",
                                region: None,
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let key = signing_key_from_seed("devkey:test").unwrap().verifying_key();
        let report = verify_ledger(&dir.path().join("violations.json"), &key, true).unwrap();
        assert_eq!(report.entries, 80);
        assert_eq!(report.violations_by_video["north.mp4"], 40);
        assert_eq!(report.violations_by_video["south.mp4"], 40);
    }
}
