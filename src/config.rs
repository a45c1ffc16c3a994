use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::evidence::ledger::LedgerBackend;
use crate::pipeline::TravelDirection;

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_ZONES_PATH: &str = "config/video_zones.json";
const DEFAULT_FRAME_SKIP: u32 = 1;
const DEFAULT_QUEUE_CAPACITY: usize = 5;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_TRACK_DISTANCE_PX: f32 = 55.0;
const DEFAULT_LIGHT_DEBOUNCE: u32 = 3;
const DEFAULT_OCR_WORKERS: usize = 3;
const DEFAULT_OCR_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_MAX_PLATE_VOTES: usize = 64;
pub const DEFAULT_PLATE_FORMAT: &str = r"^[0-9]{2}[A-Z][A-Z0-9]?[0-9]{4,5}$";
const DEFAULT_IMAGE_EXT: &str = "jpg";
pub const DEFAULT_DEVICE_KEY_SEED: &str = "devkey:redlight-local";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    output_dir: Option<PathBuf>,
    zones_path: Option<PathBuf>,
    camera_direction: Option<String>,
    frame_skip: Option<u32>,
    track_distance_px: Option<f32>,
    light_debounce: Option<u32>,
    queue: Option<QueueConfigFile>,
    ocr: Option<OcrConfigFile>,
    evidence: Option<EvidenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OcrConfigFile {
    workers: Option<usize>,
    timeout_ms: Option<u64>,
    max_votes: Option<usize>,
    plate_format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceConfigFile {
    image_ext: Option<String>,
    save_video: Option<bool>,
    font_path: Option<PathBuf>,
    device_key_seed: Option<String>,
    ledger_backend: Option<String>,
}

/// Runtime settings for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub zones_path: PathBuf,
    pub camera_direction: TravelDirection,
    pub frame_skip: u32,
    pub queue_capacity: usize,
    pub queue_timeout: Duration,
    pub track_distance_px: f32,
    pub light_debounce: u32,
    pub ocr_workers: usize,
    pub ocr_timeout: Duration,
    /// Most recent votes kept per track; older votes are discarded.
    pub max_plate_votes: usize,
    pub plate_format: String,
    pub image_ext: String,
    pub save_video: bool,
    /// TTF/OTF font for overlay text. Without it only shapes are drawn.
    pub font_path: Option<PathBuf>,
    pub device_key_seed: String,
    pub ledger_backend: LedgerBackend,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            zones_path: PathBuf::from(DEFAULT_ZONES_PATH),
            camera_direction: TravelDirection::Up,
            frame_skip: DEFAULT_FRAME_SKIP,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_timeout: Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS),
            track_distance_px: DEFAULT_TRACK_DISTANCE_PX,
            light_debounce: DEFAULT_LIGHT_DEBOUNCE,
            ocr_workers: DEFAULT_OCR_WORKERS,
            ocr_timeout: Duration::from_millis(DEFAULT_OCR_TIMEOUT_MS),
            max_plate_votes: DEFAULT_MAX_PLATE_VOTES,
            plate_format: DEFAULT_PLATE_FORMAT.to_string(),
            image_ext: DEFAULT_IMAGE_EXT.to_string(),
            save_video: true,
            font_path: None,
            device_key_seed: DEFAULT_DEVICE_KEY_SEED.to_string(),
            ledger_backend: LedgerBackend::Json,
        }
    }
}

impl PipelineConfig {
    /// Loads `REDLIGHT_CONFIG` (if set), then `REDLIGHT_*` overrides, then validates.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REDLIGHT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same as [`PipelineConfig::load`] but with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(dir) = file.output_dir {
            cfg.output_dir = dir;
        }
        if let Some(path) = file.zones_path {
            cfg.zones_path = path;
        }
        if let Some(direction) = file.camera_direction.as_deref() {
            cfg.camera_direction = direction.parse()?;
        }
        if let Some(skip) = file.frame_skip {
            cfg.frame_skip = skip;
        }
        if let Some(distance) = file.track_distance_px {
            cfg.track_distance_px = distance;
        }
        if let Some(debounce) = file.light_debounce {
            cfg.light_debounce = debounce;
        }
        if let Some(queue) = file.queue {
            cfg.queue_capacity = queue.capacity.unwrap_or(cfg.queue_capacity);
            if let Some(ms) = queue.timeout_ms {
                cfg.queue_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(ocr) = file.ocr {
            cfg.ocr_workers = ocr.workers.unwrap_or(cfg.ocr_workers);
            if let Some(ms) = ocr.timeout_ms {
                cfg.ocr_timeout = Duration::from_millis(ms);
            }
            cfg.max_plate_votes = ocr.max_votes.unwrap_or(cfg.max_plate_votes);
            if let Some(format) = ocr.plate_format {
                cfg.plate_format = format;
            }
        }
        if let Some(evidence) = file.evidence {
            if let Some(ext) = evidence.image_ext {
                cfg.image_ext = ext;
            }
            cfg.save_video = evidence.save_video.unwrap_or(cfg.save_video);
            cfg.font_path = evidence.font_path;
            if let Some(seed) = evidence.device_key_seed {
                cfg.device_key_seed = seed;
            }
            if let Some(backend) = evidence.ledger_backend.as_deref() {
                cfg.ledger_backend = backend.parse()?;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("REDLIGHT_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("REDLIGHT_ZONES_PATH") {
            if !path.trim().is_empty() {
                self.zones_path = PathBuf::from(path);
            }
        }
        if let Ok(direction) = std::env::var("REDLIGHT_CAMERA_DIRECTION") {
            if !direction.trim().is_empty() {
                self.camera_direction = direction.parse()?;
            }
        }
        if let Ok(workers) = std::env::var("REDLIGHT_OCR_WORKERS") {
            self.ocr_workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("REDLIGHT_OCR_WORKERS must be a positive integer"))?;
        }
        if let Ok(seed) = std::env::var("REDLIGHT_DEVICE_KEY_SEED") {
            if !seed.trim().is_empty() {
                self.device_key_seed = seed;
            }
        }
        if let Ok(backend) = std::env::var("REDLIGHT_LEDGER_BACKEND") {
            if !backend.trim().is_empty() {
                self.ledger_backend = backend.parse()?;
            }
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be >= 1"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be >= 1"));
        }
        if self.queue_timeout.is_zero() {
            return Err(anyhow!("queue timeout must be greater than zero"));
        }
        if !(self.track_distance_px.is_finite() && self.track_distance_px > 0.0) {
            return Err(anyhow!("track_distance_px must be a positive number"));
        }
        if self.light_debounce == 0 {
            return Err(anyhow!("light_debounce must be >= 1"));
        }
        if self.ocr_workers == 0 {
            return Err(anyhow!("ocr workers must be >= 1"));
        }
        if self.ocr_timeout.is_zero() {
            return Err(anyhow!("ocr timeout must be greater than zero"));
        }
        if self.max_plate_votes == 0 {
            return Err(anyhow!("ocr max_votes must be >= 1"));
        }
        regex::Regex::new(&self.plate_format)
            .map_err(|e| anyhow!("invalid plate_format regex: {}", e))?;

        self.image_ext = self.image_ext.trim_start_matches('.').to_lowercase();
        if !matches!(self.image_ext.as_str(), "jpg" | "jpeg" | "png") {
            return Err(anyhow!(
                "image_ext must be one of jpg, jpeg, png (got {})",
                self.image_ext
            ));
        }
        if self.device_key_seed.trim().is_empty() {
            return Err(anyhow!("device_key_seed must not be empty"));
        }
        Ok(())
    }

    /// Directory holding per-video evidence folders and the ledger.
    pub fn violations_dir(&self) -> PathBuf {
        self.output_dir.join("violations")
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.zones_path, PathBuf::from("config/video_zones.json"));
        assert_eq!(cfg.camera_direction, TravelDirection::Up);
        assert_eq!(cfg.queue_capacity, 5);
        assert_eq!(cfg.queue_timeout, Duration::from_secs(1));
        assert_eq!(cfg.track_distance_px, 55.0);
        assert_eq!(cfg.light_debounce, 3);
        assert_eq!(cfg.ocr_workers, 3);
        assert_eq!(cfg.ocr_timeout, Duration::from_secs(3));
        assert_eq!(cfg.image_ext, "jpg");
        assert_eq!(cfg.ledger_backend, LedgerBackend::Json);
        assert!(cfg.save_video);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PipelineConfig {
            frame_skip: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig {
            plate_format: "([".to_string(),
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig {
            image_ext: "bmp".to_string(),
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_normalizes_image_ext() {
        let mut cfg = PipelineConfig {
            image_ext: ".PNG".to_string(),
            ..PipelineConfig::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.image_ext, "png");
    }
}
