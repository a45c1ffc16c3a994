//! Local video file frame source.
//!
//! `FileSource` decodes a local video file sequentially into RGB frames. Two
//! backends exist:
//! - `stub://<name>?frames=N&width=W&height=H&fps=F&light=<state>`: synthetic
//!   frames for tests and demos
//! - FFmpeg (feature: video-ffmpeg) for real files
//!
//! Sources are finite and not restartable: `next_frame` returns `None` once
//! the stream is exhausted.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::detect::LightState;

const STUB_DEFAULT_FRAMES: u64 = 100;
const STUB_DEFAULT_WIDTH: u32 = 640;
const STUB_DEFAULT_HEIGHT: u32 = 480;
const STUB_DEFAULT_FPS: f64 = 10.0;

/// Stream properties known once the source is open.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count when the container reports one.
    pub frame_count: Option<u64>,
}

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Opens a local file or `stub://` URL. A missing or undecodable file
    /// is an error.
    pub fn open(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(anyhow!("video path is empty"));
        }
        if let Some(spec) = path.strip_prefix("stub://") {
            let source = SyntheticFileSource::parse(spec)?;
            log::info!("FileSource: opened {} (synthetic)", path);
            return Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Synthetic(source),
            });
        }
        if path.contains("://") {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if !Path::new(path).is_file() {
            return Err(anyhow!("video file not found: {}", path));
        }

        #[cfg(feature = "video-ffmpeg")]
        {
            let source = FfmpegFileSource::open(path)?;
            log::info!("FileSource: opened {} (ffmpeg)", path);
            Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "video-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the video-ffmpeg feature",
                path
            ))
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> VideoInfo {
        match &self.backend {
            FileBackend::Synthetic(source) => source.info(),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.info(),
        }
    }

    /// Decodes the next frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    /// Frames decoded so far.
    pub fn frames_decoded(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_decoded(),
        }
    }
}

/// File name used to key per-video zones and evidence folders.
pub fn video_key(path: &str) -> String {
    let trimmed = path.strip_prefix("stub://").unwrap_or(path);
    let trimmed = trimmed.split('?').next().unwrap_or(trimmed);
    Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("video")
        .to_string()
}

/// File name without extension.
pub fn video_stem(path: &str) -> String {
    let key = video_key(path);
    Path::new(&key)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&key)
        .to_string()
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    frames: u64,
    width: u32,
    height: u32,
    fps: f64,
    light: Option<LightState>,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn parse(spec: &str) -> Result<Self> {
        let mut source = Self {
            frames: STUB_DEFAULT_FRAMES,
            width: STUB_DEFAULT_WIDTH,
            height: STUB_DEFAULT_HEIGHT,
            fps: STUB_DEFAULT_FPS,
            light: None,
            frame_count: 0,
        };
        let query = spec.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid stub parameter '{}'", pair))?;
            match key {
                "frames" => source.frames = value.parse().context("stub frames")?,
                "width" => source.width = value.parse().context("stub width")?,
                "height" => source.height = value.parse().context("stub height")?,
                "fps" => source.fps = value.parse().context("stub fps")?,
                "light" => source.light = Some(value.parse()?),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(source)
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            width: self.width,
            height: self.height,
            fps: self.fps,
            frame_count: Some(self.frames),
        }
    }

    fn next_frame(&mut self) -> Option<RgbImage> {
        if self.frame_count >= self.frames {
            return None;
        }
        self.frame_count += 1;
        Some(self.generate_synthetic_frame())
    }

    fn generate_synthetic_frame(&self) -> RgbImage {
        let shade = 40 + (self.frame_count % 20) as u8;
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([shade, shade, shade]));

        let lamp = match self.light {
            Some(LightState::Red) => Some(Rgb([255, 0, 0])),
            Some(LightState::Yellow) => Some(Rgb([255, 255, 0])),
            Some(LightState::Green) => Some(Rgb([0, 255, 0])),
            _ => None,
        };
        if let Some(color) = lamp {
            // Lamp in the top-right corner, where the signal head sits.
            let x0 = self.width * 7 / 8;
            let y1 = (self.height / 8).max(1);
            for y in 0..y1 {
                for x in x0..self.width {
                    image.put_pixel(x, y, color);
                }
            }
        }
        image
    }
}
