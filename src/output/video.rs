//! Annotated output video.
//!
//! Frames are written incrementally as JPEGs into `<target>.frames/` and
//! encoded with the `ffmpeg` command-line tool when the run finishes. If
//! encoding fails the frame directory is kept and returned instead, so the
//! annotated run is never lost.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct VideoWriter {
    target: PathBuf,
    frames_dir: PathBuf,
    fps: f64,
    frames: u64,
    size: Option<(u32, u32)>,
}

impl VideoWriter {
    /// Output path for a run: `<violations_dir>/<stem>_<YYYYmmdd_HHMMSS>.mp4`.
    pub fn target_path(violations_dir: &Path, video_stem: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        violations_dir.join(format!("{}_{}.mp4", video_stem, stamp))
    }

    pub fn create(target: PathBuf, fps: f64) -> Result<Self> {
        let frames_dir = PathBuf::from(format!("{}.frames", target.display()));
        fs::create_dir_all(&frames_dir)
            .with_context(|| format!("create {}", frames_dir.display()))?;
        Ok(Self {
            target,
            frames_dir,
            fps: if fps.is_finite() && fps > 0.0 { fps } else { 25.0 },
            frames: 0,
            size: None,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        let size = image.dimensions();
        match self.size {
            None => self.size = Some(size),
            Some(expected) if expected != size => {
                return Err(anyhow!(
                    "frame size {}x{} does not match video size {}x{}",
                    size.0,
                    size.1,
                    expected.0,
                    expected.1
                ));
            }
            Some(_) => {}
        }
        let path = self
            .frames_dir
            .join(format!("frame_{:06}.jpg", self.frames));
        image
            .save(&path)
            .with_context(|| format!("write {}", path.display()))?;
        self.frames += 1;
        Ok(())
    }

    /// Encodes the frame sequence. Returns the video path, the kept frame
    /// directory if encoding failed, or `None` when nothing was written.
    pub fn finish(self) -> Option<PathBuf> {
        if self.frames == 0 {
            remove_dir(&self.frames_dir);
            return None;
        }
        match self.encode() {
            Ok(()) => {
                log::info!(
                    "wrote {} ({} frames @ {:.2} fps)",
                    self.target.display(),
                    self.frames,
                    self.fps
                );
                remove_dir(&self.frames_dir);
                Some(self.target)
            }
            Err(e) => {
                log::error!(
                    "video encoding failed, keeping frames in {}: {:#}",
                    self.frames_dir.display(),
                    e
                );
                Some(self.frames_dir)
            }
        }
    }

    fn encode(&self) -> Result<()> {
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-framerate")
            .arg(format!("{:.3}", self.fps))
            .arg("-i")
            .arg(self.frames_dir.join("frame_%06d.jpg"))
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            // libx264 needs even dimensions.
            .arg("-vf")
            .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .arg(&self.target)
            .output()
            .context("run ffmpeg (is it installed?)")?;
        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

fn remove_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        log::warn!("failed to remove {}: {}", dir.display(), e);
    }
}
