//! Per-video zone geometry: ROI polygon and stop line.
//!
//! Zones live in one JSON file mapping a video file name to its geometry.
//! A video seen for the first time gets proportional defaults, which are
//! written back so later runs reuse (or a human can edit) them.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// ROI polygon vertices `[x, y]`, at least three.
    pub roi: Vec<[i32; 2]>,
    pub stop_line_y: i32,
}

impl ZoneConfig {
    /// Defaults for a `width` x `height` video: ROI x in [0.10w, 0.90w],
    /// y in [0.15h, 0.80h], stop line at 0.50h.
    pub fn default_for(width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        let x1 = (w * 0.10) as i32;
        let x2 = (w * 0.90) as i32;
        let y1 = (h * 0.15) as i32;
        let y2 = (h * 0.80) as i32;
        Self {
            roi: vec![[x1, y1], [x2, y1], [x2, y2], [x1, y2]],
            stop_line_y: (h * 0.50) as i32,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.roi.len() < 3 {
            return Err(anyhow!(
                "roi polygon needs at least 3 points, got {}",
                self.roi.len()
            ));
        }
        Ok(())
    }

    /// Point-in-polygon, counting points on an edge or vertex as inside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let n = self.roi.len();
        if n < 3 {
            return false;
        }
        let (px, py) = (x as f64, y as f64);
        let mut inside = false;
        for i in 0..n {
            let [ax, ay] = self.roi[i].map(f64::from);
            let [bx, by] = self.roi[(i + 1) % n].map(f64::from);

            let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
            let within_x = px >= ax.min(bx) && px <= ax.max(bx);
            let within_y = py >= ay.min(by) && py <= ay.max(by);
            if cross.abs() < 1e-9 && within_x && within_y {
                return true;
            }

            if (ay > py) != (by > py) {
                let x_at = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < x_at {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

/// JSON zone file keyed by video file name.
#[derive(Clone, Debug)]
pub struct ZoneStore {
    path: PathBuf,
}

impl ZoneStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every configured zone. A missing file is an empty map.
    pub fn load_all(&self) -> Result<BTreeMap<String, ZoneConfig>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read zones file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid zones file {}", self.path.display()))
    }

    /// Returns the zone for `video_key`, creating and persisting defaults
    /// from the frame size on first encounter.
    ///
    /// An unreadable zones file or a failed write falls back to the defaults
    /// for this run without touching the file.
    pub fn load_or_create(&self, video_key: &str, width: u32, height: u32) -> ZoneConfig {
        let mut zones = match self.load_all() {
            Ok(zones) => zones,
            Err(e) => {
                log::error!("{:#}; using default zone for {}", e, video_key);
                return ZoneConfig::default_for(width, height);
            }
        };

        if let Some(zone) = zones.get(video_key) {
            match zone.validate() {
                Ok(()) => return zone.clone(),
                Err(e) => {
                    log::error!(
                        "zone for {} is invalid ({}); using defaults",
                        video_key,
                        e
                    );
                    return ZoneConfig::default_for(width, height);
                }
            }
        }

        let zone = ZoneConfig::default_for(width, height);
        zones.insert(video_key.to_string(), zone.clone());
        match self.save_all(&zones) {
            Ok(()) => log::info!(
                "created default zone for {} in {}",
                video_key,
                self.path.display()
            ),
            Err(e) => log::error!("failed to save zones file: {:#}", e),
        }
        zone
    }

    fn save_all(&self, zones: &BTreeMap<String, ZoneConfig>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(zones)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write zones file {}", self.path.display()))
    }
}
