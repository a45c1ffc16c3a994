use serde::Serialize;

use crate::detect::{BBox, Detection};

pub type TrackId = u64;

/// Movement class from the last displacement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Idle,
    Up,
    Down,
    /// Lateral movement of a wide box; excluded from violation checks.
    Side,
}

/// Classifies a displacement `(dx, dy)` for a box of `bw` x `bh`.
pub fn classify_direction(dx: f32, dy: f32, bw: f32, bh: f32) -> Direction {
    let horizontal = dx.abs() > 4.0 && dx.abs() > 2.0 * dy.abs();
    let vertical = dy.abs() > 4.0;
    if !horizontal && !vertical {
        return Direction::Idle;
    }
    if horizontal && bw > 1.6 * bh {
        return Direction::Side;
    }
    if dy < -2.0 {
        Direction::Up
    } else if dy > 2.0 {
        Direction::Down
    } else {
        Direction::Idle
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateVote {
    pub text: String,
    pub confidence: f32,
}

/// One hypothesized vehicle across frames.
#[derive(Clone, Debug, Serialize)]
pub struct Track {
    pub id: TrackId,
    /// Last-known center.
    pub position: (f32, f32),
    pub bbox: BBox,
    pub label: String,
    pub direction: Direction,
    /// Sticky: once the center was inside the ROI this stays true.
    pub entered_roi: bool,
    pub crossed: bool,
    /// Sticky: set when evidence was emitted for this track.
    pub violated: bool,
    pub plate_votes: Vec<PlateVote>,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
}

impl Track {
    fn new(id: TrackId, detection: &Detection, frame_index: u64) -> Self {
        Self {
            id,
            position: detection.bbox.center(),
            bbox: detection.bbox,
            label: detection.label.clone(),
            direction: Direction::Idle,
            entered_roi: false,
            crossed: false,
            violated: false,
            plate_votes: Vec::new(),
            first_seen_frame: frame_index,
            last_seen_frame: frame_index,
        }
    }

    fn merge(&mut self, detection: &Detection, frame_index: u64) {
        let (cx, cy) = detection.bbox.center();
        let (dx, dy) = (cx - self.position.0, cy - self.position.1);
        self.direction = classify_direction(
            dx,
            dy,
            detection.bbox.width() as f32,
            detection.bbox.height() as f32,
        );
        self.position = (cx, cy);
        self.bbox = detection.bbox;
        self.label = detection.label.clone();
        self.last_seen_frame = frame_index;
    }
}

/// Greedy nearest-center association of detections to tracks.
///
/// Owns every track of one run. Tracks are never removed, and ids start at 1
/// and are never reused, so `tracks[id - 1]` is track `id`.
#[derive(Debug)]
pub struct TrackManager {
    tracks: Vec<Track>,
    max_distance: f32,
}

impl TrackManager {
    pub fn new(max_distance: f32) -> Self {
        Self {
            tracks: Vec::new(),
            max_distance,
        }
    }

    /// Associates one detection and returns its track id.
    ///
    /// The nearest track strictly within the distance threshold wins; on an
    /// exact tie the lower id wins. Otherwise a new track is allocated.
    pub fn update(&mut self, detection: &Detection, frame_index: u64) -> TrackId {
        let (cx, cy) = detection.bbox.center();
        let mut best: Option<(usize, f32)> = None;
        for (idx, track) in self.tracks.iter().enumerate() {
            let dist = (cx - track.position.0).hypot(cy - track.position.1);
            if dist < self.max_distance && best.map_or(true, |(_, d)| dist < d) {
                best = Some((idx, dist));
            }
        }

        match best {
            Some((idx, _)) => {
                let track = &mut self.tracks[idx];
                track.merge(detection, frame_index);
                track.id
            }
            None => {
                let id = self.tracks.len() as TrackId + 1;
                self.tracks.push(Track::new(id, detection, frame_index));
                id
            }
        }
    }

    /// Associates a frame's detections in order. Returns the distinct track
    /// ids touched, in first-touch order.
    pub fn update_frame(&mut self, detections: &[Detection], frame_index: u64) -> Vec<TrackId> {
        let mut touched = Vec::with_capacity(detections.len());
        for detection in detections {
            let id = self.update(detection, frame_index);
            if !touched.contains(&id) {
                touched.push(id);
            }
        }
        touched
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.tracks.get(idx)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.tracks.get_mut(idx)
    }

    /// Appends a plate vote, keeping at most `max_votes` most recent.
    pub fn add_vote(&mut self, id: TrackId, vote: PlateVote, max_votes: usize) {
        if let Some(track) = self.get_mut(id) {
            track.plate_votes.push(vote);
            let excess = track.plate_votes.len().saturating_sub(max_votes);
            if excess > 0 {
                track.plate_votes.drain(..excess);
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
