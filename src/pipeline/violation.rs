use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::detect::LightState;
use crate::pipeline::tracker::{Direction, Track};
use crate::zones::ZoneConfig;

/// Direction vehicles travel through the stop line in image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelDirection {
    /// Toward the top of the frame (decreasing y).
    #[default]
    Up,
    /// Toward the bottom of the frame (increasing y).
    Down,
}

impl TravelDirection {
    fn as_direction(self) -> Direction {
        match self {
            TravelDirection::Up => Direction::Up,
            TravelDirection::Down => Direction::Down,
        }
    }
}

impl fmt::Display for TravelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TravelDirection::Up => "up",
            TravelDirection::Down => "down",
        })
    }
}

impl FromStr for TravelDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(TravelDirection::Up),
            "down" => Ok(TravelDirection::Down),
            other => Err(anyhow!(
                "camera direction must be 'up' or 'down' (got '{}')",
                other
            )),
        }
    }
}

/// Crossing margin for a box of `box_height` px: `max(10, trunc(0.2 * h))`.
pub fn tolerance_px(box_height: i32) -> i32 {
    ((box_height as f64 * 0.2) as i32).max(10)
}

/// Stop-line crossing state machine for one camera.
#[derive(Clone, Copy, Debug)]
pub struct ViolationEvaluator {
    travel: TravelDirection,
}

impl ViolationEvaluator {
    pub fn new(travel: TravelDirection) -> Self {
        Self { travel }
    }

    pub fn travel(&self) -> TravelDirection {
        self.travel
    }

    /// Updates ROI membership and crossing flags for `track`, and returns
    /// true exactly once per track: on the first frame the track crosses
    /// the stop line, by the tolerance, under a red light, moving in the
    /// travel direction after having entered the ROI.
    pub fn evaluate(&self, track: &mut Track, light: LightState, zone: &ZoneConfig) -> bool {
        if track.direction == Direction::Side {
            return false;
        }

        let (cx, cy) = track.position;
        if zone.contains(cx, cy) {
            track.entered_roi = true;
        }

        let stop = zone.stop_line_y;
        let bbox = track.bbox;
        let passed = match self.travel {
            TravelDirection::Up => bbox.y2 < stop,
            TravelDirection::Down => bbox.y1 > stop,
        };
        if passed {
            track.crossed = true;
        }

        if track.violated
            || light != LightState::Red
            || !track.entered_roi
            || track.direction != self.travel.as_direction()
        {
            return false;
        }

        let tol = tolerance_px(bbox.height());
        let over_line = match self.travel {
            TravelDirection::Up => bbox.y2 <= stop - tol,
            TravelDirection::Down => bbox.y1 >= stop + tol,
        };
        if over_line {
            track.violated = true;
        }
        over_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, Detection};
    use crate::pipeline::tracker::TrackManager;

    fn zone() -> ZoneConfig {
        ZoneConfig {
            roi: vec![[0, 300], [1000, 300], [1000, 700], [0, 700]],
            stop_line_y: 500,
        }
    }

    fn det(y2: i32) -> Detection {
        // 60 px tall box: tolerance 12.
        Detection::new("car", BBox::new(400, y2 - 60, 480, y2), 0.9)
    }

    #[test]
    fn tolerance_floor_and_truncation() {
        assert_eq!(tolerance_px(30), 10);
        assert_eq!(tolerance_px(60), 12);
        assert_eq!(tolerance_px(64), 12);
        assert_eq!(tolerance_px(200), 40);
    }

    #[test]
    fn fires_on_first_frame_with_bottom_at_or_past_margin() {
        let eval = ViolationEvaluator::new(TravelDirection::Up);
        let zone = zone();
        let mut tm = TrackManager::new(55.0);
        let mut fired_at = Vec::new();
        for (frame, y2) in [(1u64, 515), (2, 506), (3, 497), (4, 488), (5, 479), (6, 470)] {
            let id = tm.update(&det(y2), frame);
            let track = tm.get_mut(id).unwrap();
            if eval.evaluate(track, LightState::Red, &zone) {
                fired_at.push(y2);
            }
        }
        assert_eq!(fired_at, vec![488]);
        assert!(tm.get(1).unwrap().violated);
    }

    #[test]
    fn no_violation_without_red() {
        let eval = ViolationEvaluator::new(TravelDirection::Up);
        let zone = zone();
        let mut tm = TrackManager::new(55.0);
        for (frame, y2) in [(1u64, 515), (2, 500), (3, 485), (4, 470)] {
            let id = tm.update(&det(y2), frame);
            let track = tm.get_mut(id).unwrap();
            assert!(!eval.evaluate(track, LightState::Green, &zone));
            assert!(!eval.evaluate(track, LightState::Unknown, &zone));
        }
        let track = tm.get(1).unwrap();
        assert!(track.crossed);
        assert!(!track.violated);
    }

    #[test]
    fn requires_roi_entry() {
        let eval = ViolationEvaluator::new(TravelDirection::Up);
        let zone = ZoneConfig {
            roi: vec![[0, 0], [100, 0], [100, 100], [0, 100]],
            stop_line_y: 500,
        };
        let mut tm = TrackManager::new(55.0);
        tm.update(&det(515), 1);
        let id = tm.update(&det(480), 2);
        assert!(!eval.evaluate(tm.get_mut(id).unwrap(), LightState::Red, &zone));
    }

    #[test]
    fn roi_membership_is_sticky() {
        let eval = ViolationEvaluator::new(TravelDirection::Up);
        let zone = ZoneConfig {
            roi: vec![[0, 450], [1000, 450], [1000, 700], [0, 700]],
            stop_line_y: 500,
        };
        let mut tm = TrackManager::new(55.0);
        // Center y 485: inside the ROI, light still green.
        let id = tm.update(&det(515), 1);
        eval.evaluate(tm.get_mut(id).unwrap(), LightState::Green, &zone);
        assert!(tm.get(id).unwrap().entered_roi);
        // Center y 440 is outside the ROI now, but membership stays.
        tm.update(&det(470), 2);
        let track = tm.get_mut(id).unwrap();
        assert!(eval.evaluate(track, LightState::Red, &zone));
        assert!(track.entered_roi);
    }

    #[test]
    fn wrong_direction_is_ignored() {
        let eval = ViolationEvaluator::new(TravelDirection::Down);
        let zone = zone();
        let mut tm = TrackManager::new(55.0);
        tm.update(&det(515), 1);
        let id = tm.update(&det(470), 2);
        assert!(!eval.evaluate(tm.get_mut(id).unwrap(), LightState::Red, &zone));
    }

    #[test]
    fn downward_travel_uses_top_edge() {
        let eval = ViolationEvaluator::new(TravelDirection::Down);
        let zone = zone();
        let mut tm = TrackManager::new(55.0);
        let mut fired = Vec::new();
        // Top edge y1 = y2 - 60; fires once y1 >= 512.
        for (frame, y2) in [(1u64, 560), (2, 566), (3, 572), (4, 578)] {
            let id = tm.update(&det(y2), frame);
            if eval.evaluate(tm.get_mut(id).unwrap(), LightState::Red, &zone) {
                fired.push(y2 - 60);
            }
        }
        assert_eq!(fired, vec![512]);
    }

    #[test]
    fn side_tracks_never_fire() {
        let eval = ViolationEvaluator::new(TravelDirection::Up);
        let zone = zone();
        let mut tm = TrackManager::new(55.0);
        let wide = |x: i32| Detection::new("car", BBox::new(x, 420, x + 200, 470), 0.9);
        tm.update(&wide(100), 1);
        let id = tm.update(&wide(130), 2);
        let track = tm.get_mut(id).unwrap();
        assert_eq!(track.direction, Direction::Side);
        assert!(!eval.evaluate(track, LightState::Red, &zone));
        assert!(!track.violated);
    }

    #[test]
    fn parses_travel_direction() {
        assert_eq!("UP".parse::<TravelDirection>().unwrap(), TravelDirection::Up);
        assert_eq!(" down ".parse::<TravelDirection>().unwrap(), TravelDirection::Down);
        assert!("left".parse::<TravelDirection>().is_err());
    }
}
