use serde::{Deserialize, Serialize};

use crate::gaze::GazeSample;

pub type TargetId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TargetKind {
    Normal,
    Bonus,
}

/// Whether `sample` lies strictly within `radius` of `(cx, cy)`.
///
/// The (0, 0) sentinel never hits, so a provider that has not produced data
/// cannot capture anything.
pub fn gaze_hits(sample: &GazeSample, cx: f64, cy: f64, radius: f64) -> bool {
    if !sample.has_data() {
        return false;
    }
    let dx = sample.x - cx;
    let dy = sample.y - cy;
    (dx * dx + dy * dy).sqrt() < radius
}

/// A square region on the canvas that has to be looked at long enough to catch.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub size_px: f64,
    /// Top-left corner.
    pub x: f64,
    pub y: f64,
    pub spawned_at_ms: u64,
    pub expires_at_ms: u64,
    pub dwell_ms: f64,
    pub dwell_required_ms: f64,
    pub last_check_ms: u64,
    pub captured_at_ms: Option<u64>,
}

impl Target {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.size_px / 2.0, self.y + self.size_px / 2.0)
    }

    pub fn hit_radius(&self) -> f64 {
        self.size_px / 2.0
    }

    pub fn is_captured(&self) -> bool {
        self.captured_at_ms.is_some()
    }

    pub fn is_gazed(&self, sample: &GazeSample) -> bool {
        let (cx, cy) = self.center();
        gaze_hits(sample, cx, cy, self.hit_radius())
    }

    /// Dwell progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.dwell_required_ms <= 0.0 {
            return 1.0;
        }
        (self.dwell_ms / self.dwell_required_ms).clamp(0.0, 1.0)
    }

    /// Advance dwell for one evaluation at `now_ms`. Returns true when the
    /// accumulated dwell reaches the requirement while gazed upon.
    ///
    /// Gazed: dwell grows by the time since the previous evaluation.
    /// Not gazed: dwell shrinks by `decay_ms`, never below zero.
    pub fn update_dwell(&mut self, gazed: bool, now_ms: u64, decay_ms: f64) -> bool {
        let elapsed = now_ms.saturating_sub(self.last_check_ms) as f64;
        self.last_check_ms = now_ms;

        if gazed {
            self.dwell_ms = (self.dwell_ms + elapsed).min(self.dwell_required_ms);
            self.dwell_ms >= self.dwell_required_ms
        } else {
            self.dwell_ms = (self.dwell_ms - decay_ms).max(0.0);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_at(x: f64, y: f64, size: f64) -> Target {
        Target {
            id: 1,
            kind: TargetKind::Normal,
            size_px: size,
            x,
            y,
            spawned_at_ms: 0,
            expires_at_ms: 5_000,
            dwell_ms: 0.0,
            dwell_required_ms: 2_000.0,
            last_check_ms: 0,
            captured_at_ms: None,
        }
    }

    #[test]
    fn hit_test_uses_strict_radius() {
        assert!(gaze_hits(&GazeSample::new(100.0, 100.0, 0), 100.0, 100.0, 25.0));
        assert!(gaze_hits(&GazeSample::new(124.0, 100.0, 0), 100.0, 100.0, 25.0));
        assert!(!gaze_hits(&GazeSample::new(125.0, 100.0, 0), 100.0, 100.0, 25.0));
        assert!(!gaze_hits(&GazeSample::new(118.0, 118.0, 0), 100.0, 100.0, 25.0));
    }

    #[test]
    fn sentinel_never_hits() {
        // a target sitting on the origin still ignores the no-data sample
        assert!(!gaze_hits(&GazeSample::default(), 0.0, 0.0, 50.0));
    }

    #[test]
    fn center_and_radius_follow_size() {
        let t = target_at(10.0, 20.0, 50.0);
        assert_eq!(t.center(), (35.0, 45.0));
        assert_eq!(t.hit_radius(), 25.0);
        assert!(t.is_gazed(&GazeSample::new(35.0, 45.0, 0)));
        assert!(!t.is_gazed(&GazeSample::new(10.0, 20.0, 0)));
    }

    #[test]
    fn dwell_accumulates_and_clamps() {
        let mut t = target_at(0.0, 0.0, 50.0);
        assert!(!t.update_dwell(true, 1_500, 100.0));
        assert_eq!(t.dwell_ms, 1_500.0);
        assert!(t.update_dwell(true, 3_000, 100.0));
        assert_eq!(t.dwell_ms, 2_000.0);
        assert_eq!(t.progress(), 1.0);
    }

    #[test]
    fn dwell_decays_to_zero_floor() {
        let mut t = target_at(0.0, 0.0, 50.0);
        t.update_dwell(true, 150, 100.0);
        t.update_dwell(false, 250, 100.0);
        assert_eq!(t.dwell_ms, 50.0);
        t.update_dwell(false, 350, 100.0);
        assert_eq!(t.dwell_ms, 0.0);
        t.update_dwell(false, 450, 100.0);
        assert_eq!(t.dwell_ms, 0.0);
        assert_eq!(t.last_check_ms, 450);
    }

    #[test]
    fn kind_displays_lowercase() {
        assert_eq!(TargetKind::Bonus.to_string(), "bonus");
        assert_eq!(TargetKind::Normal.to_string(), "normal");
    }
}
