use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gaze::{GazeCapability, GazeProvider};

/// Points per side of the calibration grid.
pub const GRID_SIDE: usize = 3;
pub const POINT_COUNT: usize = GRID_SIDE * GRID_SIDE;
pub const DEFAULT_MARGIN_PX: f64 = 60.0;
/// Jittered samples recorded after the exact one, per accepted point.
pub const PERTURBATIONS: u32 = 5;
pub const PERTURB_SPACING_MS: u64 = 100;
/// Jitter is uniform in `[-JITTER_PX, JITTER_PX)` on each axis.
pub const JITTER_PX: f64 = 5.0;
pub const FALLBACK_WIDTH: f64 = 800.0;
pub const FALLBACK_HEIGHT: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub x: f64,
    pub y: f64,
    pub index: usize,
}

/// Where the calibration surface sits on screen and how large it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationLayout {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
}

impl CalibrationLayout {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            width,
            height,
        }
    }

    pub fn with_origin(mut self, x: f64, y: f64) -> Self {
        self.origin_x = x;
        self.origin_y = y;
        self
    }

    /// A surface that reports no area (or garbage) gets the fixed default size.
    fn usable(self) -> Self {
        let degenerate = |v: f64| !v.is_finite() || v <= 0.0;
        if degenerate(self.width) || degenerate(self.height) {
            warn!(
                width = self.width,
                height = self.height,
                "calibration surface has no area, using default layout"
            );
            Self {
                width: FALLBACK_WIDTH,
                height: FALLBACK_HEIGHT,
                ..self
            }
        } else {
            self
        }
    }
}

/// 3x3 grid inset by a margin, in surface-local coordinates, row by row.
///
/// The margin shrinks to a quarter of the smaller side so small surfaces keep
/// nine distinct points.
pub fn grid_points(width: f64, height: f64) -> Vec<CalibrationPoint> {
    let layout = CalibrationLayout::new(width, height).usable();
    let (w, h) = (layout.width, layout.height);
    let margin = DEFAULT_MARGIN_PX.min(w.min(h) / 4.0);

    let xs = [margin, w / 2.0, w - margin];
    let ys = [margin, h / 2.0, h - margin];

    ys.iter()
        .flat_map(|&y| xs.iter().map(move |&x| (x, y)))
        .enumerate()
        .map(|(index, (x, y))| CalibrationPoint { x, y, index })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Running { current_index: usize },
    /// Exact sample taken for `index`; jittered samples still to go.
    Recording { index: usize, remaining: u32 },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Accepted { next_sample_in_ms: u64 },
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationProgress {
    Continue { next_sample_in_ms: u64 },
    Advanced { next_index: usize },
    /// Reported exactly once per calibration run.
    Complete,
    /// Nothing was being recorded; a stale timer.
    Stale,
}

/// Values the renderer needs to draw the calibration screen.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFrame {
    pub points: Vec<CalibrationPoint>,
    pub active_index: Option<usize>,
    pub completed: usize,
}

#[derive(Debug)]
pub struct CalibrationController {
    state: CalibrationState,
    points: Vec<CalibrationPoint>,
    layout: CalibrationLayout,
    rng: StdRng,
}

impl Default for CalibrationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationController {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: CalibrationState::Idle,
            points: Vec::new(),
            layout: CalibrationLayout::new(FALLBACK_WIDTH, FALLBACK_HEIGHT),
            rng,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Index of the point that must be clicked next, if any.
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            CalibrationState::Running { current_index } => Some(current_index),
            CalibrationState::Recording { index, .. } => Some(index),
            CalibrationState::Idle | CalibrationState::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == CalibrationState::Complete
    }

    /// Lay out a fresh grid and wait for the first point.
    pub fn start(&mut self, layout: CalibrationLayout) {
        self.layout = layout.usable();
        self.points = grid_points(self.layout.width, self.layout.height);
        self.state = CalibrationState::Running { current_index: 0 };
        info!(points = self.points.len(), "calibration started");
    }

    pub fn reset(&mut self) {
        self.state = CalibrationState::Idle;
        self.points.clear();
    }

    /// Handle a click or touch on point `index`.
    ///
    /// Only the expected point is accepted; anything else (double taps, clicks
    /// racing a redraw, clicks while jittered samples are still being taken) is
    /// silently ignored.
    pub fn click<C: GazeCapability>(
        &mut self,
        index: usize,
        provider: &mut GazeProvider<C>,
    ) -> ClickOutcome {
        let CalibrationState::Running { current_index } = self.state else {
            debug!(index, state = ?self.state, "calibration click ignored");
            return ClickOutcome::Ignored;
        };
        if index != current_index {
            debug!(index, expected = current_index, "out of order calibration click");
            return ClickOutcome::Ignored;
        }
        let Some((x, y)) = self.screen_position(index) else {
            return ClickOutcome::Ignored;
        };

        provider.record_calibration_sample(x, y);
        self.state = CalibrationState::Recording {
            index,
            remaining: PERTURBATIONS,
        };
        ClickOutcome::Accepted {
            next_sample_in_ms: PERTURB_SPACING_MS,
        }
    }

    /// Record the next jittered sample for the point being recorded.
    pub fn perturb<C: GazeCapability>(
        &mut self,
        provider: &mut GazeProvider<C>,
    ) -> CalibrationProgress {
        let CalibrationState::Recording { index, remaining } = self.state else {
            return CalibrationProgress::Stale;
        };
        if let Some((x, y)) = self.screen_position(index) {
            let jx = self.rng.gen_range(-JITTER_PX..JITTER_PX);
            let jy = self.rng.gen_range(-JITTER_PX..JITTER_PX);
            provider.record_calibration_sample(x + jx, y + jy);
        }

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = CalibrationState::Recording { index, remaining };
            return CalibrationProgress::Continue {
                next_sample_in_ms: PERTURB_SPACING_MS,
            };
        }

        let next_index = index + 1;
        if next_index < self.points.len() {
            self.state = CalibrationState::Running {
                current_index: next_index,
            };
            debug!(next_index, "calibration point done");
            CalibrationProgress::Advanced { next_index }
        } else {
            self.state = CalibrationState::Complete;
            info!("calibration complete");
            CalibrationProgress::Complete
        }
    }

    pub fn frame(&self) -> CalibrationFrame {
        let completed = match self.state {
            CalibrationState::Idle => 0,
            CalibrationState::Running { current_index } => current_index,
            CalibrationState::Recording { index, .. } => index,
            CalibrationState::Complete => self.points.len(),
        };
        CalibrationFrame {
            points: self.points.clone(),
            active_index: self.current_index(),
            completed,
        }
    }

    fn screen_position(&self, index: usize) -> Option<(f64, f64)> {
        self.points
            .get(index)
            .map(|p| (self.layout.origin_x + p.x, self.layout.origin_y + p.y))
    }
}
