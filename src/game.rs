use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::gaze::GazeSample;
use crate::scheduler::{Scheduler, TimerId};
use crate::target::{Target, TargetId, TargetKind};

/// Tunable rules of a match. Defaults are the classic one-minute game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRules {
    pub session_secs: u32,
    pub dwell_required_ms: f64,
    pub evaluate_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub decay_per_tick_ms: f64,
    pub bonus_chance: f64,
    pub normal_points: u32,
    pub bonus_points: u32,
    pub capture_feedback_ms: u64,
    pub level_up_every_secs: u32,
    pub canvas_width: f64,
    pub canvas_height: f64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            session_secs: 60,
            dwell_required_ms: 2000.0,
            evaluate_interval_ms: 100,
            tick_interval_ms: 1000,
            decay_per_tick_ms: 100.0,
            bonus_chance: 0.1,
            normal_points: 10,
            bonus_points: 20,
            capture_feedback_ms: 200,
            level_up_every_secs: 10,
            canvas_width: 800.0,
            canvas_height: 600.0,
        }
    }
}

impl GameRules {
    pub fn spawn_interval_ms(&self, level: u32) -> u64 {
        2000u64.saturating_sub(100 * level as u64).max(1000)
    }

    pub fn target_size_px(&self, level: u32) -> f64 {
        (60.0 - 5.0 * level as f64).max(30.0)
    }

    pub fn target_lifespan_ms(&self, level: u32) -> u64 {
        5000u64.saturating_sub(200 * level as u64).max(3000)
    }

    pub fn points_for(&self, kind: TargetKind) -> u32 {
        match kind {
            TargetKind::Normal => self.normal_points,
            TargetKind::Bonus => self.bonus_points,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GameState {
    Menu,
    Calibrating,
    Playing,
    GameOver,
}

/// Scheduled work owned by a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Spawn,
    Evaluate,
    Tick,
    Expire(TargetId),
    Remove(TargetId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTier {
    Legendary,
    Great,
    Good,
    Nice,
    TryAgain,
}

impl ScoreTier {
    pub fn for_score(score: u32) -> Self {
        match score {
            s if s >= 500 => ScoreTier::Legendary,
            s if s >= 300 => ScoreTier::Great,
            s if s >= 200 => ScoreTier::Good,
            s if s >= 100 => ScoreTier::Nice,
            _ => ScoreTier::TryAgain,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ScoreTier::Legendary => "Legendary! Flawless focus!",
            ScoreTier::Great => "Amazing! Really well done!",
            ScoreTier::Good => "Nice work! Keep practicing!",
            ScoreTier::Nice => "Good! You can do even better!",
            ScoreTier::TryAgain => "Give it another try!",
        }
    }
}

/// Final numbers of a finished match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub score: u32,
    pub level: u32,
    pub targets_caught: u32,
    pub targets_spawned: u32,
    /// caught / spawned, 0 when nothing spawned
    pub accuracy: f64,
}

impl GameSummary {
    pub fn accuracy_percent(&self) -> u32 {
        (self.accuracy * 100.0).round() as u32
    }

    pub fn tier(&self) -> ScoreTier {
        ScoreTier::for_score(self.score)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetView {
    pub id: TargetId,
    pub x: f64,
    pub y: f64,
    pub size_px: f64,
    pub kind: TargetKind,
    pub progress: f64,
    pub captured: bool,
}

/// What the renderer draws on every frame of a match.
#[derive(Debug, Clone, PartialEq)]
pub struct GameFrame {
    pub score: u32,
    pub level: u32,
    pub time_remaining_secs: u32,
    pub targets: Vec<TargetView>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameStep {
    Continue,
    Captured { id: TargetId, points: u32 },
    LevelUp { level: u32 },
    GameOver(GameSummary),
}

#[derive(Debug, Default)]
struct Timers {
    spawn: Option<TimerId>,
    evaluate: Option<TimerId>,
    tick: Option<TimerId>,
    targets: Vec<TimerId>,
}

/// One match: score, level, clock and the live targets.
///
/// All activities are driven by [`GameEvent`]s from a [`Scheduler`]. Each
/// periodic source schedules its next run only after the current one has been
/// handled, so a source never overlaps itself, and every handler checks the
/// state first so a timer firing after teardown does nothing.
#[derive(Debug)]
pub struct GameSession {
    rules: GameRules,
    state: GameState,
    score: u32,
    level: u32,
    time_remaining_secs: u32,
    targets: Vec<Target>,
    targets_spawned: u32,
    targets_caught: u32,
    next_target_id: TargetId,
    timers: Timers,
    rng: StdRng,
}

impl GameSession {
    pub fn new(rules: GameRules) -> Self {
        Self::with_rng(rules, StdRng::from_entropy())
    }

    pub fn with_seed(rules: GameRules, seed: u64) -> Self {
        Self::with_rng(rules, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rules: GameRules, rng: StdRng) -> Self {
        let time_remaining_secs = rules.session_secs;
        Self {
            rules,
            state: GameState::Menu,
            score: 0,
            level: 1,
            time_remaining_secs,
            targets: Vec::new(),
            targets_spawned: 0,
            targets_caught: 0,
            next_target_id: 1,
            timers: Timers::default(),
            rng,
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn time_remaining_secs(&self) -> u32 {
        self.time_remaining_secs
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn targets_spawned(&self) -> u32 {
        self.targets_spawned
    }

    pub fn targets_caught(&self) -> u32 {
        self.targets_caught
    }

    pub fn accuracy(&self) -> f64 {
        if self.targets_spawned == 0 {
            0.0
        } else {
            self.targets_caught as f64 / self.targets_spawned as f64
        }
    }

    pub fn summary(&self) -> GameSummary {
        GameSummary {
            score: self.score,
            level: self.level,
            targets_caught: self.targets_caught,
            targets_spawned: self.targets_spawned,
            accuracy: self.accuracy(),
        }
    }

    /// New canvas size, used by targets spawned from now on.
    pub fn resize_canvas(&mut self, width: f64, height: f64) {
        if width > 0.0 && height > 0.0 {
            self.rules.canvas_width = width;
            self.rules.canvas_height = height;
        }
    }

    pub fn begin_calibration(&mut self) {
        if self.state != GameState::Playing {
            self.state = GameState::Calibrating;
        }
    }

    /// Reset the match and start spawning, evaluating and ticking.
    pub fn start<E: From<GameEvent>>(&mut self, sched: &mut Scheduler<E>) {
        self.cancel_timers(sched);
        self.state = GameState::Playing;
        self.score = 0;
        self.level = 1;
        self.time_remaining_secs = self.rules.session_secs;
        self.targets.clear();
        self.targets_spawned = 0;
        self.targets_caught = 0;
        info!(secs = self.rules.session_secs, "game started");

        self.spawn_random(sched);
        self.schedule_spawn(sched);
        self.timers.evaluate =
            Some(sched.schedule_in(self.rules.evaluate_interval_ms, GameEvent::Evaluate.into()));
        self.timers.tick =
            Some(sched.schedule_in(self.rules.tick_interval_ms, GameEvent::Tick.into()));
    }

    /// Dispatch one scheduled event. `gaze` is the provider's current sample.
    pub fn handle<E: From<GameEvent>>(
        &mut self,
        event: GameEvent,
        gaze: &GazeSample,
        sched: &mut Scheduler<E>,
    ) -> Vec<GameStep> {
        if self.state != GameState::Playing {
            debug!(?event, state = %self.state, "stale game event ignored");
            return Vec::new();
        }
        match event {
            GameEvent::Spawn => {
                self.spawn_random(sched);
                self.schedule_spawn(sched);
                vec![GameStep::Continue]
            }
            GameEvent::Evaluate => {
                let steps = self.evaluate(gaze, sched);
                self.timers.evaluate = Some(
                    sched.schedule_in(self.rules.evaluate_interval_ms, GameEvent::Evaluate.into()),
                );
                steps
            }
            GameEvent::Tick => {
                let step = self.tick(sched);
                if self.state == GameState::Playing {
                    self.timers.tick =
                        Some(sched.schedule_in(self.rules.tick_interval_ms, GameEvent::Tick.into()));
                }
                vec![step]
            }
            GameEvent::Expire(id) => {
                if self.remove_target(id) {
                    debug!(id, "target expired");
                }
                vec![GameStep::Continue]
            }
            GameEvent::Remove(id) => {
                self.remove_target(id);
                vec![GameStep::Continue]
            }
        }
    }

    fn spawn_random<E: From<GameEvent>>(&mut self, sched: &mut Scheduler<E>) -> TargetId {
        let kind = if self.rng.gen_bool(self.rules.bonus_chance.clamp(0.0, 1.0)) {
            TargetKind::Bonus
        } else {
            TargetKind::Normal
        };
        let size = self.rules.target_size_px(self.level);
        let max_x = (self.rules.canvas_width - size).max(0.0);
        let max_y = (self.rules.canvas_height - size).max(0.0);
        let x = self.rng.gen::<f64>() * max_x;
        let y = self.rng.gen::<f64>() * max_y;
        self.spawn_target_at(kind, x, y, sched)
    }

    /// Place a target at a known position. Counts toward `targets_spawned`.
    pub fn spawn_target_at<E: From<GameEvent>>(
        &mut self,
        kind: TargetKind,
        x: f64,
        y: f64,
        sched: &mut Scheduler<E>,
    ) -> TargetId {
        let now = sched.now_ms();
        let id = self.next_target_id;
        self.next_target_id += 1;

        let expires_at_ms = now + self.rules.target_lifespan_ms(self.level);
        self.targets.push(Target {
            id,
            kind,
            size_px: self.rules.target_size_px(self.level),
            x,
            y,
            spawned_at_ms: now,
            expires_at_ms,
            dwell_ms: 0.0,
            dwell_required_ms: self.rules.dwell_required_ms,
            last_check_ms: now,
            captured_at_ms: None,
        });
        self.targets_spawned += 1;
        self.timers
            .targets
            .push(sched.schedule_at(expires_at_ms, GameEvent::Expire(id).into()));
        debug!(id, %kind, x, y, "target spawned");
        id
    }

    fn evaluate<E: From<GameEvent>>(
        &mut self,
        gaze: &GazeSample,
        sched: &mut Scheduler<E>,
    ) -> Vec<GameStep> {
        let now = sched.now_ms();
        let decay = self.rules.decay_per_tick_ms;
        let mut steps = Vec::new();

        for target in self.targets.iter_mut().filter(|t| !t.is_captured()) {
            let gazed = target.is_gazed(gaze);
            if target.update_dwell(gazed, now, decay) {
                let points = self.rules.points_for(target.kind);
                target.captured_at_ms = Some(now);
                self.score += points;
                self.targets_caught += 1;
                self.timers.targets.push(sched.schedule_in(
                    self.rules.capture_feedback_ms,
                    GameEvent::Remove(target.id).into(),
                ));
                info!(id = target.id, points, score = self.score, "target caught");
                steps.push(GameStep::Captured {
                    id: target.id,
                    points,
                });
            }
        }
        steps
    }

    fn tick<E: From<GameEvent>>(&mut self, sched: &mut Scheduler<E>) -> GameStep {
        self.time_remaining_secs = self.time_remaining_secs.saturating_sub(1);
        if self.time_remaining_secs == 0 {
            return GameStep::GameOver(self.end_game(sched));
        }

        let elapsed = self.rules.session_secs - self.time_remaining_secs;
        let every = self.rules.level_up_every_secs;
        if every > 0 && elapsed % every == 0 {
            self.level_up(sched);
            return GameStep::LevelUp { level: self.level };
        }
        GameStep::Continue
    }

    fn level_up<E: From<GameEvent>>(&mut self, sched: &mut Scheduler<E>) {
        self.level += 1;
        if let Some(id) = self.timers.spawn.take() {
            sched.cancel(id);
        }
        self.schedule_spawn(sched);
        info!(
            level = self.level,
            spawn_interval_ms = self.rules.spawn_interval_ms(self.level),
            "level up"
        );
    }

    fn schedule_spawn<E: From<GameEvent>>(&mut self, sched: &mut Scheduler<E>) {
        let interval = self.rules.spawn_interval_ms(self.level);
        self.timers.spawn = Some(sched.schedule_in(interval, GameEvent::Spawn.into()));
    }

    fn remove_target(&mut self, id: TargetId) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| t.id != id);
        self.targets.len() != before
    }

    /// Stop everything, drop live targets and report the final numbers.
    pub fn end_game<E>(&mut self, sched: &mut Scheduler<E>) -> GameSummary {
        self.cancel_timers(sched);
        self.targets.clear();
        self.state = GameState::GameOver;
        let summary = self.summary();
        info!(
            score = summary.score,
            level = summary.level,
            caught = summary.targets_caught,
            spawned = summary.targets_spawned,
            "game over"
        );
        summary
    }

    /// Tear down without a result, back to the menu.
    pub fn abort<E>(&mut self, sched: &mut Scheduler<E>) {
        self.cancel_timers(sched);
        self.targets.clear();
        self.state = GameState::Menu;
    }

    fn cancel_timers<E>(&mut self, sched: &mut Scheduler<E>) {
        let timers = std::mem::take(&mut self.timers);
        timers
            .spawn
            .into_iter()
            .chain(timers.evaluate)
            .chain(timers.tick)
            .chain(timers.targets)
            .for_each(|id| sched.cancel(id));
    }

    pub fn frame(&self) -> GameFrame {
        GameFrame {
            score: self.score,
            level: self.level,
            time_remaining_secs: self.time_remaining_secs,
            targets: self
                .targets
                .iter()
                .map(|t| TargetView {
                    id: t.id,
                    x: t.x,
                    y: t.y,
                    size_px: t.size_px,
                    kind: t.kind,
                    progress: t.progress(),
                    captured: t.is_captured(),
                })
                .collect(),
        }
    }
}
