use tracing::{info, warn};

use crate::calibration::{
    CalibrationController, CalibrationFrame, CalibrationLayout, CalibrationProgress, ClickOutcome,
};
use crate::error::InitError;
use crate::game::{GameEvent, GameFrame, GameRules, GameSession, GameStep, GameSummary};
use crate::gaze::{GazeCapability, GazeProvider, Readiness};
use crate::scheduler::Scheduler;
use crate::storage::{record_result, ScoreRecord, ScoreStore};

/// Pause between the last calibration point and the first target.
pub const CALIBRATION_HANDOFF_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Screen {
    Menu,
    Instructions,
    Leaderboard,
    Loading,
    Calibrating,
    Playing,
    GameOver,
}

/// Everything the orchestrator schedules on its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Game(GameEvent),
    WarmupElapsed,
    CalibrationSample,
    StartGame,
}

impl From<GameEvent> for AppEvent {
    fn from(ev: GameEvent) -> Self {
        AppEvent::Game(ev)
    }
}

/// Sequences menu → calibration → play → game over.
///
/// Owns the provider, the calibration controller, the match, the score store
/// and the one scheduler that drives them all.
pub struct App<C: GazeCapability, S: ScoreStore> {
    provider: GazeProvider<C>,
    calibration: CalibrationController,
    session: GameSession,
    store: S,
    sched: Scheduler<AppEvent>,
    screen: Screen,
    layout: CalibrationLayout,
    last_summary: Option<GameSummary>,
    last_error: Option<InitError>,
    new_high_score: bool,
}

impl<C: GazeCapability, S: ScoreStore> App<C, S> {
    pub fn new(provider: GazeProvider<C>, store: S, rules: GameRules) -> Self {
        Self::from_parts(
            provider,
            CalibrationController::new(),
            GameSession::new(rules),
            store,
        )
    }

    pub fn from_parts(
        provider: GazeProvider<C>,
        calibration: CalibrationController,
        session: GameSession,
        store: S,
    ) -> Self {
        let rules = session.rules();
        let layout = CalibrationLayout::new(rules.canvas_width, rules.canvas_height);
        Self {
            provider,
            calibration,
            session,
            store,
            sched: Scheduler::new(),
            screen: Screen::Menu,
            layout,
            last_summary: None,
            last_error: None,
            new_high_score: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn now_ms(&self) -> u64 {
        self.sched.now_ms()
    }

    pub fn provider(&self) -> &GazeProvider<C> {
        &self.provider
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn last_summary(&self) -> Option<&GameSummary> {
        self.last_summary.as_ref()
    }

    pub fn last_error(&self) -> Option<&InitError> {
        self.last_error.as_ref()
    }

    /// Whether the last finished game set a new high score.
    pub fn new_high_score(&self) -> bool {
        self.new_high_score
    }

    pub fn high_score(&self) -> u32 {
        self.store.high_score()
    }

    pub fn top_scores(&self, n: usize) -> Vec<ScoreRecord> {
        self.store.top_scores(n)
    }

    pub fn game_frame(&self) -> GameFrame {
        self.session.frame()
    }

    pub fn calibration_frame(&self) -> CalibrationFrame {
        self.calibration.frame()
    }

    /// The play/calibration surface changed size (pixels).
    pub fn resize(&mut self, width: f64, height: f64) {
        self.layout = CalibrationLayout::new(width, height);
        self.session.resize_canvas(width, height);
    }

    pub fn show_instructions(&mut self) {
        if self.is_idle_screen() {
            self.screen = Screen::Instructions;
        }
    }

    pub fn show_leaderboard(&mut self) {
        if self.is_idle_screen() {
            self.screen = Screen::Leaderboard;
        }
    }

    fn is_idle_screen(&self) -> bool {
        matches!(
            self.screen,
            Screen::Menu | Screen::Instructions | Screen::Leaderboard | Screen::GameOver
        )
    }

    /// Bring up gaze tracking and begin calibrating.
    ///
    /// If tracking cannot start the app falls back to the menu and the error is
    /// kept for display; calling this again retries.
    pub fn start_calibration(&mut self) -> Result<(), InitError> {
        self.teardown();
        let now = self.sched.now_ms();
        match self.provider.initialize(now) {
            Err(e) => {
                warn!(error = %e, "cannot start calibration");
                self.last_error = Some(e.clone());
                self.screen = Screen::Menu;
                Err(e)
            }
            Ok(Readiness::Pending { ready_at_ms }) => {
                self.last_error = None;
                self.session.begin_calibration();
                self.screen = Screen::Loading;
                self.sched.schedule_at(ready_at_ms, AppEvent::WarmupElapsed);
                info!(ready_at_ms, "waiting for gaze tracking");
                Ok(())
            }
            Ok(Readiness::Ready) => {
                self.last_error = None;
                self.provider.resume();
                self.begin_calibration();
                Ok(())
            }
        }
    }

    pub fn restart(&mut self) -> Result<(), InitError> {
        self.start_calibration()
    }

    fn begin_calibration(&mut self) {
        self.session.begin_calibration();
        self.calibration.start(self.layout);
        self.screen = Screen::Calibrating;
    }

    /// A click or touch on calibration point `index`.
    pub fn click_calibration_point(&mut self, index: usize) -> ClickOutcome {
        if self.screen != Screen::Calibrating {
            return ClickOutcome::Ignored;
        }
        let outcome = self.calibration.click(index, &mut self.provider);
        if let ClickOutcome::Accepted { next_sample_in_ms } = outcome {
            self.sched
                .schedule_in(next_sample_in_ms, AppEvent::CalibrationSample);
        }
        outcome
    }

    /// Start the match right away, skipping the calibration hand-off delay.
    pub fn start_game(&mut self) {
        self.session.start(&mut self.sched);
        self.provider.resume();
        self.provider.show_gaze_dot();
        self.last_summary = None;
        self.new_high_score = false;
        self.screen = Screen::Playing;
    }

    /// Deliver pending gaze samples and run everything due up to `now_ms`.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.provider.pump();
        while let Some((at, event)) = self.sched.pop_due(now_ms) {
            self.dispatch(at, event);
        }
        self.sched.advance_to(now_ms);
    }

    fn dispatch(&mut self, at: u64, event: AppEvent) {
        match event {
            AppEvent::Game(ev) => {
                let gaze = self.provider.current_sample();
                for step in self.session.handle(ev, &gaze, &mut self.sched) {
                    if let GameStep::GameOver(summary) = step {
                        self.finish_game(summary);
                    }
                }
            }
            AppEvent::WarmupElapsed => {
                if self.provider.poll_ready(at) && self.screen == Screen::Loading {
                    self.begin_calibration();
                }
            }
            AppEvent::CalibrationSample => {
                if self.screen != Screen::Calibrating {
                    return;
                }
                match self.calibration.perturb(&mut self.provider) {
                    CalibrationProgress::Continue { next_sample_in_ms } => {
                        self.sched
                            .schedule_in(next_sample_in_ms, AppEvent::CalibrationSample);
                    }
                    CalibrationProgress::Complete => {
                        self.provider.mark_calibrated();
                        self.sched
                            .schedule_in(CALIBRATION_HANDOFF_MS, AppEvent::StartGame);
                    }
                    CalibrationProgress::Advanced { .. } | CalibrationProgress::Stale => {}
                }
            }
            AppEvent::StartGame => {
                if self.screen == Screen::Calibrating && self.calibration.is_complete() {
                    self.start_game();
                }
            }
        }
    }

    fn finish_game(&mut self, summary: GameSummary) {
        self.new_high_score = match record_result(&mut self.store, &summary) {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "failed to persist result");
                false
            }
        };
        self.provider.release();
        self.last_summary = Some(summary);
        self.screen = Screen::GameOver;
    }

    /// Abandon whatever is running and go back to the menu.
    pub fn return_to_menu(&mut self) {
        self.teardown();
        self.screen = Screen::Menu;
    }

    fn teardown(&mut self) {
        self.session.abort(&mut self.sched);
        self.sched.clear();
        self.calibration.reset();
        self.provider.release();
    }

    /// The window was hidden or shown again. Tracking is paused while hidden.
    pub fn set_visibility(&mut self, hidden: bool) {
        if self.screen != Screen::Playing {
            return;
        }
        if hidden {
            self.provider.pause();
        } else {
            self.provider.resume();
        }
    }

    pub fn clear_scores(&mut self) -> crate::error::StorageResult<()> {
        self.store.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationState, POINT_COUNT};
    use crate::game::GameState;
    use crate::gaze::{ChannelGaze, GazeFeed, ProviderState, DEFAULT_WARMUP_MS};
    use crate::storage::ScoreDb;
    use assert_matches::assert_matches;

    type TestApp = App<ChannelGaze, ScoreDb>;

    fn rules() -> GameRules {
        GameRules {
            bonus_chance: 0.0,
            ..GameRules::default()
        }
    }

    fn app_with(gaze: ChannelGaze) -> (TestApp, GazeFeed) {
        let feed = gaze.feed();
        let app = App::from_parts(
            GazeProvider::new(gaze),
            CalibrationController::with_seed(1),
            GameSession::with_seed(rules(), 2),
            ScoreDb::open_in_memory().unwrap(),
        );
        (app, feed)
    }

    fn calibrate(app: &mut TestApp) {
        for i in 0..POINT_COUNT {
            let now = app.now_ms();
            assert_matches!(app.click_calibration_point(i), ClickOutcome::Accepted { .. });
            app.advance_to(now + 500);
        }
    }

    fn playing_app() -> (TestApp, GazeFeed) {
        let (mut app, feed) = app_with(ChannelGaze::new());
        app.start_calibration().unwrap();
        app.advance_to(DEFAULT_WARMUP_MS);
        calibrate(&mut app);
        let now = app.now_ms();
        app.advance_to(now + CALIBRATION_HANDOFF_MS);
        assert_eq!(app.screen(), Screen::Playing);
        (app, feed)
    }

    #[test]
    fn full_flow_reaches_play() {
        let (mut app, feed) = app_with(ChannelGaze::new());
        assert_eq!(app.screen(), Screen::Menu);

        app.start_calibration().unwrap();
        assert_eq!(app.screen(), Screen::Loading);
        assert_eq!(app.session().state(), GameState::Calibrating);

        app.advance_to(DEFAULT_WARMUP_MS - 1);
        assert_eq!(app.screen(), Screen::Loading);
        app.advance_to(DEFAULT_WARMUP_MS);
        assert_eq!(app.screen(), Screen::Calibrating);

        calibrate(&mut app);
        assert!(app.calibration().is_complete());
        assert!(app.provider().is_calibrated());
        assert_eq!(feed.recorded_positions().len(), POINT_COUNT * 6);
        assert_eq!(app.screen(), Screen::Calibrating);

        let now = app.now_ms();
        app.advance_to(now + CALIBRATION_HANDOFF_MS);
        assert_eq!(app.screen(), Screen::Playing);
        assert_eq!(app.session().state(), GameState::Playing);
        assert!(app.provider().gaze_dot_visible());
    }

    #[test]
    fn init_failure_returns_to_menu_and_can_retry() {
        let (mut app, _feed) =
            app_with(ChannelGaze::new().with_begin_failure(InitError::PermissionDenied));

        assert_eq!(app.start_calibration(), Err(InitError::PermissionDenied));
        assert_eq!(app.screen(), Screen::Menu);
        assert_eq!(app.last_error(), Some(&InitError::PermissionDenied));

        app.start_calibration().unwrap();
        assert_eq!(app.screen(), Screen::Loading);
        assert_eq!(app.last_error(), None);
    }

    #[test]
    fn leaving_during_warmup_is_safe() {
        let (mut app, _feed) = app_with(ChannelGaze::new());
        app.start_calibration().unwrap();
        app.return_to_menu();
        assert_matches!(app.provider().state(), ProviderState::Initializing { .. });

        app.advance_to(10_000);
        assert_eq!(app.screen(), Screen::Menu);

        // coming back picks up the same initialization
        app.start_calibration().unwrap();
        app.advance_to(10_000);
        assert_eq!(app.screen(), Screen::Calibrating);
    }

    #[test]
    fn warmup_after_leaving_stays_on_menu_screens() {
        let (mut app, _feed) = app_with(ChannelGaze::new());
        app.start_calibration().unwrap();
        app.return_to_menu();
        app.show_instructions();

        app.advance_to(DEFAULT_WARMUP_MS * 2);
        assert_eq!(app.screen(), Screen::Instructions);
        assert_eq!(app.calibration().state(), CalibrationState::Idle);
    }

    #[test]
    fn out_of_order_calibration_click_is_ignored() {
        let (mut app, feed) = app_with(ChannelGaze::new());
        app.start_calibration().unwrap();
        app.advance_to(DEFAULT_WARMUP_MS);

        assert_eq!(app.click_calibration_point(2), ClickOutcome::Ignored);
        assert_eq!(app.calibration().current_index(), Some(0));
        assert!(feed.recorded_positions().is_empty());
    }

    #[test]
    fn empty_match_ends_without_record() {
        let (mut app, _feed) = playing_app();
        let start = app.now_ms();
        app.advance_to(start + 60_000);

        assert_eq!(app.screen(), Screen::GameOver);
        let summary = *app.last_summary().unwrap();
        assert_eq!(summary.score, 0);
        assert_eq!(summary.accuracy_percent(), 0);
        assert!(!app.new_high_score());
        assert!(app.top_scores(10).is_empty());
        assert_eq!(app.high_score(), 0);
        assert_eq!(app.provider().state(), ProviderState::Paused);
        assert!(!app.provider().gaze_dot_visible());
    }

    #[test]
    fn gazing_at_a_target_scores_and_persists() {
        let (mut app, feed) = playing_app();
        let (cx, cy) = app.session().targets()[0].center();
        let start = app.now_ms();
        feed.push(cx, cy, start);

        app.advance_to(start + 2_000);
        assert!(app.session().targets_caught() >= 1);
        assert_eq!(app.session().score(), 10 * app.session().targets_caught());

        app.advance_to(start + 60_000);
        assert_eq!(app.screen(), Screen::GameOver);
        assert!(app.new_high_score());
        let best = app.last_summary().unwrap().score;
        assert_eq!(app.high_score(), best);
        assert_eq!(app.top_scores(10).len(), 1);
    }

    #[test]
    fn returning_to_menu_cancels_the_match() {
        let (mut app, _feed) = playing_app();
        app.return_to_menu();
        assert_eq!(app.screen(), Screen::Menu);
        assert_eq!(app.session().state(), GameState::Menu);

        let now = app.now_ms();
        app.advance_to(now + 120_000);
        assert_eq!(app.screen(), Screen::Menu);
        assert!(app.session().targets().is_empty());
        assert_eq!(app.session().time_remaining_secs(), 60);
    }

    #[test]
    fn hidden_window_pauses_tracking() {
        let (mut app, feed) = playing_app();
        app.set_visibility(true);
        assert_eq!(app.provider().state(), ProviderState::Paused);
        assert!(!feed.push(10.0, 10.0, 0));

        app.set_visibility(false);
        assert!(app.provider().is_ready());
        assert!(feed.push(10.0, 10.0, 0));
    }

    #[test]
    fn restart_skips_warmup_once_ready() {
        let (mut app, _feed) = playing_app();
        let now = app.now_ms();
        app.advance_to(now + 60_000);
        assert_eq!(app.screen(), Screen::GameOver);

        app.restart().unwrap();
        assert_eq!(app.screen(), Screen::Calibrating);
        assert!(app.provider().is_ready());
    }

    #[test]
    fn menu_screens_only_from_idle() {
        let (mut app, _feed) = playing_app();
        app.show_leaderboard();
        assert_eq!(app.screen(), Screen::Playing);

        app.return_to_menu();
        app.show_instructions();
        assert_eq!(app.screen(), Screen::Instructions);
        app.show_leaderboard();
        assert_eq!(app.screen(), Screen::Leaderboard);
    }
}
