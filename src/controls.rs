use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use tracing::debug;

use crate::app::{App, Screen};
use crate::gaze::{GazeCapability, GazeFeed};
use crate::runtime::InputEvent;
use crate::storage::ScoreStore;
use crate::ui::{cell_to_px, surface_px};

/// How far from a calibration dot (in pixels) a click still counts as on it.
pub const CLICK_TOLERANCE_PX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Apply one terminal event to the app at time `now_ms`.
///
/// Pointer motion is forwarded to `feed` as a gaze sample, so the mouse stands
/// in for the eyes when no camera estimator is attached.
pub fn handle_event<C: GazeCapability, S: ScoreStore>(
    app: &mut App<C, S>,
    feed: Option<&GazeFeed>,
    event: &InputEvent,
    now_ms: u64,
) -> Control {
    match event {
        InputEvent::Tick => {
            app.advance_to(now_ms);
            Control::Continue
        }
        InputEvent::Resize(cols, rows) => {
            let (w, h) = surface_px(*cols, *rows);
            app.resize(w, h);
            Control::Continue
        }
        InputEvent::Hidden(hidden) => {
            app.set_visibility(*hidden);
            Control::Continue
        }
        InputEvent::Mouse(mouse) => {
            handle_mouse(app, feed, mouse, now_ms);
            Control::Continue
        }
        InputEvent::Key(key) => handle_key(app, key),
    }
}

fn handle_mouse<C: GazeCapability, S: ScoreStore>(
    app: &mut App<C, S>,
    feed: Option<&GazeFeed>,
    mouse: &MouseEvent,
    now_ms: u64,
) {
    let (x, y) = cell_to_px(mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::Moved | MouseEventKind::Drag(_) => {
            if let Some(feed) = feed {
                feed.push(x, y, now_ms);
            }
        }
        MouseEventKind::Down(MouseButton::Left) if app.screen() == Screen::Calibrating => {
            if let Some(index) = calibration_point_at(app, x, y) {
                app.click_calibration_point(index);
            } else {
                debug!(x, y, "click missed every calibration point");
            }
        }
        _ => {}
    }
}

fn calibration_point_at<C: GazeCapability, S: ScoreStore>(
    app: &App<C, S>,
    x: f64,
    y: f64,
) -> Option<usize> {
    app.calibration()
        .points()
        .iter()
        .map(|p| (p.index, (p.x - x).hypot(p.y - y)))
        .filter(|&(_, d)| d <= CLICK_TOLERANCE_PX)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

fn handle_key<C: GazeCapability, S: ScoreStore>(app: &mut App<C, S>, key: &KeyEvent) -> Control {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Control::Quit;
    }

    match app.screen() {
        Screen::Menu => match key.code {
            KeyCode::Enter | KeyCode::Char('s') | KeyCode::Char('p') => {
                // a failure lands back on the menu with the error shown
                let _ = app.start_calibration();
            }
            KeyCode::Char('i') => app.show_instructions(),
            KeyCode::Char('l') => app.show_leaderboard(),
            KeyCode::Char('q') | KeyCode::Esc => return Control::Quit,
            _ => {}
        },
        Screen::Instructions | Screen::Leaderboard => match key.code {
            KeyCode::Esc | KeyCode::Backspace | KeyCode::Char('b') | KeyCode::Char('m') => {
                app.return_to_menu()
            }
            KeyCode::Char('q') => return Control::Quit,
            _ => {}
        },
        Screen::Loading | Screen::Playing => {
            if key.code == KeyCode::Esc {
                app.return_to_menu();
            }
        }
        Screen::Calibrating => match key.code {
            KeyCode::Char(' ') | KeyCode::Enter => {
                if let Some(index) = app.calibration().current_index() {
                    app.click_calibration_point(index);
                }
            }
            KeyCode::Esc => app.return_to_menu(),
            _ => {}
        },
        Screen::GameOver => match key.code {
            KeyCode::Char('r') | KeyCode::Enter => {
                let _ = app.restart();
            }
            KeyCode::Char('m') | KeyCode::Esc => app.return_to_menu(),
            KeyCode::Char('l') => app.show_leaderboard(),
            KeyCode::Char('q') => return Control::Quit,
            _ => {}
        },
    }
    Control::Continue
}
