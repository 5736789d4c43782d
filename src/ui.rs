use itertools::Itertools;
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Widget, Wrap},
};

use crate::app::{App, Screen};
use crate::calibration::CalibrationFrame;
use crate::game::{GameFrame, TargetView};
use crate::gaze::GazeCapability;
use crate::storage::ScoreStore;
use crate::target::TargetKind;

/// A terminal cell stands for this many surface pixels.
pub const CELL_WIDTH_PX: f64 = 10.0;
pub const CELL_HEIGHT_PX: f64 = 20.0;

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;
const LEADERBOARD_SIZE: usize = 10;

/// Pixel size of a play surface `cols` x `rows` cells large.
pub fn surface_px(cols: u16, rows: u16) -> (f64, f64) {
    (cols as f64 * CELL_WIDTH_PX, rows as f64 * CELL_HEIGHT_PX)
}

/// Pixel coordinate of the center of a cell.
pub fn cell_to_px(col: u16, row: u16) -> (f64, f64) {
    (
        (col as f64 + 0.5) * CELL_WIDTH_PX,
        (row as f64 + 0.5) * CELL_HEIGHT_PX,
    )
}

pub fn px_to_cell(x: f64, y: f64) -> (u16, u16) {
    let col = (x / CELL_WIDTH_PX).floor().clamp(0.0, u16::MAX as f64) as u16;
    let row = (y / CELL_HEIGHT_PX).floor().clamp(0.0, u16::MAX as f64) as u16;
    (col, row)
}

fn put(buf: &mut Buffer, area: Rect, col: u16, row: u16, symbol: &str, style: Style) {
    if col >= area.width || row >= area.height {
        return;
    }
    if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
        cell.set_symbol(symbol);
        cell.set_style(style);
    }
}

impl<C: GazeCapability, S: ScoreStore> Widget for &App<C, S> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.screen() {
            Screen::Menu => render_menu(self, area, buf),
            Screen::Instructions => render_instructions(area, buf),
            Screen::Leaderboard => render_leaderboard(self, area, buf),
            Screen::Loading => render_loading(area, buf),
            Screen::Calibrating => {
                CalibrationView(&self.calibration_frame()).render(area, buf);
            }
            Screen::Playing => {
                PlayField {
                    frame: &self.game_frame(),
                    gaze_dot: self.provider().gaze_dot(),
                }
                .render(area, buf);
            }
            Screen::GameOver => render_game_over(self, area, buf),
        }
    }
}

fn centered_column(area: Rect, lines: u16) -> Rect {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(area.height.saturating_sub(lines) / 2),
            Constraint::Length(lines),
            Constraint::Min(0),
        ])
        .split(area);
    chunks[1]
}

fn hint_style() -> Style {
    Style::default()
        .add_modifier(Modifier::DIM)
        .add_modifier(Modifier::ITALIC)
}

fn render_menu<C: GazeCapability, S: ScoreStore>(app: &App<C, S>, area: Rect, buf: &mut Buffer) {
    let bold_style = Style::default().add_modifier(Modifier::BOLD);

    let mut lines = vec![
        Line::from(Span::styled(
            "EYE CATCH",
            bold_style.fg(Color::Cyan),
        )),
        Line::from(Span::styled(
            "catch targets by looking at them",
            Style::default().add_modifier(Modifier::ITALIC),
        )),
        Line::default(),
        Line::from(format!("High score: {}", app.high_score())),
        Line::default(),
    ];

    if let Some(err) = app.last_error() {
        lines.push(Line::from(Span::styled(
            format!("Could not start gaze tracking: {}", err),
            bold_style.fg(Color::Red),
        )));
        lines.push(Line::default());
    }

    lines.push(Line::from(Span::styled(
        "(enter) play / (i)nstructions / (l)eaderboard / (q)uit",
        hint_style(),
    )));

    let height = lines.len() as u16;
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(centered_column(area, height), buf);
}

fn render_instructions(area: Rect, buf: &mut Buffer) {
    let text = vec![
        Line::from(Span::styled(
            "How to play",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::default(),
        Line::from("1. Calibrate: look at each dot and click it (or press space)."),
        Line::from("   Dots light up one at a time, nine in total."),
        Line::from("2. Targets appear on screen. Keep your gaze on one for 2 seconds"),
        Line::from("   to catch it. Looking away drains its progress."),
        Line::from("3. Normal targets are worth 10 points, golden bonus targets 20."),
        Line::from("4. Every 10 seconds the level rises: targets get smaller,"),
        Line::from("   spawn faster and vanish sooner."),
        Line::from("5. The match lasts one minute."),
        Line::default(),
        Line::from(Span::styled("(b)ack", hint_style())),
    ];
    let height = text.len() as u16 + 2;
    Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Instructions"))
        .wrap(Wrap { trim: false })
        .render(centered_column(area, height), buf);
}

fn render_leaderboard<C: GazeCapability, S: ScoreStore>(
    app: &App<C, S>,
    area: Rect,
    buf: &mut Buffer,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(VERTICAL_MARGIN)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    let records = app.top_scores(LEADERBOARD_SIZE);
    if records.is_empty() {
        Paragraph::new("No scores yet. Play a game to set one!")
            .block(Block::default().borders(Borders::ALL).title("Leaderboard"))
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .render(chunks[0], buf);
    } else {
        let header = Row::new(vec!["#", "Score", "Level", "Targets", "Date"]).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
        let rows = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                Row::new(vec![
                    Cell::from(format!("{}", i + 1)),
                    Cell::from(r.score.to_string()),
                    Cell::from(r.level.to_string()),
                    Cell::from(r.targets.to_string()),
                    Cell::from(r.formatted_date()),
                ])
            })
            .collect_vec();
        Widget::render(
            Table::new(
                rows,
                [
                    Constraint::Length(4),
                    Constraint::Length(8),
                    Constraint::Length(7),
                    Constraint::Length(9),
                    Constraint::Min(12),
                ],
            )
            .header(header)
            .block(Block::default().borders(Borders::ALL).title("Leaderboard")),
            chunks[0],
            buf,
        );
    }

    Paragraph::new(Span::styled("(b)ack", hint_style()))
        .alignment(Alignment::Center)
        .render(chunks[1], buf);
}

fn render_loading(area: Rect, buf: &mut Buffer) {
    Paragraph::new(vec![
        Line::from(Span::styled(
            "Starting gaze tracking...",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::ITALIC),
        )),
        Line::default(),
        Line::from(Span::styled("(esc) cancel", hint_style())),
    ])
    .alignment(Alignment::Center)
    .render(centered_column(area, 3), buf);
}

fn render_game_over<C: GazeCapability, S: ScoreStore>(
    app: &App<C, S>,
    area: Rect,
    buf: &mut Buffer,
) {
    let Some(summary) = app.last_summary() else {
        return;
    };
    let bold_style = Style::default().add_modifier(Modifier::BOLD);

    let mut lines = vec![
        Line::from(Span::styled("GAME OVER", bold_style.fg(Color::Magenta))),
        Line::default(),
        Line::from(Span::styled(
            format!("Score: {}", summary.score),
            bold_style,
        )),
        Line::from(format!("Level reached: {}", summary.level)),
        Line::from(format!(
            "Targets caught: {} / {}",
            summary.targets_caught, summary.targets_spawned
        )),
        Line::from(format!("Accuracy: {}%", summary.accuracy_percent())),
        Line::default(),
        Line::from(Span::styled(
            summary.tier().message(),
            Style::default().add_modifier(Modifier::ITALIC),
        )),
    ];
    if app.new_high_score() {
        lines.push(Line::from(Span::styled(
            "New high score!",
            bold_style.fg(Color::Green),
        )));
    } else {
        lines.push(Line::from(format!("High score: {}", app.high_score())));
    }
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "(r)etry / (m)enu / (l)eaderboard / (q)uit",
        hint_style(),
    )));

    let height = lines.len() as u16;
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .render(centered_column(area, height), buf);
}

struct CalibrationView<'a>(&'a CalibrationFrame);

impl Widget for CalibrationView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let frame = self.0;
        let header = format!(
            "Calibration {}/{}: look at the highlighted dot and click it (space works too)",
            frame.completed,
            frame.points.len()
        );
        Paragraph::new(Span::styled(header, hint_style())).render(
            Rect {
                height: 1.min(area.height),
                ..area
            },
            buf,
        );

        for point in &frame.points {
            let (col, row) = px_to_cell(point.x, point.y);
            let (symbol, style) = if Some(point.index) == frame.active_index {
                (
                    "◉",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            } else if point.index < frame.completed {
                ("●", Style::default().fg(Color::Green))
            } else {
                ("○", Style::default().add_modifier(Modifier::DIM))
            };
            put(buf, area, col, row, symbol, style);
        }
    }
}

/// The match: targets, their dwell progress, the HUD and the gaze indicator.
struct PlayField<'a> {
    frame: &'a GameFrame,
    gaze_dot: Option<(f64, f64)>,
}

impl PlayField<'_> {
    fn render_target(target: &TargetView, area: Rect, buf: &mut Buffer) {
        let (left, top) = px_to_cell(target.x, target.y);
        let (right, bottom) = px_to_cell(target.x + target.size_px, target.y + target.size_px);
        let width = right.saturating_sub(left).max(1);
        let height = bottom.saturating_sub(top).max(1);

        let color = match (target.captured, target.kind) {
            (true, _) => Color::Green,
            (false, TargetKind::Bonus) => Color::Yellow,
            (false, TargetKind::Normal) => Color::Cyan,
        };

        // progress fills the square bottom up
        let filled_rows = (target.progress * height as f64).round() as u16;
        for dy in 0..height {
            let filled = target.captured || dy >= height - filled_rows;
            let (symbol, style) = if filled {
                ("█", Style::default().fg(color))
            } else {
                ("░", Style::default().fg(color).add_modifier(Modifier::DIM))
            };
            for dx in 0..width {
                put(buf, area, left + dx, top + dy, symbol, style);
            }
        }
    }
}

impl Widget for PlayField<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for target in &self.frame.targets {
            Self::render_target(target, area, buf);
        }

        if let Some((x, y)) = self.gaze_dot {
            let (col, row) = px_to_cell(x, y);
            put(
                buf,
                area,
                col,
                row,
                "◎",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            );
        }

        let hud = Line::from(vec![
            Span::styled(
                format!(" Score: {} ", self.frame.score),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" Level: {} ", self.frame.level)),
            Span::styled(
                format!(" Time: {}s ", self.frame.time_remaining_secs),
                if self.frame.time_remaining_secs <= 10 {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                },
            ),
            Span::styled(" (esc) menu", hint_style()),
        ]);
        Paragraph::new(hud).render(
            Rect {
                height: 1.min(area.height),
                ..area
            },
            buf,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationController;
    use crate::game::{GameRules, GameSession};
    use crate::gaze::{ChannelGaze, GazeProvider};
    use crate::storage::ScoreDb;
    use ratatui::{backend::TestBackend, Terminal};

    fn test_app() -> App<ChannelGaze, ScoreDb> {
        let rules = GameRules {
            bonus_chance: 0.0,
            ..GameRules::default()
        };
        let mut app = App::from_parts(
            GazeProvider::with_warmup(ChannelGaze::new(), 0),
            CalibrationController::with_seed(1),
            GameSession::with_seed(rules, 1),
            ScoreDb::open_in_memory().unwrap(),
        );
        let (w, h) = surface_px(80, 24);
        app.resize(w, h);
        app
    }

    fn rendered(app: &App<ChannelGaze, ScoreDb>) -> String {
        let area = Rect::new(0, 0, 80, 24);
        let mut buffer = Buffer::empty(area);
        app.render(area, &mut buffer);
        buffer
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect::<String>()
    }

    #[test]
    fn cell_mapping_roundtrips_through_centers() {
        assert_eq!(surface_px(80, 24), (800.0, 480.0));
        assert_eq!(cell_to_px(0, 0), (5.0, 10.0));
        assert_eq!(px_to_cell(5.0, 10.0), (0, 0));
        let (x, y) = cell_to_px(33, 7);
        assert_eq!(px_to_cell(x, y), (33, 7));
        assert_eq!(px_to_cell(-3.0, -1.0), (0, 0));
    }

    #[test]
    fn menu_shows_high_score_and_hints() {
        let app = test_app();
        let out = rendered(&app);
        assert!(out.contains("EYE CATCH"));
        assert!(out.contains("High score: 0"));
        assert!(out.contains("(i)nstructions"));
    }

    #[test]
    fn menu_shows_init_error() {
        let mut app = App::from_parts(
            GazeProvider::new(
                ChannelGaze::new().with_begin_failure(crate::error::InitError::PermissionDenied),
            ),
            CalibrationController::with_seed(1),
            GameSession::with_seed(GameRules::default(), 1),
            ScoreDb::open_in_memory().unwrap(),
        );
        assert!(app.start_calibration().is_err());
        let area = Rect::new(0, 0, 100, 24);
        let mut buffer = Buffer::empty(area);
        (&app).render(area, &mut buffer);
        let out = buffer.content().iter().map(|c| c.symbol()).collect::<String>();
        assert!(out.contains("camera permission denied"));
    }

    #[test]
    fn empty_leaderboard_says_so() {
        let mut app = test_app();
        app.show_leaderboard();
        assert!(rendered(&app).contains("No scores yet"));
    }

    #[test]
    fn leaderboard_lists_saved_scores() {
        let mut db = ScoreDb::open_in_memory().unwrap();
        db.save_score(120, 3, 12).unwrap();
        db.save_score(40, 1, 4).unwrap();
        let mut app = App::from_parts(
            GazeProvider::new(ChannelGaze::new()),
            CalibrationController::with_seed(1),
            GameSession::with_seed(GameRules::default(), 1),
            db,
        );
        app.show_leaderboard();
        let out = rendered(&app);
        assert!(out.contains("Leaderboard"));
        assert!(out.contains("120"));
        assert!(out.contains("40"));
    }

    #[test]
    fn calibration_marks_active_point() {
        let mut app = test_app();
        app.start_calibration().unwrap();
        app.advance_to(0);
        let out = rendered(&app);
        assert!(out.contains("Calibration 0/9"));
        assert_eq!(out.matches('◉').count(), 1);
        assert_eq!(out.matches('○').count(), 8);
    }

    #[test]
    fn play_field_draws_hud_and_targets() {
        let mut app = test_app();
        app.start_game();
        let out = rendered(&app);
        assert!(out.contains("Score: 0"));
        assert!(out.contains("Level: 1"));
        assert!(out.contains("Time: 60s"));
        assert!(out.contains('░'));
    }

    #[test]
    fn target_progress_fills_bottom_up() {
        let frame = GameFrame {
            score: 0,
            level: 1,
            time_remaining_secs: 60,
            targets: vec![TargetView {
                id: 1,
                x: 100.0,
                y: 100.0,
                size_px: 40.0,
                kind: TargetKind::Normal,
                progress: 0.5,
                captured: false,
            }],
        };
        let area = Rect::new(0, 0, 40, 12);
        let mut buf = Buffer::empty(area);
        PlayField {
            frame: &frame,
            gaze_dot: Some((5.0, 230.0)),
        }
        .render(area, &mut buf);

        // 4 columns x 2 rows starting at cell (10, 5)
        assert_eq!(buf[(10, 5)].symbol(), "░");
        assert_eq!(buf[(10, 6)].symbol(), "█");
        assert_eq!(buf[(13, 6)].symbol(), "█");
        assert_eq!(buf[(0, 11)].symbol(), "◎");
    }

    #[test]
    fn game_over_shows_summary_and_tier() {
        let mut app = test_app();
        app.start_game();
        let now = app.now_ms();
        app.advance_to(now + 60_000);
        let out = rendered(&app);
        assert!(out.contains("GAME OVER"));
        assert!(out.contains("Score: 0"));
        assert!(out.contains("Accuracy: 0%"));
        assert!(out.contains("Give it another try!"));
    }

    #[test]
    fn renders_on_small_terminals() {
        let mut app = test_app();
        app.start_game();
        let backend = TestBackend::new(20, 5);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| f.render_widget(&app, f.area())).unwrap();
    }
}
