// Interactive single-screen player view

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use parking_lot::Mutex;
use quaver_core::{PlayState, PlaybackSnapshot, Player};
use quaver_player::StreamPlayer;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(250);
const SEEK_STEP: Duration = Duration::from_secs(10);
const VOLUME_STEP: f64 = 0.1;

/// What the view shows about the current track.
pub struct TrackDisplay {
    pub title: String,
    pub artist: String,
}

/// Re-resolves the (possibly expired) signed URL when the user restarts a
/// prematurely stopped track.
pub type StreamRefresh = Box<dyn Fn() -> quaver_core::Result<(String, Option<Duration>)>>;

pub fn run_player_view(
    player: &StreamPlayer,
    display: TrackDisplay,
    refresh: StreamRefresh,
) -> Result<()> {
    // The controller preserves the position across a premature stop; the
    // restart decision is made here, not inside the core.
    let premature_at: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&premature_at);
    player.on_premature_stop(move |position| *sink.lock() = Some(position));

    enable_raw_mode()?;
    std::io::stdout().execute(EnterAlternateScreen)?;
    let result = event_loop(player, &display, &refresh, &premature_at);
    std::io::stdout().execute(LeaveAlternateScreen)?;
    disable_raw_mode()?;

    let _ = player.stop();
    result
}

fn event_loop(
    player: &StreamPlayer,
    display: &TrackDisplay,
    refresh: &StreamRefresh,
    premature_at: &Mutex<Option<Duration>>,
) -> Result<()> {
    let mut terminal = ratatui::Terminal::new(CrosstermBackend::new(std::io::stdout()))?;

    loop {
        let snapshot = player.snapshot();
        let premature = *premature_at.lock();
        terminal.draw(|frame| draw(frame, display, &snapshot, premature))?;

        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char(' ') => toggle_play_pause(player, refresh, premature_at),
            KeyCode::Left => {
                let target = snapshot.position.saturating_sub(SEEK_STEP);
                let _ = player.seek(target);
            }
            KeyCode::Right => {
                let mut target = snapshot.position + SEEK_STEP;
                if !snapshot.duration.is_zero() {
                    target = target.min(snapshot.duration);
                }
                let _ = player.seek(target);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let _ = player.set_volume((snapshot.volume + VOLUME_STEP).min(1.0));
            }
            KeyCode::Char('-') => {
                let _ = player.set_volume((snapshot.volume - VOLUME_STEP).max(0.0));
            }
            _ => {}
        }
    }
}

/// Space toggles pause, and after a stop it restarts the stream: from the
/// preserved position for a premature stop, from the top for a completed
/// track.
fn toggle_play_pause(
    player: &StreamPlayer,
    refresh: &StreamRefresh,
    premature_at: &Mutex<Option<Duration>>,
) {
    match player.snapshot().state {
        PlayState::Playing => {
            let _ = player.pause();
        }
        PlayState::Paused => {
            let _ = player.resume();
        }
        PlayState::Stopped | PlayState::Completed => {
            let resume_at = premature_at.lock().take();
            let Ok((url, expected)) = refresh() else {
                return;
            };
            if player.play(&url, expected).is_ok() {
                if let Some(position) = resume_at {
                    let _ = player.seek(position);
                }
            }
        }
        _ => {}
    }
}

fn draw(
    frame: &mut ratatui::Frame,
    display: &TrackDisplay,
    snapshot: &PlaybackSnapshot,
    premature: Option<Duration>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(5),
            Constraint::Min(3),
        ])
        .split(frame.area());

    let header = Paragraph::new(vec![
        Line::from(display.title.clone()).style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from(format!("by {}", display.artist)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Now Playing"));
    frame.render_widget(header, chunks[0]);

    let status = match &snapshot.state {
        PlayState::Playing => "▶ playing".to_string(),
        PlayState::Paused => "⏸ paused".to_string(),
        PlayState::Loading => "… loading".to_string(),
        PlayState::Completed => "✔ completed — space to replay".to_string(),
        PlayState::Stopped => match premature {
            Some(at) => format!(
                "⏹ stream stopped early at {} — space to pick up there",
                format_duration(at)
            ),
            None => "⏹ stopped".to_string(),
        },
        PlayState::Idle => "idle".to_string(),
        PlayState::Errored { message, .. } => format!("✖ {}", message),
    };

    let ratio = if snapshot.duration.is_zero() {
        0.0
    } else {
        (snapshot.position.as_secs_f64() / snapshot.duration.as_secs_f64()).clamp(0.0, 1.0)
    };
    let label = format!(
        "{} / {}",
        format_duration(snapshot.position),
        format_duration(snapshot.duration)
    );

    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(status.clone()),
        )
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label);
    frame.render_widget(gauge, chunks[1]);

    let volume_percent = (snapshot.volume * 100.0).round() as u8;
    let footer = Paragraph::new(vec![
        Line::from(format!("volume: {}%", volume_percent)),
        Line::from("space: play/pause   ←/→: seek 10s   +/-: volume   q: quit")
            .style(Style::default().fg(Color::DarkGray)),
    ])
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, chunks[2]);
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(63)), "1:03");
        assert_eq!(format_duration(Duration::from_secs(600)), "10:00");
    }
}
