//! `quaver` — a terminal client that streams tracks from a remote audio
//! service.
//!
//! Modes:
//! - `--search "query"`: print matching tracks and exit
//! - `--track <id>`: resolve the track through the API server and play it
//! - `--play <url>`: play a signed progressive media URL directly
//! - `--oneshot`: play to completion without the interactive view
//!
//! Exit codes: 0 success, 1 usage error, 2 runtime failure.

mod resolver;
mod ui;

use clap::Parser;
use quaver_core::{PlayState, Player};
use quaver_player::StreamPlayer;
use resolver::{HttpResolver, TrackResolver};
use std::process::ExitCode;
use std::time::Duration;
use ui::TrackDisplay;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "quaver", version = VERSION, about = "terminal streaming music client")]
struct Args {
    /// Search the service for tracks and print the matches.
    #[arg(long, value_name = "QUERY")]
    search: Option<String>,

    /// Resolve a track id through the API server and play it.
    #[arg(long, value_name = "ID")]
    track: Option<String>,

    /// Play a signed progressive media URL directly.
    #[arg(long, value_name = "URL")]
    play: Option<String>,

    /// Base URL of the resolver API server.
    #[arg(long, env = "QUAVER_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Initial volume in percent.
    #[arg(long, default_value_t = 80)]
    volume: u8,

    /// Play to completion without the interactive view.
    #[arg(long, default_value_t = false)]
    oneshot: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    if args.volume > 100 {
        eprintln!("error: --volume must be within 0..=100");
        return ExitCode::from(1);
    }

    if args.search.is_none() && args.track.is_none() && args.play.is_none() {
        eprintln!("error: nothing to do; pass --search, --track or --play (see --help)");
        return ExitCode::from(1);
    }

    print_disclaimer();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let resolver = HttpResolver::new(args.server.clone());

    if let Some(query) = args.search.as_deref() {
        return search_tracks(&resolver, query);
    }

    let player = StreamPlayer::new();
    player.set_volume(args.volume as f64 / 100.0)?;

    if let Some(track_id) = args.track.clone() {
        let info = resolver.resolve(&track_id)?;
        if args.oneshot {
            return play_oneshot(&player, &info.url, info.expected_duration());
        }

        // Metadata is display-only; a failed lookup never blocks playback.
        let display = match resolver.track(&track_id) {
            Ok(track) => TrackDisplay {
                title: track.title,
                artist: track.artist,
            },
            Err(e) => {
                log::warn!("track lookup failed: {}", e);
                TrackDisplay {
                    title: format!("track {}", track_id),
                    artist: "unknown artist".to_string(),
                }
            }
        };

        player.play(&info.url, info.expected_duration())?;
        let refresh: ui::StreamRefresh = Box::new(move || {
            resolver
                .resolve(&track_id)
                .map(|info| {
                    let duration = info.expected_duration();
                    (info.url, duration)
                })
        });
        let result = ui::run_player_view(&player, display, refresh);
        let _ = player.close();
        return result;
    }

    if let Some(url) = args.play.clone() {
        if args.oneshot {
            return play_oneshot(&player, &url, None);
        }

        player.play(&url, None)?;
        let display = TrackDisplay {
            title: url.clone(),
            artist: "direct stream".to_string(),
        };
        let replay_url = url.clone();
        let refresh: ui::StreamRefresh = Box::new(move || Ok((replay_url.clone(), None)));
        let result = ui::run_player_view(&player, display, refresh);
        let _ = player.close();
        return result;
    }

    Ok(())
}

fn search_tracks(resolver: &HttpResolver, query: &str) -> anyhow::Result<()> {
    println!("searching for: {query}\n");
    let tracks = resolver.search(query)?;
    if tracks.is_empty() {
        println!("no tracks found");
        return Ok(());
    }

    for (index, track) in tracks.iter().take(10).enumerate() {
        println!("{:2}. {}", index + 1, track.title);
        println!("    by {}", track.artist);
        println!("    duration: {} | id: {}\n", track.duration_string(), track.id);
    }
    Ok(())
}

/// Scripting mode: stream until the session reaches a terminal state.
fn play_oneshot(
    player: &StreamPlayer,
    url: &str,
    expected_duration: Option<Duration>,
) -> anyhow::Result<()> {
    player.play(url, expected_duration)?;

    loop {
        std::thread::sleep(Duration::from_millis(500));
        let snapshot = player.snapshot();
        match snapshot.state {
            PlayState::Playing | PlayState::Paused | PlayState::Loading => {
                println!(
                    "{} {} / {}",
                    snapshot.state,
                    ui::format_duration(snapshot.position),
                    ui::format_duration(snapshot.duration)
                );
            }
            PlayState::Completed => {
                println!("completed");
                break;
            }
            PlayState::Stopped => {
                println!(
                    "stream stopped early at {}",
                    ui::format_duration(snapshot.position)
                );
                break;
            }
            PlayState::Errored { .. } | PlayState::Idle => {
                if let Some(error) = snapshot.last_error {
                    anyhow::bail!("playback failed: {error}");
                }
                break;
            }
        }
    }

    let _ = player.close();
    Ok(())
}

fn print_disclaimer() {
    eprintln!("quaver streams from a third-party audio service; resolved media");
    eprintln!("URLs are signed and time-limited, and tracks remain the property");
    eprintln!("of their rights holders.\n");
}
