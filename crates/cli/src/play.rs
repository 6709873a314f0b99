use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use spindle_core::{
    PlaybackController, PlayerConfig, PlayerEvent, PlayerSnapshot, RemoteCommand, RouteChange,
    SpectrumFrame, SystemEvent, Track, TrackId,
};
use spindle_spectrum::BUCKET_COUNT;

const TICK: Duration = Duration::from_millis(50);
const DISPLAY_INTERVAL: Duration = Duration::from_millis(500);
const DISPLAY_BARS: usize = 16;
const DEFAULT_SKIP_SECS: f64 = 10.0;
const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

const HELP: &str = "commands: p (play/pause)  n  b  s (stop)  seek <s>  f [s]  r [s]  \
rate <x>  reverb <0-100>  loop  viz  interrupt  resume  unplug  plug  q";

/// One line typed on stdin.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Remote(RemoteCommand),
    System(SystemEvent),
    Rate(f32),
    Reverb(f32),
    ToggleLoop,
    ToggleVisualization,
    Help,
    Quit,
}

fn parse(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let argument = words.next().and_then(|w| w.parse::<f64>().ok());

    let input = match command {
        "p" | "play" | "pause" => Input::Remote(RemoteCommand::TogglePlayPause),
        "n" | "next" => Input::Remote(RemoteCommand::Next),
        "b" | "prev" | "previous" => Input::Remote(RemoteCommand::Previous),
        "s" | "stop" => Input::Remote(RemoteCommand::Stop),
        "seek" => Input::Remote(RemoteCommand::SeekTo(argument?)),
        "f" => Input::Remote(RemoteCommand::SkipForward(
            argument.unwrap_or(DEFAULT_SKIP_SECS),
        )),
        "r" => Input::Remote(RemoteCommand::SkipBackward(
            argument.unwrap_or(DEFAULT_SKIP_SECS),
        )),
        "rate" => Input::Rate(argument? as f32),
        "reverb" => Input::Reverb(argument? as f32),
        "loop" => Input::ToggleLoop,
        "viz" => Input::ToggleVisualization,
        "interrupt" => Input::System(SystemEvent::InterruptionBegan),
        "resume" => Input::System(SystemEvent::InterruptionEnded {
            should_resume: true,
        }),
        "unplug" => Input::System(SystemEvent::RouteChanged(RouteChange::DeviceRemoved)),
        "plug" => Input::System(SystemEvent::RouteChanged(RouteChange::DeviceAdded)),
        "h" | "help" | "?" => Input::Help,
        "q" | "quit" => Input::Quit,
        _ => return None,
    };
    Some(input)
}

pub fn run(
    config: PlayerConfig,
    files: Vec<PathBuf>,
    shuffle: bool,
    loop_single: bool,
) -> anyhow::Result<()> {
    let tracks: Vec<Track> = files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Track::new(TrackId(i as u64), name, path.as_path())
        })
        .collect();

    let mut player = PlaybackController::with_default_output(config)?;
    player.set_loop_single(loop_single || player.loop_single());
    player.play_playlist(tracks, shuffle)?;
    println!("{HELP}");

    let (lines_tx, lines) = unbounded();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    let mut stdin_open = true;
    let mut last_display = Instant::now();
    loop {
        if stdin_open {
            match lines.recv_timeout(TICK) {
                Ok(line) => match parse(&line) {
                    Some(Input::Quit) => break,
                    Some(input) => apply(&mut player, input),
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command '{}'", line.trim()),
                },
                Err(RecvTimeoutError::Timeout) => {}
                // Piped input ran out; keep playing until the queue does.
                Err(RecvTimeoutError::Disconnected) => stdin_open = false,
            }
        } else {
            thread::sleep(TICK);
        }

        let mut ended = false;
        for event in player.poll() {
            match event {
                PlayerEvent::TrackChanged(Some(track)) => println!("now playing: {}", track.name),
                PlayerEvent::TrackChanged(None) => {}
                PlayerEvent::StateChanged(status) => log::debug!("state: {status}"),
                PlayerEvent::DurationKnown(duration) => log::debug!("duration: {duration:.1}s"),
                PlayerEvent::PlaybackEnded => ended = true,
                PlayerEvent::Error(err) => eprintln!("error: {err}"),
            }
        }
        if ended {
            println!("playback ended");
            break;
        }

        if last_display.elapsed() >= DISPLAY_INTERVAL {
            last_display = Instant::now();
            if player.state().is_playing() {
                let snapshot = player.snapshot();
                println!("{}", status_line(&snapshot, &player.visualization()));
            }
        }
    }

    player.stop()?;
    Ok(())
}

fn apply(player: &mut PlaybackController, input: Input) {
    let result = match input {
        Input::Remote(command) => player.handle_remote(command),
        Input::System(event) => player.handle_system_event(event),
        Input::Rate(rate) => player.set_playback_rate(rate),
        Input::Reverb(mix) => player.set_reverb_mix(mix),
        Input::ToggleLoop => {
            let enabled = !player.loop_single();
            player.set_loop_single(enabled);
            println!("loop {}", if enabled { "on" } else { "off" });
            Ok(())
        }
        Input::ToggleVisualization => {
            let enabled = !player.visualization_enabled();
            println!("spectrum {}", if enabled { "on" } else { "off" });
            player.set_visualization_enabled(enabled)
        }
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Quit => Ok(()),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
    }
}

fn status_line(snapshot: &PlayerSnapshot, frame: &SpectrumFrame) -> String {
    let mut line = format!(
        "{:<9} {:>7.1}/{:.1}s",
        snapshot.status.as_str(),
        snapshot.position,
        snapshot.duration,
    );
    if snapshot.loop_single {
        line.push_str(" (loop)");
    }
    if snapshot.effects.playback_rate != 1.0 {
        line.push_str(&format!(" x{:.2}", snapshot.effects.playback_rate));
    }
    line.push_str(&format!("  |{}|", bars(frame)));
    line
}

/// Folds the analyzer's buckets into a short bar string.
fn bars(frame: &SpectrumFrame) -> String {
    let per_bar = BUCKET_COUNT / DISPLAY_BARS;
    frame
        .buckets
        .chunks(per_bar)
        .map(|chunk| {
            let level = chunk.iter().sum::<f32>() / chunk.len() as f32;
            let index = (level.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[index]
        })
        .collect()
}
