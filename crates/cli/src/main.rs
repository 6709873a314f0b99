//! `spindle`: play local audio files from the terminal, or bounce one
//! through the effect chain into a WAV.

mod play;
mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spindle_core::PlayerConfig;

#[derive(Parser)]
#[command(name = "spindle", about = "Local audio player with a live spectrum", version)]
struct Cli {
    /// Config file to use instead of the one in the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play files through the default output device, reading commands from stdin
    Play {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        shuffle: bool,

        /// Repeat the current track
        #[arg(long = "loop")]
        loop_single: bool,
    },
    /// Render a file through the time/pitch and reverb nodes into a float WAV
    Render {
        input: PathBuf,
        output: PathBuf,

        /// Playback rate, 0.5 to 2.0
        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        /// Reverb wet mix, 0 to 100
        #[arg(long, default_value_t = 0.0)]
        reverb: f32,

        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it back, filling in any missing keys
        #[arg(long)]
        write: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PlayerConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PlayerConfig::load(),
    };

    match cli.command {
        Command::Play {
            files,
            shuffle,
            loop_single,
        } => play::run(config, files, shuffle, loop_single),
        Command::Render {
            input,
            output,
            rate,
            reverb,
            sample_rate,
        } => {
            let config = PlayerConfig {
                playback_rate: rate,
                reverb_mix: reverb,
                loop_single: false,
                ..config
            };
            render::run(config, &input, &output, sample_rate)
        }
        Command::Config { write } => {
            print!("{}", config.to_toml_string()?);
            if write {
                let path = match &cli.config {
                    Some(path) => config.save_to(path).map(|()| path.clone()),
                    None => config.save(),
                }?;
                log::info!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}
