use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use spindle_core::{OutputFormat, PlaybackController, PlayerConfig, PlayerEvent, Track, TrackId};
use spindle_decode::{FileSourceProvider, SourceProvider};

const BLOCK_FRAMES: usize = 4096;
const CHANNELS: u16 = 2;

/// Bounce `input` through the render graph into a 32-bit float WAV at `output`.
pub fn run(
    config: PlayerConfig,
    input: &Path,
    output: &Path,
    sample_rate: u32,
) -> anyhow::Result<()> {
    let format = OutputFormat {
        sample_rate,
        channels: CHANNELS,
    };
    let sources: Arc<dyn SourceProvider> = Arc::new(FileSourceProvider::new());
    let (mut player, handle) = PlaybackController::offline(config, sources, format)?;

    let name = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    player.play(Track::new(TrackId(0), name, input))?;
    for event in player.sync()? {
        if let PlayerEvent::Error(err) = event {
            return Err(err).with_context(|| format!("opening {}", input.display()));
        }
    }

    let rate = f64::from(player.effects().playback_rate);
    let expected = (player.duration() / rate * f64::from(sample_rate)).ceil() as u64;
    log::info!(
        "rendering {} ({:.1}s at {rate}x, reverb {}%)",
        input.display(),
        player.duration(),
        player.effects().reverb_mix
    );

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("creating {}", output.display()))?;

    let mut block = vec![0.0f32; BLOCK_FRAMES * CHANNELS as usize];
    let mut written = 0u64;
    loop {
        handle.render_into(&mut block);
        let events = player.sync()?;
        let ended = events
            .iter()
            .any(|event| matches!(event, PlayerEvent::PlaybackEnded));

        // The block the source ended in is padded with silence; keep only what was played.
        let frames = if ended {
            (expected.saturating_sub(written) as usize).min(BLOCK_FRAMES)
        } else {
            BLOCK_FRAMES
        };
        for sample in &block[..frames * CHANNELS as usize] {
            writer.write_sample(*sample)?;
        }
        written += frames as u64;

        if ended {
            break;
        }
        if written > expected + u64::from(sample_rate) {
            bail!("render overran the source length");
        }
    }
    writer.finalize()?;

    log::info!("wrote {written} frames to {}", output.display());
    Ok(())
}
