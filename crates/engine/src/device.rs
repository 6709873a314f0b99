use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use spindle_transport::OutputFormat;

use crate::config::CALLBACK_SCRATCH_FRAMES;
use crate::{AudioOutput, EngineError, RenderGraph};

/// The system's default output device.
///
/// The device is looked up again on every [`prepare`](AudioOutput::prepare),
/// so reconnecting after a route change lands on whatever is now the default.
pub struct CpalOutput {
    host: cpal::Host,
    device: Option<cpal::Device>,
    config: Option<cpal::SupportedStreamConfig>,
    stream: Option<cpal::Stream>,
    running: bool,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device: None,
            config: None,
            stream: None,
            running: false,
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn prepare(&mut self) -> Result<OutputFormat, EngineError> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| EngineError::StartFailed("no output device found".into()))?;
        let config = device
            .default_output_config()
            .map_err(|err| EngineError::StartFailed(err.to_string()))?;

        let format = OutputFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };
        if let Ok(name) = device.name() {
            log::info!(
                "output device '{name}': {} Hz, {} channels, {}",
                format.sample_rate,
                format.channels,
                config.sample_format()
            );
        }

        self.device = Some(device);
        self.config = Some(config);
        Ok(format)
    }

    fn connect(&mut self, graph: RenderGraph) -> Result<(), EngineError> {
        self.stop();
        let (Some(device), Some(config)) = (self.device.as_ref(), self.config.as_ref()) else {
            return Err(EngineError::NotConfigured);
        };

        let stream_config = config.config();
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(device, &stream_config, graph)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(device, &stream_config, graph)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(device, &stream_config, graph)?,
            sample_format => {
                return Err(EngineError::StartFailed(format!(
                    "unsupported sample format '{sample_format}'"
                )));
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let stream = self.stream.as_ref().ok_or(EngineError::NotConfigured)?;
        stream
            .play()
            .map_err(|err| EngineError::StartFailed(err.to_string()))?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream joins the callback; the graph goes with it.
        self.stream = None;
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut graph: RenderGraph,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut scratch = vec![0.0f32; CALLBACK_SCRATCH_FRAMES * channels];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(scratch.len()) {
                    let rendered = &mut scratch[..chunk.len()];
                    graph.process(rendered);
                    for (dst, src) in chunk.iter_mut().zip(rendered.iter()) {
                        *dst = T::from_sample(*src);
                    }
                }
            },
            |err| log::error!("output stream error: {err}"),
            None,
        )
        .map_err(|err| EngineError::StartFailed(err.to_string()))?;

    Ok(stream)
}
