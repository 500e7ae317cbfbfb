/// Default output device through cpal. The stream's data callback pulls
/// interleaved i16 samples and converts them to the device's sample type.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{info, warn};

use wlcast_proto::protocol::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};

use crate::player::PlayerError;

/// Preference among sample formats; 0 means unusable.
fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 2,
        SampleFormat::F32 => 1,
        _ => 0,
    }
}

/// Open and start a 48 kHz stereo stream on the default output device.
/// `fill` is called from the device's audio thread for every buffer.
pub fn open_output<F>(fill: F) -> Result<Stream, PlayerError>
where
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(PlayerError::NoDevice)?;
    let name = device.name().unwrap_or_else(|_| "unknown device".into());

    let range = device
        .supported_output_configs()?
        .filter(|r| {
            r.channels() as usize == AUDIO_CHANNELS
                && r.min_sample_rate().0 <= AUDIO_SAMPLE_RATE
                && r.max_sample_rate().0 >= AUDIO_SAMPLE_RATE
                && format_rank(r.sample_format()) > 0
        })
        .max_by_key(|r| format_rank(r.sample_format()))
        .ok_or_else(|| PlayerError::UnsupportedDevice(name.clone()))?;
    let format = range.sample_format();
    let config: StreamConfig = range
        .with_sample_rate(cpal::SampleRate(AUDIO_SAMPLE_RATE))
        .config();

    let stream = match format {
        SampleFormat::I16 => build::<i16, F>(&device, &config, fill)?,
        _ => build::<f32, F>(&device, &config, fill)?,
    };
    stream.play()?;
    info!(
        "audio output on {} ({:?}, {} Hz, {} channels)",
        name, format, config.sample_rate.0, config.channels
    );
    Ok(stream)
}

fn build<T, F>(device: &cpal::Device, config: &StreamConfig, mut fill: F) -> Result<Stream, PlayerError>
where
    T: SizedSample + FromSample<i16>,
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let mut scratch = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| render(data, &mut scratch, &mut fill),
        |err| warn!("audio output error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Fill one device buffer from `fill`, converting sample types.
fn render<T, F>(data: &mut [T], scratch: &mut Vec<i16>, fill: &mut F)
where
    T: Sample + FromSample<i16>,
    F: FnMut(&mut [i16]),
{
    scratch.resize(data.len(), 0);
    fill(&mut scratch[..]);
    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
        *out = T::from_sample(sample);
    }
}
