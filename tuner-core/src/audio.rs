//! # Audio Capture Module
//!
//! Real-time capture from the default input device using CPAL.
//! The callback downmixes to mono and forwards each block over a channel;
//! framing into analysis windows happens on the consumer side
//! (see [`crate::session::FrameFeed`]).

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use log::{error, info, trace};

/// Preferred capture rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 48000;

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel receiving mono sample blocks. Blocks are dropped
///   when the channel is full.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Running stream handle and its sample rate.
///   Dropping the stream stops capture.
/// * `Err(e)` - No device or no f32 input format
pub fn start_audio_capture(sender: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let sample_rate = TARGET_SAMPLE_RATE.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(sample_rate));
    let channels = config.channels() as usize;
    let config: cpal::StreamConfig = config.into();

    info!("Selected sample rate: {sample_rate} Hz, {channels} channel(s)");

    let err_fn = |err: cpal::StreamError| error!("An error occurred on the audio stream: {err}");

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if sender.try_send(downmix(data, channels)).is_err() {
                trace!("analysis channel full or closed, dropping block");
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Averages interleaved channels into a mono block.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Picks the f32 input configuration with the fewest channels, then the
/// sample rate range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let rate_diff = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels(), rate_diff)
        })
}
