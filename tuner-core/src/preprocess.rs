//! # Frame Preprocessing Module
//!
//! Prepares a raw capture frame for the difference function:
//! - DC offset removal
//! - Hann windowing
//!
//! Both steps work in place. The caller gives up the raw samples: after
//! `preprocess_frame` the buffer holds the windowed signal.

use crate::error::DetectError;

/// Shortest frame the detector will analyse.
pub const MIN_FRAME_LEN: usize = 32;

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    for sample in signal.iter_mut() {
        *sample -= avg;
    }
}

/// Applies a Hann window `0.5 * (1 - cos(2*pi*i / (N - 1)))` in place.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Runs the full preprocessing chain on a frame.
///
/// # Returns
/// * `Err(DetectError::InsufficientData)` - Frame shorter than `MIN_FRAME_LEN`
pub fn preprocess_frame(frame: &mut [f32]) -> Result<(), DetectError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DetectError::InsufficientData {
            len: frame.len(),
            min: MIN_FRAME_LEN,
        });
    }
    remove_dc_offset(frame);
    apply_hann_window(frame);
    Ok(())
}
