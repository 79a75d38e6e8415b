//! Error types for the pitch tracker.
//!
//! `DetectError` describes why a single frame produced no pitch. None of its
//! variants are fatal: the tracker turns every one of them into a miss.

use thiserror::Error;

/// Reasons a frame yields no detection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    /// Frame shorter than the minimum analysable length
    #[error("insufficient data: {len} samples, need at least {min}")]
    InsufficientData { len: usize, min: usize },

    /// Lag search range collapsed for this frame size and sample rate
    #[error("lag range too narrow: tau_min {tau_min} >= tau_max {tau_max}")]
    RangeTooNarrow { tau_min: usize, tau_max: usize },

    /// Difference function had no usable minimum
    #[error("no period candidate found")]
    NoPeriod,

    /// Estimate was non-finite or outside the mode's search range
    #[error("frequency {frequency} Hz outside [{min_f}, {max_f}]")]
    OutOfRange { frequency: f32, min_f: f32, max_f: f32 },

    /// Frame holds NaN or infinite samples
    #[error("frame contains non-finite samples")]
    NonFinite,

    /// Frame level below the adaptive noise gate
    #[error("level {rms:.5} below gate {gate:.5}")]
    BelowGate { rms: f32, gate: f32 },
}

/// Invalid tracker configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid frequency range: {min_f} - {max_f} Hz")]
    InvalidRange { min_f: f32, max_f: f32 },

    #[error("frame of {buf} samples too short for {min_f} Hz at {sample_rate} Hz")]
    FrameTooShort { buf: usize, min_f: f32, sample_rate: u32 },

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
