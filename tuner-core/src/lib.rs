// tuner-core/src/lib.rs

//! The core logic for the chromatic tuner.
//! This crate is responsible for audio capture, pitch detection and the
//! stabilization that turns per-frame estimates into a readable display.
//! It is completely headless and contains no GUI code.
//!
//! Data flow per frame:
//! level gate -> preprocessing -> YIN detector -> stabilizer -> `Readout`.

pub mod audio;
pub mod config;
pub mod error;
pub mod gate;
pub mod pitch;
pub mod preprocess;
pub mod session;
pub mod stabilizer;
pub mod tracker;
pub mod tuning;

use serde::Serialize;

pub use config::{Heuristics, Mode, ModeConfig, TunerConfig};
pub use error::{ConfigError, DetectError};
pub use session::TunerSession;
pub use tracker::PitchTracker;

/// Raw estimate for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Estimated fundamental in Hz.
    pub frequency: f32,
    /// `1 - cmndf` at the chosen lag, in `[0, 1]`.
    pub confidence: f32,
}

/// Stable note shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Readout {
    /// Sharp spelling of the pitch class, e.g. "A#".
    pub note_name: &'static str,
    pub octave: i32,
    /// Deviation from the equal-tempered note.
    pub cents: i32,
    /// Smoothed frequency in Hz.
    pub frequency_hz: f32,
    pub confidence: f32,
    /// Confident and within a few cents of the note.
    pub locked: bool,
    /// Flat spelling for accidentals, e.g. "Bb".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enharmonic_name: Option<&'static str>,
    pub midi: u8,
}
