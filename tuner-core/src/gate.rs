//! Adaptive RMS noise gate.
//!
//! The gate opens at `max(level_thresh, rms_avg * adaptive_gate_ratio)`,
//! where `rms_avg` is an exponential average of frame RMS. Loud playing
//! raises the gate, quiet rooms let it fall back to the static floor.

use crate::config::{Heuristics, ModeConfig};
use crate::error::DetectError;

#[derive(Debug, Clone)]
pub struct LevelGate {
    level_thresh: f32,
    decay: f32,
    ratio: f32,
    rms_avg: f32,
}

impl LevelGate {
    pub fn new(config: &ModeConfig, heuristics: &Heuristics) -> Self {
        Self {
            level_thresh: config.level_thresh,
            decay: heuristics.rms_decay,
            ratio: heuristics.adaptive_gate_ratio,
            rms_avg: 0.0,
        }
    }

    /// Updates the running average with this frame and tests it against the gate.
    ///
    /// # Returns
    /// * `Ok(rms)` - Frame is loud enough to analyse
    /// * `Err(DetectError::BelowGate)` - Skip detection for this frame
    /// * `Err(DetectError::NonFinite)` - Corrupt frame; the average is left as it was
    pub fn check(&mut self, frame: &[f32]) -> Result<f32, DetectError> {
        let rms = rms(frame);
        if !rms.is_finite() {
            return Err(DetectError::NonFinite);
        }
        self.rms_avg = self.decay * self.rms_avg + (1.0 - self.decay) * rms;
        let gate = self.threshold();
        if rms < gate {
            return Err(DetectError::BelowGate { rms, gate });
        }
        Ok(rms)
    }

    /// Current gate level.
    pub fn threshold(&self) -> f32 {
        self.level_thresh.max(self.rms_avg * self.ratio)
    }

    pub fn rms_average(&self) -> f32 {
        self.rms_avg
    }

    pub fn reset(&mut self) {
        self.rms_avg = 0.0;
    }
}

/// Root mean square of a frame; 0 for an empty frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}
