//! # Pitch Tracker Module
//!
//! One tracker per tuner session. Each call to [`PitchTracker::process`]
//! runs a single frame through the level gate, preprocessing, the YIN
//! detector and the stabilizer, and returns what the display should show.

use std::time::Instant;

use log::{debug, trace};

use crate::config::{Mode, ModeConfig, TunerConfig};
use crate::error::{ConfigError, DetectError};
use crate::gate::LevelGate;
use crate::pitch::YinDetector;
use crate::preprocess::preprocess_frame;
use crate::stabilizer::Stabilizer;
use crate::{Detection, Readout};

pub struct PitchTracker {
    config: TunerConfig,
    gate: LevelGate,
    detector: YinDetector,
    stabilizer: Stabilizer,
    /// Flips every call while frame skipping is on; frames arriving while
    /// it is false are not analysed.
    odd_frame: bool,
}

impl PitchTracker {
    pub fn new(config: TunerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mode_config = config.mode_config();
        Ok(Self {
            gate: LevelGate::new(mode_config, &config.heuristics),
            detector: YinDetector::new(mode_config, &config.heuristics),
            stabilizer: Stabilizer::new(mode_config, &config.heuristics, config.a4),
            odd_frame: false,
            config,
        })
    }

    /// Analyses one frame and updates the display state.
    ///
    /// The frame is preprocessed in place; its raw contents are gone
    /// afterwards. Frames that yield no pitch count as misses.
    pub fn process(&mut self, frame: &mut [f32], sample_rate: u32, now: Instant) -> Option<Readout> {
        if self.config.frame_skip {
            self.odd_frame = !self.odd_frame;
            if !self.odd_frame {
                return self.stabilizer.readout();
            }
        }

        match self.analyse(frame, sample_rate) {
            Ok(detection) => self.stabilizer.on_detection(detection, now),
            Err(err) => {
                trace!("frame rejected: {err}");
                self.stabilizer.on_miss(now)
            }
        }
    }

    /// Counts a refresh that had no frame to analyse.
    pub fn miss(&mut self, now: Instant) -> Option<Readout> {
        self.stabilizer.on_miss(now)
    }

    fn analyse(&mut self, frame: &mut [f32], sample_rate: u32) -> Result<Detection, DetectError> {
        self.gate.check(frame)?;
        preprocess_frame(frame)?;
        self.detector.detect(frame, sample_rate)
    }

    /// Swaps in another mode's settings and starts over.
    pub fn set_mode(&mut self, mode: Mode) {
        debug!("mode {} -> {mode}", self.config.mode);
        self.config.mode = mode;
        self.rebuild();
    }

    pub fn set_frame_skip(&mut self, enabled: bool) {
        self.config.frame_skip = enabled;
        self.odd_frame = false;
    }

    /// Changes the A4 reference pitch. The display restarts.
    pub fn set_a4(&mut self, a4: f32) -> Result<(), ConfigError> {
        if !(a4 > 0.0 && a4.is_finite()) {
            return Err(ConfigError::InvalidParameter {
                name: "a4",
                value: a4 as f64,
            });
        }
        self.config.a4 = a4;
        self.stabilizer.set_a4(a4);
        Ok(())
    }

    /// Drops all gate, smoothing and display state.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.stabilizer.reset();
        self.odd_frame = false;
    }

    pub fn readout(&self) -> Option<Readout> {
        self.stabilizer.readout()
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn mode_config(&self) -> &ModeConfig {
        self.config.mode_config()
    }

    fn rebuild(&mut self) {
        let mode_config = self.config.mode_config();
        self.gate = LevelGate::new(mode_config, &self.config.heuristics);
        self.detector = YinDetector::new(mode_config, &self.config.heuristics);
        self.stabilizer = Stabilizer::new(mode_config, &self.config.heuristics, self.config.a4);
        self.odd_frame = false;
    }
}
