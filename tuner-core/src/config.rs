//! # Configuration Module
//!
//! Per-instrument detection settings and the empirically tuned heuristics of
//! the tracker. Everything here is plain data: it can be saved to and loaded
//! from JSON, and is validated before a tracker accepts it.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Instrument mode selecting a `ModeConfig` preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Bass,
    Voice,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bass => f.write_str("bass"),
            Mode::Voice => f.write_str("voice"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bass" => Ok(Mode::Bass),
            "voice" => Ok(Mode::Voice),
            other => Err(format!("unknown mode '{other}' (expected bass or voice)")),
        }
    }
}

/// Detection settings for one instrument mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Lowest frequency searched, in Hz
    pub min_f: f32,
    /// Highest frequency searched, in Hz
    pub max_f: f32,
    /// Frame size in samples
    pub buf: usize,
    /// Exponential smoothing coefficient; higher responds faster
    pub alpha: f32,
    /// High-pass cutoff applied by the capture graph, not by this crate
    pub hp: f32,
    /// Low-pass cutoff applied by the capture graph, not by this crate
    pub lp: f32,
    /// Static floor of the adaptive noise gate (RMS)
    pub level_thresh: f32,
    /// CMNDF absolute threshold for first-candidate acceptance
    pub yin_thresh: f32,
    /// Minimum confidence for the locked flag
    pub conf_gate: f32,
    /// Silence tolerance before the display clears
    pub hold_ms: u64,
    /// Minimum time between accepted note changes
    pub change_debounce_ms: u64,
    /// Median filter length
    pub hist_size: usize,
}

impl ModeConfig {
    pub fn bass() -> Self {
        Self {
            min_f: 30.0,
            max_f: 400.0,
            buf: 8192,
            alpha: 0.35,
            hp: 25.0,
            lp: 1200.0,
            level_thresh: 0.008,
            yin_thresh: 0.12,
            conf_gate: 0.85,
            hold_ms: 350,
            change_debounce_ms: 120,
            hist_size: 5,
        }
    }

    pub fn voice() -> Self {
        Self {
            min_f: 70.0,
            max_f: 1200.0,
            buf: 4096,
            alpha: 0.25,
            hp: 60.0,
            lp: 3000.0,
            level_thresh: 0.01,
            yin_thresh: 0.15,
            conf_gate: 0.8,
            hold_ms: 300,
            change_debounce_ms: 150,
            hist_size: 7,
        }
    }

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Bass => Self::bass(),
            Mode::Voice => Self::voice(),
        }
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }

    /// Checks the sample-rate independent invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_f > 0.0 && self.min_f < self.max_f) || !self.max_f.is_finite() {
            return Err(ConfigError::InvalidRange {
                min_f: self.min_f,
                max_f: self.max_f,
            });
        }
        if self.buf < crate::preprocess::MIN_FRAME_LEN {
            return Err(ConfigError::InvalidParameter {
                name: "buf",
                value: self.buf as f64,
            });
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "alpha",
                value: self.alpha as f64,
            });
        }
        if !(self.yin_thresh > 0.0 && self.yin_thresh <= 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "yin_thresh",
                value: self.yin_thresh as f64,
            });
        }
        if !(0.0..=1.0).contains(&self.conf_gate) {
            return Err(ConfigError::InvalidParameter {
                name: "conf_gate",
                value: self.conf_gate as f64,
            });
        }
        if !(self.level_thresh >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "level_thresh",
                value: self.level_thresh as f64,
            });
        }
        if self.hist_size == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "hist_size",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Checks that one frame holds at least one period of `min_f`.
    pub fn validate_for_rate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        self.validate()?;
        if sample_rate as f32 / self.min_f >= self.buf as f32 {
            return Err(ConfigError::FrameTooShort {
                buf: self.buf,
                min_f: self.min_f,
                sample_rate,
            });
        }
        Ok(())
    }
}

/// A mode block as written in a config file. Absent fields keep the preset.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeOverrides {
    min_f: Option<f32>,
    max_f: Option<f32>,
    buf: Option<usize>,
    alpha: Option<f32>,
    hp: Option<f32>,
    lp: Option<f32>,
    level_thresh: Option<f32>,
    yin_thresh: Option<f32>,
    conf_gate: Option<f32>,
    hold_ms: Option<u64>,
    change_debounce_ms: Option<u64>,
    hist_size: Option<usize>,
}

impl ModeOverrides {
    fn apply(self, preset: ModeConfig) -> ModeConfig {
        ModeConfig {
            min_f: self.min_f.unwrap_or(preset.min_f),
            max_f: self.max_f.unwrap_or(preset.max_f),
            buf: self.buf.unwrap_or(preset.buf),
            alpha: self.alpha.unwrap_or(preset.alpha),
            hp: self.hp.unwrap_or(preset.hp),
            lp: self.lp.unwrap_or(preset.lp),
            level_thresh: self.level_thresh.unwrap_or(preset.level_thresh),
            yin_thresh: self.yin_thresh.unwrap_or(preset.yin_thresh),
            conf_gate: self.conf_gate.unwrap_or(preset.conf_gate),
            hold_ms: self.hold_ms.unwrap_or(preset.hold_ms),
            change_debounce_ms: self.change_debounce_ms.unwrap_or(preset.change_debounce_ms),
            hist_size: self.hist_size.unwrap_or(preset.hist_size),
        }
    }
}

fn bass_block<'de, D>(deserializer: D) -> std::result::Result<ModeConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ModeOverrides::deserialize(deserializer)?.apply(ModeConfig::bass()))
}

fn voice_block<'de, D>(deserializer: D) -> std::result::Result<ModeConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ModeOverrides::deserialize(deserializer)?.apply(ModeConfig::voice()))
}

/// Empirical constants of the tracker, kept configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Consecutive misses before the display may clear
    pub miss_limit: u32,
    /// A multiple of the candidate lag wins if its CMNDF is within this factor
    pub octave_margin: f32,
    /// Largest cents deviation still shown as locked
    pub lock_cents: i32,
    /// Decay of the running RMS average
    pub rms_decay: f32,
    /// Fraction of the running RMS average used as the adaptive gate
    pub adaptive_gate_ratio: f32,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            miss_limit: 6,
            octave_margin: 1.02,
            lock_cents: 4,
            rms_decay: 0.95,
            adaptive_gate_ratio: 0.25,
        }
    }
}

impl Heuristics {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.miss_limit == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "miss_limit",
                value: 0.0,
            });
        }
        if !(self.octave_margin >= 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "octave_margin",
                value: self.octave_margin as f64,
            });
        }
        if !(0.0..1.0).contains(&self.rms_decay) {
            return Err(ConfigError::InvalidParameter {
                name: "rms_decay",
                value: self.rms_decay as f64,
            });
        }
        if !(self.adaptive_gate_ratio >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "adaptive_gate_ratio",
                value: self.adaptive_gate_ratio as f64,
            });
        }
        Ok(())
    }
}

/// Complete tracker configuration: both mode presets plus session options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub mode: Mode,
    /// Reference pitch of A4 in Hz
    pub a4: f32,
    /// Analyse only every second frame
    pub frame_skip: bool,
    #[serde(deserialize_with = "bass_block")]
    pub bass: ModeConfig,
    #[serde(deserialize_with = "voice_block")]
    pub voice: ModeConfig,
    pub heuristics: Heuristics,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            a4: 440.0,
            frame_skip: false,
            bass: ModeConfig::bass(),
            voice: ModeConfig::voice(),
            heuristics: Heuristics::default(),
        }
    }
}

impl TunerConfig {
    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Settings of the active mode.
    pub fn mode_config(&self) -> &ModeConfig {
        self.config_for(self.mode)
    }

    pub fn config_for(&self, mode: Mode) -> &ModeConfig {
        match mode {
            Mode::Bass => &self.bass,
            Mode::Voice => &self.voice,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.a4 > 0.0 && self.a4.is_finite()) {
            return Err(ConfigError::InvalidParameter {
                name: "a4",
                value: self.a4 as f64,
            });
        }
        self.bass.validate()?;
        self.voice.validate()?;
        self.heuristics.validate()
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: TunerConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(ModeConfig::bass().validate_for_rate(48000).is_ok());
        assert!(ModeConfig::voice().validate_for_rate(48000).is_ok());
        assert!(TunerConfig::default().validate().is_ok());
    }

    #[test]
    fn bass_responds_faster_than_voice() {
        assert!(ModeConfig::bass().alpha > ModeConfig::voice().alpha);
    }

    #[test]
    fn rejects_inverted_range() {
        let config = ModeConfig {
            min_f: 500.0,
            max_f: 100.0,
            ..ModeConfig::voice()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn rejects_frame_shorter_than_lowest_period() {
        let config = ModeConfig {
            buf: 1024,
            ..ModeConfig::bass()
        };
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.validate_for_rate(48000),
            Err(ConfigError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_zero_history() {
        let config = ModeConfig {
            hist_size: 0,
            ..ModeConfig::bass()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Voice".parse::<Mode>(), Ok(Mode::Voice));
        assert_eq!("bass".parse::<Mode>(), Ok(Mode::Bass));
        assert!("cello".parse::<Mode>().is_err());
        assert_eq!(Mode::Voice.to_string(), "voice");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TunerConfig =
            serde_json::from_str(r#"{ "mode": "voice", "a4": 442.0 }"#).unwrap();
        assert_eq!(config.mode, Mode::Voice);
        assert_eq!(config.a4, 442.0);
        assert_eq!(config.heuristics, Heuristics::default());
        assert_eq!(config.mode_config(), &ModeConfig::voice());
    }

    #[test]
    fn partial_mode_block_keeps_preset_values() {
        let config: TunerConfig =
            serde_json::from_str(r#"{ "voice": { "alpha": 0.3 }, "bass": { "hold_ms": 500 } }"#)
                .unwrap();
        assert_eq!(
            config.voice,
            ModeConfig {
                alpha: 0.3,
                ..ModeConfig::voice()
            }
        );
        assert_eq!(
            config.bass,
            ModeConfig {
                hold_ms: 500,
                ..ModeConfig::bass()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");
        let mut config = TunerConfig::with_mode(Mode::Voice);
        config.heuristics.miss_limit = 8;
        config.save(&path).unwrap();

        let loaded = TunerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "a4": -1.0 }"#).unwrap();
        assert!(TunerConfig::load(&path).is_err());
    }
}
