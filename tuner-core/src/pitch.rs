//! # Pitch Detection Module
//!
//! YIN fundamental-frequency estimation for the tuner.
//!
//! ## Features
//! - Difference function computed through an FFT cross-correlation
//! - Cumulative mean normalized difference (CMNDF), searched over the mode's lag range
//! - Absolute-threshold lag selection with global-minimum fallback
//! - Fundamental preference against sub-harmonic (half period) locks
//! - Parabolic interpolation for sub-sample accuracy

use rustfft::{FftPlanner, num_complex::Complex};

use crate::Detection;
use crate::config::{Heuristics, ModeConfig};
use crate::error::DetectError;
use crate::preprocess::MIN_FRAME_LEN;

/// Lag picked by [`select_lag`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagChoice {
    /// Integer lag after threshold, neighbourhood and octave steps
    pub tau: usize,
    /// Lag after parabolic interpolation
    pub refined_tau: f64,
    /// CMNDF value at `tau`
    pub value: f64,
}

/// YIN detector owning its scratch buffers.
///
/// Buffers grow to the largest frame seen and are reused across frames.
pub struct YinDetector {
    min_f: f32,
    max_f: f32,
    yin_thresh: f32,
    octave_margin: f32,
    planner: FftPlanner<f64>,
    spectrum: Vec<Complex<f64>>,
    energy: Vec<f64>,
    diff: Vec<f64>,
    cmndf: Vec<f64>,
}

impl YinDetector {
    pub fn new(config: &ModeConfig, heuristics: &Heuristics) -> Self {
        let fft_len = (2 * config.buf).next_power_of_two();
        Self {
            min_f: config.min_f,
            max_f: config.max_f,
            yin_thresh: config.yin_thresh,
            octave_margin: heuristics.octave_margin,
            planner: FftPlanner::new(),
            spectrum: Vec::with_capacity(fft_len),
            energy: Vec::with_capacity(config.buf + 1),
            diff: Vec::new(),
            cmndf: Vec::new(),
        }
    }

    /// Lag bounds `(tau_min, tau_max)` for a frame of `len` samples.
    pub fn lag_range(&self, len: usize, sample_rate: u32) -> Result<(usize, usize), DetectError> {
        let sr = sample_rate as f64;
        let tau_min = ((sr / self.max_f as f64).floor() as usize).max(2);
        let tau_max = ((sr / self.min_f as f64).floor() as usize).min(len.saturating_sub(3));
        if tau_min >= tau_max {
            return Err(DetectError::RangeTooNarrow { tau_min, tau_max });
        }
        Ok((tau_min, tau_max))
    }

    /// Estimates the fundamental of a preprocessed frame.
    ///
    /// # Returns
    /// * `Ok(Detection)` - Frequency in `[min_f, max_f]` and confidence `1 - cmndf[tau]`
    /// * `Err(DetectError)` - No usable pitch in this frame
    pub fn detect(&mut self, frame: &[f32], sample_rate: u32) -> Result<Detection, DetectError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(DetectError::InsufficientData {
                len: frame.len(),
                min: MIN_FRAME_LEN,
            });
        }
        let (tau_min, tau_max) = self.lag_range(frame.len(), sample_rate)?;

        self.difference_function(frame, tau_max);
        let energy = self.energy[frame.len()];
        if !energy.is_finite() || energy <= f64::MIN_POSITIVE {
            return Err(DetectError::NoPeriod);
        }
        self.cumulative_mean_normalized_difference(tau_max);

        let choice = select_lag(
            &self.cmndf,
            tau_min,
            tau_max,
            self.yin_thresh as f64,
            self.octave_margin as f64,
        )
        .ok_or(DetectError::NoPeriod)?;

        let frequency = (sample_rate as f64 / choice.refined_tau) as f32;
        if !frequency.is_finite() || frequency < self.min_f || frequency > self.max_f {
            return Err(DetectError::OutOfRange {
                frequency,
                min_f: self.min_f,
                max_f: self.max_f,
            });
        }

        Ok(Detection {
            frequency,
            confidence: (1.0 - choice.value).clamp(0.0, 1.0) as f32,
        })
    }

    /// CMNDF of the last analysed frame, indexed by lag; `cmndf[0]` is 1.0.
    pub fn cmndf(&self) -> &[f64] {
        &self.cmndf
    }

    /// `d[tau] = sum_{j < N - tau} (x[j] - x[j + tau])^2` for `tau` in `1..=tau_max`.
    ///
    /// Expanded as `E(0, N - tau) + E(tau, N) - 2 r(tau)`, with the energies
    /// from prefix sums and the cross term `r` from a zero-padded FFT.
    fn difference_function(&mut self, frame: &[f32], tau_max: usize) {
        let n = frame.len();
        let fft_len = (2 * n).next_power_of_two();

        self.spectrum.clear();
        self.spectrum
            .extend(frame.iter().map(|&s| Complex::new(s as f64, 0.0)));
        self.spectrum.resize(fft_len, Complex::new(0.0, 0.0));

        let forward = self.planner.plan_fft_forward(fft_len);
        forward.process(&mut self.spectrum);
        for bin in self.spectrum.iter_mut() {
            *bin = Complex::new(bin.norm_sqr(), 0.0);
        }
        let inverse = self.planner.plan_fft_inverse(fft_len);
        inverse.process(&mut self.spectrum);
        let scale = 1.0 / fft_len as f64;

        self.energy.clear();
        self.energy.push(0.0);
        let mut acc = 0.0f64;
        for &s in frame {
            acc += s as f64 * s as f64;
            self.energy.push(acc);
        }
        let total = self.energy[n];

        self.diff.clear();
        self.diff.resize(tau_max + 1, 0.0);
        for tau in 1..=tau_max {
            let head = self.energy[n - tau];
            let tail = total - self.energy[tau];
            let cross = self.spectrum[tau].re * scale;
            self.diff[tau] = (head + tail - 2.0 * cross).max(0.0);
        }
    }

    /// The running mean covers every lag from 1, not just the search range,
    /// so `cmndf[tau]` compares `d[tau]` with the average of all shorter lags.
    fn cumulative_mean_normalized_difference(&mut self, tau_max: usize) {
        self.cmndf.clear();
        self.cmndf.resize(tau_max + 1, 1.0);
        let mut running_sum = 0.0f64;
        for tau in 1..=tau_max {
            running_sum += self.diff[tau];
            self.cmndf[tau] = self.diff[tau] * tau as f64 / running_sum.max(f64::EPSILON);
        }
    }
}

/// Picks the period lag from a CMNDF.
///
/// 1. First lag below `yin_thresh`, descended to its local minimum; the
///    global minimum of the range when nothing crosses.
/// 2. Strictly lower value within +-2 lags.
/// 3. `2 * tau` then `3 * tau` replace the candidate when their value is at
///    most `octave_margin` times the current best.
/// 4. Parabolic interpolation around the result.
pub fn select_lag(
    cmndf: &[f64],
    tau_min: usize,
    tau_max: usize,
    yin_thresh: f64,
    octave_margin: f64,
) -> Option<LagChoice> {
    if tau_min >= tau_max || tau_max >= cmndf.len() {
        return None;
    }

    let crossing = (tau_min..=tau_max)
        .find(|&tau| cmndf[tau] < yin_thresh)
        .map(|mut tau| {
            while tau < tau_max && cmndf[tau + 1] < cmndf[tau] {
                tau += 1;
            }
            tau
        });
    let mut tau = match crossing {
        Some(tau) => tau,
        None => (tau_min..=tau_max)
            .min_by(|&a, &b| cmndf[a].total_cmp(&cmndf[b]))?,
    };

    let lo = tau.saturating_sub(2).max(tau_min);
    let hi = (tau + 2).min(tau_max);
    for candidate in lo..=hi {
        if cmndf[candidate] < cmndf[tau] {
            tau = candidate;
        }
    }

    let base = tau;
    for multiple in [2, 3] {
        let candidate = base * multiple;
        if candidate <= tau_max && cmndf[candidate] <= cmndf[tau] * octave_margin {
            tau = candidate;
        }
    }

    Some(LagChoice {
        tau,
        refined_tau: parabolic_interpolation(cmndf, tau, tau_min, tau_max),
        value: cmndf[tau],
    })
}

/// Sub-sample vertex of the parabola through `tau - 1, tau, tau + 1`.
fn parabolic_interpolation(cmndf: &[f64], tau: usize, tau_min: usize, tau_max: usize) -> f64 {
    let left = tau.saturating_sub(1).max(tau_min);
    let right = (tau + 1).min(tau_max);
    if left == tau || right == tau {
        return tau as f64;
    }

    let y0 = cmndf[left];
    let y1 = cmndf[tau];
    let y2 = cmndf[right];
    let denominator = y0 - 2.0 * y1 + y2;
    if denominator.abs() < 1e-12 {
        return tau as f64;
    }
    tau as f64 + 0.5 * (y0 - y2) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess_frame;
    use approx::assert_relative_eq;

    const SAMPLE_RATE: u32 = 48000;

    fn sine(len: usize, freq: f32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    fn detect(config: &ModeConfig, mut frame: Vec<f32>) -> Result<Detection, DetectError> {
        let mut detector = YinDetector::new(config, &Heuristics::default());
        preprocess_frame(&mut frame)?;
        detector.detect(&frame, SAMPLE_RATE)
    }

    /// Geometric sweep in 3% steps.
    fn sweep(from: f32, to: f32) -> impl Iterator<Item = f32> {
        std::iter::successors(Some(from), |f| Some(f * 1.03)).take_while(move |&f| f <= to)
    }

    /// CMNDF that is flat at 1.0 apart from the given dips.
    fn curve(len: usize, dips: &[(usize, f64)]) -> Vec<f64> {
        let mut cmndf = vec![1.0; len];
        for &(tau, value) in dips {
            cmndf[tau] = value;
        }
        cmndf
    }

    #[test]
    fn fft_difference_matches_direct_sum() {
        let config = ModeConfig::voice();
        let mut detector = YinDetector::new(&config, &Heuristics::default());
        let frame: Vec<f32> = (0..512)
            .map(|i| ((i * 7919) % 113) as f32 / 113.0 - 0.5 + (i as f32 * 0.05).sin())
            .collect();
        detector.difference_function(&frame, 300);

        for tau in [1usize, 17, 150, 300] {
            let direct: f64 = (0..frame.len() - tau)
                .map(|j| {
                    let delta = frame[j] as f64 - frame[j + tau] as f64;
                    delta * delta
                })
                .sum();
            assert_relative_eq!(detector.diff[tau], direct, max_relative = 1e-9, epsilon = 1e-9);
        }
    }

    // The Hann window pulls the difference minimum toward shorter lags by
    // about P^2 / (2 N^2): 0.14% for a 218-sample period in 4096 samples.
    #[test]
    fn voice_sines_within_window_bias() {
        let config = ModeConfig::voice();
        for freq in [220.0f32, 261.63, 440.0, 659.25] {
            let result = detect(&config, sine(config.buf, freq, 0.5)).unwrap();
            assert_relative_eq!(result.frequency, freq, max_relative = 0.002);
            assert!(
                result.confidence > config.conf_gate,
                "confidence {} at {freq} Hz",
                result.confidence
            );
        }
    }

    #[test]
    fn bass_sines_within_window_bias() {
        let config = ModeConfig::bass();
        for freq in [110.0f32, 146.83, 196.0] {
            let result = detect(&config, sine(config.buf, freq, 0.5)).unwrap();
            assert_relative_eq!(result.frequency, freq, max_relative = 0.002);
            assert!(result.confidence > config.conf_gate);
        }
    }

    #[test]
    fn voice_sweep_to_top_of_range_stays_on_fundamental() {
        let config = ModeConfig::voice();
        for freq in sweep(220.0, 1150.0) {
            let result = detect(&config, sine(config.buf, freq, 0.5)).unwrap();
            assert_relative_eq!(result.frequency, freq, max_relative = 0.002);
            assert!(
                result.confidence > config.conf_gate,
                "confidence {} at {freq} Hz",
                result.confidence
            );
        }
    }

    #[test]
    fn bass_sweep_to_top_of_range_stays_on_fundamental() {
        let config = ModeConfig::bass();
        for freq in sweep(110.0, 390.0) {
            let result = detect(&config, sine(config.buf, freq, 0.5)).unwrap();
            assert_relative_eq!(result.frequency, freq, max_relative = 0.002);
            assert!(result.confidence > config.conf_gate);
        }
    }

    #[test]
    fn running_mean_starts_at_first_lag() {
        let config = ModeConfig::voice();
        let mut detector = YinDetector::new(&config, &Heuristics::default());
        let mut frame = sine(config.buf, 882.0, 0.5);
        preprocess_frame(&mut frame).unwrap();
        detector.detect(&frame, SAMPLE_RATE).unwrap();

        let cmndf = detector.cmndf();
        assert_eq!(cmndf[0], 1.0);
        assert_relative_eq!(cmndf[1], 1.0, max_relative = 1e-12);
    }

    #[test]
    fn non_finite_samples_yield_no_pitch() {
        let config = ModeConfig::voice();
        for bad in [f32::NAN, f32::INFINITY] {
            let mut frame = sine(config.buf, 220.0, 0.5);
            frame[100] = bad;
            assert_eq!(detect(&config, frame), Err(DetectError::NoPeriod));
        }
    }

    #[test]
    fn strong_second_harmonic_resolves_to_fundamental() {
        let config = ModeConfig::voice();
        let fundamental = sine(config.buf, 110.0, 0.3);
        let harmonic = sine(config.buf, 220.0, 1.0);
        let frame: Vec<f32> = fundamental.iter().zip(&harmonic).map(|(a, b)| a + b).collect();
        let result = detect(&config, frame).unwrap();
        assert_relative_eq!(result.frequency, 110.0, max_relative = 0.01);
    }

    #[test]
    fn silent_frame_has_no_valid_pitch() {
        let config = ModeConfig::voice();
        assert!(detect(&config, vec![0.0; config.buf]).is_err());
    }

    #[test]
    fn short_frame_is_insufficient() {
        let mut detector = YinDetector::new(&ModeConfig::voice(), &Heuristics::default());
        assert!(matches!(
            detector.detect(&[0.0; 16], SAMPLE_RATE),
            Err(DetectError::InsufficientData { len: 16, .. })
        ));
    }

    #[test]
    fn narrow_range_is_reported() {
        let mut detector = YinDetector::new(&ModeConfig::bass(), &Heuristics::default());
        // 48 kHz / 400 Hz = 120 lags minimum, but 64 samples allow only 61
        assert!(matches!(
            detector.detect(&[0.1; 64], SAMPLE_RATE),
            Err(DetectError::RangeTooNarrow { .. })
        ));
    }

    #[test]
    fn threshold_crossing_descends_to_local_minimum() {
        let cmndf = curve(100, &[(20, 0.09), (21, 0.05), (22, 0.03), (23, 0.04), (70, 0.01)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 22);
        assert_eq!(choice.value, 0.03);
    }

    #[test]
    fn falls_back_to_global_minimum() {
        let cmndf = curve(100, &[(30, 0.4), (55, 0.3), (80, 0.35)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 55);
    }

    #[test]
    fn neighbourhood_search_finds_lower_value() {
        let cmndf = curve(100, &[(20, 0.05), (21, 0.06), (22, 0.04)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 22);
    }

    #[test]
    fn prefers_double_period_within_margin() {
        let cmndf = curve(100, &[(30, 0.08), (60, 0.0815)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 60);
    }

    #[test]
    fn keeps_candidate_when_double_period_costs_more() {
        let cmndf = curve(100, &[(30, 0.08), (60, 0.09)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 30);
    }

    #[test]
    fn triple_period_checked_after_double() {
        let cmndf = curve(100, &[(20, 0.05), (60, 0.045)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 60);
    }

    #[test]
    fn multiples_beyond_range_are_ignored() {
        let cmndf = curve(100, &[(50, 0.05), (99, 0.0)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 50);
    }

    #[test]
    fn parabola_shifts_toward_lower_neighbour() {
        let cmndf = curve(100, &[(39, 0.2), (40, 0.05), (41, 0.1)]);
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.02).unwrap();
        assert_eq!(choice.tau, 40);
        assert!(choice.refined_tau > 40.0 && choice.refined_tau < 40.5);
    }

    #[test]
    fn flat_curve_keeps_integer_lag() {
        let cmndf = vec![0.5; 100];
        let choice = select_lag(&cmndf, 10, 90, 0.1, 1.0).unwrap();
        assert_eq!(choice.refined_tau, choice.tau as f64);
    }
}
