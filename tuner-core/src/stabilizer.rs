//! # Stabilizer Module
//!
//! Turns noisy per-frame estimates into a flicker-free readout.
//!
//! Each detection goes through a median filter over the last `hist_size`
//! frequencies and an exponential smoother. A new note reaches the display
//! only once `change_debounce_ms` have passed since the previous accepted
//! change. Misses blank the display only after `miss_limit` consecutive
//! frames *and* once the hold window has expired.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::config::{Heuristics, ModeConfig};
use crate::tuning::NoteInfo;
use crate::{Detection, Readout};

#[derive(Debug, Clone)]
pub struct Stabilizer {
    alpha: f32,
    hist_size: usize,
    hold: Duration,
    debounce: Duration,
    conf_gate: f32,
    lock_cents: i32,
    miss_limit: u32,
    a4: f32,

    history: VecDeque<f32>,
    smoothed: Option<f32>,
    stable_note: Option<u8>,
    hold_until: Option<Instant>,
    last_change: Option<Instant>,
    misses: u32,
    readout: Option<Readout>,
}

impl Stabilizer {
    pub fn new(config: &ModeConfig, heuristics: &Heuristics, a4: f32) -> Self {
        Self {
            alpha: config.alpha,
            hist_size: config.hist_size.max(1),
            hold: config.hold(),
            debounce: config.change_debounce(),
            conf_gate: config.conf_gate,
            lock_cents: heuristics.lock_cents,
            miss_limit: heuristics.miss_limit,
            a4,
            history: VecDeque::with_capacity(config.hist_size + 1),
            smoothed: None,
            stable_note: None,
            hold_until: None,
            last_change: None,
            misses: 0,
            readout: None,
        }
    }

    /// Feeds one successful detection.
    pub fn on_detection(&mut self, detection: Detection, now: Instant) -> Option<Readout> {
        self.misses = 0;

        self.history.push_back(detection.frequency);
        while self.history.len() > self.hist_size {
            self.history.pop_front();
        }
        let median = median(&self.history);
        let smoothed = match self.smoothed {
            Some(previous) => previous + self.alpha * (median - previous),
            None => median,
        };
        self.smoothed = Some(smoothed);

        let Some(note) = NoteInfo::from_frequency(smoothed, self.a4) else {
            return self.readout;
        };

        if let (Some(current), Some(changed_at)) = (self.stable_note, self.last_change) {
            if note.midi != current && now.saturating_duration_since(changed_at) < self.debounce {
                trace!("debounced change {current} -> {} at {smoothed:.2} Hz", note.midi);
                let extended = now + self.hold / 2;
                self.hold_until = Some(self.hold_until.map_or(extended, |h| h.max(extended)));
                return self.readout;
            }
        }

        if self.stable_note != Some(note.midi) {
            debug!(
                "note {}{} ({:+} cents, {smoothed:.2} Hz)",
                note.name, note.octave, note.cents
            );
            self.stable_note = Some(note.midi);
            self.last_change = Some(now);
        }
        self.hold_until = Some(now + self.hold);

        let locked =
            detection.confidence >= self.conf_gate && note.cents.abs() <= self.lock_cents;
        self.readout = Some(Readout {
            note_name: note.name,
            octave: note.octave,
            cents: note.cents,
            frequency_hz: smoothed,
            confidence: detection.confidence,
            locked,
            enharmonic_name: note.enharmonic_name(),
            midi: note.midi,
        });
        self.readout
    }

    /// Feeds a frame without detection (gated, invalid or out of range).
    pub fn on_miss(&mut self, now: Instant) -> Option<Readout> {
        self.misses = self.misses.saturating_add(1);
        let hold_expired = self.hold_until.is_none_or(|until| now >= until);
        if self.misses >= self.miss_limit && hold_expired && self.is_active() {
            debug!("clearing display after {} misses", self.misses);
            self.clear_display();
        }
        self.readout
    }

    pub fn readout(&self) -> Option<Readout> {
        self.readout
    }

    pub fn smoothed_frequency(&self) -> Option<f32> {
        self.smoothed
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.misses
    }

    /// Changes the A4 reference; the display restarts from scratch.
    pub fn set_a4(&mut self, a4: f32) {
        self.a4 = a4;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.clear_display();
        self.misses = 0;
    }

    fn is_active(&self) -> bool {
        self.readout.is_some() || self.smoothed.is_some() || self.stable_note.is_some()
    }

    fn clear_display(&mut self) {
        self.history.clear();
        self.smoothed = None;
        self.stable_note = None;
        self.hold_until = None;
        self.last_change = None;
        self.readout = None;
    }
}

/// Median of the history window; mean of the middle pair for even lengths.
fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
