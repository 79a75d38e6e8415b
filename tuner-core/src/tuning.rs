//! # Musical Tuning Module
//!
//! Equal-temperament note naming for the tuner readout.
//!
//! ## Features
//! - Frequency to nearest MIDI note relative to a configurable A4
//! - Note name, octave and cents deviation
//! - Flat spelling for accidentals

/// Sharp spellings indexed by pitch class (C = 0).
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Flat spellings of the five accidentals, indexed like `NOTE_NAMES`.
const FLAT_NAMES: [Option<&str>; 12] = [
    None,
    Some("Db"),
    None,
    Some("Eb"),
    None,
    None,
    Some("Gb"),
    None,
    Some("Ab"),
    None,
    Some("Bb"),
    None,
];

const A4_MIDI: f32 = 69.0;

/// Nearest equal-tempered note to a measured frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    /// MIDI note number (A4 = 69)
    pub midi: u8,
    pub name: &'static str,
    /// Scientific pitch octave (middle C = C4)
    pub octave: i32,
    /// Deviation from the note, rounded to whole cents
    pub cents: i32,
    /// Equal-tempered frequency of the note in Hz
    pub target_frequency: f32,
}

impl NoteInfo {
    /// Finds the nearest note using `midi = round(69 + 12 * log2(f / a4))`.
    ///
    /// # Returns
    /// * `None` - Frequency not positive, not finite, or outside MIDI 0-127
    pub fn from_frequency(freq: f32, a4: f32) -> Option<Self> {
        if !(freq > 0.0 && freq.is_finite() && a4 > 0.0) {
            return None;
        }
        let midi = (A4_MIDI + 12.0 * (freq / a4).log2()).round();
        if !(0.0..=127.0).contains(&midi) {
            return None;
        }
        let midi = midi as u8;
        let target_frequency = midi_to_frequency(midi, a4);
        let (name, octave) = note_name(midi);
        Some(Self {
            midi,
            name,
            octave,
            cents: calculate_cents_deviation(freq, target_frequency).round() as i32,
            target_frequency,
        })
    }

    /// Flat spelling when the note is an accidental.
    pub fn enharmonic_name(&self) -> Option<&'static str> {
        enharmonic(self.name)
    }
}

/// Pitch class name and octave of a MIDI note.
pub fn note_name(midi: u8) -> (&'static str, i32) {
    let name = NOTE_NAMES[(midi % 12) as usize];
    let octave = midi as i32 / 12 - 1;
    (name, octave)
}

/// Equal-tempered frequency of a MIDI note.
pub fn midi_to_frequency(midi: u8, a4: f32) -> f32 {
    a4 * 2.0_f32.powf((midi as f32 - A4_MIDI) / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Flat spelling of a sharp note name, e.g. `"A#"` to `"Bb"`.
pub fn enharmonic(name: &str) -> Option<&'static str> {
    NOTE_NAMES
        .iter()
        .position(|&n| n == name)
        .and_then(|i| FLAT_NAMES[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a2_is_midi_45() {
        let note = NoteInfo::from_frequency(110.0, 440.0).unwrap();
        assert_eq!(note.midi, 45);
        assert_eq!(note.name, "A");
        assert_eq!(note.octave, 2);
        assert_eq!(note.cents, 0);
        assert_relative_eq!(note.target_frequency, 110.0, max_relative = 1e-5);
    }

    #[test]
    fn middle_c_octave_boundary() {
        let c4 = NoteInfo::from_frequency(261.63, 440.0).unwrap();
        assert_eq!((c4.name, c4.octave), ("C", 4));
        let b3 = NoteInfo::from_frequency(246.94, 440.0).unwrap();
        assert_eq!((b3.name, b3.octave), ("B", 3));
    }

    #[test]
    fn cents_sign_follows_deviation() {
        let sharp = NoteInfo::from_frequency(445.0, 440.0).unwrap();
        assert_eq!(sharp.name, "A");
        assert_eq!(sharp.cents, 20);
        let flat = NoteInfo::from_frequency(435.0, 440.0).unwrap();
        assert_eq!(flat.cents, -20);
    }

    #[test]
    fn nearest_note_switches_at_quarter_tone() {
        let below = NoteInfo::from_frequency(226.0, 440.0).unwrap();
        assert_eq!(below.name, "A");
        assert!(below.cents > 40);
        let above = NoteInfo::from_frequency(227.0, 440.0).unwrap();
        assert_eq!(above.name, "A#");
        assert!(above.cents < -40);
    }

    #[test]
    fn reference_pitch_shifts_naming() {
        let note = NoteInfo::from_frequency(442.0, 442.0).unwrap();
        assert_eq!(note.cents, 0);
        let note = NoteInfo::from_frequency(442.0, 440.0).unwrap();
        assert_eq!(note.cents, 8);
    }

    #[test]
    fn enharmonic_spellings() {
        assert_eq!(enharmonic("A#"), Some("Bb"));
        assert_eq!(enharmonic("C#"), Some("Db"));
        assert_eq!(enharmonic("E"), None);
        assert_eq!(enharmonic("H"), None);
    }

    #[test]
    fn invalid_frequencies_have_no_note() {
        assert!(NoteInfo::from_frequency(0.0, 440.0).is_none());
        assert!(NoteInfo::from_frequency(f32::NAN, 440.0).is_none());
        assert!(NoteInfo::from_frequency(1.0e6, 440.0).is_none());
    }
}
