//! Note names, equal-tempered pitch math and the reference pitches used by
//! the musical overlays.

use anyhow::{anyhow, bail, Result};

/// MIDI note number of A4 (440 Hz) in the numbering used here.
const A4_MIDI: i32 = 69;

/// Semitone offsets of the naturals from C.
const NATURALS: [(char, i32); 7] = [
    ('C', 0),
    ('D', 2),
    ('E', 4),
    ('F', 5),
    ('G', 7),
    ('A', 9),
    ('B', 11),
];

/// Canonical names of the twelve pitch classes, sharps only.
const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Frequency of an equal-tempered MIDI note.
pub fn midi_to_freq(midi: i32) -> f64 {
    440.0 * 2f64.powf((midi - A4_MIDI) as f64 / 12.0)
}

/// Parses a note name such as `A4`, `C#3` or `Eb5` into a frequency in Hz.
pub fn note_name_to_freq(name: &str) -> Result<f64> {
    let mut chars = name.chars();
    let letter = chars
        .next()
        .ok_or_else(|| anyhow!("empty note name"))?
        .to_ascii_uppercase();
    let mut semitone = NATURALS
        .iter()
        .find(|&&(l, _)| l == letter)
        .map(|&(_, s)| s)
        .ok_or_else(|| anyhow!("bad note letter in \"{}\"", name))?;

    let rest: String = chars.collect();
    let octave_str = if let Some(r) = rest.strip_prefix('#') {
        semitone += 1;
        r
    } else if let Some(r) = rest.strip_prefix('b') {
        semitone -= 1;
        r
    } else {
        rest.as_str()
    };

    let octave: i32 = octave_str
        .parse()
        .map_err(|_| anyhow!("bad octave in note name \"{}\"", name))?;
    if !(0..=10).contains(&octave) {
        bail!("octave out of range in \"{}\"", name);
    }

    Ok(midi_to_freq(semitone + 12 * (octave + 1)))
}

/// Names the nearest equal-tempered note for a frequency.
pub fn freq_to_note_name(freq: f64) -> String {
    let midi = (A4_MIDI as f64 + 12.0 * (freq / 440.0).log2()).round() as i32;
    let class = (midi % 12 + 12) % 12;
    let octave = midi / 12 - 1;
    format!("{}{}", PITCH_NAMES[class as usize], octave)
}

/// Frequencies of the 88 piano keys, A0 (27.5 Hz) up to C8.
pub fn piano_keys() -> Vec<(f64, bool)> {
    // MIDI 21 (A0) .. 108 (C8); the bool is true for a black key.
    (21..=108)
        .map(|midi| {
            let class = midi % 12;
            let black = matches!(class, 1 | 3 | 6 | 8 | 10);
            (midi_to_freq(midi), black)
        })
        .collect()
}

/// Pitches of the ten conventional staff lines: treble EGBDF, bass GBDFA.
pub fn staff_line_freqs() -> Vec<f64> {
    ["E4", "G4", "B4", "D5", "F5", "G2", "B2", "D3", "F3", "A3"]
        .iter()
        .map(|n| note_name_to_freq(n).unwrap())
        .collect()
}

/// Open-string pitches of a classical guitar, low E to high E.
pub fn guitar_string_freqs() -> Vec<f64> {
    ["E2", "A2", "D3", "G3", "B3", "E4"]
        .iter()
        .map(|n| note_name_to_freq(n).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_pitches_are_exact() {
        assert_eq!(note_name_to_freq("A4").unwrap(), 440.0);
        assert_eq!(note_name_to_freq("A0").unwrap(), 27.5);
        assert_eq!(note_name_to_freq("A5").unwrap(), 880.0);
    }

    #[test]
    fn accidentals_and_case() {
        let cs4 = note_name_to_freq("C#4").unwrap();
        let db4 = note_name_to_freq("Db4").unwrap();
        assert!((cs4 - db4).abs() < 1e-9);
        assert_eq!(
            note_name_to_freq("a4").unwrap(),
            note_name_to_freq("A4").unwrap()
        );
    }

    #[test]
    fn name_round_trip() {
        for class in PITCH_NAMES {
            for octave in 0..=8 {
                let name = format!("{}{}", class, octave);
                let freq = note_name_to_freq(&name).unwrap();
                assert_eq!(freq_to_note_name(freq), name);
            }
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(note_name_to_freq("").is_err());
        assert!(note_name_to_freq("H4").is_err());
        assert!(note_name_to_freq("A").is_err());
        assert!(note_name_to_freq("A#").is_err());
    }

    #[test]
    fn piano_has_88_keys() {
        let keys = piano_keys();
        assert_eq!(keys.len(), 88);
        assert_eq!(keys[0].0, 27.5);
        assert!(!keys[0].1); // A0 is white
        assert!(keys[1].1); // A#0 is black
        assert_eq!(freq_to_note_name(keys[87].0), "C8");
    }

    #[test]
    fn guitar_strings_ascend() {
        let strings = guitar_string_freqs();
        assert_eq!(strings.len(), 6);
        assert!(strings.windows(2).all(|w| w[0] < w[1]));
    }
}
