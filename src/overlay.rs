//! Musical reference overlays composited after the painter.
//!
//! Row overlays (piano keys, staff lines, guitar strings) are precomputed as
//! a per-row color mask whenever the frequency range, canvas height or
//! overlay set changes. Column overlays (bar lines, the playhead) are
//! evaluated per column at paint time and take priority over row overlays.

use crate::display::{DisplayState, PlayState};
use crate::music;

pub const PLAYHEAD_COLOR: [u8; 3] = [0, 255, 0];
pub const BAR_LINE_COLOR: [u8; 3] = [255, 255, 255];
const WHITE_KEY_COLOR: [u8; 3] = [255, 255, 255];
const BLACK_KEY_COLOR: [u8; 3] = [0, 0, 0];
const STAFF_COLOR: [u8; 3] = [255, 255, 255];
const GUITAR_COLOR: [u8; 3] = [222, 186, 68];

/// One optional color per pixel row, row 0 at the bottom.
pub struct OverlayMasks {
    rows: Vec<Option<[u8; 3]>>,
}

impl OverlayMasks {
    /// Builds the row mask for the active overlay set.
    pub fn build(state: &DisplayState) -> OverlayMasks {
        let mut rows = vec![None; state.disp_height];

        if state.piano_lines {
            for (freq, black) in music::piano_keys() {
                if let Some(row) = state.freq_to_row(freq) {
                    rows[row] = Some(if black { BLACK_KEY_COLOR } else { WHITE_KEY_COLOR });
                }
            }
        }
        if state.staff_lines {
            for freq in music::staff_line_freqs() {
                if let Some(row) = state.freq_to_row(freq) {
                    rows[row] = Some(STAFF_COLOR);
                }
            }
        }
        if state.guitar_lines {
            for freq in music::guitar_string_freqs() {
                if let Some(row) = state.freq_to_row(freq) {
                    rows[row] = Some(GUITAR_COLOR);
                }
            }
        }

        OverlayMasks { rows }
    }

    pub fn row(&self, row: usize) -> Option<[u8; 3]> {
        self.rows.get(row).copied().flatten()
    }
}

/// Whether a piece-absolute column carries a bar line.
///
/// With both bar times set the line repeats with the period between them;
/// with one set it marks that single column.
pub fn bar_line_at(state: &DisplayState, piece_col: i64) -> bool {
    let secpp = state.secpp();
    let col_of = |t: f64| (t / secpp).round() as i64;
    match (state.left_bar_time, state.right_bar_time) {
        (Some(l), Some(r)) => {
            let (lc, rc) = (col_of(l), col_of(r));
            let period = rc - lc;
            if period == 0 {
                piece_col == lc
            } else {
                (piece_col - lc).rem_euclid(period) == 0
            }
        }
        (Some(l), None) => piece_col == col_of(l),
        (None, Some(r)) => piece_col == col_of(r),
        (None, None) => false,
    }
}

/// Color overriding a whole screen column, if any. The playhead beats bar
/// lines, and both beat row overlays and the spectrogram.
pub fn column_overlay(state: &DisplayState, x: i64) -> Option<[u8; 3]> {
    if x == state.disp_offset() && state.playing != PlayState::Stopped {
        return Some(PLAYHEAD_COLOR);
    }
    let piece_col = state.piece_col(state.disp_time) + (x - state.disp_offset());
    if bar_line_at(state, piece_col) {
        return Some(BAR_LINE_COLOR);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DisplayState {
        DisplayState::new(44100, 10.0)
    }

    #[test]
    fn no_overlays_no_rows() {
        let s = state();
        let masks = OverlayMasks::build(&s);
        assert!((0..s.disp_height).all(|row| masks.row(row).is_none()));
    }

    #[test]
    fn piano_rows_use_key_colors() {
        let mut s = state();
        s.piano_lines = true;
        let masks = OverlayMasks::build(&s);
        let a4 = s.freq_to_row(music::note_name_to_freq("A4").unwrap()).unwrap();
        let bb4 = s.freq_to_row(music::note_name_to_freq("A#4").unwrap()).unwrap();
        assert_eq!(masks.row(a4), Some(WHITE_KEY_COLOR));
        assert_eq!(masks.row(bb4), Some(BLACK_KEY_COLOR));
    }

    #[test]
    fn guitar_rows_cover_all_strings() {
        let mut s = state();
        s.guitar_lines = true;
        let masks = OverlayMasks::build(&s);
        for freq in music::guitar_string_freqs() {
            let row = s.freq_to_row(freq).unwrap();
            assert_eq!(masks.row(row), Some(GUITAR_COLOR));
        }
    }

    #[test]
    fn bar_lines_repeat_with_the_bar_period() {
        let mut s = state();
        s.left_bar_time = Some(1.0);
        s.right_bar_time = Some(2.0);
        let secpp = s.secpp();
        let col_of = |t: f64| (t / secpp).round() as i64;
        // Lines at 1.0 + k for every integer k, including before the left bar.
        for k in 0..8 {
            assert!(bar_line_at(&s, col_of(1.0 + k as f64)), "k = {}", k);
        }
        assert!(bar_line_at(&s, col_of(0.0)));
        assert!(!bar_line_at(&s, col_of(1.5)));
    }

    #[test]
    fn single_bar_marks_one_column() {
        let mut s = state();
        s.left_bar_time = Some(3.0);
        let col = s.piece_col(3.0);
        assert!(bar_line_at(&s, col));
        assert!(!bar_line_at(&s, col + 1));
    }

    #[test]
    fn playhead_beats_bar_lines() {
        let mut s = state();
        s.playing = PlayState::Playing;
        s.disp_time = 1.0;
        s.left_bar_time = Some(1.0);
        s.right_bar_time = Some(2.0);
        // Centre column holds both the playhead and a bar line.
        assert_eq!(column_overlay(&s, s.disp_offset()), Some(PLAYHEAD_COLOR));
        let one_bar_right = s.disp_offset() + s.piece_col(1.0);
        assert_eq!(column_overlay(&s, one_bar_right), Some(BAR_LINE_COLOR));
    }

    #[test]
    fn stopped_hides_playhead() {
        let mut s = state();
        s.playing = PlayState::Stopped;
        assert_eq!(column_overlay(&s, s.disp_offset()), None);
    }
}
