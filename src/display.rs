//! The one record of mutable display state.
//!
//! Only the UI thread writes this; workers get the parts they need copied
//! into each work item, so a change of parameters can never race a running
//! FFT. All pixel/time/column conversions live here next to the fields they
//! depend on.

use crate::colormap::ColorMap;
use crate::fft_analysis::{self, WindowKind};

/// Playback state of the single audio pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// Everything the painter, scheduler and overlays read.
#[derive(Debug, Clone)]
pub struct DisplayState {
    pub playing: PlayState,
    /// Audio time (seconds) at the centre column of the canvas.
    pub disp_time: f64,
    pub min_freq: f64,
    pub max_freq: f64,
    /// Target frequency resolution in Hz; `speclen` derives from it.
    pub fft_freq: f64,
    /// Pixel columns per second of audio.
    pub ppsec: f64,
    pub window_kind: WindowKind,
    pub color_map: ColorMap,
    /// dB span of the color map.
    pub dyn_range: f64,
    /// dB level of the brightest color.
    pub log_max: f64,
    pub show_freq_axes: bool,
    pub show_time_axes: bool,
    pub piano_lines: bool,
    pub staff_lines: bool,
    pub guitar_lines: bool,
    pub left_bar_time: Option<f64>,
    pub right_bar_time: Option<f64>,
    pub beats_per_bar: u32,
    pub softvol: f64,
    pub fullscreen: bool,

    // Canvas geometry and facts about the open file.
    pub disp_width: usize,
    pub disp_height: usize,
    pub sample_rate: u32,
    pub audio_length: f64,
}

pub const DEFAULT_WIDTH: usize = 640;
pub const DEFAULT_HEIGHT: usize = 480;
pub const DEFAULT_MIN_FREQ: f64 = 27.5; // A0
pub const DEFAULT_MAX_FREQ: f64 = 14080.0; // A9
pub const DEFAULT_FFT_FREQ: f64 = 5.0;
pub const DEFAULT_PPSEC: f64 = 25.0;
pub const DEFAULT_FPS: f64 = 25.0;
pub const DEFAULT_DYN_RANGE: f64 = 96.0;
pub const DEFAULT_LOG_MAX: f64 = 0.0;
pub const DEFAULT_BEATS_PER_BAR: u32 = 1;

impl DisplayState {
    pub fn new(sample_rate: u32, audio_length: f64) -> DisplayState {
        DisplayState {
            playing: PlayState::Stopped,
            disp_time: 0.0,
            min_freq: DEFAULT_MIN_FREQ,
            max_freq: DEFAULT_MAX_FREQ.min(sample_rate as f64 / 2.0),
            fft_freq: DEFAULT_FFT_FREQ,
            ppsec: DEFAULT_PPSEC,
            window_kind: WindowKind::Kaiser,
            color_map: ColorMap::Heat,
            dyn_range: DEFAULT_DYN_RANGE,
            log_max: DEFAULT_LOG_MAX,
            show_freq_axes: false,
            show_time_axes: false,
            piano_lines: false,
            staff_lines: false,
            guitar_lines: false,
            left_bar_time: None,
            right_bar_time: None,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            softvol: 1.0,
            fullscreen: false,
            disp_width: DEFAULT_WIDTH,
            disp_height: DEFAULT_HEIGHT,
            sample_rate,
            audio_length,
        }
    }

    /// Seconds of audio per pixel column.
    pub fn secpp(&self) -> f64 {
        1.0 / self.ppsec
    }

    /// Screen x of the centre column, where the playhead sits.
    pub fn disp_offset(&self) -> i64 {
        self.disp_width as i64 / 2
    }

    pub fn speclen(&self) -> usize {
        fft_analysis::speclen_for(self.fft_freq, self.sample_rate)
    }

    pub fn min_fft_freq(&self) -> f64 {
        fft_analysis::min_fft_freq(self.sample_rate)
    }

    /// Piece-absolute column index of an audio time.
    pub fn piece_col(&self, t: f64) -> i64 {
        (t / self.secpp()).round() as i64
    }

    /// Audio time of the column at screen x.
    pub fn screen_column_to_start_time(&self, x: i64) -> f64 {
        (self.piece_col(self.disp_time) + (x - self.disp_offset())) as f64 * self.secpp()
    }

    /// Screen x of the column containing an audio time.
    pub fn time_to_screen_column(&self, t: f64) -> i64 {
        self.piece_col(t) - self.piece_col(self.disp_time) + self.disp_offset()
    }

    /// Whether a screen column is inside the canvas.
    pub fn column_visible(&self, x: i64) -> bool {
        x >= 0 && x < self.disp_width as i64
    }

    /// Row (0 = bottom) of a frequency under the logarithmic vertical map,
    /// or None when off scale.
    pub fn freq_to_row(&self, freq: f64) -> Option<usize> {
        if freq < self.min_freq || freq > self.max_freq || self.disp_height < 2 {
            return None;
        }
        let span = (self.max_freq / self.min_freq).ln();
        let frac = (freq / self.min_freq).ln() / span;
        let row = (frac * (self.disp_height - 1) as f64).round() as i64;
        if row >= 0 && row < self.disp_height as i64 {
            Some(row as usize)
        } else {
            None
        }
    }

    /// Frequency at a row (0 = bottom).
    pub fn row_to_freq(&self, row: usize) -> f64 {
        let frac = row as f64 / (self.disp_height - 1) as f64;
        self.min_freq * (self.max_freq / self.min_freq).powf(frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DisplayState {
        let mut s = DisplayState::new(44100, 10.0);
        s.disp_time = 5.0;
        s
    }

    #[test]
    fn pixel_time_round_trip() {
        let s = state();
        for x in 0..s.disp_width as i64 {
            let t = s.screen_column_to_start_time(x);
            assert_eq!(s.time_to_screen_column(t), x, "column {}", x);
        }
    }

    #[test]
    fn center_column_is_disp_time() {
        let s = state();
        let t = s.screen_column_to_start_time(s.disp_offset());
        assert!((t - s.disp_time).abs() <= s.secpp() / 2.0);
    }

    #[test]
    fn freq_row_round_trip() {
        let s = state();
        for row in (0..s.disp_height).step_by(7) {
            let f = s.row_to_freq(row);
            assert_eq!(s.freq_to_row(f), Some(row), "row {}", row);
        }
    }

    #[test]
    fn row_map_is_logarithmic() {
        let mut s = state();
        s.min_freq = 100.0;
        s.max_freq = 10000.0;
        // One decade up the two-decade range sits at the middle row.
        let mid = s.freq_to_row(1000.0).unwrap();
        assert_eq!(mid, (s.disp_height - 1) / 2 + ((s.disp_height - 1) % 2));
        assert_eq!(s.freq_to_row(50.0), None);
        assert_eq!(s.freq_to_row(20000.0), None);
    }

    #[test]
    fn speclen_tracks_fft_freq() {
        let mut s = state();
        s.fft_freq = 10.0;
        assert_eq!(s.speclen(), 4096);
        s.fft_freq = 20.0;
        assert_eq!(s.speclen(), 2048);
    }

    #[test]
    fn zoom_in_out_restores_secpp() {
        let mut s = state();
        let before = s.secpp();
        s.ppsec *= 2.0;
        s.ppsec *= 0.5;
        assert_eq!(s.secpp(), before);
    }
}
