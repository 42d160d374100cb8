//! Semantic command dispatch.
//!
//! The `Engine` owns every core component and is driven only from the UI
//! thread. Each command validates its input, mutates the display state,
//! computes the minimal invalidation (key-changing parameters drop cache
//! entries and pending work; render-only parameters just repaint) and
//! schedules the repaint before returning, so commands are atomic with
//! respect to what ends up on screen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};

use crate::audio_player::Player;
use crate::cache::{self, ResultCache, ResultKey};
use crate::canvas::Canvas;
use crate::colormap::ColorMap;
use crate::display::{DisplayState, PlayState};
use crate::fft_analysis::{WindowCache, WindowKind};
use crate::overlay::OverlayMasks;
use crate::paint::{self, PaintContext};
use crate::sample_source::SampleSource;
use crate::scheduler::Scheduler;
use crate::screenshot;
use crate::timefmt;

/// Softvol step for the volume keys: 6 dB.
const VOLUME_STEP: f64 = 1.9952623149688795; // 10^(6/20)

pub struct Engine {
    pub state: DisplayState,
    pub canvas: Canvas,
    files: Vec<PathBuf>,
    file_index: usize,
    source: Arc<SampleSource>,
    windows: Arc<WindowCache>,
    cache: Arc<ResultCache>,
    scheduler: Scheduler,
    player: Player,
    overlays: OverlayMasks,
    max_threads: usize,
    audio_enabled: bool,
    exit_at_end: bool,
    quit_requested: bool,
}

impl Engine {
    pub fn new(
        files: Vec<PathBuf>,
        file_index: usize,
        source: Arc<SampleSource>,
        mut state: DisplayState,
        max_threads: usize,
        audio_enabled: bool,
        exit_at_end: bool,
    ) -> Engine {
        let windows = Arc::new(WindowCache::new());
        let result_cache = Arc::new(ResultCache::new(cache::DEFAULT_MAX_BYTES));
        let scheduler = Scheduler::new(
            Arc::clone(&source),
            Arc::clone(&windows),
            Arc::clone(&result_cache),
            max_threads,
            state.secpp(),
        );
        let player = Player::new(Arc::clone(&source), state.softvol, audio_enabled);
        if audio_enabled && state.disp_time > 0.0 {
            player.set_playing_time(state.disp_time);
        }
        state.playing = player.state();
        let canvas = Canvas::new(
            state.disp_width,
            state.disp_height,
            state.color_map.background(),
        );
        let overlays = OverlayMasks::build(&state);
        scheduler.reprioritize(state.piece_col(state.disp_time), state.secpp());

        Engine {
            state,
            canvas,
            files,
            file_index,
            source,
            windows,
            cache: result_cache,
            scheduler,
            player,
            overlays,
            max_threads,
            audio_enabled,
            exit_at_end,
            quit_requested: false,
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn quit(&mut self) {
        self.quit_requested = true;
    }

    // ---- painting ------------------------------------------------------

    pub fn repaint_display(&mut self, from_scratch: bool) {
        let mut ctx = PaintContext {
            state: &self.state,
            cache: &self.cache,
            scheduler: &self.scheduler,
            overlays: &self.overlays,
            canvas: &mut self.canvas,
        };
        paint::repaint_display(&mut ctx, from_scratch);
    }

    pub fn repaint_columns(&mut self, x0: i64, x1: i64, from_scratch: bool) {
        let mut ctx = PaintContext {
            state: &self.state,
            cache: &self.cache,
            scheduler: &self.scheduler,
            overlays: &self.overlays,
            canvas: &mut self.canvas,
        };
        paint::repaint_columns(&mut ctx, x0, x1, from_scratch);
    }

    fn rebuild_overlays(&mut self) {
        self.overlays = OverlayMasks::build(&self.state);
    }

    /// Drains the result channel: fresh columns go into the cache and their
    /// screen column repaints; stale ones are dropped silently.
    pub fn absorb_results(&mut self) -> usize {
        let mut painted = 0;
        while let Some(result) = self.scheduler.poll_result() {
            if result.epoch != self.scheduler.current_epoch()
                || result.key.speclen != self.state.speclen()
                || result.key.window != self.state.window_kind
            {
                debug!("dropping stale result at {:.3}s", result.key.time_secs());
                continue;
            }
            let x = self.state.time_to_screen_column(result.key.time_secs());
            self.cache.insert(result.key, result.column);
            if self.state.column_visible(x) {
                self.repaint_columns(x, x, false);
                painted += 1;
            }
        }
        painted
    }

    // ---- clock ---------------------------------------------------------

    /// One scroll tick: follow the playhead, shift the canvas, request the
    /// newly exposed columns and keep the playhead line drawn.
    pub fn scroll_tick(&mut self) {
        if self.player.take_finished() {
            info!("playback finished");
            self.state.playing = PlayState::Stopped;
            self.repaint_columns(self.state.disp_offset(), self.state.disp_offset(), true);
            if self.exit_at_end {
                self.quit_requested = true;
            }
            return;
        }
        self.state.playing = self.player.state();
        if self.state.playing != PlayState::Playing {
            return;
        }

        let now = self.player.get_playing_time();
        let secpp = self.state.secpp();
        let shift = ((now - self.state.disp_time) / secpp).round() as i64;
        if shift != 0 {
            self.canvas.shift(shift, self.state.color_map.background());
            self.state.disp_time += shift as f64 * secpp;
            self.scheduler
                .reprioritize(self.state.piece_col(self.state.disp_time), secpp);
            let w = self.state.disp_width as i64;
            let center = self.state.disp_offset();
            if shift > 0 {
                self.repaint_columns(w - shift, w - 1, true);
                // Clean the trail the green line left as it moved.
                self.repaint_columns(center - shift, center, true);
            } else {
                self.repaint_columns(0, -shift - 1, true);
                self.repaint_columns(center, center - shift, true);
            }
        } else {
            self.repaint_columns(self.state.disp_offset(), self.state.disp_offset(), true);
        }
    }

    // ---- time navigation ----------------------------------------------

    /// Jumps the display (and the playhead) to an absolute time.
    pub fn set_time(&mut self, t: f64) {
        let t = t.clamp(0.0, self.state.audio_length);
        let shift = self.state.piece_col(t) - self.state.piece_col(self.state.disp_time);
        self.state.disp_time = t;
        self.player.set_playing_time(t);
        self.state.playing = self.player.state();
        self.scheduler
            .reprioritize(self.state.piece_col(t), self.state.secpp());

        let w = self.state.disp_width as i64;
        if shift.unsigned_abs() as usize >= self.state.disp_width {
            // Large jump: bias the sample cache at the new position.
            self.source.reposition(t);
            self.repaint_display(true);
        } else if shift != 0 {
            self.canvas.shift(shift, self.state.color_map.background());
            let center = self.state.disp_offset();
            if shift > 0 {
                self.repaint_columns(w - shift, w - 1, true);
                self.repaint_columns(center - shift, center, true);
            } else {
                self.repaint_columns(0, -shift - 1, true);
                self.repaint_columns(center, center - shift, true);
            }
        } else {
            self.repaint_columns(self.state.disp_offset(), self.state.disp_offset(), true);
        }
    }

    pub fn time_pan_by(&mut self, dt: f64) {
        self.set_time(self.state.disp_time + dt);
    }

    /// Space: play/pause, or restart from the top when stopped.
    pub fn play_pause(&mut self) {
        match self.player.state() {
            PlayState::Playing => self.player.pause(),
            PlayState::Paused => self.player.play(),
            PlayState::Stopped => {
                self.set_time(0.0);
                self.player.play();
            }
        }
        self.state.playing = self.player.state();
        self.repaint_columns(self.state.disp_offset(), self.state.disp_offset(), true);
    }

    // ---- frequency navigation -----------------------------------------

    /// Checks and applies a displayed frequency range.
    pub fn set_freq_range(&mut self, min: f64, max: f64) -> bool {
        if !(min >= 0.1 && max - min >= 1.0 && max <= self.state.sample_rate as f64) {
            warn!("rejected frequency range {:.1}..{:.1} Hz", min, max);
            return false;
        }
        self.state.min_freq = min;
        self.state.max_freq = max;
        self.rebuild_overlays();
        self.repaint_display(true);
        true
    }

    /// Multiplies both range edges, panning up or down the log axis.
    pub fn freq_pan_by(&mut self, ratio: f64) {
        self.set_freq_range(self.state.min_freq * ratio, self.state.max_freq * ratio);
    }

    /// Zooms the frequency range about its geometric centre; `f > 1` zooms
    /// in (the log-range shrinks by the factor).
    pub fn freq_zoom_by(&mut self, f: f64) {
        if f <= 0.0 {
            return;
        }
        let center = (self.state.min_freq * self.state.max_freq).sqrt();
        let half_ratio = (self.state.max_freq / self.state.min_freq).powf(0.5 / f);
        self.set_freq_range(center / half_ratio, center * half_ratio);
    }

    /// Moves each range edge inward (`ratio > 1`) or outward by the given
    /// factor; used for the one-pixel zoom keys.
    pub fn freq_zoom_edges(&mut self, ratio: f64) {
        self.set_freq_range(self.state.min_freq * ratio, self.state.max_freq / ratio);
    }

    pub fn time_zoom_by(&mut self, f: f64) {
        if f <= 0.0 {
            return;
        }
        let ppsec = (self.state.ppsec * f).clamp(0.1, 10_000.0);
        if ppsec == self.state.ppsec {
            return;
        }
        self.state.ppsec = ppsec;
        // Result keys do not depend on ppsec, so nothing is invalidated;
        // columns that land on the old grid repaint straight from cache.
        self.scheduler
            .reprioritize(self.state.piece_col(self.state.disp_time), self.state.secpp());
        self.repaint_display(true);
    }

    // ---- rendering parameters -----------------------------------------

    pub fn change_dyn_range(&mut self, delta_db: f64) {
        self.state.dyn_range = (self.state.dyn_range + delta_db).max(1.0);
        self.repaint_display(true);
    }

    pub fn change_log_max(&mut self, delta_db: f64) {
        self.state.log_max += delta_db;
        self.repaint_display(true);
    }

    pub fn set_color_map(&mut self, map: ColorMap) {
        if self.state.color_map != map {
            self.state.color_map = map;
            self.repaint_display(true);
        }
    }

    pub fn cycle_color_map(&mut self) {
        self.set_color_map(self.state.color_map.cycled());
    }

    // ---- FFT parameters ------------------------------------------------

    pub fn set_window(&mut self, kind: WindowKind) {
        if self.state.window_kind == kind {
            return;
        }
        info!("window: {}", kind.name());
        self.state.window_kind = kind;
        self.cache.invalidate_by_predicate(move |k| k.window != kind);
        self.scheduler.drop_all_work();
        self.repaint_display(false);
    }

    pub fn cycle_window(&mut self, direction: i32) {
        self.set_window(self.state.window_kind.cycled(direction));
    }

    pub fn set_fft_freq(&mut self, hz: f64) {
        let clamped = hz.clamp(self.state.min_fft_freq(), self.state.sample_rate as f64 / 4.0);
        if (clamped - self.state.fft_freq).abs() < f64::EPSILON {
            return;
        }
        self.state.fft_freq = clamped;
        let speclen = self.state.speclen();
        info!("fft_freq: {:.3} Hz (speclen {})", clamped, speclen);
        self.cache.invalidate_by_predicate(move |k| k.speclen != speclen);
        self.scheduler.drop_all_work();
        self.source.reposition(self.state.disp_time);
        self.repaint_display(false);
    }

    // ---- overlays and bars ---------------------------------------------

    pub fn toggle_freq_axes(&mut self) {
        self.state.show_freq_axes = !self.state.show_freq_axes;
    }

    pub fn toggle_time_axes(&mut self) {
        self.state.show_time_axes = !self.state.show_time_axes;
    }

    pub fn toggle_piano_lines(&mut self) {
        self.state.piano_lines = !self.state.piano_lines;
        self.rebuild_overlays();
        self.repaint_display(true);
    }

    pub fn toggle_staff_lines(&mut self) {
        self.state.staff_lines = !self.state.staff_lines;
        if self.state.staff_lines {
            self.state.guitar_lines = false;
        }
        self.rebuild_overlays();
        self.repaint_display(true);
    }

    pub fn toggle_guitar_lines(&mut self) {
        self.state.guitar_lines = !self.state.guitar_lines;
        if self.state.guitar_lines {
            self.state.staff_lines = false;
        }
        self.rebuild_overlays();
        self.repaint_display(true);
    }

    /// Current playhead if audible, otherwise the displayed centre time;
    /// this is where the bar keys drop their marks.
    pub fn mark_time(&self) -> f64 {
        match self.player.state() {
            PlayState::Playing | PlayState::Paused => self.player.get_playing_time(),
            PlayState::Stopped => self.state.disp_time,
        }
    }

    pub fn set_left_bar(&mut self, t: f64) {
        let secpp = self.state.secpp();
        match self.state.right_bar_time {
            // Both bars on the same column clear the pair.
            Some(r) if cache::quantize_time(r, secpp) == cache::quantize_time(t, secpp) => {
                self.clear_bars();
                return;
            }
            _ => self.state.left_bar_time = Some(t),
        }
        self.repaint_display(true);
    }

    pub fn set_right_bar(&mut self, t: f64) {
        let secpp = self.state.secpp();
        match self.state.left_bar_time {
            Some(l) if cache::quantize_time(l, secpp) == cache::quantize_time(t, secpp) => {
                self.clear_bars();
                return;
            }
            _ => self.state.right_bar_time = Some(t),
        }
        self.repaint_display(true);
    }

    pub fn clear_bars(&mut self) {
        self.state.left_bar_time = None;
        self.state.right_bar_time = None;
        self.repaint_display(true);
    }

    pub fn set_beats_per_bar(&mut self, n: u32) {
        if (1..=12).contains(&n) {
            self.state.beats_per_bar = n;
            debug!("beats per bar: {}", n);
        } else {
            warn!("beats per bar {} out of range 1..=12", n);
        }
    }

    // ---- volume ---------------------------------------------------------

    pub fn change_softvol(&mut self, louder: bool) {
        let factor = if louder { VOLUME_STEP } else { 1.0 / VOLUME_STEP };
        self.state.softvol = (self.state.softvol * factor).clamp(1e-3, 100.0);
        self.player.set_softvol(self.state.softvol);
        info!("softvol: {:.3}", self.state.softvol);
    }

    // ---- cache control --------------------------------------------------

    /// Ctrl+L: redraw everything from whatever the cache holds.
    pub fn refresh(&mut self) {
        self.repaint_display(true);
    }

    /// Ctrl+R: drop all results and pending work, then repaint; the visible
    /// region repopulates exactly as on a fresh start.
    pub fn recompute(&mut self) {
        self.cache.drop_all();
        self.scheduler.drop_all_work();
        self.repaint_display(true);
    }

    // ---- files ----------------------------------------------------------

    pub fn play_next_file(&mut self) {
        if self.file_index + 1 < self.files.len() {
            if let Err(e) = self.load_file(self.file_index + 1) {
                warn!("cannot open next file: {:#}", e);
            }
        } else {
            info!("already at the last file");
        }
    }

    pub fn play_previous_file(&mut self) {
        if self.file_index > 0 {
            if let Err(e) = self.load_file(self.file_index - 1) {
                warn!("cannot open previous file: {:#}", e);
            }
        } else {
            info!("already at the first file");
        }
    }

    fn load_file(&mut self, index: usize) -> Result<()> {
        let source = Arc::new(SampleSource::open(&self.files[index])?);
        self.file_index = index;
        self.state.sample_rate = source.sample_rate();
        self.state.audio_length = source.duration_secs();
        self.state.disp_time = 0.0;
        self.state.playing = PlayState::Stopped;
        self.state.fft_freq = self.state.fft_freq.max(self.state.min_fft_freq());
        self.state.max_freq = self
            .state
            .max_freq
            .min(self.state.sample_rate as f64)
            .max(self.state.min_freq + 1.0);

        self.cache.drop_all();
        self.scheduler.drop_all_work();
        self.scheduler = Scheduler::new(
            Arc::clone(&source),
            Arc::clone(&self.windows),
            Arc::clone(&self.cache),
            self.max_threads,
            self.state.secpp(),
        );
        self.player = Player::new(Arc::clone(&source), self.state.softvol, self.audio_enabled);
        self.source = source;
        self.rebuild_overlays();
        self.repaint_display(true);
        Ok(())
    }

    // ---- info -----------------------------------------------------------

    pub fn screenshot(&mut self, path: &Path) -> Result<()> {
        screenshot::write_png(&self.canvas, path)
    }

    pub fn print_time(&self) {
        println!("{}", timefmt::seconds_to_string(self.mark_time()));
    }

    pub fn print_params(&self) {
        let s = &self.state;
        println!(
            "file {:?}  {} Hz  {} channel(s)  length {}",
            self.source.path(),
            self.source.sample_rate(),
            self.source.channels(),
            timefmt::seconds_to_string(s.audio_length)
        );
        println!(
            "time {}  fft_freq {:.3} Hz (speclen {})  window {}  range {:.1}..{:.1} Hz",
            timefmt::seconds_to_string(self.mark_time()),
            s.fft_freq,
            s.speclen(),
            s.window_kind.name(),
            s.min_freq,
            s.max_freq
        );
        println!(
            "ppsec {:.2}  dyn_range {:.1} dB  log_max {:.1} dB  map {}  softvol {:.3}",
            s.ppsec,
            s.dyn_range,
            s.log_max,
            s.color_map.name(),
            s.softvol
        );
        let visible = self.visible_keys();
        let computed = visible.iter().filter(|k| self.cache.contains(k)).count();
        println!(
            "cache {} columns ({} KB)  visible {}/{} computed  {} in flight  {} pending{}",
            self.cache.len(),
            self.cache.total_bytes() / 1024,
            computed,
            visible.len(),
            self.scheduler.jobs_in_flight(),
            self.scheduler.pending_jobs(),
            if self.player.playback_available() {
                ""
            } else {
                "  (no audio device)"
            }
        );
    }

    // ---- introspection for the GUI and tests ----------------------------

    pub fn visible_keys(&self) -> Vec<ResultKey> {
        (0..self.state.disp_width as i64)
            .filter_map(|x| paint::column_key(&self.state, x))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_source(seconds: f64, sample_rate: u32) -> Arc<SampleSource> {
        let samples: Vec<f32> = (0..(seconds * sample_rate as f64) as usize)
            .map(|i| (2.0 * PI * 440.0 * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        Arc::new(SampleSource::from_samples(samples, sample_rate))
    }

    /// Synchronous, headless engine over a 440 Hz sine.
    fn engine() -> Engine {
        let source = sine_source(4.0, 8000);
        let mut state = DisplayState::new(8000, 4.0);
        state.disp_width = 100;
        state.disp_height = 50;
        state.min_freq = 100.0;
        state.max_freq = 2000.0;
        state.fft_freq = 40.0;
        state.disp_time = 2.0;
        Engine::new(Vec::new(), 0, source, state, 0, false, false)
    }

    #[test]
    fn time_zoom_round_trip_preserves_cache() {
        let mut eng = engine();
        eng.repaint_display(true);
        let secpp = eng.state.secpp();
        let keys = eng.visible_keys();
        assert!(!keys.is_empty());

        eng.time_zoom_by(2.0);
        eng.time_zoom_by(0.5);
        assert_eq!(eng.state.secpp(), secpp);
        for key in &keys {
            assert!(eng.cache.contains(key), "cache entry lost across zoom");
        }
    }

    #[test]
    fn fft_freq_change_rebuilds_visible_region() {
        let mut eng = engine();
        eng.repaint_display(true);
        let old_speclen = eng.state.speclen();

        eng.set_fft_freq(eng.state.fft_freq / 2.0);
        let new_speclen = eng.state.speclen();
        assert_eq!(new_speclen, old_speclen * 2);

        // Old-speclen entries are gone; the synchronous repaint already
        // repopulated the visible region under the new speclen.
        eng.refresh();
        let keys = eng.visible_keys();
        assert!(keys.iter().all(|k| k.speclen == new_speclen));
        assert!(keys.iter().all(|k| eng.cache.contains(k)));
    }

    #[test]
    fn fft_freq_clamps_at_minimum() {
        let mut eng = engine();
        let min = eng.state.min_fft_freq();
        eng.set_fft_freq(min / 4.0);
        assert_eq!(eng.state.fft_freq, min);
        // Asking to go below again is a no-op.
        let speclen = eng.state.speclen();
        eng.set_fft_freq(eng.state.fft_freq / 2.0);
        assert_eq!(eng.state.speclen(), speclen);
    }

    #[test]
    fn freq_range_boundary() {
        let mut eng = engine();
        assert!(!eng.set_freq_range(1000.0, 1000.9)); // span below 1 Hz
        assert!(eng.set_freq_range(1000.0, 1001.0)); // exactly 1 Hz is fine
        assert_eq!(eng.state.min_freq, 1000.0);
        assert_eq!(eng.state.max_freq, 1001.0);
    }

    #[test]
    fn equal_bars_clear_both() {
        let mut eng = engine();
        eng.set_left_bar(1.0);
        assert_eq!(eng.state.left_bar_time, Some(1.0));
        eng.set_right_bar(1.0);
        assert_eq!(eng.state.left_bar_time, None);
        assert_eq!(eng.state.right_bar_time, None);
    }

    #[test]
    fn beats_per_bar_validation() {
        let mut eng = engine();
        eng.set_beats_per_bar(7);
        assert_eq!(eng.state.beats_per_bar, 7);
        eng.set_beats_per_bar(13);
        assert_eq!(eng.state.beats_per_bar, 7);
        eng.set_beats_per_bar(0);
        assert_eq!(eng.state.beats_per_bar, 7);
    }

    #[test]
    fn recompute_matches_fresh_start() {
        // Drive one engine through a parameter detour and a recompute, and
        // compare its pixels with a fresh engine at the same final state.
        let mut a = engine();
        a.repaint_display(true);
        a.time_zoom_by(2.0);
        a.set_window(WindowKind::Hann);
        a.time_zoom_by(0.5);
        a.change_dyn_range(6.0);
        a.recompute();

        let mut b = engine();
        b.state.window_kind = WindowKind::Hann;
        b.state.dyn_range += 6.0;
        b.repaint_display(true);

        assert_eq!(a.canvas.data(), b.canvas.data());
        assert_eq!(a.cache.len(), b.cache.len());
    }

    #[test]
    fn incremental_pan_matches_full_repaint() {
        // Panning shifts the canvas and paints only the exposed strip; the
        // result must be pixel-identical to a full repaint at the new time.
        let mut a = engine();
        a.repaint_display(true);
        a.time_pan_by(0.4); // ten columns at the default ppsec

        let mut b = engine();
        b.set_time(a.state.disp_time);
        b.repaint_display(true);

        assert_eq!(a.state.disp_time, b.state.disp_time);
        assert_eq!(a.canvas.data(), b.canvas.data());
    }

    #[test]
    fn set_time_clamps_and_pauses() {
        let mut eng = engine();
        eng.set_time(100.0);
        assert_eq!(eng.state.disp_time, eng.state.audio_length);
        // Seeking a stopped engine leaves it paused, playhead visible.
        assert_eq!(eng.state.playing, PlayState::Paused);
    }

    #[test]
    fn window_change_invalidates_only_other_windows() {
        let mut eng = engine();
        eng.repaint_display(true);
        eng.set_window(WindowKind::Hann);
        // Synchronous scheduler: repaint happened inside set_window with
        // from_scratch = false, so only requested columns exist; all of them
        // carry the new window.
        eng.refresh();
        for key in eng.visible_keys() {
            assert!(eng.cache.contains(&key));
            assert_eq!(key.window, WindowKind::Hann);
        }
    }

    #[test]
    fn overlay_toggles_are_exclusive() {
        let mut eng = engine();
        eng.toggle_staff_lines();
        assert!(eng.state.staff_lines);
        eng.toggle_guitar_lines();
        assert!(eng.state.guitar_lines);
        assert!(!eng.state.staff_lines);
        eng.toggle_staff_lines();
        assert!(!eng.state.guitar_lines);
    }
}
