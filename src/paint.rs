//! Assembles canvas columns from cached FFT results.
//!
//! Each column is looked up in the result cache; misses are handed to the
//! scheduler and the column keeps its old pixels (or background on a
//! from-scratch paint) until the result arrives. Rows map to frequencies
//! logarithmically, magnitudes are interpolated between the two nearest
//! spectrum bins, clamped into `[log_max - dyn_range, log_max]` and pushed
//! through the color map. Overlays composite last.

use crate::cache::{ResultCache, ResultKey};
use crate::canvas::Canvas;
use crate::display::DisplayState;
use crate::overlay::{self, OverlayMasks};
use crate::scheduler::Scheduler;

/// Everything one paint pass reads and writes.
pub struct PaintContext<'a> {
    pub state: &'a DisplayState,
    pub cache: &'a ResultCache,
    pub scheduler: &'a Scheduler,
    pub overlays: &'a OverlayMasks,
    pub canvas: &'a mut Canvas,
}

/// Cache key of the column at screen x, or None when the column lies outside
/// the audio.
pub fn column_key(state: &DisplayState, x: i64) -> Option<ResultKey> {
    let t = state.screen_column_to_start_time(x);
    if t < 0.0 || t > state.audio_length {
        return None;
    }
    Some(ResultKey::new(t, state.speclen(), state.window_kind))
}

/// Repaints the whole canvas. `from_scratch` forces every pixel; otherwise
/// columns still waiting on results keep their current pixels.
pub fn repaint_display(ctx: &mut PaintContext, from_scratch: bool) {
    let width = ctx.state.disp_width as i64;
    // Pin the visible set so eviction cannot race the paint.
    let visible = (0..width).filter_map(|x| column_key(ctx.state, x));
    ctx.cache.pin_visible(visible);
    for x in 0..width {
        repaint_column(ctx, x, from_scratch);
    }
}

/// Repaints the inclusive column range `x0..=x1`.
pub fn repaint_columns(ctx: &mut PaintContext, x0: i64, x1: i64, from_scratch: bool) {
    for x in x0..=x1 {
        repaint_column(ctx, x, from_scratch);
    }
}

/// Repaints a single screen column.
pub fn repaint_column(ctx: &mut PaintContext, x: i64, from_scratch: bool) {
    if !ctx.state.column_visible(x) {
        return;
    }
    let xu = x as usize;

    // Fetch or request the column first even when an overlay will cover it,
    // so the pixels behind a bar or playhead line are ready when it moves.
    let key = column_key(ctx.state, x);
    let column = key.and_then(|key| match ctx.cache.lookup(&key) {
        Some(column) => Some(column),
        None => {
            ctx.scheduler.request(key);
            // A synchronous scheduler has filled the cache by now.
            ctx.cache.lookup(&key)
        }
    });

    if let Some(color) = overlay::column_overlay(ctx.state, x) {
        ctx.canvas.fill_column(xu, color);
        return;
    }

    let key = match key {
        Some(key) => key,
        None => {
            paint_flat_column(ctx, xu);
            return;
        }
    };

    match column {
        Some(column) => {
            let state = ctx.state;
            let map = state.color_map;
            let background = map.background();
            let nyquist_bin = key.speclen as f64;
            let bins_per_hz = 2.0 * key.speclen as f64 / column.sample_rate as f64;
            for row in 0..state.disp_height {
                let color = if let Some(c) = ctx.overlays.row(row) {
                    c
                } else {
                    let bin = state.row_to_freq(row) * bins_per_hz;
                    if bin > nyquist_bin {
                        background
                    } else {
                        let db = interpolate_db(&column.db, bin);
                        map.map(normalize_db(db, state.log_max, state.dyn_range))
                    }
                };
                ctx.canvas.set_pixel(xu, row, color);
            }
        }
        None => {
            if from_scratch {
                paint_flat_column(ctx, xu);
            }
            // Incremental paint: keep whatever is on screen until the
            // result event arrives.
        }
    }
}

/// Background column with row overlays applied, for out-of-range columns and
/// from-scratch misses.
fn paint_flat_column(ctx: &mut PaintContext, x: usize) {
    let background = ctx.state.color_map.background();
    for row in 0..ctx.state.disp_height {
        let color = ctx.overlays.row(row).unwrap_or(background);
        ctx.canvas.set_pixel(x, row, color);
    }
}

/// Linear interpolation between the two spectrum bins around `bin`.
fn interpolate_db(db: &[f32], bin: f64) -> f32 {
    let i0 = (bin.floor() as usize).min(db.len() - 1);
    let i1 = (i0 + 1).min(db.len() - 1);
    let frac = (bin - i0 as f64) as f32;
    db[i0] * (1.0 - frac) + db[i1] * frac
}

/// Maps a dB value into [0, 1] under the current brightness and contrast.
/// A zero dynamic range degenerates to a hard threshold at `log_max`.
fn normalize_db(db: f32, log_max: f64, dyn_range: f64) -> f32 {
    if dyn_range <= 0.0 {
        return if db as f64 >= log_max { 1.0 } else { 0.0 };
    }
    (((db as f64 - (log_max - dyn_range)) / dyn_range) as f32).clamp(0.0, 1.0)
}
