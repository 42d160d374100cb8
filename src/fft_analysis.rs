//! FFT kernel and window machinery.
//!
//! A spectrogram column is computed from `2 * speclen` samples centred on the
//! column time: window, real FFT, then magnitude-squared in dB. The kernel is
//! stateless; each worker thread keeps its own FFT planner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use realfft::RealFftPlanner;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::cache::ColumnData;
use crate::sample_source::SampleSource;

/// Spectrum lengths are powers of two in this range.
pub const MIN_SPECLEN: usize = 2;
pub const MAX_SPECLEN: usize = 32768;

/// dB value used where the magnitude underflows to zero.
pub const DB_FLOOR: f32 = -180.0;

/// The supported analysis window shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Kaiser,
    Dolph,
    Nuttall,
    Blackman,
    Hann,
}

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Kaiser,
        WindowKind::Dolph,
        WindowKind::Nuttall,
        WindowKind::Blackman,
        WindowKind::Hann,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowKind::Kaiser => "Kaiser",
            WindowKind::Dolph => "Dolph",
            WindowKind::Nuttall => "Nuttall",
            WindowKind::Blackman => "Blackman",
            WindowKind::Hann => "Hann",
        }
    }

    /// Selects a window from the first letter of its name, as used by `-W`
    /// and the Ctrl+letter key bindings.
    pub fn from_letter(c: char) -> Option<WindowKind> {
        match c.to_ascii_uppercase() {
            'K' => Some(WindowKind::Kaiser),
            'D' => Some(WindowKind::Dolph),
            'N' => Some(WindowKind::Nuttall),
            'B' => Some(WindowKind::Blackman),
            'H' => Some(WindowKind::Hann),
            _ => None,
        }
    }

    /// Next window in cycling order; `direction` is +1 or -1.
    pub fn cycled(self, direction: i32) -> WindowKind {
        let i = Self::ALL.iter().position(|&w| w == self).unwrap() as i32;
        let n = Self::ALL.len() as i32;
        Self::ALL[((i + direction).rem_euclid(n)) as usize]
    }
}

/// Smallest power of two `speclen` with `sample_rate / (2*speclen) <= fft_freq`.
pub fn speclen_for(fft_freq: f64, sample_rate: u32) -> usize {
    let needed = sample_rate as f64 / (2.0 * fft_freq);
    let mut speclen = MIN_SPECLEN;
    while (speclen as f64) < needed && speclen < MAX_SPECLEN {
        speclen <<= 1;
    }
    speclen
}

/// Lowest selectable FFT frequency for a sample rate.
pub fn min_fft_freq(sample_rate: u32) -> f64 {
    sample_rate as f64 / 65536.0
}

/// Memoized window coefficient vectors, shared read-only between workers.
///
/// Keyed by `(speclen, kind)`; values have length `2 * speclen`.
pub struct WindowCache {
    windows: Mutex<HashMap<(usize, WindowKind), Arc<Vec<f32>>>>,
}

impl WindowCache {
    pub fn new() -> Self {
        WindowCache {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, speclen: usize, kind: WindowKind) -> Arc<Vec<f32>> {
        let mut map = self.windows.lock().unwrap();
        map.entry((speclen, kind))
            .or_insert_with(|| {
                log::debug!("computing {} window of length {}", kind.name(), 2 * speclen);
                Arc::new(compute_window(2 * speclen, kind))
            })
            .clone()
    }
}

/// Computes the coefficients of a window of the given total length.
pub fn compute_window(len: usize, kind: WindowKind) -> Vec<f32> {
    match kind {
        WindowKind::Hann => cosine_window(len, &[0.5, 0.5]),
        WindowKind::Blackman => cosine_window(len, &[0.42, 0.5, 0.08]),
        WindowKind::Nuttall => cosine_window(len, &[0.355768, 0.487396, 0.144232, 0.012604]),
        WindowKind::Kaiser => kaiser_window(len, kaiser_beta(90.0)),
        WindowKind::Dolph => dolph_window(len, 80.0),
    }
}

/// Generalized cosine window: `w[n] = sum_k (-1)^k a_k cos(2 pi k n / (N-1))`.
fn cosine_window(len: usize, coeffs: &[f64]) -> Vec<f32> {
    let denom = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let phase = 2.0 * PI * n as f64 / denom;
            let mut w = 0.0;
            for (k, &a) in coeffs.iter().enumerate() {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                w += sign * a * (phase * k as f64).cos();
            }
            w as f32
        })
        .collect()
}

/// Kaiser shape parameter for a target sidelobe attenuation in dB.
fn kaiser_beta(atten_db: f64) -> f64 {
    if atten_db > 50.0 {
        0.1102 * (atten_db - 8.7)
    } else if atten_db >= 21.0 {
        0.5842 * (atten_db - 21.0).powf(0.4) + 0.07886 * (atten_db - 21.0)
    } else {
        0.0
    }
}

/// Zeroth-order modified Bessel function of the first kind, by power series.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..=32 {
        term *= (half_x / k as f64) * (half_x / k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

fn kaiser_window(len: usize, beta: f64) -> Vec<f32> {
    let denom = bessel_i0(beta);
    let half = (len - 1) as f64 / 2.0;
    (0..len)
        .map(|n| {
            let r = (n as f64 - half) / half;
            (bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom) as f32
        })
        .collect()
}

/// Chebyshev polynomial T_m evaluated at x, valid for all real x.
fn cheb_poly(m: f64, x: f64) -> f64 {
    if x.abs() <= 1.0 {
        (m * x.acos()).cos()
    } else if x > 1.0 {
        (m * x.acosh()).cosh()
    } else {
        let sign = if (m as i64) % 2 == 0 { 1.0 } else { -1.0 };
        sign * (m * (-x).acosh()).cosh()
    }
}

/// Dolph-Chebyshev window with equiripple sidelobes at `-atten_db`.
///
/// Samples the Chebyshev spectrum and transforms it back with an FFT, so
/// even the longest windows stay cheap to build.
fn dolph_window(len: usize, atten_db: f64) -> Vec<f32> {
    let order = (len - 1) as f64;
    let ripple = 10f64.powf(atten_db / 20.0);
    let x0 = (ripple.acosh() / order).cosh();

    // Sample the Chebyshev spectrum; the half-sample phase twist centres the
    // even-length window after the transform.
    let mut spectrum: Vec<Complex<f64>> = (0..len)
        .map(|k| {
            let x = x0 * (PI * k as f64 / len as f64).cos();
            let p = cheb_poly(order, x);
            let phase = PI * k as f64 / len as f64;
            Complex::new(p * phase.cos(), p * phase.sin())
        })
        .collect();

    FftPlanner::new().plan_fft_forward(len).process(&mut spectrum);

    let half = len / 2 + 1;
    let mut w = Vec::with_capacity(len);
    for i in (1..half).rev() {
        w.push(spectrum[i].re);
    }
    for i in 1..half {
        w.push(spectrum[i].re);
    }
    let peak = w.iter().cloned().fold(f64::MIN, f64::max);
    w.into_iter().map(|v| (v / peak) as f32).collect()
}

thread_local! {
    static FFT_PLANNER: RefCell<RealFftPlanner<f32>> = RefCell::new(RealFftPlanner::new());
}

/// Computes one spectrogram column: `speclen + 1` dB magnitudes from the
/// `2 * speclen` samples centred on `column_time`.
///
/// Reads past either end of the audio are zero-padded by the sample source,
/// so edge columns come back quiet rather than failing.
pub fn compute_column(
    source: &SampleSource,
    windows: &WindowCache,
    column_time: f64,
    speclen: usize,
    kind: WindowKind,
) -> Result<ColumnData> {
    let n = 2 * speclen;
    let sample_rate = source.sample_rate();
    let center = (column_time * sample_rate as f64).round() as i64;
    let samples = source.read(center - speclen as i64, n)?;
    let window = windows.get(speclen, kind);

    let fft = FFT_PLANNER.with(|p| p.borrow_mut().plan_fft_forward(n));
    let mut input = fft.make_input_vec();
    for (inp, (&s, &w)) in input.iter_mut().zip(samples.iter().zip(window.iter())) {
        *inp = s * w;
    }
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum)
        .map_err(|e| anyhow!("FFT of {} samples failed: {}", n, e))?;

    let scale = 2.0 / n as f32;
    let db: Vec<f32> = spectrum
        .iter()
        .map(|c| {
            let power = c.norm_sqr() * scale * scale;
            if power > 0.0 {
                (10.0 * power.log10()).max(DB_FLOOR)
            } else {
                DB_FLOOR
            }
        })
        .collect();

    Ok(ColumnData { db, sample_rate })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speclen_matches_resolution() {
        // 44100 / (2 * 4096) = 5.38 Hz <= 10 Hz, and 2048 is not enough.
        assert_eq!(speclen_for(10.0, 44100), 4096);
        assert_eq!(speclen_for(5.0, 44100), 8192);
        // Clamped at both ends.
        assert_eq!(speclen_for(1e9, 44100), MIN_SPECLEN);
        assert_eq!(speclen_for(min_fft_freq(44100), 44100), MAX_SPECLEN);
    }

    #[test]
    fn windows_are_symmetric_and_unit_peak() {
        for kind in WindowKind::ALL {
            let w = compute_window(1024, kind);
            assert_eq!(w.len(), 1024);
            let peak = w.iter().cloned().fold(f32::MIN, f32::max);
            assert!((peak - 1.0).abs() < 1e-3, "{} peak {}", kind.name(), peak);
            for i in 0..w.len() / 2 {
                let mirror = w[w.len() - 1 - i];
                assert!(
                    (w[i] - mirror).abs() < 1e-3,
                    "{} asymmetric at {}: {} vs {}",
                    kind.name(),
                    i,
                    w[i],
                    mirror
                );
            }
        }
    }

    #[test]
    fn hann_endpoints_are_zero() {
        let w = compute_window(512, WindowKind::Hann);
        assert!(w[0].abs() < 1e-6);
        assert!(w[511].abs() < 1e-6);
        assert!((w[255] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn window_cycling_wraps() {
        assert_eq!(WindowKind::Hann.cycled(1), WindowKind::Kaiser);
        assert_eq!(WindowKind::Kaiser.cycled(-1), WindowKind::Hann);
        let mut w = WindowKind::Kaiser;
        for _ in 0..WindowKind::ALL.len() {
            w = w.cycled(1);
        }
        assert_eq!(w, WindowKind::Kaiser);
    }

    #[test]
    fn window_cache_shares_coefficients() {
        let cache = WindowCache::new();
        let a = cache.get(256, WindowKind::Blackman);
        let b = cache.get(256, WindowKind::Blackman);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 512);
    }

    #[test]
    fn sine_peaks_in_the_right_bin() {
        let sample_rate = 44100u32;
        let freq = 440.0f64;
        let samples: Vec<f32> = (0..sample_rate as usize)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        let source = SampleSource::from_samples(samples, sample_rate);
        let windows = WindowCache::new();

        let speclen = speclen_for(10.0, sample_rate);
        let col = compute_column(&source, &windows, 0.5, speclen, WindowKind::Hann).unwrap();
        assert_eq!(col.db.len(), speclen + 1);

        let peak_bin = col
            .db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let expected = freq * 2.0 * speclen as f64 / sample_rate as f64;
        assert!(
            (peak_bin as f64 - expected).abs() <= 1.0,
            "peak bin {} expected near {}",
            peak_bin,
            expected
        );
    }

    #[test]
    fn columns_are_deterministic() {
        let samples: Vec<f32> = (0..8192).map(|i| ((i * 37) % 97) as f32 / 97.0).collect();
        let source = SampleSource::from_samples(samples, 8000);
        let windows = WindowCache::new();
        let a = compute_column(&source, &windows, 0.3, 1024, WindowKind::Kaiser).unwrap();
        let b = compute_column(&source, &windows, 0.3, 1024, WindowKind::Kaiser).unwrap();
        assert_eq!(a.db, b.db);
    }
}
