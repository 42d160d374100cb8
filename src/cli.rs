//! Command line interface.
//!
//! Frequencies accept either Hz or a note name (`A0`), times accept
//! `seconds`, `M:S` or `H:M:S`. `-h` is taken by `--height`, so only the
//! long `--help` is available.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use log::warn;

use crate::colormap::ColorMap;
use crate::display::{self, DisplayState};
use crate::fft_analysis::WindowKind;
use crate::music;
use crate::timefmt;

#[derive(Parser, Debug)]
#[command(
    name = "spettro",
    version,
    about = "Scrolling log-frequency spectrogram viewer with synchronized playback",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Audio files to show, in playlist order.
    #[arg(value_name = "FILE", required_unless_present = "keys")]
    pub files: Vec<PathBuf>,

    /// Start playing immediately.
    #[arg(short = 'p', long = "autoplay")]
    pub autoplay: bool,

    /// Quit when playback reaches the end of the file.
    #[arg(short = 'e', long = "exit")]
    pub exit_at_end: bool,

    /// Canvas width in pixels.
    #[arg(short = 'w', long = "width", value_parser = parse_dimension)]
    pub width: Option<usize>,

    /// Canvas height in pixels.
    #[arg(short = 'h', long = "height", value_parser = parse_dimension)]
    pub height: Option<usize>,

    /// Open fullscreen.
    #[arg(short = 'F', long = "fullscreen")]
    pub fullscreen: bool,

    /// Minimum displayed frequency (Hz or note name).
    #[arg(short = 'n', long = "min-freq", value_parser = parse_freq)]
    pub min_freq: Option<f64>,

    /// Maximum displayed frequency (Hz or note name).
    #[arg(short = 'x', long = "max-freq", value_parser = parse_freq)]
    pub max_freq: Option<f64>,

    /// Color-map dynamic range in dB.
    #[arg(short = 'd', long = "dyn-range", value_parser = parse_non_negative)]
    pub dyn_range: Option<f64>,

    /// dB level of the brightest pixel.
    #[arg(short = 'M', allow_hyphen_values = true)]
    pub log_max: Option<f64>,

    /// Show the frequency axes.
    #[arg(short = 'a', long = "freq-axis")]
    pub freq_axis: bool,

    /// Show the time axis and status line.
    #[arg(short = 'A', long = "time-axis")]
    pub time_axis: bool,

    /// FFT frequency resolution in Hz.
    #[arg(short = 'f', long = "fft-freq", value_parser = parse_positive)]
    pub fft_freq: Option<f64>,

    /// Initial playing time (seconds, M:S or H:M:S).
    #[arg(short = 't', long = "start", value_parser = parse_time)]
    pub start: Option<f64>,

    /// Left bar-line position.
    #[arg(short = 'l', long = "left", value_parser = parse_time)]
    pub left_bar: Option<f64>,

    /// Right bar-line position.
    #[arg(short = 'r', long = "right", value_parser = parse_time)]
    pub right_bar: Option<f64>,

    /// Beats per bar (0 selects the default).
    #[arg(short = 'b', long = "beats")]
    pub beats: Option<u32>,

    /// Pixel columns per second of audio.
    #[arg(short = 'P', long = "ppsec", value_parser = parse_positive)]
    pub ppsec: Option<f64>,

    /// Scroll rate in frames per second (0 disables scrolling).
    #[arg(short = 'R', long = "fps", value_parser = parse_non_negative)]
    pub fps: Option<f64>,

    /// Overlay the piano keyboard.
    #[arg(short = 'k', long = "piano")]
    pub piano: bool,

    /// Overlay the musical staves.
    #[arg(short = 's', long = "score", conflicts_with = "guitar")]
    pub score: bool,

    /// Overlay the guitar strings.
    #[arg(short = 'g', long = "guitar")]
    pub guitar: bool,

    /// Volume multiplier.
    #[arg(short = 'v', long = "softvol", value_parser = parse_positive)]
    pub softvol: Option<f64>,

    /// Window function (first letter of Kaiser, Dolph, Nuttall, Blackman, Hann).
    #[arg(short = 'W', long = "window", value_parser = parse_window)]
    pub window: Option<WindowKind>,

    /// Color map: heat, gray or print.
    #[arg(short = 'm', value_parser = parse_colormap)]
    pub color_map: Option<ColorMap>,

    /// Render one frame to a PNG file and quit.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Worker-thread count (0 computes in the UI thread).
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// List the keyboard commands.
    #[arg(long = "keys")]
    pub keys: bool,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version.
    #[arg(long, action = ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    /// Folds the flags into a fresh display state; usage errors come back as
    /// `Err` and end the program with exit code 1.
    pub fn apply_to(&self, state: &mut DisplayState) -> Result<()> {
        if let Some(w) = self.width {
            state.disp_width = w;
        }
        if let Some(h) = self.height {
            state.disp_height = h;
        }

        let min = self.min_freq.unwrap_or(state.min_freq);
        let max = self.max_freq.unwrap_or(state.max_freq);
        if max - min < 1.0 {
            bail!(
                "frequency range {:.2}..{:.2} Hz must span at least 1 Hz",
                min,
                max
            );
        }
        state.min_freq = min;
        state.max_freq = max;

        if let Some(d) = self.dyn_range {
            state.dyn_range = d;
        }
        if let Some(m) = self.log_max {
            state.log_max = m;
        }
        if let Some(hz) = self.fft_freq {
            let clamped = hz.clamp(state.min_fft_freq(), state.sample_rate as f64 / 4.0);
            if clamped != hz {
                warn!("fft frequency {} Hz clamped to {:.3} Hz", hz, clamped);
            }
            state.fft_freq = clamped;
        }
        if let Some(t) = self.start {
            state.disp_time = t.clamp(0.0, state.audio_length);
        }
        state.left_bar_time = self.left_bar;
        state.right_bar_time = self.right_bar;
        if let Some(b) = self.beats {
            state.beats_per_bar = match b {
                0 => display::DEFAULT_BEATS_PER_BAR,
                1..=12 => b,
                _ => {
                    warn!("beats per bar {} clamped to 12", b);
                    12
                }
            };
        }
        if let Some(p) = self.ppsec {
            state.ppsec = p;
        }
        if let Some(v) = self.softvol {
            state.softvol = v;
        }
        if let Some(w) = self.window {
            state.window_kind = w;
        }
        if let Some(m) = self.color_map {
            state.color_map = m;
        }
        state.fullscreen = self.fullscreen;
        state.show_freq_axes = self.freq_axis;
        state.show_time_axes = self.time_axis;
        state.piano_lines = self.piano;
        state.staff_lines = self.score;
        state.guitar_lines = self.guitar;
        Ok(())
    }
}

fn parse_dimension(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(format!("\"{}\" is not a positive pixel count", s)),
    }
}

fn parse_positive(s: &str) -> std::result::Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v > 0.0 && v.is_finite() => Ok(v),
        _ => Err(format!("\"{}\" is not a positive number", s)),
    }
}

fn parse_non_negative(s: &str) -> std::result::Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.is_finite() => Ok(v),
        _ => Err(format!("\"{}\" is not a non-negative number", s)),
    }
}

fn parse_freq(s: &str) -> std::result::Result<f64, String> {
    if let Ok(v) = s.parse::<f64>() {
        return if v > 0.0 && v.is_finite() {
            Ok(v)
        } else {
            Err(format!("\"{}\" is not a positive frequency", s))
        };
    }
    music::note_name_to_freq(s).map_err(|e| e.to_string())
}

fn parse_time(s: &str) -> std::result::Result<f64, String> {
    timefmt::string_to_seconds(s).map_err(|e| e.to_string())
}

fn parse_window(s: &str) -> std::result::Result<WindowKind, String> {
    s.chars()
        .next()
        .and_then(WindowKind::from_letter)
        .ok_or_else(|| format!("unknown window \"{}\" (use K, D, N, B or H)", s))
}

fn parse_colormap(s: &str) -> std::result::Result<ColorMap, String> {
    ColorMap::from_name(s).ok_or_else(|| format!("unknown color map \"{}\" (heat, gray, print)", s))
}

pub const KEYS_HELP: &str = "\
Keyboard commands:
  Space            play / pause / restart
  Left/Right       pan time by 10% of the screen
                   (Shift: a screenful, Ctrl: one pixel, Shift+Ctrl: one second)
  Up/Down          pan frequency by 10% of the screen
                   (Shift: a screenful, Ctrl: one pixel, Shift+Ctrl: one semitone)
  PgUp/PgDn        pan frequency by a screenful
  X / x            zoom time in / out by 2
  Y / y            zoom frequency in / out by 2 (Ctrl: one pixel per edge)
  Ctrl + / Ctrl -  zoom both axes in / out
  m                cycle the color map (heat, gray, print)
  c / C            contrast -6 / +6 dB (Ctrl+Shift+C: +1 dB, Ctrl+Alt+C: -1 dB)
  b / B            brightness -6 / +6 dB
  f / F            halve / double the FFT length
  Ctrl K/D/N/B/H   set the window function
  w / W            cycle window function forward / backward
  a / A            toggle frequency / time axes
  k s g            toggle piano / staff / guitar overlays
  n / N            next / previous file in the playlist
  l r              set the left / right bar line at the playhead
  0                clear the bar lines
  1-9, F1-F12      set beats per bar
  + -              volume up / down
  t                print the current time
  o                screenshot to spettro.png
  Ctrl+P           print the current parameters
  Ctrl+L           redraw from cache
  Ctrl+R           recompute everything
  Ctrl+F           toggle fullscreen
  q, Esc, Ctrl+C   quit
";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("spettro").chain(args.iter().copied()))
    }

    #[test]
    fn file_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["song.wav"]).is_ok());
        // ... except for the info flag.
        assert!(parse(&["--keys"]).is_ok());
    }

    #[test]
    fn joined_and_separate_short_arguments() {
        let a = parse(&["-w800", "song.wav"]).unwrap();
        let b = parse(&["-w", "800", "song.wav"]).unwrap();
        assert_eq!(a.width, Some(800));
        assert_eq!(b.width, Some(800));
    }

    #[test]
    fn combined_boolean_shorts() {
        let cli = parse(&["-pe", "song.wav"]).unwrap();
        assert!(cli.autoplay);
        assert!(cli.exit_at_end);
    }

    #[test]
    fn note_names_as_frequencies() {
        let cli = parse(&["-n", "A0", "-x", "14080", "song.wav"]).unwrap();
        assert_eq!(cli.min_freq, Some(27.5));
        assert_eq!(cli.max_freq, Some(14080.0));
    }

    #[test]
    fn times_in_all_three_forms() {
        let cli = parse(&["-t", "1:30", "-l", "5", "-r", "0:06.5", "song.wav"]).unwrap();
        assert_eq!(cli.start, Some(90.0));
        assert_eq!(cli.left_bar, Some(5.0));
        assert_eq!(cli.right_bar, Some(6.5));
    }

    #[test]
    fn log_max_accepts_negative_values() {
        let cli = parse(&["-M", "-20", "song.wav"]).unwrap();
        assert_eq!(cli.log_max, Some(-20.0));
    }

    #[test]
    fn window_by_first_letter() {
        assert_eq!(
            parse(&["-W", "K", "song.wav"]).unwrap().window,
            Some(WindowKind::Kaiser)
        );
        assert_eq!(
            parse(&["-W", "dolph", "song.wav"]).unwrap().window,
            Some(WindowKind::Dolph)
        );
        assert!(parse(&["-W", "Z", "song.wav"]).is_err());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["-w", "0", "song.wav"]).is_err());
        assert!(parse(&["-P", "-3", "song.wav"]).is_err());
        assert!(parse(&["--no-such-flag", "song.wav"]).is_err());
        assert!(parse(&["-t", "1:75", "song.wav"]).is_err());
        assert!(parse(&["-m", "sepia", "song.wav"]).is_err());
    }

    #[test]
    fn staff_and_guitar_are_mutually_exclusive() {
        assert!(parse(&["-s", "-g", "song.wav"]).is_err());
        assert!(parse(&["-s", "song.wav"]).is_ok());
        assert!(parse(&["-g", "song.wav"]).is_ok());
    }

    #[test]
    fn apply_validates_the_frequency_pair() {
        let mut state = DisplayState::new(44100, 10.0);
        let cli = parse(&["-n", "1000", "-x", "1000.5", "song.wav"]).unwrap();
        assert!(cli.apply_to(&mut state).is_err());

        let mut state = DisplayState::new(44100, 10.0);
        let cli = parse(&["-n", "1000", "-x", "1001", "song.wav"]).unwrap();
        assert!(cli.apply_to(&mut state).is_ok());
        assert_eq!(state.min_freq, 1000.0);
        assert_eq!(state.max_freq, 1001.0);
    }

    #[test]
    fn apply_clamps_start_and_beats() {
        let mut state = DisplayState::new(44100, 10.0);
        let cli = parse(&["-t", "99", "-b", "0", "song.wav"]).unwrap();
        cli.apply_to(&mut state).unwrap();
        assert_eq!(state.disp_time, 10.0);
        assert_eq!(state.beats_per_bar, display::DEFAULT_BEATS_PER_BAR);
    }
}
