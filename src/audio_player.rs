//! Audio playback through the default output device.
//!
//! The player pulls mono frames straight from the shared sample source in
//! the device callback, resampling by linear interpolation when the device
//! rate differs from the file rate. All control state lives in atomics so
//! the callback never takes a lock the UI holds.
//!
//! If no output device can be opened the player degrades gracefully: the
//! display keeps working, `play` logs and no-ops.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, info, warn};

use crate::display::PlayState;
use crate::sample_source::SampleSource;

const STATE_STOPPED: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_PAUSED: u8 = 2;

struct PlayerShared {
    source: Arc<SampleSource>,
    state: AtomicU8,
    /// Playhead in source frames, stored as f64 bits (fractional while
    /// resampling).
    pos_frames: AtomicU64,
    /// Volume multiplier, stored as f32 bits.
    softvol: AtomicU32,
    /// Set once when the playhead reaches end of file.
    finished: AtomicBool,
}

impl PlayerShared {
    fn pos(&self) -> f64 {
        f64::from_bits(self.pos_frames.load(Ordering::SeqCst))
    }

    fn set_pos(&self, frames: f64) {
        self.pos_frames.store(frames.to_bits(), Ordering::SeqCst);
    }

    fn state(&self) -> PlayState {
        match self.state.load(Ordering::SeqCst) {
            STATE_PLAYING => PlayState::Playing,
            STATE_PAUSED => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }
}

pub struct Player {
    shared: Arc<PlayerShared>,
    /// None when the device is unavailable or the player runs headless.
    stream: Option<cpal::Stream>,
}

impl Player {
    /// Opens the default output device. `enabled = false` skips the device
    /// entirely (headless screenshot mode).
    pub fn new(source: Arc<SampleSource>, softvol: f64, enabled: bool) -> Player {
        let shared = Arc::new(PlayerShared {
            source,
            state: AtomicU8::new(STATE_STOPPED),
            pos_frames: AtomicU64::new(0f64.to_bits()),
            softvol: AtomicU32::new((softvol as f32).to_bits()),
            finished: AtomicBool::new(false),
        });

        let stream = if enabled {
            match build_stream(Arc::clone(&shared)) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("audio device unavailable, playback disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Player { shared, stream }
    }

    pub fn playback_available(&self) -> bool {
        self.stream.is_some()
    }

    pub fn state(&self) -> PlayState {
        self.shared.state()
    }

    /// Stopped/Paused -> Playing, resuming from the current playhead.
    pub fn play(&self) {
        if self.stream.is_none() {
            warn!("play requested but no audio device is available");
            return;
        }
        self.shared.finished.store(false, Ordering::SeqCst);
        self.shared.state.store(STATE_PLAYING, Ordering::SeqCst);
        debug!("playing from {:.3}s", self.get_playing_time());
    }

    /// Playing -> Paused.
    pub fn pause(&self) {
        if self.shared.state() == PlayState::Playing {
            self.shared.state.store(STATE_PAUSED, Ordering::SeqCst);
            debug!("paused at {:.3}s", self.get_playing_time());
        }
    }

    /// Current playhead in seconds. Callers tolerate sub-tick jitter.
    pub fn get_playing_time(&self) -> f64 {
        self.shared.pos() / self.shared.source.sample_rate() as f64
    }

    /// Moves the playhead; valid in any state. A stopped player becomes
    /// paused so the next `play` resumes from here.
    pub fn set_playing_time(&self, t: f64) {
        let rate = self.shared.source.sample_rate() as f64;
        let max = self.shared.source.length_frames() as f64;
        self.shared.set_pos((t * rate).clamp(0.0, max));
        self.shared.finished.store(false, Ordering::SeqCst);
        if self.shared.state() == PlayState::Stopped {
            self.shared.state.store(STATE_PAUSED, Ordering::SeqCst);
        }
    }

    pub fn set_softvol(&self, softvol: f64) {
        self.shared
            .softvol
            .store((softvol as f32).to_bits(), Ordering::SeqCst);
    }

    /// True once, after playback has run off the end of the file.
    pub fn take_finished(&self) -> bool {
        self.shared.finished.swap(false, Ordering::SeqCst)
    }
}

fn build_stream(shared: Arc<PlayerShared>) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no default output device"))?;
    let config = device.default_output_config()?;
    info!(
        "audio output: {} at {} Hz, {} channel(s)",
        device.name().unwrap_or_else(|_| "<unknown>".into()),
        config.sample_rate().0,
        config.channels()
    );

    let device_rate = config.sample_rate().0 as f64;
    let channels = config.channels() as usize;
    let stream_config: cpal::StreamConfig = config.into();
    let step = shared.source.sample_rate() as f64 / device_rate;

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _| fill_output(&shared, data, channels, step),
        |e| warn!("audio stream error: {}", e),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// Device callback body: copy (and resample) source frames into the
/// interleaved output buffer, or silence when not playing.
fn fill_output(shared: &PlayerShared, data: &mut [f32], channels: usize, step: f64) {
    data.fill(0.0);
    if shared.state() != PlayState::Playing {
        return;
    }

    let frames = data.len() / channels;
    let pos = shared.pos();
    let length = shared.source.length_frames() as f64;
    let vol = f32::from_bits(shared.softvol.load(Ordering::SeqCst));

    // One zero-padded read covers the whole callback, interpolation included.
    let first = pos.floor() as i64;
    let span = (frames as f64 * step).ceil() as usize + 2;
    let buf = match shared.source.read(first, span) {
        Ok(buf) => buf,
        Err(e) => {
            warn!("audio read failed at frame {}: {}", first, e);
            return;
        }
    };

    for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
        let p = pos + i as f64 * step;
        let idx = (p.floor() as i64 - first) as usize;
        let frac = (p - p.floor()) as f32;
        let s = (buf[idx] * (1.0 - frac) + buf[idx + 1] * frac) * vol;
        for out in frame.iter_mut() {
            *out = s;
        }
    }

    let new_pos = pos + frames as f64 * step;
    if new_pos >= length {
        // stop_auto: the playhead hit end of file.
        shared.set_pos(length);
        shared.state.store(STATE_STOPPED, Ordering::SeqCst);
        shared.finished.store(true, Ordering::SeqCst);
        info!("playback reached end of audio");
    } else {
        shared.set_pos(new_pos);
    }
}
