//! The eframe application: event loop, keyboard dispatch, scroll timer and
//! texture upload.
//!
//! A timer thread posts scroll ticks through a capacity-1 channel with a
//! non-blocking send, so at most one tick is ever pending; if the UI thread
//! is starved, extra ticks are simply dropped instead of flooding the queue.
//! The canvas is uploaded as a texture only when its dirty flag is set.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use eframe::egui;
use eframe::egui::{Align2, Color32, FontId, TextureOptions};
use log::{info, warn};

use crate::control::Engine;
use crate::fft_analysis::WindowKind;
use crate::music;
use crate::timefmt;

pub struct SpettroApp {
    engine: Engine,
    texture: Option<egui::TextureHandle>,
    scroll_rx: Receiver<()>,
    tick_shutdown: Arc<AtomicBool>,
}

impl SpettroApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        mut engine: Engine,
        fps: f64,
        autoplay: bool,
    ) -> SpettroApp {
        let (tick_tx, scroll_rx) = bounded(1);
        let tick_shutdown = Arc::new(AtomicBool::new(false));

        if fps > 0.0 {
            let ctx = cc.egui_ctx.clone();
            let shutdown = Arc::clone(&tick_shutdown);
            let period = Duration::from_secs_f64(1.0 / fps);
            thread::Builder::new()
                .name("scroll-tick".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::sleep(period);
                        // Non-blocking: a tick already pending means the UI
                        // is behind, so this one is dropped.
                        let _ = tick_tx.try_send(());
                        ctx.request_repaint();
                    }
                })
                .expect("failed to spawn scroll timer");
            info!("scroll timer at {} fps", fps);
        } else {
            info!("scrolling disabled (fps 0)");
        }

        engine.repaint_display(true);
        if autoplay {
            engine.play_pause();
        }

        SpettroApp {
            engine,
            texture: None,
            scroll_rx,
            tick_shutdown,
        }
    }

    fn dispatch_key(&mut self, key: egui::Key, mods: egui::Modifiers, frame: &mut eframe::Frame) {
        use egui::Key;

        let ctrl = mods.ctrl || mods.command;
        let shift = mods.shift;

        // View geometry snapshot for the pan/zoom step sizes.
        let secpp = self.engine.state.secpp();
        let screen_dt = self.engine.state.disp_width as f64 * secpp;
        let full_ratio = self.engine.state.max_freq / self.engine.state.min_freq;
        let pixel_ratio = full_ratio.powf(1.0 / (self.engine.state.disp_height as f64 - 1.0));
        let semitone = 2f64.powf(1.0 / 12.0);

        let eng = &mut self.engine;
        match key {
            Key::Space => eng.play_pause(),

            Key::ArrowLeft | Key::ArrowRight => {
                let step = if ctrl && shift {
                    1.0
                } else if ctrl {
                    secpp
                } else if shift {
                    screen_dt
                } else {
                    screen_dt / 10.0
                };
                let dt = if key == Key::ArrowRight { step } else { -step };
                eng.time_pan_by(dt);
            }

            Key::ArrowUp | Key::ArrowDown => {
                let ratio = if ctrl && shift {
                    semitone
                } else if ctrl {
                    pixel_ratio
                } else if shift {
                    full_ratio
                } else {
                    full_ratio.powf(0.1)
                };
                let ratio = if key == Key::ArrowUp { ratio } else { 1.0 / ratio };
                eng.freq_pan_by(ratio);
            }

            Key::PageUp => eng.freq_pan_by(full_ratio),
            Key::PageDown => eng.freq_pan_by(1.0 / full_ratio),

            Key::X => eng.time_zoom_by(if shift { 2.0 } else { 0.5 }),
            Key::Y if ctrl => {
                eng.freq_zoom_edges(if shift { pixel_ratio } else { 1.0 / pixel_ratio })
            }
            Key::Y => eng.freq_zoom_by(if shift { 2.0 } else { 0.5 }),

            Key::PlusEquals if ctrl => {
                eng.time_zoom_by(2.0);
                eng.freq_zoom_by(2.0);
            }
            Key::Minus if ctrl => {
                eng.time_zoom_by(0.5);
                eng.freq_zoom_by(0.5);
            }
            Key::PlusEquals => eng.change_softvol(true),
            Key::Minus => eng.change_softvol(false),

            Key::M => eng.cycle_color_map(),

            // Ctrl+C quits, so the fine 1 dB contrast steps live on
            // Ctrl+Shift+C (+1) and Ctrl+Alt+C (-1).
            Key::C if ctrl && shift => eng.change_dyn_range(1.0),
            Key::C if ctrl && mods.alt => eng.change_dyn_range(-1.0),
            Key::C if ctrl => eng.quit(),
            Key::C => eng.change_dyn_range(if shift { 6.0 } else { -6.0 }),

            Key::K if ctrl => eng.set_window(WindowKind::Kaiser),
            Key::D if ctrl => eng.set_window(WindowKind::Dolph),
            Key::N if ctrl => eng.set_window(WindowKind::Nuttall),
            Key::B if ctrl => eng.set_window(WindowKind::Blackman),
            Key::H if ctrl => eng.set_window(WindowKind::Hann),

            Key::N if shift => eng.play_previous_file(),
            Key::N => eng.play_next_file(),

            Key::B => eng.change_log_max(if shift { 6.0 } else { -6.0 }),

            Key::F if ctrl => {
                eng.state.fullscreen = !eng.state.fullscreen;
                frame.set_fullscreen(eng.state.fullscreen);
            }
            Key::F => {
                // f halves the FFT length (coarser resolution), F doubles it.
                let hz = eng.state.fft_freq;
                eng.set_fft_freq(if shift { hz / 2.0 } else { hz * 2.0 });
            }

            Key::W => eng.cycle_window(if shift { -1 } else { 1 }),

            Key::A if shift => eng.toggle_time_axes(),
            Key::A => eng.toggle_freq_axes(),

            Key::L if ctrl => eng.refresh(),
            Key::R if ctrl => eng.recompute(),
            Key::L => {
                let t = eng.mark_time();
                eng.set_left_bar(t);
            }
            Key::R => {
                let t = eng.mark_time();
                eng.set_right_bar(t);
            }
            Key::Num0 => eng.clear_bars(),

            Key::K => eng.toggle_piano_lines(),
            Key::S => eng.toggle_staff_lines(),
            Key::G => eng.toggle_guitar_lines(),

            Key::T => eng.print_time(),
            Key::P if ctrl => eng.print_params(),
            Key::O => {
                if let Err(e) = eng.screenshot(Path::new("spettro.png")) {
                    warn!("screenshot failed: {:#}", e);
                }
            }

            Key::Q | Key::Escape => eng.quit(),

            other => {
                if let Some(n) = beats_digit(other) {
                    eng.set_beats_per_bar(n);
                }
            }
        }
    }

    fn draw_axes(&self, ui: &egui::Ui, rect: egui::Rect) {
        let state = &self.engine.state;
        let painter = ui.painter();
        let font = FontId::monospace(10.0);

        if state.show_freq_axes {
            // One label per octave of the displayed range; note names when
            // the piano overlay is up, plain Hz otherwise.
            let mut freq = state.min_freq;
            while freq <= state.max_freq {
                if let Some(row) = state.freq_to_row(freq) {
                    let y = rect.bottom()
                        - rect.height() * row as f32 / (state.disp_height - 1) as f32;
                    let label = if state.piano_lines {
                        music::freq_to_note_name(freq)
                    } else {
                        format!("{:.0}", freq)
                    };
                    painter.text(
                        egui::pos2(rect.left() + 2.0, y),
                        Align2::LEFT_CENTER,
                        label,
                        font.clone(),
                        Color32::WHITE,
                    );
                }
                freq *= 2.0;
            }
        }

        if state.show_time_axes {
            let left = state.screen_column_to_start_time(0).max(0.0);
            let right = state
                .screen_column_to_start_time(state.disp_width as i64 - 1)
                .min(state.audio_length);
            painter.text(
                egui::pos2(rect.left() + 2.0, rect.bottom() - 2.0),
                Align2::LEFT_BOTTOM,
                timefmt::seconds_to_string(left),
                font.clone(),
                Color32::WHITE,
            );
            painter.text(
                egui::pos2(rect.right() - 2.0, rect.bottom() - 2.0),
                Align2::RIGHT_BOTTOM,
                timefmt::seconds_to_string(right),
                font.clone(),
                Color32::WHITE,
            );
            let status = format!(
                "{}  {}  fft {:.1} Hz  {} ",
                timefmt::seconds_to_string(state.disp_time),
                state.window_kind.name(),
                state.fft_freq,
                state.color_map.name(),
            );
            painter.text(
                egui::pos2(rect.center().x, rect.top() + 2.0),
                Align2::CENTER_TOP,
                status,
                font,
                Color32::WHITE,
            );
        }
    }
}

/// Beats-per-bar value of the digit and function keys, if any.
fn beats_digit(key: egui::Key) -> Option<u32> {
    use egui::Key;
    match key {
        Key::Num1 => Some(1),
        Key::Num2 => Some(2),
        Key::Num3 => Some(3),
        Key::Num4 => Some(4),
        Key::Num5 => Some(5),
        Key::Num6 => Some(6),
        Key::Num7 => Some(7),
        Key::Num8 => Some(8),
        Key::Num9 => Some(9),
        Key::F1 => Some(1),
        Key::F2 => Some(2),
        Key::F3 => Some(3),
        Key::F4 => Some(4),
        Key::F5 => Some(5),
        Key::F6 => Some(6),
        Key::F7 => Some(7),
        Key::F8 => Some(8),
        Key::F9 => Some(9),
        Key::F10 => Some(10),
        Key::F11 => Some(11),
        Key::F12 => Some(12),
        _ => None,
    }
}

impl eframe::App for SpettroApp {
    fn on_close_event(&mut self) -> bool {
        self.tick_shutdown.store(true, Ordering::Relaxed);
        true
    }

    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        // At most one tick is pending; handle it before painting.
        if self.scroll_rx.try_recv().is_ok() {
            self.engine.scroll_tick();
        }
        self.engine.absorb_results();

        let events = ctx.input(|i| i.events.clone());
        for event in events {
            if let egui::Event::Key {
                key,
                pressed: true,
                modifiers,
                ..
            } = event
            {
                self.dispatch_key(key, modifiers, frame);
            }
        }

        if self.engine.quit_requested() {
            self.tick_shutdown.store(true, Ordering::Relaxed);
            frame.close();
            return;
        }

        if self.engine.canvas.take_dirty() {
            let image = self.engine.canvas.to_color_image();
            match &mut self.texture {
                Some(texture) => texture.set(image, TextureOptions::NEAREST),
                None => {
                    self.texture = Some(ctx.load_texture("spectrogram", image, TextureOptions::NEAREST))
                }
            }
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(Color32::BLACK))
            .show(ctx, |ui| {
                if let Some(texture) = &self.texture {
                    let size = egui::vec2(
                        self.engine.state.disp_width as f32,
                        self.engine.state.disp_height as f32,
                    );
                    let response = ui.image(texture, size);
                    self.draw_axes(ui, response.rect);
                }
            });

        // Keep results flowing onto the screen even between scroll ticks.
        ctx.request_repaint_after(Duration::from_millis(40));
    }
}
