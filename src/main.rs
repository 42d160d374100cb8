mod audio_player;
mod cache;
mod canvas;
mod cli;
mod colormap;
mod control;
mod display;
mod fft_analysis;
mod music;
mod overlay;
mod paint;
mod plot;
mod sample_source;
mod scheduler;
mod screenshot;
mod timefmt;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info};

use cli::Cli;
use control::Engine;
use display::{DisplayState, DEFAULT_FPS};
use plot::SpettroApp;
use sample_source::SampleSource;
use scheduler::Scheduler;

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are informational, everything else is a
            // usage error.
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if cli.keys {
        print!("{}", cli::KEYS_HELP);
        return;
    }

    if let Err(e) = run(cli) {
        error!("fatal: {:#}", e);
        eprintln!("spettro: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let files = cli.files.clone();
    let source = Arc::new(SampleSource::open(&files[0])?);

    let mut state = DisplayState::new(source.sample_rate(), source.duration_secs());
    cli.apply_to(&mut state)?;

    // Headless one-frame render: compute synchronously, write the PNG, done.
    if let Some(path) = &cli.output {
        let mut engine = Engine::new(files, 0, source, state, 0, false, false);
        engine.repaint_display(true);
        engine.screenshot(path)?;
        return Ok(());
    }

    let jobs = cli.jobs.unwrap_or_else(Scheduler::default_threads);
    let fps = cli.fps.unwrap_or(DEFAULT_FPS);
    let autoplay = cli.autoplay;
    let width = state.disp_width as f32;
    let height = state.disp_height as f32;
    let fullscreen = state.fullscreen;
    let engine = Engine::new(files, 0, source, state, jobs, true, cli.exit_at_end);

    info!("starting GUI ({}x{}, {} jobs)", width, height, jobs);
    let options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(width, height)),
        fullscreen,
        ..Default::default()
    };
    eframe::run_native(
        "spettro",
        options,
        Box::new(move |cc| Box::new(SpettroApp::new(cc, engine, fps, autoplay))),
    )
    .map_err(|e| anyhow!("GUI error: {}", e))
}
