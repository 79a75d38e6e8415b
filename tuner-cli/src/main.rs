//! # tuner-cli - Terminal Chromatic Tuner
//!
//! Runs a live tuner session on the default input device and prints a
//! single-line readout at display rate.
//!
//! ## Architecture
//! - **Main Thread**: polls the session on a ~60 Hz tick and renders
//! - **Audio Thread**: owned by CPAL, feeds the session through a channel
//! - **Stdin Thread**: signals shutdown when Enter is pressed

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{after, never, select, tick};
use log::info;
use tuner_core::{Mode, Readout, TunerConfig, TunerSession};

/// Poll interval, roughly one display refresh.
const REFRESH: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "tuner-cli", version, about = "Chromatic tuner for the terminal")]
struct Args {
    /// Instrument mode: bass or voice
    #[arg(long)]
    mode: Option<Mode>,

    /// Reference pitch of A4 in Hz
    #[arg(long)]
    a4: Option<f32>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Analyse every second frame only
    #[arg(long)]
    frame_skip: bool,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = build_config(&args)?;

    let mut session = TunerSession::start(config)?;
    println!(
        "Listening in {} mode at {} Hz. Press Enter to stop.",
        session.tracker().mode(),
        session.sample_rate()
    );

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        let _ = stop_tx.send(());
    });
    let deadline = args
        .seconds
        .map(|s| after(Duration::from_secs(s)))
        .unwrap_or_else(never);
    let ticker = tick(REFRESH);

    let mut stdout = io::stdout();
    loop {
        select! {
            recv(ticker) -> _ => {
                let readout = session.poll();
                write!(stdout, "\r{:<72}", format_readout(readout.as_ref()))?;
                stdout.flush()?;
                if session.is_source_disconnected() {
                    break;
                }
            },
            recv(stop_rx) -> _ => break,
            recv(deadline) -> _ => break,
        }
    }

    session.stop();
    println!();
    info!("exiting");
    Ok(())
}

/// Loads the config file if given, then applies command-line overrides.
fn build_config(args: &Args) -> Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => TunerConfig::load(path)?,
        None => TunerConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(a4) = args.a4 {
        config.a4 = a4;
    }
    config.frame_skip |= args.frame_skip;
    config.validate()?;
    Ok(config)
}

fn format_readout(readout: Option<&Readout>) -> String {
    let Some(r) = readout else {
        return "--".to_string();
    };
    let name = match r.enharmonic_name {
        Some(flat) => format!("{}{}/{}{}", r.note_name, r.octave, flat, r.octave),
        None => format!("{}{}", r.note_name, r.octave),
    };
    format!(
        "{name:<8} {:>+4} cents | {:>8.2} Hz | conf {:.2}{}",
        r.cents,
        r.frequency_hz,
        r.confidence,
        if r.locked { " | IN TUNE" } else { "" }
    )
}
