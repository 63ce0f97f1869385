//! polyvoice - play the synth engine from the computer keyboard
//!
//! Run with: cargo run
//!
//! Logs go to `polyvoice.log` (filter with RUST_LOG, e.g.
//! `RUST_LOG=polyvoice::voice=debug`) so they don't tear the TUI.

mod app;
mod ui;

use std::fs::File;

use color_eyre::eyre::WrapErr;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;

use app::App;
use polyvoice::SynthConfig;

const LOG_FILE: &str = "polyvoice.log";

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let log = File::create(LOG_FILE).wrap_err("failed to create log file")?;
    Builder::from_env(Env::default().default_filter_or(LevelFilter::Info.to_string()))
        .target(Target::Pipe(Box::new(log)))
        .init();

    App::new(SynthConfig::default())?.run()
}
