// src/main.rs

// Declare modules
pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod os;
pub mod raster;
pub mod scene;
pub mod server;
pub mod wire;

use crate::{
    config::{RunMode, CONFIG},
    orchestrator::{run_forked, run_threaded},
    raster::SoftwareEngine,
};

use log::info;

/// Main entry point for the `glyphpipe` demo: splits rendering of the
/// demo scene across a renderer/worker process pair connected by pipes.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("starting glyphpipe...");

    let config = &*CONFIG;
    let script = scene::demo_script();
    info!(
        "scene: {} run(s), {} glyph(s); mode {:?}, compose {:?}",
        script.runs.len(),
        script.glyph_count(),
        config.run.mode,
        config.run.compose
    );

    match config.run.mode {
        RunMode::Process => run_forked(SoftwareEngine, &script, config)?,
        RunMode::Thread => run_threaded(SoftwareEngine, &script, config)?,
    }

    info!("glyphpipe exited successfully.");
    Ok(())
}
