// src/orchestrator.rs

//! Process-pair orchestration.
//!
//! Creates the two pipe pairs, spawns the worker role (a forked process
//! by default, an in-process thread in `thread` mode), assigns pipe ends,
//! runs the renderer role, and joins the worker gracefully. Each side
//! closes the pipe ends it does not own the moment roles are assigned, so
//! a role exiting always surfaces to its peer as end-of-stream rather
//! than a hang.
//!
//! Renderer role: serialize the scene, transmit its length and bytes
//! once, then satisfy every glyph and metric the serialization needed
//! through the client proxy, composing locally when configured to. When
//! the proxy closes, the worker's dispatcher observes EOF and stops.
//!
//! Worker role: receive the scene stream, answer rasterization requests
//! until the request pipe closes, then independently reconstruct and
//! render the scene with the context cache the dispatcher loop already
//! warmed, when configured to.

use crate::channel::{ClientChannel, ServerChannel};
use crate::client::RemoteGlyphClient;
use crate::config::Config;
use crate::errors::RelayError;
use crate::os::pipe::{ClientEnd, DuplexPipes, ServerEnd};
use crate::raster::RasterEngine;
use crate::scene::{self, Framebuffer, SceneScript};
use crate::server::GlyphServer;
use crate::wire::GlyphDescriptor;
use anyhow::{bail, Context, Result};
use log::{debug, error, info};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

/// Runs the pair as parent renderer + forked worker, waiting for the
/// child after the renderer finishes.
pub fn run_forked<E: RasterEngine>(
    engine: E,
    script: &SceneScript,
    config: &Config,
) -> Result<()> {
    let pipes = DuplexPipes::new()?;
    let forked = unsafe { fork() }
        .map_err(|e| RelayError::SetupFailure(format!("fork failed: {}", e)))?;
    match forked {
        ForkResult::Child => {
            let code = match worker_role(pipes.into_server_end(), engine, config) {
                Ok(()) => 0,
                Err(e) => {
                    error!("worker role failed: {:#}", e);
                    1
                }
            };
            // The child must not run the parent's atexit/Drop machinery.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            info!("spawned worker process {}", child);
            let render_result = renderer_role(pipes.into_client_end(), script, config);
            // Join the worker regardless of how the renderer fared.
            let status = waitpid(child, None).context("failed to wait for worker process")?;
            render_result?;
            match status {
                WaitStatus::Exited(_, 0) => Ok(()),
                WaitStatus::Exited(_, code) => {
                    bail!("worker process exited with status {}", code)
                }
                other => bail!("worker process ended abnormally: {:?}", other),
            }
        }
    }
}

/// Runs the worker role on an in-process thread over the same pipe pair;
/// the original demo's non-process mode, and the harness the integration
/// tests use.
pub fn run_threaded<E>(engine: E, script: &SceneScript, config: &Config) -> Result<()>
where
    E: RasterEngine + Send + 'static,
{
    let (client_end, server_end) = DuplexPipes::new()?.split();
    let worker_config = config.clone();
    let worker = std::thread::Builder::new()
        .name("glyphpipe-worker".into())
        .spawn(move || worker_role(server_end, engine, &worker_config))
        .map_err(|e| RelayError::SetupFailure(format!("worker thread spawn failed: {}", e)))?;

    let render_result = renderer_role(client_end, script, config);
    let worker_result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
    render_result?;
    worker_result
}

/// The renderer role: scene out first, then one half-duplex proxy call
/// per metric/glyph the serialization needed.
fn renderer_role(end: ClientEnd, script: &SceneScript, config: &Config) -> Result<()> {
    let ClientEnd {
        mut request_tx,
        response_rx,
    } = end;

    let scene_bytes = script.to_bytes();
    scene::send_stream(&mut request_tx, &scene_bytes)
        .context("failed to transmit scene stream")?;
    info!("renderer: scene stream is {} bytes", scene_bytes.len());

    let chan = ClientChannel::new(response_rx, request_tx);
    let mut client = RemoteGlyphClient::new(chan, config.channel.buffer_capacity)?;

    for run in &script.runs {
        let metrics = client.get_font_metrics(run.font_id, &run.style)?;
        debug!(
            "renderer: font {} ascent {} descent {}",
            run.font_id, metrics.ascent, metrics.descent
        );
    }

    if config.run.compose.includes_renderer() {
        let mut fb = Framebuffer::new(
            config.scene.framebuffer_width,
            config.scene.framebuffer_height,
        );
        scene::replay_timed(script, &mut client, &mut fb, config.run.repeat_draws)?;
    } else {
        // Composition happens elsewhere, but serialization still needed
        // every glyph's metrics and image exactly once.
        for run in &script.runs {
            for &glyph_id in &run.glyphs {
                let desc = client.get_glyph_metrics(
                    run.font_id,
                    &run.style,
                    &GlyphDescriptor::for_glyph(glyph_id),
                )?;
                let mut image = vec![0u8; desc.image_len()];
                client.get_glyph_image(run.font_id, &run.style, &desc, &mut image)?;
            }
        }
    }

    client.close();
    info!("renderer: done, request pipe closed");
    Ok(())
}

/// The worker role: scene stream in, dispatch until EOF, then optionally
/// compose with the warm context cache.
fn worker_role<E: RasterEngine>(end: ServerEnd, engine: E, config: &Config) -> Result<()> {
    let ServerEnd {
        mut request_rx,
        response_tx,
    } = end;

    let scene_bytes = match scene::receive_stream(&mut request_rx, config.scene.max_scene_bytes) {
        Ok(bytes) => bytes,
        Err(RelayError::PeerClosed) => {
            // Renderer exited before sending anything; nothing to do.
            info!("worker: request pipe closed before scene stream");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to receive scene stream"),
    };
    let script = SceneScript::from_bytes(&scene_bytes)?;
    info!(
        "worker: scene has {} run(s), {} glyph(s)",
        script.runs.len(),
        script.glyph_count()
    );

    let chan = ServerChannel::new(request_rx, response_tx);
    let mut server = GlyphServer::new(chan, engine, config.channel.buffer_capacity)?;
    server.serve().context("dispatcher faulted")?;

    if config.run.compose.includes_worker() {
        let mut local = server.into_local_rasterizer();
        let mut fb = Framebuffer::new(
            config.scene.framebuffer_width,
            config.scene.framebuffer_height,
        );
        scene::replay_timed(&script, &mut local, &mut fb, config.run.repeat_draws)?;
    }

    info!("worker: done");
    Ok(())
}
