// src/server.rs

//! Server dispatcher: the worker-side read/dispatch/reply loop.
//!
//! Each iteration reads exactly one fixed header from the request pipe.
//! End-of-stream at the top of the loop is the orderly shutdown signal;
//! a short header anywhere else, or an unknown operation tag, faults the
//! dispatcher. Requests are answered by resolving a rasterization context
//! for the frame's (font identity, style descriptor) pair from a
//! process-lifetime cache, executing the operation into the staging
//! buffer, and writing the whole reply (header plus trailing data) back
//! as one logical frame.
//!
//! The loop is an explicit state machine rather than a `while(true)` with
//! an assert in the default branch: `Running -> Stopped` on EOF,
//! `Running -> Faulted` on any protocol error.

use crate::channel::{ReadOutcome, ServerChannel};
use crate::errors::Result;
use crate::raster::{LocalRasterizer, RasterEngine};
use crate::wire::{ChannelBuffer, FontId, Frame, Payload, StyleKey, HEADER_LEN};
use log::{debug, info, trace};
use std::collections::HashMap;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    /// The request pipe closed with no bytes pending; the loop exited
    /// cleanly.
    Stopped,
    /// A protocol violation or engine failure ended the loop; the stream
    /// must not be interpreted further.
    Faulted,
}

pub struct GlyphServer<R: Read, W: Write, E: RasterEngine> {
    chan: ServerChannel<R, W>,
    buf: ChannelBuffer,
    engine: E,
    contexts: HashMap<(FontId, StyleKey), E::Context>,
    contexts_created: u64,
    state: DispatcherState,
}

impl<R: Read, W: Write, E: RasterEngine> GlyphServer<R, W, E> {
    pub fn new(chan: ServerChannel<R, W>, engine: E, buffer_capacity: usize) -> Result<Self> {
        Ok(GlyphServer {
            chan,
            buf: ChannelBuffer::new(buffer_capacity)?,
            engine,
            contexts: HashMap::new(),
            contexts_created: 0,
            state: DispatcherState::Running,
        })
    }

    /// Runs the dispatch loop until the request pipe closes.
    pub fn serve(&mut self) -> Result<()> {
        match self.serve_loop() {
            Ok(()) => {
                self.state = DispatcherState::Stopped;
                info!(
                    "dispatcher stopped cleanly after creating {} context(s)",
                    self.contexts_created
                );
                Ok(())
            }
            Err(e) => {
                self.state = DispatcherState::Faulted;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Number of rasterization contexts constructed so far. Repeated
    /// requests for the same (font, style) pair must not grow this.
    pub fn contexts_created(&self) -> u64 {
        self.contexts_created
    }

    /// Tears the server down into a local rasterizer that keeps the warm
    /// context cache, for worker-side composition after the loop ends.
    pub fn into_local_rasterizer(self) -> LocalRasterizer<E> {
        self.chan.close();
        LocalRasterizer::with_contexts(self.engine, self.contexts)
    }

    fn serve_loop(&mut self) -> Result<()> {
        loop {
            // A short nonzero header read fails inside receive_request.
            match self.chan.receive_request(self.buf.header_mut())? {
                ReadOutcome::Closed => {
                    debug!("request pipe closed, dispatcher shutting down");
                    return Ok(());
                }
                ReadOutcome::Filled => {}
            }
            let request = Frame::decode(self.buf.header())?;
            trace!(
                "dispatch {:?} for font {}",
                request.operation(),
                request.font_id
            );
            let trailing_len = self.handle(request)?;
            self.chan
                .send_response(self.buf.staged_frame(trailing_len)?)?;
        }
    }

    /// Stages the reply for `request` into the buffer and returns its
    /// trailing byte count.
    fn handle(&mut self, request: Frame) -> Result<usize> {
        let key = (request.font_id, request.style.key());
        if !self.contexts.contains_key(&key) {
            let ctx = self.engine.create_context(request.font_id, &request.style)?;
            self.contexts.insert(key, ctx);
            self.contexts_created += 1;
            debug!(
                "created rasterization context #{} for font {}",
                self.contexts_created, request.font_id
            );
        }
        let ctx = &self.contexts[&key];

        let reply_payload = match request.payload {
            Payload::FontMetrics(_) => Payload::FontMetrics(self.engine.font_metrics(ctx)),
            Payload::GlyphMetrics(desc) => {
                Payload::GlyphMetrics(self.engine.glyph_metrics(ctx, &desc))
            }
            Payload::GlyphImage(desc) => {
                // Bounds are checked against the remaining buffer capacity
                // before the engine writes a single pixel.
                let image_len = desc.image_len();
                self.buf.check_trailing(image_len)?;
                self.engine
                    .render_image(ctx, &desc, self.buf.trailing_mut(image_len)?)?;
                Payload::GlyphImage(desc)
            }
            Payload::GlyphOutline(desc) => {
                let available = self.buf.capacity() - HEADER_LEN;
                let written =
                    self.engine
                        .render_outline(ctx, desc.glyph_id, self.buf.trailing_mut(available)?)?;
                let mut out = desc;
                out.outline_len = written as u64;
                Payload::GlyphOutline(out)
            }
        };

        let reply = Frame {
            font_id: request.font_id,
            style: request.style,
            payload: reply_payload,
        };
        reply.encode_into(self.buf.header_mut())?;
        Ok(reply.trailing_len())
    }
}
