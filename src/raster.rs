// src/raster.rs

//! Rasterization capability interface and the built-in software engine.
//!
//! The dispatcher does not know any rasterization math; it consumes the
//! `RasterEngine` trait, which resolves a per-(font, style) context and
//! produces metrics, coverage bitmaps, and outline bytes. The bundled
//! `SoftwareEngine` is a deterministic stand-in for a real font backend:
//! both processes compute byte-identical results from the same inputs,
//! which is what the end-to-end tests rely on.

use crate::errors::Result;
use crate::wire::{FontId, FontMetrics, GlyphDescriptor, StyleDescriptor, StyleKey};
use anyhow::bail;
use log::{debug, trace};
use std::collections::HashMap;

/// Capability object consumed by the server dispatcher (and by local
/// composition). A context is created once per (font identity, style
/// descriptor) pair and reused for every subsequent glyph in that style.
pub trait RasterEngine {
    /// Per-(font, style) rasterization state.
    type Context;

    fn create_context(&self, font_id: FontId, style: &StyleDescriptor)
        -> anyhow::Result<Self::Context>;

    fn font_metrics(&self, ctx: &Self::Context) -> FontMetrics;

    /// Fills in advance, bounding box, and trailing-size hints for the
    /// glyph named by `desc.glyph_id`.
    fn glyph_metrics(&self, ctx: &Self::Context, desc: &GlyphDescriptor) -> GlyphDescriptor;

    /// Renders `row_bytes * height` coverage bytes for `desc` into `out`.
    /// `out.len()` equals `desc.image_len()` exactly.
    fn render_image(
        &self,
        ctx: &Self::Context,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> anyhow::Result<()>;

    /// Serializes the glyph's outline into `out` and returns the byte
    /// count, or fails if `out` is too small.
    fn render_outline(
        &self,
        ctx: &Self::Context,
        glyph_id: u32,
        out: &mut [u8],
    ) -> anyhow::Result<usize>;
}

/// Source of glyph answers for scene composition. Implemented by the
/// remote client proxy (renderer role) and by `LocalRasterizer` (worker
/// role), so the compositor does not care which process it runs in.
pub trait GlyphSource {
    fn glyph_metrics(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
    ) -> Result<GlyphDescriptor>;

    fn glyph_image(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> Result<()>;
}

/// In-process `GlyphSource` backed directly by an engine, with the same
/// lazily-populated, never-evicted context cache the dispatcher keeps.
pub struct LocalRasterizer<E: RasterEngine> {
    engine: E,
    contexts: HashMap<(FontId, StyleKey), E::Context>,
}

impl<E: RasterEngine> LocalRasterizer<E> {
    pub fn new(engine: E) -> Self {
        LocalRasterizer {
            engine,
            contexts: HashMap::new(),
        }
    }

    /// Wraps an engine together with contexts already resolved elsewhere
    /// (the worker reuses the dispatcher's warm cache this way).
    pub fn with_contexts(engine: E, contexts: HashMap<(FontId, StyleKey), E::Context>) -> Self {
        LocalRasterizer { engine, contexts }
    }

    fn ensure_context(&mut self, font_id: FontId, style: &StyleDescriptor) -> Result<()> {
        let key = (font_id, style.key());
        if !self.contexts.contains_key(&key) {
            trace!("local rasterizer: new context for font {}", font_id);
            let ctx = self.engine.create_context(font_id, style)?;
            self.contexts.insert(key, ctx);
        }
        Ok(())
    }
}

impl<E: RasterEngine> GlyphSource for LocalRasterizer<E> {
    fn glyph_metrics(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
    ) -> Result<GlyphDescriptor> {
        self.ensure_context(font_id, style)?;
        let ctx = &self.contexts[&(font_id, style.key())];
        Ok(self.engine.glyph_metrics(ctx, desc))
    }

    fn glyph_image(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> Result<()> {
        self.ensure_context(font_id, style)?;
        let ctx = &self.contexts[&(font_id, style.key())];
        self.engine.render_image(ctx, desc, out)?;
        Ok(())
    }
}

/// Deterministic software rasterizer. Metrics are derived from the style's
/// pixel size, images are a fixed per-glyph coverage pattern, and outlines
/// are a compact point-list record of the glyph's bounding box.
#[derive(Debug, Default, Clone)]
pub struct SoftwareEngine;

/// Resolved state for one (font, style) pair.
#[derive(Debug)]
pub struct SoftwareContext {
    font_id: FontId,
    size_px: f32,
}

/// Highest glyph id the software engine recognizes. Mirrors the bounded
/// glyph range a real face would expose.
pub const MAX_GLYPH_ID: u32 = 0xFFFF;

impl SoftwareEngine {
    /// The deterministic coverage byte at (`row`, `col`) of a glyph's
    /// bitmap. Exposed so tests can state expected images exactly.
    pub fn image_byte(font_id: FontId, glyph_id: u32, row: usize, col: usize) -> u8 {
        (font_id as usize)
            .wrapping_mul(17)
            .wrapping_add(glyph_id as usize * 31)
            .wrapping_add(row * 13)
            .wrapping_add(col * 7) as u8
    }
}

impl RasterEngine for SoftwareEngine {
    type Context = SoftwareContext;

    fn create_context(
        &self,
        font_id: FontId,
        style: &StyleDescriptor,
    ) -> anyhow::Result<SoftwareContext> {
        if !style.size_px.is_finite() || style.size_px <= 0.0 {
            bail!("invalid glyph size {} for font {}", style.size_px, font_id);
        }
        debug!(
            "software engine: context for font {} at {} px",
            font_id, style.size_px
        );
        Ok(SoftwareContext {
            font_id,
            size_px: style.size_px,
        })
    }

    fn font_metrics(&self, ctx: &SoftwareContext) -> FontMetrics {
        let size = ctx.size_px;
        FontMetrics {
            ascent: size * 0.8,
            descent: -size * 0.2,
            leading: size * 0.1,
            underline_position: -size * 0.1,
            underline_thickness: (size / 16.0).max(1.0),
            max_advance: size * 0.6,
        }
    }

    fn glyph_metrics(&self, ctx: &SoftwareContext, desc: &GlyphDescriptor) -> GlyphDescriptor {
        let height = (ctx.size_px.ceil() as u32).max(1);
        let width = (height * 3 / 5).max(1);
        // Coverage rows padded to a 4-byte stride.
        let row_bytes = (width + 3) & !3;
        GlyphDescriptor {
            glyph_id: desc.glyph_id,
            advance_x: width as f32 + 1.0,
            advance_y: 0.0,
            left: 0,
            top: (ctx.size_px * 0.8) as i32,
            width,
            height,
            row_bytes,
            outline_len: 0,
        }
    }

    fn render_image(
        &self,
        ctx: &SoftwareContext,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> anyhow::Result<()> {
        if desc.glyph_id > MAX_GLYPH_ID {
            bail!("glyph id {} out of range", desc.glyph_id);
        }
        if out.len() != desc.image_len() {
            bail!(
                "image buffer is {} bytes, descriptor requires {}",
                out.len(),
                desc.image_len()
            );
        }
        let row_bytes = desc.row_bytes as usize;
        for row in 0..desc.height as usize {
            for col in 0..row_bytes {
                out[row * row_bytes + col] =
                    Self::image_byte(ctx.font_id, desc.glyph_id, row, col);
            }
        }
        Ok(())
    }

    fn render_outline(
        &self,
        ctx: &SoftwareContext,
        glyph_id: u32,
        out: &mut [u8],
    ) -> anyhow::Result<usize> {
        if glyph_id > MAX_GLYPH_ID {
            bail!("glyph id {} out of range", glyph_id);
        }
        let desc = self.glyph_metrics(ctx, &GlyphDescriptor::for_glyph(glyph_id));
        // Record layout: point count (u32), then (x: i16, y: i16) pairs
        // tracing the glyph's bounding box.
        let points: [(i16, i16); 4] = [
            (0, 0),
            (desc.width as i16, 0),
            (desc.width as i16, desc.height as i16),
            (0, desc.height as i16),
        ];
        let needed = 4 + points.len() * 4;
        if out.len() < needed {
            bail!(
                "outline buffer is {} bytes, record requires {}",
                out.len(),
                needed
            );
        }
        out[0..4].copy_from_slice(&(points.len() as u32).to_le_bytes());
        for (i, (x, y)) in points.iter().enumerate() {
            let at = 4 + i * 4;
            out[at..at + 2].copy_from_slice(&x.to_le_bytes());
            out[at + 2..at + 4].copy_from_slice(&y.to_le_bytes());
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::StyleFlags;

    fn style(size_px: f32) -> StyleDescriptor {
        StyleDescriptor::new(size_px, StyleFlags::ANTIALIAS)
    }

    #[test]
    fn context_rejects_nonpositive_size() {
        let engine = SoftwareEngine;
        assert!(engine.create_context(1, &style(0.0)).is_err());
        assert!(engine.create_context(1, &style(-4.0)).is_err());
        assert!(engine.create_context(1, &style(12.0)).is_ok());
    }

    #[test]
    fn font_metrics_derive_from_size() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(7, &style(10.0)).unwrap();
        let metrics = engine.font_metrics(&ctx);
        assert_eq!(metrics.ascent, 8.0);
        assert_eq!(metrics.descent, -2.0);
        assert!(metrics.underline_thickness >= 1.0);
    }

    #[test]
    fn glyph_metrics_pad_rows_to_four_bytes() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(1, &style(10.0)).unwrap();
        let desc = engine.glyph_metrics(&ctx, &GlyphDescriptor::for_glyph(3));
        assert_eq!(desc.glyph_id, 3);
        assert_eq!(desc.height, 10);
        assert_eq!(desc.width, 6);
        assert_eq!(desc.row_bytes, 8);
        assert_eq!(desc.row_bytes % 4, 0);
        assert!(desc.row_bytes >= desc.width);
    }

    #[test]
    fn image_is_deterministic() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(2, &style(8.0)).unwrap();
        let desc = engine.glyph_metrics(&ctx, &GlyphDescriptor::for_glyph(9));

        let mut first = vec![0u8; desc.image_len()];
        let mut second = vec![0u8; desc.image_len()];
        engine.render_image(&ctx, &desc, &mut first).unwrap();
        engine.render_image(&ctx, &desc, &mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], SoftwareEngine::image_byte(2, 9, 0, 0));
    }

    #[test]
    fn image_rejects_wrong_buffer_size() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(2, &style(8.0)).unwrap();
        let desc = engine.glyph_metrics(&ctx, &GlyphDescriptor::for_glyph(9));
        let mut short = vec![0u8; desc.image_len() - 1];
        assert!(engine.render_image(&ctx, &desc, &mut short).is_err());
    }

    #[test]
    fn outline_record_is_a_closed_box() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(1, &style(10.0)).unwrap();
        let mut out = vec![0u8; 64];
        let len = engine.render_outline(&ctx, 4, &mut out).unwrap();
        assert_eq!(len, 4 + 4 * 4);
        assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), 4);
    }

    #[test]
    fn outline_rejects_short_buffer() {
        let engine = SoftwareEngine;
        let ctx = engine.create_context(1, &style(10.0)).unwrap();
        let mut out = vec![0u8; 8];
        assert!(engine.render_outline(&ctx, 4, &mut out).is_err());
    }

    #[test]
    fn local_rasterizer_caches_contexts() {
        let mut local = LocalRasterizer::new(SoftwareEngine);
        let s = style(12.0);
        let desc = GlyphDescriptor::for_glyph(1);
        local.glyph_metrics(5, &s, &desc).unwrap();
        local.glyph_metrics(5, &s, &desc).unwrap();
        assert_eq!(local.contexts.len(), 1);

        local.glyph_metrics(5, &style(13.0), &desc).unwrap();
        assert_eq!(local.contexts.len(), 2);
    }
}
