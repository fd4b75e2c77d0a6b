// src/wire.rs

//! Wire frame codec and the fixed channel buffer.
//!
//! One frame is a 68-byte little-endian header followed by optional
//! trailing data. The header layout is fixed at compile time and shared by
//! requests and responses:
//!
//! ```text
//! offset  size  field
//!      0     4  operation tag (u32)
//!      4     8  font_id (u64)
//!     12    16  style descriptor (size_px, scale_x, skew_x, flags)
//!     28    40  payload area (variant selected by the operation tag,
//!               zero-padded to 40 bytes)
//! ```
//!
//! Trailing data, when present, immediately follows the header with no
//! padding; its length is always derivable from the decoded payload
//! (`Frame::trailing_len`). The original design overlaid the payload
//! variants in a C union; here the codec maps an explicit tagged variant
//! to and from the same byte region, and an unknown operation tag is a
//! decode-time protocol violation rather than a runtime default branch.

use crate::errors::{RelayError, Result};
use bitflags::bitflags;

/// Byte length of the fixed frame header.
pub const HEADER_LEN: usize = 4 + 8 + STYLE_LEN + PAYLOAD_LEN;

/// Byte length of the encoded style descriptor.
pub const STYLE_LEN: usize = 16;

/// Byte length of the fixed payload area (sized for the largest variant,
/// the glyph descriptor).
pub const PAYLOAD_LEN: usize = 40;

const OP_OFFSET: usize = 0;
const FONT_ID_OFFSET: usize = 4;
const STYLE_OFFSET: usize = 12;
const PAYLOAD_OFFSET: usize = 28;

/// Session-stable opaque handle identifying a font resource known to both
/// endpoints.
pub type FontId = u64;

/// The four remote rasterization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operation {
    FontMetrics = 0,
    GlyphMetrics = 1,
    GlyphImage = 2,
    GlyphOutline = 3,
}

impl TryFrom<u32> for Operation {
    type Error = RelayError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Operation::FontMetrics),
            1 => Ok(Operation::GlyphMetrics),
            2 => Ok(Operation::GlyphImage),
            3 => Ok(Operation::GlyphOutline),
            other => Err(RelayError::ProtocolViolation(format!(
                "unknown operation tag {}",
                other
            ))),
        }
    }
}

bitflags! {
    /// Rasterization option flags carried in the style descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleFlags: u32 {
        const ANTIALIAS = 1 << 0;
        const HINTING   = 1 << 1;
        const SUBPIXEL  = 1 << 2;
        const EMBOLDEN  = 1 << 3;
    }
}

/// Fixed-size, byte-exact descriptor of the requested rasterization
/// parameters. Equal byte content means equal rasterization context, so
/// the 16-byte encoding (not the parsed floats) is the cache key: two
/// descriptors whose floats compare equal but differ in bit pattern
/// (`0.0` vs `-0.0`) name different contexts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleDescriptor {
    /// Nominal glyph size in pixels.
    pub size_px: f32,
    /// Horizontal scale applied on top of `size_px`.
    pub scale_x: f32,
    /// Horizontal skew (oblique rendering).
    pub skew_x: f32,
    pub flags: StyleFlags,
}

impl StyleDescriptor {
    pub fn new(size_px: f32, flags: StyleFlags) -> Self {
        StyleDescriptor {
            size_px,
            scale_x: 1.0,
            skew_x: 0.0,
            flags,
        }
    }

    pub fn to_bytes(&self) -> [u8; STYLE_LEN] {
        let mut out = [0u8; STYLE_LEN];
        out[0..4].copy_from_slice(&self.size_px.to_le_bytes());
        out[4..8].copy_from_slice(&self.scale_x.to_le_bytes());
        out[8..12].copy_from_slice(&self.skew_x.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; STYLE_LEN]) -> Self {
        StyleDescriptor {
            size_px: f32::from_le_bytes(take::<4>(bytes, 0)),
            scale_x: f32::from_le_bytes(take::<4>(bytes, 4)),
            skew_x: f32::from_le_bytes(take::<4>(bytes, 8)),
            flags: StyleFlags::from_bits_truncate(u32::from_le_bytes(take::<4>(bytes, 12))),
        }
    }

    /// Byte-exact cache key for this descriptor.
    pub fn key(&self) -> StyleKey {
        StyleKey(self.to_bytes())
    }
}

/// Hashable byte-exact identity of a style descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleKey([u8; STYLE_LEN]);

/// Whole-font metrics record (24 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FontMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub leading: f32,
    pub underline_position: f32,
    pub underline_thickness: f32,
    pub max_advance: f32,
}

/// Per-glyph descriptor (40 bytes on the wire). Carries the glyph id, its
/// advance, bounding box placement, and the size hints for trailing data:
/// an image response appends `row_bytes * height` bytes, an outline
/// response appends `outline_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphDescriptor {
    pub glyph_id: u32,
    pub advance_x: f32,
    pub advance_y: f32,
    /// Horizontal offset of the bitmap's left edge from the pen position.
    pub left: i32,
    /// Vertical offset of the bitmap's top edge above the baseline.
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub outline_len: u64,
}

impl GlyphDescriptor {
    pub fn for_glyph(glyph_id: u32) -> Self {
        GlyphDescriptor {
            glyph_id,
            ..GlyphDescriptor::default()
        }
    }

    /// Trailing byte count of an image response for this descriptor.
    pub fn image_len(&self) -> usize {
        self.row_bytes as usize * self.height as usize
    }
}

/// The payload area, as a tagged variant instead of the original's
/// overlapping union. The variant and the operation tag always agree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    FontMetrics(FontMetrics),
    GlyphMetrics(GlyphDescriptor),
    GlyphImage(GlyphDescriptor),
    GlyphOutline(GlyphDescriptor),
}

impl Payload {
    pub fn operation(&self) -> Operation {
        match self {
            Payload::FontMetrics(_) => Operation::FontMetrics,
            Payload::GlyphMetrics(_) => Operation::GlyphMetrics,
            Payload::GlyphImage(_) => Operation::GlyphImage,
            Payload::GlyphOutline(_) => Operation::GlyphOutline,
        }
    }
}

/// One complete request or response header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub font_id: FontId,
    pub style: StyleDescriptor,
    pub payload: Payload,
}

impl Frame {
    pub fn operation(&self) -> Operation {
        self.payload.operation()
    }

    /// Number of trailing bytes that follow this header on the wire.
    /// Requests never carry trailing data; of the responses, only images
    /// and outlines do.
    pub fn trailing_len(&self) -> usize {
        match &self.payload {
            Payload::GlyphImage(desc) => desc.image_len(),
            Payload::GlyphOutline(desc) => desc.outline_len as usize,
            _ => 0,
        }
    }

    /// Writes the fixed header into the first `HEADER_LEN` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_LEN {
            return Err(RelayError::FrameTooLarge {
                needed: HEADER_LEN,
                capacity: out.len(),
            });
        }
        out[OP_OFFSET..OP_OFFSET + 4].copy_from_slice(&(self.operation() as u32).to_le_bytes());
        out[FONT_ID_OFFSET..FONT_ID_OFFSET + 8].copy_from_slice(&self.font_id.to_le_bytes());
        out[STYLE_OFFSET..STYLE_OFFSET + STYLE_LEN].copy_from_slice(&self.style.to_bytes());

        let payload_area = &mut out[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN];
        payload_area.fill(0);
        match &self.payload {
            Payload::FontMetrics(metrics) => encode_font_metrics(metrics, payload_area),
            Payload::GlyphMetrics(desc)
            | Payload::GlyphImage(desc)
            | Payload::GlyphOutline(desc) => encode_glyph_descriptor(desc, payload_area),
        }
        Ok(())
    }

    /// Decodes a fixed header from the first `HEADER_LEN` bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < HEADER_LEN {
            return Err(RelayError::ProtocolViolation(format!(
                "header requires {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        let operation = Operation::try_from(u32::from_le_bytes(take::<4>(bytes, OP_OFFSET)))?;
        let font_id = u64::from_le_bytes(take::<8>(bytes, FONT_ID_OFFSET));
        let style = StyleDescriptor::from_bytes(&take::<STYLE_LEN>(bytes, STYLE_OFFSET));

        let payload_area = &bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN];
        let payload = match operation {
            Operation::FontMetrics => Payload::FontMetrics(decode_font_metrics(payload_area)),
            Operation::GlyphMetrics => Payload::GlyphMetrics(decode_glyph_descriptor(payload_area)),
            Operation::GlyphImage => Payload::GlyphImage(decode_glyph_descriptor(payload_area)),
            Operation::GlyphOutline => {
                Payload::GlyphOutline(decode_glyph_descriptor(payload_area))
            }
        };

        Ok(Frame {
            font_id,
            style,
            payload,
        })
    }
}

fn encode_font_metrics(metrics: &FontMetrics, out: &mut [u8]) {
    out[0..4].copy_from_slice(&metrics.ascent.to_le_bytes());
    out[4..8].copy_from_slice(&metrics.descent.to_le_bytes());
    out[8..12].copy_from_slice(&metrics.leading.to_le_bytes());
    out[12..16].copy_from_slice(&metrics.underline_position.to_le_bytes());
    out[16..20].copy_from_slice(&metrics.underline_thickness.to_le_bytes());
    out[20..24].copy_from_slice(&metrics.max_advance.to_le_bytes());
}

fn decode_font_metrics(bytes: &[u8]) -> FontMetrics {
    FontMetrics {
        ascent: f32::from_le_bytes(take::<4>(bytes, 0)),
        descent: f32::from_le_bytes(take::<4>(bytes, 4)),
        leading: f32::from_le_bytes(take::<4>(bytes, 8)),
        underline_position: f32::from_le_bytes(take::<4>(bytes, 12)),
        underline_thickness: f32::from_le_bytes(take::<4>(bytes, 16)),
        max_advance: f32::from_le_bytes(take::<4>(bytes, 20)),
    }
}

fn encode_glyph_descriptor(desc: &GlyphDescriptor, out: &mut [u8]) {
    out[0..4].copy_from_slice(&desc.glyph_id.to_le_bytes());
    out[4..8].copy_from_slice(&desc.advance_x.to_le_bytes());
    out[8..12].copy_from_slice(&desc.advance_y.to_le_bytes());
    out[12..16].copy_from_slice(&desc.left.to_le_bytes());
    out[16..20].copy_from_slice(&desc.top.to_le_bytes());
    out[20..24].copy_from_slice(&desc.width.to_le_bytes());
    out[24..28].copy_from_slice(&desc.height.to_le_bytes());
    out[28..32].copy_from_slice(&desc.row_bytes.to_le_bytes());
    out[32..40].copy_from_slice(&desc.outline_len.to_le_bytes());
}

fn decode_glyph_descriptor(bytes: &[u8]) -> GlyphDescriptor {
    GlyphDescriptor {
        glyph_id: u32::from_le_bytes(take::<4>(bytes, 0)),
        advance_x: f32::from_le_bytes(take::<4>(bytes, 4)),
        advance_y: f32::from_le_bytes(take::<4>(bytes, 8)),
        left: i32::from_le_bytes(take::<4>(bytes, 12)),
        top: i32::from_le_bytes(take::<4>(bytes, 16)),
        width: u32::from_le_bytes(take::<4>(bytes, 20)),
        height: u32::from_le_bytes(take::<4>(bytes, 24)),
        row_bytes: u32::from_le_bytes(take::<4>(bytes, 28)),
        outline_len: u64::from_le_bytes(take::<8>(bytes, 32)),
    }
}

fn take<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Fixed-capacity byte region used by each endpoint to stage outgoing
/// frames and receive incoming ones, reused across calls so the steady
/// state performs no per-message allocation. Each role owns its own
/// buffer exclusively; the two processes never share one.
#[derive(Debug)]
pub struct ChannelBuffer {
    data: Vec<u8>,
}

impl ChannelBuffer {
    /// Allocates a buffer of `capacity` bytes. The capacity bounds the
    /// largest frame (header plus trailing data) either direction may
    /// carry, so it must at least hold a bare header.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < HEADER_LEN {
            return Err(RelayError::SetupFailure(format!(
                "channel buffer capacity {} is below the {}-byte header",
                capacity, HEADER_LEN
            )));
        }
        Ok(ChannelBuffer {
            data: vec![0u8; capacity],
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Fails with `FrameTooLarge` if a frame with `trailing_len` trailing
    /// bytes would not fit.
    pub fn check_trailing(&self, trailing_len: usize) -> Result<()> {
        let needed = HEADER_LEN.saturating_add(trailing_len);
        if needed > self.data.len() {
            return Err(RelayError::FrameTooLarge {
                needed,
                capacity: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_LEN]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[..HEADER_LEN]
    }

    /// The trailing region for a frame carrying `trailing_len` bytes.
    pub fn trailing(&self, trailing_len: usize) -> Result<&[u8]> {
        self.check_trailing(trailing_len)?;
        Ok(&self.data[HEADER_LEN..HEADER_LEN + trailing_len])
    }

    pub fn trailing_mut(&mut self, trailing_len: usize) -> Result<&mut [u8]> {
        self.check_trailing(trailing_len)?;
        Ok(&mut self.data[HEADER_LEN..HEADER_LEN + trailing_len])
    }

    /// The whole staged frame (header plus `trailing_len` trailing bytes),
    /// ready to be written to the transport as one logical unit.
    pub fn staged_frame(&self, trailing_len: usize) -> Result<&[u8]> {
        self.check_trailing(trailing_len)?;
        Ok(&self.data[..HEADER_LEN + trailing_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> StyleDescriptor {
        StyleDescriptor {
            size_px: 14.0,
            scale_x: 1.0,
            skew_x: 0.25,
            flags: StyleFlags::ANTIALIAS | StyleFlags::HINTING,
        }
    }

    fn roundtrip(frame: Frame) -> Frame {
        let mut header = [0u8; HEADER_LEN];
        frame.encode_into(&mut header).unwrap();
        Frame::decode(&header).unwrap()
    }

    #[test]
    fn font_metrics_roundtrip() {
        let frame = Frame {
            font_id: 7,
            style: style(),
            payload: Payload::FontMetrics(FontMetrics {
                ascent: 11.5,
                descent: -3.25,
                leading: 1.0,
                underline_position: -2.0,
                underline_thickness: 1.5,
                max_advance: 9.0,
            }),
        };
        assert_eq!(roundtrip(frame), frame);
        assert_eq!(frame.trailing_len(), 0);
    }

    #[test]
    fn glyph_metrics_roundtrip() {
        let frame = Frame {
            font_id: 42,
            style: style(),
            payload: Payload::GlyphMetrics(GlyphDescriptor {
                glyph_id: 77,
                advance_x: 8.5,
                advance_y: 0.0,
                left: -1,
                top: 10,
                width: 9,
                height: 12,
                row_bytes: 12,
                outline_len: 0,
            }),
        };
        assert_eq!(roundtrip(frame), frame);
        assert_eq!(frame.trailing_len(), 0);
    }

    #[test]
    fn glyph_image_trailing_len_is_row_bytes_times_height() {
        let frame = Frame {
            font_id: 1,
            style: style(),
            payload: Payload::GlyphImage(GlyphDescriptor {
                glyph_id: 5,
                row_bytes: 10,
                height: 4,
                width: 10,
                ..GlyphDescriptor::default()
            }),
        };
        assert_eq!(frame.trailing_len(), 40);
        assert_eq!(roundtrip(frame), frame);
    }

    #[test]
    fn glyph_outline_trailing_len_is_explicit_count() {
        let frame = Frame {
            font_id: 3,
            style: style(),
            payload: Payload::GlyphOutline(GlyphDescriptor {
                glyph_id: 88,
                outline_len: 123,
                ..GlyphDescriptor::default()
            }),
        };
        assert_eq!(frame.trailing_len(), 123);
        assert_eq!(roundtrip(frame), frame);
    }

    #[test]
    fn unknown_operation_tag_is_a_protocol_violation() {
        let mut header = [0u8; HEADER_LEN];
        let frame = Frame {
            font_id: 0,
            style: style(),
            payload: Payload::FontMetrics(FontMetrics::default()),
        };
        frame.encode_into(&mut header).unwrap();
        header[0..4].copy_from_slice(&9u32.to_le_bytes());
        let err = Frame::decode(&header).unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn short_header_is_a_protocol_violation() {
        let err = Frame::decode(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn style_key_is_byte_exact() {
        let positive_zero = StyleDescriptor {
            skew_x: 0.0,
            ..style()
        };
        let negative_zero = StyleDescriptor {
            skew_x: -0.0,
            ..style()
        };
        // Numerically equal, but distinct rasterization contexts.
        assert_eq!(positive_zero.skew_x, negative_zero.skew_x);
        assert_ne!(positive_zero.key(), negative_zero.key());
    }

    #[test]
    fn style_descriptor_roundtrip() {
        let original = style();
        let decoded = StyleDescriptor::from_bytes(&original.to_bytes());
        assert_eq!(decoded, original);
        assert_eq!(decoded.key(), original.key());
    }

    #[test]
    fn buffer_rejects_oversized_trailing() {
        let mut buf = ChannelBuffer::new(HEADER_LEN + 16).unwrap();
        assert!(buf.trailing_mut(16).is_ok());
        let err = buf.trailing_mut(17).unwrap_err();
        match err {
            RelayError::FrameTooLarge { needed, capacity } => {
                assert_eq!(needed, HEADER_LEN + 17);
                assert_eq!(capacity, HEADER_LEN + 16);
            }
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn buffer_requires_room_for_a_header() {
        assert!(ChannelBuffer::new(HEADER_LEN - 1).is_err());
        assert!(ChannelBuffer::new(HEADER_LEN).is_ok());
    }

    #[test]
    fn staged_frame_spans_header_and_trailing() {
        let mut buf = ChannelBuffer::new(HEADER_LEN + 8).unwrap();
        buf.trailing_mut(8).unwrap().copy_from_slice(b"abcdefgh");
        let staged = buf.staged_frame(8).unwrap();
        assert_eq!(staged.len(), HEADER_LEN + 8);
        assert_eq!(&staged[HEADER_LEN..], b"abcdefgh");
    }
}
