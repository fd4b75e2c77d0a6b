// src/client.rs

//! Client proxy: the renderer-side face of the relay.
//!
//! Each of the four operations stages one request frame in the local
//! channel buffer, writes the fixed header to the request pipe, then
//! blocks reading the response header (and its declared trailing bytes,
//! if any) back into the same buffer. Calls are strictly half-duplex: a
//! second request is never issued before the first response is fully
//! consumed, so the buffer is safely reused across calls.
//!
//! A zero-length read where the response header should begin means the
//! worker has exited; that surfaces as `PeerClosed` ("no more
//! rasterization available") rather than corrupting partial state. An
//! end-of-stream anywhere later in the response is a torn frame and fails
//! as a protocol violation.

use crate::channel::{ClientChannel, ReadOutcome};
use crate::errors::{RelayError, Result};
use crate::raster::GlyphSource;
use crate::wire::{
    ChannelBuffer, FontId, FontMetrics, Frame, GlyphDescriptor, Payload, StyleDescriptor,
};
use log::trace;
use std::io::{Read, Write};

pub struct RemoteGlyphClient<R: Read, W: Write> {
    chan: ClientChannel<R, W>,
    buf: ChannelBuffer,
}

impl<R: Read, W: Write> RemoteGlyphClient<R, W> {
    pub fn new(chan: ClientChannel<R, W>, buffer_capacity: usize) -> Result<Self> {
        Ok(RemoteGlyphClient {
            chan,
            buf: ChannelBuffer::new(buffer_capacity)?,
        })
    }

    pub fn get_font_metrics(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
    ) -> Result<FontMetrics> {
        let reply = self.call(Frame {
            font_id,
            style: *style,
            payload: Payload::FontMetrics(FontMetrics::default()),
        })?;
        match reply.payload {
            Payload::FontMetrics(metrics) => Ok(metrics),
            _ => Err(echo_mismatch()),
        }
    }

    pub fn get_glyph_metrics(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
    ) -> Result<GlyphDescriptor> {
        let reply = self.call(Frame {
            font_id,
            style: *style,
            payload: Payload::GlyphMetrics(*desc),
        })?;
        match reply.payload {
            Payload::GlyphMetrics(out) => Ok(out),
            _ => Err(echo_mismatch()),
        }
    }

    /// Fetches the glyph's coverage bitmap. `out.len()` must equal
    /// `desc.image_len()`; exactly that many trailing bytes are copied
    /// into `out`, never more.
    pub fn get_glyph_image(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> Result<()> {
        if out.len() != desc.image_len() {
            return Err(RelayError::ProtocolViolation(format!(
                "image buffer is {} bytes, descriptor requires {}",
                out.len(),
                desc.image_len()
            )));
        }
        let reply = self.call(Frame {
            font_id,
            style: *style,
            payload: Payload::GlyphImage(*desc),
        })?;
        let trailing = reply.trailing_len();
        if trailing != out.len() {
            return Err(RelayError::ProtocolViolation(format!(
                "image response carries {} trailing bytes, expected {}",
                trailing,
                out.len()
            )));
        }
        out.copy_from_slice(self.buf.trailing(trailing)?);
        Ok(())
    }

    pub fn get_glyph_outline(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        glyph_id: u32,
    ) -> Result<Vec<u8>> {
        let reply = self.call(Frame {
            font_id,
            style: *style,
            payload: Payload::GlyphOutline(GlyphDescriptor::for_glyph(glyph_id)),
        })?;
        let trailing = reply.trailing_len();
        Ok(self.buf.trailing(trailing)?.to_vec())
    }

    pub fn close(self) {
        self.chan.close();
    }

    /// One half-duplex exchange: request out, matching response in.
    fn call(&mut self, request: Frame) -> Result<Frame> {
        trace!(
            "client: {:?} for font {} glyph payload {:?}",
            request.operation(),
            request.font_id,
            request.payload
        );
        request.encode_into(self.buf.header_mut())?;
        self.chan.send_request(self.buf.header())?;

        match self.chan.receive_response(self.buf.header_mut())? {
            ReadOutcome::Closed => return Err(RelayError::PeerClosed),
            ReadOutcome::Filled => {}
        }
        let reply = Frame::decode(self.buf.header())?;

        // Request and response must share operation, font identity, and
        // style; only the payload differs.
        if reply.operation() != request.operation()
            || reply.font_id != request.font_id
            || reply.style.key() != request.style.key()
        {
            return Err(echo_mismatch());
        }

        let trailing = reply.trailing_len();
        if trailing > 0 {
            self.buf.check_trailing(trailing)?;
            match self.chan.receive_response(self.buf.trailing_mut(trailing)?)? {
                ReadOutcome::Closed => {
                    return Err(RelayError::ProtocolViolation(
                        "peer closed mid-frame before trailing data".into(),
                    ))
                }
                ReadOutcome::Filled => {}
            }
        }
        Ok(reply)
    }
}

fn echo_mismatch() -> RelayError {
    RelayError::ProtocolViolation("response does not echo the request header".into())
}

impl<R: Read, W: Write> GlyphSource for RemoteGlyphClient<R, W> {
    fn glyph_metrics(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
    ) -> Result<GlyphDescriptor> {
        self.get_glyph_metrics(font_id, style, desc)
    }

    fn glyph_image(
        &mut self,
        font_id: FontId,
        style: &StyleDescriptor,
        desc: &GlyphDescriptor,
        out: &mut [u8],
    ) -> Result<()> {
        self.get_glyph_image(font_id, style, desc, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{StyleFlags, HEADER_LEN};
    use std::io::Cursor;

    fn style() -> StyleDescriptor {
        StyleDescriptor::new(12.0, StyleFlags::ANTIALIAS)
    }

    /// Encodes a frame (plus trailing bytes) the way a server reply would
    /// appear on the response pipe.
    fn scripted_reply(frame: Frame, trailing: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN];
        frame.encode_into(&mut bytes).unwrap();
        bytes.extend_from_slice(trailing);
        bytes
    }

    fn client_over(
        reply_bytes: Vec<u8>,
    ) -> RemoteGlyphClient<Cursor<Vec<u8>>, Vec<u8>> {
        let chan = ClientChannel::new(Cursor::new(reply_bytes), Vec::new());
        RemoteGlyphClient::new(chan, HEADER_LEN + 256).unwrap()
    }

    #[test]
    fn font_metrics_reply_is_returned_unchanged() {
        let metrics = FontMetrics {
            ascent: 9.5,
            descent: -2.5,
            ..FontMetrics::default()
        };
        let reply = Frame {
            font_id: 7,
            style: style(),
            payload: Payload::FontMetrics(metrics),
        };
        let mut client = client_over(scripted_reply(reply, &[]));
        let got = client.get_font_metrics(7, &style()).unwrap();
        assert_eq!(got, metrics);
    }

    #[test]
    fn closed_response_pipe_surfaces_as_peer_closed() {
        let mut client = client_over(Vec::new());
        let err = client.get_font_metrics(7, &style()).unwrap_err();
        assert!(matches!(err, RelayError::PeerClosed));
    }

    #[test]
    fn torn_response_header_is_a_protocol_violation() {
        let mut client = client_over(vec![0u8; HEADER_LEN / 2]);
        let err = client.get_font_metrics(7, &style()).unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn mismatched_font_id_echo_is_rejected() {
        let reply = Frame {
            font_id: 8, // request will use 7
            style: style(),
            payload: Payload::FontMetrics(FontMetrics::default()),
        };
        let mut client = client_over(scripted_reply(reply, &[]));
        let err = client.get_font_metrics(7, &style()).unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn image_copies_exactly_the_declared_bytes() {
        let desc = GlyphDescriptor {
            glyph_id: 3,
            row_bytes: 10,
            height: 4,
            width: 10,
            ..GlyphDescriptor::default()
        };
        let pixels: Vec<u8> = (0..40).collect();
        let reply = Frame {
            font_id: 1,
            style: style(),
            payload: Payload::GlyphImage(desc),
        };
        let mut client = client_over(scripted_reply(reply, &pixels));

        // Guard bytes on both sides of the destination catch spillover.
        let mut storage = vec![0xAAu8; 44];
        client
            .get_glyph_image(1, &style(), &desc, &mut storage[2..42])
            .unwrap();
        assert_eq!(&storage[2..42], pixels.as_slice());
        assert_eq!(storage[0], 0xAA);
        assert_eq!(storage[1], 0xAA);
        assert_eq!(storage[42], 0xAA);
        assert_eq!(storage[43], 0xAA);
    }

    #[test]
    fn image_rejects_mismatched_output_buffer() {
        let desc = GlyphDescriptor {
            row_bytes: 10,
            height: 4,
            ..GlyphDescriptor::default()
        };
        let mut client = client_over(Vec::new());
        let mut too_small = vec![0u8; 39];
        let err = client
            .get_glyph_image(1, &style(), &desc, &mut too_small)
            .unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn oversized_trailing_length_fails_before_reading() {
        let desc = GlyphDescriptor {
            row_bytes: 1024,
            height: 1024, // 1 MiB, far beyond the 256-byte test buffer
            ..GlyphDescriptor::default()
        };
        let reply = Frame {
            font_id: 1,
            style: style(),
            payload: Payload::GlyphImage(desc),
        };
        let mut client = client_over(scripted_reply(reply, &[]));
        let mut out = vec![0u8; desc.image_len()];
        let err = client
            .get_glyph_image(1, &style(), &desc, &mut out)
            .unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { .. }));
    }

    #[test]
    fn outline_returns_declared_byte_count() {
        let record = b"outline-bytes".to_vec();
        let reply = Frame {
            font_id: 2,
            style: style(),
            payload: Payload::GlyphOutline(GlyphDescriptor {
                glyph_id: 11,
                outline_len: record.len() as u64,
                ..GlyphDescriptor::default()
            }),
        };
        let mut client = client_over(scripted_reply(reply, &record));
        let got = client.get_glyph_outline(2, &style(), 11).unwrap();
        assert_eq!(got, record);
    }
}
