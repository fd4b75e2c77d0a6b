// src/channel.rs

//! Request/response channel roles over anonymous byte streams.
//!
//! The transport provides no message boundaries, so both directions move
//! exact byte counts with retry loops over partial reads and writes. The
//! two role wrappers (`ClientChannel`, `ServerChannel`) are generic over
//! `Read`/`Write` so the same code runs across a forked process pair, an
//! in-process pipe pair on two threads, or plain in-memory streams in
//! tests.

use crate::errors::{RelayError, Result};
use log::trace;
use std::io::{ErrorKind, Read, Write};

/// Result of a full-buffer read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer was filled completely.
    Filled,
    /// End of stream before the first byte. Whether this is an orderly
    /// shutdown or a fault depends on where the caller is in the protocol.
    Closed,
}

/// Reads exactly `buf.len()` bytes, looping over partial reads.
///
/// A zero-length read before the first byte yields `ReadOutcome::Closed`;
/// a zero-length read after some bytes arrived is a torn frame and fails
/// as a protocol violation. `EINTR` is retried.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Closed),
            Ok(0) => {
                return Err(RelayError::ProtocolViolation(format!(
                    "stream closed after {} of {} expected bytes",
                    filled,
                    buf.len()
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_read_error(e)),
        }
    }
    Ok(ReadOutcome::Filled)
}

/// Writes all of `bytes`, looping until the transport accepts everything.
pub fn write_full<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(RelayError::PeerClosed),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_write_error(e)),
        }
    }
    Ok(())
}

fn map_read_error(e: std::io::Error) -> RelayError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            RelayError::PeerClosed
        }
        _ => RelayError::ProtocolViolation(format!("read failed: {}", e)),
    }
}

fn map_write_error(e: std::io::Error) -> RelayError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => RelayError::PeerClosed,
        _ => RelayError::ProtocolViolation(format!("write failed: {}", e)),
    }
}

/// The proxy-side channel end: writes requests, reads responses.
#[derive(Debug)]
pub struct ClientChannel<R: Read, W: Write> {
    response_rx: R,
    request_tx: W,
}

impl<R: Read, W: Write> ClientChannel<R, W> {
    pub fn new(response_rx: R, request_tx: W) -> Self {
        ClientChannel {
            response_rx,
            request_tx,
        }
    }

    pub fn send_request(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("client: sending {}-byte request frame", bytes.len());
        write_full(&mut self.request_tx, bytes)?;
        self.request_tx.flush().map_err(map_write_error)
    }

    pub fn receive_response(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        read_full(&mut self.response_rx, buf)
    }

    /// Closes both directions. Dropping the request writer is what lets
    /// the peer's dispatcher observe end-of-stream and stop.
    pub fn close(self) {
        trace!("client: closing channel");
    }
}

/// The dispatcher-side channel end: reads requests, writes responses.
#[derive(Debug)]
pub struct ServerChannel<R: Read, W: Write> {
    request_rx: R,
    response_tx: W,
}

impl<R: Read, W: Write> ServerChannel<R, W> {
    pub fn new(request_rx: R, response_tx: W) -> Self {
        ServerChannel {
            request_rx,
            response_tx,
        }
    }

    pub fn receive_request(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        read_full(&mut self.request_rx, buf)
    }

    pub fn send_response(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("server: sending {}-byte response frame", bytes.len());
        write_full(&mut self.response_tx, bytes)?;
        self.response_tx.flush().map_err(map_write_error)
    }

    pub fn close(self) {
        trace!("server: closing channel");
    }
}
