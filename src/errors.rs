// src/errors.rs

//! Error taxonomy for the glyph relay protocol.
//!
//! The protocol assumes a trusted, correctly-paired peer, so there is no
//! recovery from a malformed frame: every variant except `PeerClosed` is
//! fatal to the role that observes it. `PeerClosed` is ordinary control
//! flow at the two points where a shutdown is valid (the top of the server
//! dispatch loop, and a client call whose peer has already exited), which
//! is why this is a match-able enum rather than a bare `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Pipe or process creation failed before either role started.
    #[error("setup failure: {0}")]
    SetupFailure(String),

    /// A read or frame field was inconsistent with the expected layout.
    /// The stream must not be interpreted further after this.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer closed its end of the channel at a point where an orderly
    /// shutdown is valid.
    #[error("peer closed the channel")]
    PeerClosed,

    /// A frame's declared trailing length does not fit the channel buffer.
    /// Checked explicitly before any staging write; never silently truncated.
    #[error("frame of {needed} bytes exceeds channel buffer capacity of {capacity} bytes")]
    FrameTooLarge { needed: usize, capacity: usize },

    /// The rasterization engine failed to honor a request.
    #[error("rasterization failure: {0}")]
    Raster(anyhow::Error),
}

// Not derivable: anyhow::Error does not implement std::error::Error, so
// thiserror's #[from] cannot generate this conversion.
impl From<anyhow::Error> for RelayError {
    fn from(e: anyhow::Error) -> Self {
        RelayError::Raster(e)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_large_reports_sizes() {
        let err = RelayError::FrameTooLarge {
            needed: 4096,
            capacity: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn raster_errors_wrap_anyhow() {
        let err: RelayError = anyhow::anyhow!("glyph 9 out of range").into();
        assert!(matches!(err, RelayError::Raster(_)));
        assert!(err.to_string().contains("glyph 9"));
    }
}
