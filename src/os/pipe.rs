// src/os/pipe.rs

//! Anonymous pipe creation and role-end assignment.
//!
//! Two unidirectional pipes connect the process pair: one carries request
//! frames (and the initial scene stream), the other carries response
//! frames. Each role keeps exactly one end of each pipe and must close the
//! other two ends, otherwise the peer never observes end-of-stream when a
//! role exits. `OwnedFd` handles make that closing automatic: converting
//! a `DuplexPipes` into one role's end drops (and thereby closes) the fds
//! that role must not keep, which is exactly what the post-`fork` child
//! and parent each do.

use crate::errors::{RelayError, Result};
use log::debug;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};

/// One unidirectional pipe: the worker reads what the renderer writes, or
/// vice versa.
#[derive(Debug)]
struct Pipe {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl Pipe {
    fn new() -> Result<Self> {
        let (reader, writer) = nix::unistd::pipe()
            .map_err(|e| RelayError::SetupFailure(format!("pipe creation failed: {}", e)))?;
        debug!(
            "created pipe: read fd {}, write fd {}",
            reader.as_raw_fd(),
            writer.as_raw_fd()
        );
        Ok(Pipe { reader, writer })
    }
}

/// The renderer role's pipe ends: it writes requests and reads responses.
#[derive(Debug)]
pub struct ClientEnd {
    pub request_tx: File,
    pub response_rx: File,
}

/// The worker role's pipe ends: it reads requests and writes responses.
#[derive(Debug)]
pub struct ServerEnd {
    pub request_rx: File,
    pub response_tx: File,
}

/// Both pipes of a fresh duplex pair, before role assignment.
#[derive(Debug)]
pub struct DuplexPipes {
    request: Pipe,
    response: Pipe,
}

impl DuplexPipes {
    pub fn new() -> Result<Self> {
        Ok(DuplexPipes {
            request: Pipe::new()?,
            response: Pipe::new()?,
        })
    }

    /// Keeps the renderer-role ends and closes the worker-role ends.
    /// Call in the parent after `fork`.
    pub fn into_client_end(self) -> ClientEnd {
        ClientEnd {
            request_tx: File::from(self.request.writer),
            response_rx: File::from(self.response.reader),
        }
        // self.request.reader and self.response.writer drop here, closing
        // the worker-role fds in this process.
    }

    /// Keeps the worker-role ends and closes the renderer-role ends.
    /// Call in the child after `fork`.
    pub fn into_server_end(self) -> ServerEnd {
        ServerEnd {
            request_rx: File::from(self.request.reader),
            response_tx: File::from(self.response.writer),
        }
    }

    /// Splits into both role ends within one process, for the thread-pair
    /// mode and for tests.
    pub fn split(self) -> (ClientEnd, ServerEnd) {
        (
            ClientEnd {
                request_tx: File::from(self.request.writer),
                response_rx: File::from(self.response.reader),
            },
            ServerEnd {
                request_rx: File::from(self.request.reader),
                response_tx: File::from(self.response.writer),
            },
        )
    }
}
