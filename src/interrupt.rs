//! The self-signalling pipe that unblocks a thread sitting in `select`.
//!
//! The pipe never carries data. Every signal is one byte, and the waiting side consumes exactly one
//! byte per wake-up; all actual state transfer happens through the multiplexer's lock-protected
//! fields.

use {
    crate::{
        error::{Error, Result},
        os::unix::{c_wrappers, unixprelude::*},
    },
    std::{
        fmt::{self, Debug, Formatter},
        io,
    },
};

const SIGNAL_BYTE: u8 = b'i';

pub(crate) struct InterruptPipe {
    reader: OwnedFd,
    writer: OwnedFd,
}
impl InterruptPipe {
    pub fn new() -> Result<Self> {
        let (reader, writer) = c_wrappers::pipe().map_err(|e| {
            tracing::error!(error = %e, "failed to create interrupt pipe");
            Error::resource(e)
        })?;
        Ok(Self { reader, writer })
    }

    /// Wakes up the thread blocked in `select`, or the next one to block if nobody is waiting.
    ///
    /// A full pipe means plenty of wake-ups are already pending, so `WouldBlock` is not an error.
    pub fn signal(&self) {
        loop {
            match c_wrappers::write(self.writer.as_fd(), &[SIGNAL_BYTE]) {
                Ok(..) => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to signal interrupt pipe");
                    return;
                }
            }
        }
    }

    /// Consumes one pending signal. Returns whether there was one.
    pub fn drain_one(&self) -> bool {
        let mut buf = [0_u8; 1];
        loop {
            match c_wrappers::read(self.reader.as_fd(), &mut buf) {
                Ok(n) => return n == 1,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(..) => return false,
            }
        }
    }

    /// The descriptor to include in every wait-set.
    #[inline]
    pub fn read_fd(&self) -> RawFd { self.reader.as_raw_fd() }
}
impl Debug for InterruptPipe {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptPipe")
            .field("reader", &self.reader.as_raw_fd())
            .field("writer", &self.writer.as_raw_fd())
            .finish()
    }
}
