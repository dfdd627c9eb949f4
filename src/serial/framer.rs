//! Host command line framing.
//!
//! Bytes from the RX ring are accumulated in a fixed window.  When a `\n`
//! shows up the first line is split at its first `,` into `cmd` and `arg`
//! and the window is reset - anything that arrived after the terminator in
//! the same batch is discarded with it.  Only the newest
//! [`COMMAND_BUFFER_SIZE`] bytes are ever kept, and a NUL byte throws away
//! everything received up to and including it.

use crate::config::{COMMAND_BUFFER_SIZE, COMMAND_DELIMITER, LINE_TERMINATOR};
use crate::error::{Error, ProtocolError};

/// One framed host command, borrowed from the framer's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub cmd: &'a str,
    pub arg: &'a str,
}

/// Sliding-window line accumulator.
pub struct CommandFramer<const N: usize = COMMAND_BUFFER_SIZE> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> CommandFramer<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Feed one RX drain.
    ///
    /// Returns `Ok(Some(..))` when a complete command line was framed,
    /// `Ok(None)` while still accumulating, and `Err(Protocol(..))` when a
    /// terminated line had to be thrown away.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<CommandLine<'_>>, Error> {
        self.append(bytes);
        self.drop_through_nul();

        let Some(lf) = self.buf[..self.len]
            .iter()
            .position(|&b| b == LINE_TERMINATOR)
        else {
            return Ok(None);
        };

        self.len = 0;

        let mut line = &self.buf[..lf];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }

        let comma = line
            .iter()
            .position(|&b| b == COMMAND_DELIMITER)
            .ok_or(ProtocolError::MissingDelimiter)?;

        let cmd = core::str::from_utf8(&line[..comma]).map_err(|_| ProtocolError::NotText)?;
        let arg = core::str::from_utf8(&line[comma + 1..]).map_err(|_| ProtocolError::NotText)?;

        Ok(Some(CommandLine { cmd, arg }))
    }

    /// A NUL never belongs to a command; whatever precedes it is noise.
    fn drop_through_nul(&mut self) {
        if let Some(nul) = self.buf[..self.len].iter().rposition(|&b| b == 0) {
            self.buf.copy_within(nul + 1..self.len, 0);
            self.len -= nul + 1;
        }
    }

    /// Append with discard-oldest on overflow.
    fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= N {
            self.buf.copy_from_slice(&bytes[bytes.len() - N..]);
            self.len = N;
            return;
        }

        let space = N - self.len;
        if bytes.len() > space {
            let shift = bytes.len() - space;
            self.buf.copy_within(shift..self.len, 0);
            self.len -= shift;
        }

        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }
}

impl<const N: usize> Default for CommandFramer<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
