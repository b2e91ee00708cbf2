//! Line-buffered capture of remote command output.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Lines {
    out: Vec<u8>,
    line: Vec<u8>,
}

/// Collects output from both drain loops of a remote command.
///
/// Carriage returns are dropped and only completed lines are kept. The
/// rendered text has all trailing newlines removed. Writes are serialised, so
/// a shared reference can be handed to several writer threads.
#[derive(Debug, Default)]
pub struct ErrorBuffer {
    inner: Mutex<Lines>,
}

impl ErrorBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, bytes: &[u8]) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let lines = &mut *guard;
        for &byte in bytes {
            if byte == b'\r' {
                continue;
            }
            lines.line.push(byte);
            if byte == b'\n' {
                lines.out.append(&mut lines.line);
            }
        }
    }
}

impl Write for &ErrorBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for ErrorBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Display for ErrorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let end = guard
            .out
            .iter()
            .rposition(|byte| *byte != b'\n')
            .map_or(0, |last| last + 1);
        let text = guard.out.get(..end).unwrap_or_default();
        f.write_str(&String::from_utf8_lossy(text))
    }
}
