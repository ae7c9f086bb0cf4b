//! Filter input/output buffers and the completed execution.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::str::Utf8Error;
use std::sync::Arc;

/// Content handed to a filter.
///
/// Cloning the underlying buffer is cheap, so a declining filter leaves the
/// content intact for the next one.
pub struct Input {
    bytes: Arc<[u8]>,
    pos: usize,
}

impl Input {
    pub(crate) fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Whole content, regardless of how much has been read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.bytes[self.pos.min(self.bytes.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Fresh sink handed to each filter.
#[derive(Default)]
pub struct Output {
    buf: Vec<u8>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn into_bytes(self) -> Arc<[u8]> {
        Arc::from(self.buf)
    }
}

impl Write for Output {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of a pipe execution.
///
/// The content is complete, so the length is known before any byte is
/// written to the final destination.
#[derive(Debug, Clone)]
pub struct Execution {
    bytes: Arc<[u8]>,
}

impl Execution {
    pub(crate) fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    /// Character view, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn content_length(&self) -> usize {
        self.bytes.len()
    }

    pub fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        out.write_all(&self.bytes)
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }
}

/// Terminal consumer of a pipe.
pub trait OnReady {
    fn ready(&mut self, execution: &Execution) -> io::Result<()>;
}

impl<F> OnReady for F
where
    F: FnMut(&Execution) -> io::Result<()>,
{
    fn ready(&mut self, execution: &Execution) -> io::Result<()> {
        self(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_reads_once_but_keeps_content() {
        let mut input = Input::new(Arc::from(&b"abc"[..]));
        let mut read = String::new();
        input.read_to_string(&mut read).unwrap();
        assert_eq!(read, "abc");
        assert_eq!(input.read(&mut [0u8; 4]).unwrap(), 0);
        assert_eq!(input.as_bytes(), b"abc");
    }

    #[test]
    fn test_execution_views() {
        let execution = Execution::new(Arc::from("héllo".as_bytes()));
        assert_eq!(execution.content_length(), 6);
        assert_eq!(execution.as_str().unwrap(), "héllo");
        assert_eq!(execution.text(), "héllo");

        let mut out = Vec::new();
        execution.write_to(&mut out).unwrap();
        assert_eq!(out, "héllo".as_bytes());
    }
}
