use std::io::{self, Read};
use std::path::PathBuf;

use crate::error::RetargetError;

/// Little-endian reader that maps a premature end of stream to a format error
/// chosen by the caller and every other I/O fault to `StorageUnavailable`.
pub(crate) struct LeReader<R> {
    inner: R,
    truncated: fn(String) -> RetargetError,
}

impl<R: Read> LeReader<R> {
    pub(crate) fn new(inner: R, truncated: fn(String) -> RetargetError) -> Self {
        Self { inner, truncated }
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<(), RetargetError> {
        self.inner.read_exact(buf).map_err(|err| self.map_io(err, what))
    }

    fn map_io(&self, err: io::Error, what: &str) -> RetargetError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            (self.truncated)(format!("stream ended while reading {what}"))
        } else {
            RetargetError::StorageUnavailable {
                path: PathBuf::new(),
                source: err,
            }
        }
    }

    pub(crate) fn read_i32(&mut self, what: &str) -> Result<i32, RetargetError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub(crate) fn read_f32(&mut self, what: &str) -> Result<f32, RetargetError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read a non-negative 32-bit count.
    pub(crate) fn read_count(&mut self, what: &str) -> Result<usize, RetargetError> {
        let value = self.read_i32(what)?;
        usize::try_from(value).map_err(|_| (self.truncated)(format!("negative {what}: {value}")))
    }

    pub(crate) fn read_bytes(&mut self, len: usize, what: &str) -> Result<Vec<u8>, RetargetError> {
        // The declared length is untrusted; grow only as bytes arrive.
        let mut buf = Vec::with_capacity(capacity_hint(len));
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut buf);
        read.map_err(|err| self.map_io(err, what))?;
        if buf.len() < len {
            return Err((self.truncated)(format!("stream ended while reading {what}")));
        }
        Ok(buf)
    }

    pub(crate) fn skip(&mut self, len: u64, what: &str) -> Result<(), RetargetError> {
        let copied = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())
            .map_err(|err| self.map_io(err, what))?;
        if copied < len {
            return Err((self.truncated)(format!("stream ended while skipping {what}")));
        }
        Ok(())
    }
}

/// Capacity hint that never trusts a declared count beyond a sane bound.
pub(crate) fn capacity_hint(count: usize) -> usize {
    count.min(1 << 16)
}
