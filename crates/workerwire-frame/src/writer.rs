use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use serde::Serialize;
use workerwire_sexp::{to_value, Value};

use crate::codec::encode_frame;
use crate::error::{EncodeError, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frame records to any `Write` stream.
///
/// Each record is assembled in full before the first byte is written, so a
/// caller that serializes access to the writer never interleaves records.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and write one value, then flush (blocking).
    pub fn send(&mut self, value: &Value) -> Result<()> {
        self.buf.clear();
        encode_frame(value, &mut self.buf);
        tracing::trace!(bytes = self.buf.len(), "writing frame");

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Serialize with serde, then send.
    pub fn send_serializable<S: Serialize + ?Sized>(&mut self, value: &S) -> Result<()> {
        let value = to_value(value).map_err(EncodeError::from)?;
        self.send(&value)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
