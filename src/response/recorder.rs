//! Response recorder for buffered replacement
//!
//! Stands in for the downstream writer while the upstream produces its
//! response. Headers are shared with the downstream writer; status and
//! body are captured unless the buffering decision, taken when the
//! header is written, says to stream the response through untouched.

use std::io;

use super::{ResponseWriter, STATUS_OK};

/// Buffers the upstream response body
pub struct ResponseRecorder<'a, R: ResponseWriter + ?Sized, F> {
    inner: &'a mut R,
    buf: &'a mut Vec<u8>,
    should_buffer: F,
    status: u16,
    wrote_header: bool,
    buffered: bool,
}

impl<'a, R, F> ResponseRecorder<'a, R, F>
where
    R: ResponseWriter + ?Sized,
    F: Fn(u16, &R) -> bool,
{
    /// `should_buffer` sees the status and the headers as they are when
    /// the upstream finalizes them
    pub fn new(inner: &'a mut R, buf: &'a mut Vec<u8>, should_buffer: F) -> Self {
        Self {
            inner,
            buf,
            should_buffer,
            status: 0,
            wrote_header: false,
            buffered: true,
        }
    }

    /// Whether the body was captured rather than passed through
    pub fn buffered(&self) -> bool {
        self.buffered
    }

    /// Recorded status, 0 if the upstream never wrote one
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Recorded body
    pub fn buffer(&self) -> &[u8] {
        &self.buf[..]
    }
}

impl<R, F> ResponseWriter for ResponseRecorder<'_, R, F>
where
    R: ResponseWriter + ?Sized,
    F: Fn(u16, &R) -> bool,
{
    fn header(&self, name: &str) -> Option<String> {
        self.inner.header(name)
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        self.inner.set_header(name, value);
    }

    fn write_header(&mut self, status: u16) {
        if self.wrote_header {
            return;
        }
        self.wrote_header = true;
        self.status = status;

        self.buffered = (self.should_buffer)(status, &*self.inner);
        if !self.buffered {
            self.inner.write_header(status);
        }
    }

    fn write(&mut self, body: &[u8]) -> io::Result<usize> {
        if !self.wrote_header {
            self.write_header(STATUS_OK);
        }
        if self.buffered {
            self.buf.extend_from_slice(body);
            return Ok(body.len());
        }
        self.inner.write(body)
    }
}
