//! Response-side adaptation of the replacement chain
//!
//! The filter sits between an upstream that produces a response and a
//! downstream [`ResponseWriter`]. Two delivery modes:
//! - buffered: the whole body is recorded, transformed once and written
//!   with a corrected `content-length`
//! - streaming: the body is transformed as it is written and
//!   `content-length` is dropped before the headers go out

use std::io;

pub mod handler;
pub mod recorder;
pub mod replace_writer;
pub mod testing;

pub use handler::{ReplaceHandler, ServeError, Upstream};
pub use recorder::ResponseRecorder;
pub use replace_writer::ReplaceWriter;

/// Length header that replacements invalidate
pub const CONTENT_LENGTH: &str = "content-length";

/// Default status when the body is written before any header
pub const STATUS_OK: u16 = 200;

/// Downstream side of a response
///
/// Headers may be changed until the first body write or
/// [`write_header`](Self::write_header), whichever comes first.
pub trait ResponseWriter {
    /// Header value, matched case-insensitively
    fn header(&self, name: &str) -> Option<String>;

    /// Set a header, or remove it with `None`
    fn set_header(&mut self, name: &str, value: Option<&str>);

    /// Finalize status and headers
    fn write_header(&mut self, status: u16);

    /// Write body bytes, returning how many were accepted
    fn write(&mut self, body: &[u8]) -> io::Result<usize>;
}

impl<R: ResponseWriter + ?Sized> ResponseWriter for &mut R {
    fn header(&self, name: &str) -> Option<String> {
        (**self).header(name)
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        (**self).set_header(name, value)
    }

    fn write_header(&mut self, status: u16) {
        (**self).write_header(status)
    }

    fn write(&mut self, body: &[u8]) -> io::Result<usize> {
        (**self).write(body)
    }
}

/// `io::Write` view of a response body
#[derive(Debug)]
pub struct BodySink<R>(pub R);

impl<R: ResponseWriter> io::Write for BodySink<R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Declared `content-length`, if present and numeric
pub fn declared_length<R: ResponseWriter + ?Sized>(w: &R) -> Option<usize> {
    w.header(CONTENT_LENGTH)?.trim().parse().ok()
}
