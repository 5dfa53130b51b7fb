//! Streaming response decorator
//!
//! Wraps the downstream writer, drops `content-length` when the headers
//! are finalized (the transformed length is unknown) and routes every
//! body write through a [`StreamingReplacer`].

use std::io::{self, Write};

use log::debug;

use super::{BodySink, ResponseWriter, CONTENT_LENGTH, STATUS_OK};
use crate::chain::Chain;
use crate::streaming::StreamingReplacer;

/// [`ResponseWriter`] that replaces while streaming
#[derive(Debug)]
pub struct ReplaceWriter<R: ResponseWriter> {
    body: StreamingReplacer<BodySink<R>>,
    wrote_header: bool,
}

impl<R: ResponseWriter> ReplaceWriter<R> {
    pub fn new(chain: &Chain, inner: R) -> Self {
        Self {
            body: StreamingReplacer::new(chain, BodySink(inner)),
            wrote_header: false,
        }
    }

    /// Flush pending bytes to the downstream writer. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        self.body.close()
    }

    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    /// Replacements made so far
    pub fn replacements(&self) -> usize {
        self.body.replacements()
    }

    pub fn inner(&self) -> &R {
        &self.body.get_ref().0
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.body.get_mut().0
    }
}

impl<R: ResponseWriter> ResponseWriter for ReplaceWriter<R> {
    fn header(&self, name: &str) -> Option<String> {
        self.inner().header(name)
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        self.inner_mut().set_header(name, value);
    }

    fn write_header(&mut self, status: u16) {
        if self.wrote_header {
            return;
        }
        self.wrote_header = true;

        // we don't know the length after replacements since
        // we're not buffering it all to find out
        if self.inner().header(CONTENT_LENGTH).is_some() {
            debug!("Streaming replacement: dropping content-length");
            self.inner_mut().set_header(CONTENT_LENGTH, None);
        }

        self.inner_mut().write_header(status);
    }

    fn write(&mut self, body: &[u8]) -> io::Result<usize> {
        if !self.wrote_header {
            self.write_header(STATUS_OK);
        }
        self.body.write(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Rule;
    use crate::response::testing::MemoryResponse;

    fn chain() -> Chain {
        Chain::new(vec![Rule::literal("foobar", "X")])
    }

    #[test]
    fn test_content_length_removed_before_body() {
        let resp = MemoryResponse::new().with_header("Content-Length", "9");
        let mut w = ReplaceWriter::new(&chain(), resp);

        w.write_header(200);
        assert!(w.inner().header(CONTENT_LENGTH).is_none());

        w.write(b"a foobar!").unwrap();
        w.close().unwrap();
        assert_eq!(w.inner().body(), b"a X!");
        assert!(!w.inner().body_before_header());
    }

    #[test]
    fn test_first_write_finalizes_headers() {
        let resp = MemoryResponse::new().with_header("content-length", "6");
        let mut w = ReplaceWriter::new(&chain(), resp);

        w.write(b"foo").unwrap();
        assert!(w.wrote_header());
        assert_eq!(w.inner().status(), Some(200));
        assert!(w.inner().header(CONTENT_LENGTH).is_none());

        w.write(b"bar").unwrap();
        w.close().unwrap();
        assert_eq!(w.inner().body(), b"X");
        assert_eq!(w.replacements(), 1);
    }

    #[test]
    fn test_write_header_once() {
        let mut w = ReplaceWriter::new(&chain(), MemoryResponse::new());
        w.write_header(404);
        w.write_header(500);
        assert_eq!(w.inner().status(), Some(404));
    }

    #[test]
    fn test_headers_pass_through() {
        let mut w = ReplaceWriter::new(&chain(), MemoryResponse::new());
        w.set_header("content-type", Some("text/html"));
        assert_eq!(w.header("Content-Type").as_deref(), Some("text/html"));
    }

    #[test]
    fn test_downstream_error_propagates() {
        let resp = MemoryResponse::new().failing_after(0);
        let mut w = ReplaceWriter::new(&chain(), resp);

        let err = w.write(b"plain text").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_borrowed_inner_writer() {
        let mut resp = MemoryResponse::new();
        {
            let mut w = ReplaceWriter::new(&chain(), &mut resp);
            w.write(b"xfoobarx").unwrap();
            w.close().unwrap();
        }
        assert_eq!(resp.body(), b"xXx");
    }
}
