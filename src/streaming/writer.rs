//! Streaming replacement writer
//!
//! CRITICAL: This writer does NOT accumulate the body.
//! Each write is pushed through the replacement stages and whatever is
//! final goes straight to the sink. Only the stages' pending bytes are
//! kept between writes.

use std::io::{self, Write};

use crate::chain::Chain;
use crate::pool::Pooled;

use super::pipeline::Replacer;

/// `io::Write` proxy applying a replacement chain on the way to `sink`
///
/// Call [`close`](Self::close) once the input is complete; pending
/// bytes are only released then.
#[derive(Debug)]
pub struct StreamingReplacer<W: Write> {
    replacer: Pooled<Replacer>,
    sink: W,
    out: Vec<u8>,
    closed: bool,
    /// Set once the sink rejected output; the stream has a gap from then on
    failed: bool,
}

impl<W: Write> StreamingReplacer<W> {
    pub fn new(chain: &Chain, sink: W) -> Self {
        Self {
            replacer: chain.replacer(),
            sink,
            out: Vec::new(),
            closed: false,
            failed: false,
        }
    }

    /// Flush every stage's pending bytes to the sink. Idempotent.
    ///
    /// After a sink error nothing more is written and this fails too.
    pub fn close(&mut self) -> io::Result<()> {
        if self.failed {
            return Err(sink_failed());
        }
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.out.clear();
        self.replacer.finish(&mut self.out);
        self.emit()?;
        self.sink.flush().map_err(|e| {
            self.failed = true;
            e
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the sink has rejected a write
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn emit(&mut self) -> io::Result<()> {
        self.sink.write_all(&self.out).map_err(|e| {
            self.failed = true;
            e
        })
    }

    /// Replacements made so far
    pub fn replacements(&self) -> usize {
        self.replacer.replacements()
    }

    /// Bytes held back waiting for more input
    pub fn pending_len(&self) -> usize {
        self.replacer.pending_len()
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Unwrap the sink. Pending bytes not yet closed over are dropped.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for StreamingReplacer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after streaming replacer was closed",
            ));
        }

        if self.failed {
            return Err(sink_failed());
        }

        self.out.clear();
        self.replacer.write(buf, &mut self.out);
        self.emit()?;
        Ok(buf.len())
    }

    /// Flushes the sink only; pending bytes stay until `close`
    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

fn sink_failed() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "streaming replacer sink failed earlier",
    )
}
