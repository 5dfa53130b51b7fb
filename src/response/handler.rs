//! Replace-response handler
//!
//! Owns the shared [`Chain`] and the body buffer pool, and runs one
//! response through it in the configured delivery mode.

use std::io::{self, Write};
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use super::{
    declared_length, BodySink, ReplaceWriter, ResponseRecorder, ResponseWriter, CONTENT_LENGTH,
    STATUS_OK,
};
use crate::chain::Chain;
use crate::config::{ConfigError, FilterConfig};
use crate::pool::Pool;
use crate::telemetry::{self, DeliveryMode};

/// Errors while serving one response
#[derive(Debug, Error)]
pub enum ServeError {
    /// Downstream write failed (client gone, broken pipe)
    #[error("response write failed: {0}")]
    Io(#[from] io::Error),

    /// Upstream failed to produce a response
    #[error("upstream failed: {0}")]
    Upstream(String),
}

/// Something that produces a response into a [`ResponseWriter`]
pub trait Upstream {
    fn serve(&mut self, w: &mut dyn ResponseWriter) -> Result<(), ServeError>;
}

impl<F> Upstream for F
where
    F: FnMut(&mut dyn ResponseWriter) -> Result<(), ServeError>,
{
    fn serve(&mut self, w: &mut dyn ResponseWriter) -> Result<(), ServeError> {
        self(w)
    }
}

/// Validated filter: the replacement chain plus delivery settings
#[derive(Debug, Clone)]
pub struct ReplaceHandler {
    chain: Chain,
    stream: bool,
    max_body_size: usize,
    log_replacements: bool,
    buffers: Arc<Pool<Vec<u8>>>,
}

impl ReplaceHandler {
    /// Validate configuration and compile the chain
    pub fn new(config: &FilterConfig) -> Result<Self, ConfigError> {
        if config.max_match_size == 0 {
            return Err(ConfigError::ZeroMaxMatchSize);
        }
        let chain =
            Chain::from_config(&config.replacements)?.with_max_match_size(config.max_match_size);

        Ok(Self {
            chain,
            stream: config.stream,
            max_body_size: config.max_body_size,
            log_replacements: config.log_replacements,
            buffers: Arc::new(Pool::new(Vec::new)),
        })
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn log_replacements(&self) -> bool {
        self.log_replacements
    }

    /// Buffered mode only buffers bodies that fit `max_body_size`
    pub fn should_buffer<R: ResponseWriter + ?Sized>(&self, w: &R) -> bool {
        match declared_length(w) {
            Some(len) if len > self.max_body_size => {
                debug!(
                    "Declared body of {} bytes exceeds maximum ({} bytes), not buffering",
                    len, self.max_body_size
                );
                false
            }
            _ => true,
        }
    }

    /// Run `upstream` and deliver its response to `w` with replacements
    pub fn serve<R, U>(&self, w: &mut R, upstream: &mut U) -> Result<(), ServeError>
    where
        R: ResponseWriter,
        U: Upstream + ?Sized,
    {
        let result = if self.stream {
            self.serve_streaming(w, upstream)
        } else {
            self.serve_buffered(w, upstream)
        };

        if let Err(e) = &result {
            let mode = if self.stream {
                DeliveryMode::Streaming
            } else {
                DeliveryMode::Buffered
            };
            telemetry::event_serve_failed(mode, e).emit();
        }
        result
    }

    fn serve_streaming<R, U>(&self, w: &mut R, upstream: &mut U) -> Result<(), ServeError>
    where
        R: ResponseWriter,
        U: Upstream + ?Sized,
    {
        let mut rw = ReplaceWriter::new(&self.chain, &mut *w);
        let served = upstream.serve(&mut rw);
        // release pending bytes even if the upstream failed part way;
        // after a downstream error close writes nothing
        let closed = rw.close();
        served?;
        closed?;

        if self.log_replacements {
            telemetry::event_stream_completed(rw.replacements()).emit();
        }
        Ok(())
    }

    fn serve_buffered<R, U>(&self, w: &mut R, upstream: &mut U) -> Result<(), ServeError>
    where
        R: ResponseWriter,
        U: Upstream + ?Sized,
    {
        let mut buf = self.buffers.acquire();
        let mut rec =
            ResponseRecorder::new(&mut *w, &mut buf, |_, inner: &R| self.should_buffer(inner));

        upstream.serve(&mut rec)?;
        if !rec.buffered() {
            if self.log_replacements {
                telemetry::event_passed_through("response not buffered").emit();
            }
            return Ok(());
        }
        let status = rec.status();

        self.write_buffered(w, status, &buf)?;
        Ok(())
    }

    /// Transform a complete body and write it to `w`, correcting
    /// `content-length` if it is set. `status` 0 means the upstream never
    /// wrote one and is sent as 200. Returns the number of replacements.
    pub fn write_buffered<R: ResponseWriter + ?Sized>(
        &self,
        w: &mut R,
        status: u16,
        body: &[u8],
    ) -> Result<usize, ServeError> {
        let mut out = self.buffers.acquire();
        let replacements = self.chain.transform_into(body, &mut out);

        // make sure length is correct, otherwise bad things can happen
        if w.header(CONTENT_LENGTH).is_some() {
            w.set_header(CONTENT_LENGTH, Some(&out.len().to_string()));
        }

        w.write_header(if status > 0 { status } else { STATUS_OK });
        BodySink(&mut *w).write_all(&out).map_err(|e| {
            warn!("Failed to write transformed body: {}", e);
            e
        })?;

        if self.log_replacements {
            telemetry::event_transformed(body.len(), out.len(), replacements).emit();
        }
        Ok(replacements)
    }
}
