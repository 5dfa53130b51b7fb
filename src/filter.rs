//! Envoy proxy-wasm glue
//!
//! The root context validates configuration once and shares the handler
//! with every HTTP context. Response bodies are rewritten either chunk by
//! chunk (streaming) or once Envoy has buffered the whole body.

use std::rc::Rc;

use log::{debug, error, info, warn};
use proxy_wasm::hostcalls;
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, MapType};

use crate::config::FilterConfig;
use crate::response::{
    declared_length, ReplaceHandler, ReplaceWriter, ResponseWriter, CONTENT_LENGTH,
};
use crate::telemetry;

/// Root context for filter lifecycle management
pub(crate) struct ReplaceRootContext {
    handler: Option<Rc<ReplaceHandler>>,
}

impl ReplaceRootContext {
    pub(crate) fn new() -> Self {
        Self { handler: None }
    }
}

impl Context for ReplaceRootContext {}

impl RootContext for ReplaceRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let config = match self.get_plugin_configuration() {
            Some(bytes) => FilterConfig::from_bytes(&bytes),
            None => Ok(FilterConfig::default()),
        };

        match config.and_then(|c| ReplaceHandler::new(&c)) {
            Ok(handler) => {
                info!(
                    "Replace-response filter initialized with {} replacements (stream={})",
                    handler.chain().len(),
                    handler.is_streaming()
                );
                self.handler = Some(Rc::new(handler));
                true
            }
            Err(e) => {
                error!("Rejecting filter configuration: {}", e);
                telemetry::event_config_rejected(&e).emit();
                false
            }
        }
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        let handler = self.handler.clone()?;
        Some(Box::new(ReplaceHttpContext::new(context_id, handler)))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// Response as seen through Envoy: headers live in the host, body bytes
/// are collected so the callback can swap them into the current chunk
#[derive(Debug, Default)]
struct HostResponse {
    body: Vec<u8>,
}

impl HostResponse {
    fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}

impl ResponseWriter for HostResponse {
    fn header(&self, name: &str) -> Option<String> {
        hostcalls::get_map_value(MapType::HttpResponseHeaders, name)
            .ok()
            .flatten()
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        if let Err(status) = hostcalls::set_map_value(MapType::HttpResponseHeaders, name, value) {
            warn!("Failed to set response header {}: {:?}", name, status);
        }
    }

    // status is owned by the host
    fn write_header(&mut self, _status: u16) {}

    fn write(&mut self, body: &[u8]) -> std::io::Result<usize> {
        self.body.extend_from_slice(body);
        Ok(body.len())
    }
}

enum BodyMode {
    /// Waiting for response headers
    Idle,
    Streaming(ReplaceWriter<HostResponse>),
    /// Envoy buffers until end of stream
    Buffering,
    /// Body left untouched
    PassThrough,
}

/// HTTP context for per-response processing
struct ReplaceHttpContext {
    context_id: u32,
    handler: Rc<ReplaceHandler>,
    mode: BodyMode,
}

impl ReplaceHttpContext {
    fn new(context_id: u32, handler: Rc<ReplaceHandler>) -> Self {
        Self {
            context_id,
            handler,
            mode: BodyMode::Idle,
        }
    }

    fn status(&self) -> u16 {
        self.get_http_response_header(":status")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    fn stream_chunk(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        let chunk = self.get_http_response_body(0, body_size).unwrap_or_default();
        let BodyMode::Streaming(writer) = &mut self.mode else {
            return Action::Continue;
        };

        let mut result = writer.write(&chunk).map(|_| ());
        if end_of_stream && result.is_ok() {
            result = writer.close();
        }
        let out = writer.inner_mut().take_body();
        let replacements = writer.replacements();

        if let Err(e) = result {
            warn!(
                "[context_id={}] Streaming replacement failed: {}",
                self.context_id, e
            );
            telemetry::event_serve_failed(telemetry::DeliveryMode::Streaming, &e)
                .with_context_id(self.context_id)
                .emit();
            self.mode = BodyMode::PassThrough;
            return Action::Continue;
        }

        self.set_http_response_body(0, body_size, &out);
        debug!(
            "[context_id={}] Streamed chunk: {} bytes in, {} bytes out, end_of_stream: {}",
            self.context_id,
            body_size,
            out.len(),
            end_of_stream
        );

        if end_of_stream {
            if self.handler.log_replacements() {
                telemetry::event_stream_completed(replacements)
                    .with_context_id(self.context_id)
                    .emit();
            }
            self.mode = BodyMode::PassThrough;
        }
        Action::Continue
    }

    fn buffer_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if body_size > self.handler.max_body_size() {
            warn!(
                "[context_id={}] Body size exceeds maximum ({} bytes), skipping replacement",
                self.context_id,
                self.handler.max_body_size()
            );
            self.pass_through("body exceeds max_body_size");
            return Action::Continue;
        }

        // Envoy keeps growing the buffered body until we continue
        if !end_of_stream {
            return Action::Pause;
        }

        let body = self.get_http_response_body(0, body_size).unwrap_or_default();
        let status = self.status();
        let mut response = HostResponse::default();

        match self.handler.write_buffered(&mut response, status, &body) {
            Ok(replacements) => {
                self.set_http_response_body(0, body_size, &response.body);
                debug!(
                    "[context_id={}] Replaced buffered body: {} replacements, {} -> {} bytes",
                    self.context_id,
                    replacements,
                    body.len(),
                    response.body.len()
                );
            }
            Err(e) => {
                warn!(
                    "[context_id={}] Buffered replacement failed: {}",
                    self.context_id, e
                );
            }
        }

        self.mode = BodyMode::PassThrough;
        Action::Continue
    }

    fn pass_through(&mut self, reason: &str) {
        self.mode = BodyMode::PassThrough;
        if self.handler.log_replacements() {
            telemetry::event_passed_through(reason)
                .with_context_id(self.context_id)
                .emit();
        }
    }
}

impl Context for ReplaceHttpContext {}

impl HttpContext for ReplaceHttpContext {
    fn on_http_response_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        if end_of_stream {
            debug!("[context_id={}] Response has no body", self.context_id);
            self.mode = BodyMode::PassThrough;
            return Action::Continue;
        }

        if self.handler.is_streaming() {
            let status = self.status();
            let mut writer = ReplaceWriter::new(self.handler.chain(), HostResponse::default());
            writer.write_header(status);
            self.mode = BodyMode::Streaming(writer);
            return Action::Continue;
        }

        let host = HostResponse::default();
        if !self.handler.should_buffer(&host) {
            debug!(
                "[context_id={}] Declared length {:?} too large, not buffering",
                self.context_id,
                declared_length(&host)
            );
            self.pass_through("declared content-length exceeds max_body_size");
            return Action::Continue;
        }

        // hold headers so content-length can still be corrected
        debug!(
            "[context_id={}] Buffering response (content-length: {:?})",
            self.context_id,
            host.header(CONTENT_LENGTH)
        );
        self.mode = BodyMode::Buffering;
        Action::Pause
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        match self.mode {
            BodyMode::Streaming(_) => self.stream_chunk(body_size, end_of_stream),
            BodyMode::Buffering => self.buffer_body(body_size, end_of_stream),
            BodyMode::Idle | BodyMode::PassThrough => Action::Continue,
        }
    }

    fn on_log(&mut self) {
        debug!(
            "[context_id={}] Response processing complete",
            self.context_id
        );
    }
}
