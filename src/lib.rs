//! Replace-Response Wasm Filter for Envoy Proxy
//!
//! Rewrites HTTP response bodies with an ordered chain of literal and
//! regular-expression replacements. Bodies are either buffered whole and
//! rewritten with a corrected `content-length`, or streamed through the
//! chain chunk by chunk with bounded lookahead for regex matches.
//!
//! The replacement core (`chain`, `streaming`, `response`) is plain Rust
//! and runs anywhere; the proxy-wasm glue is only built for `wasm32`.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod chain;
pub mod config;
pub mod pool;
pub mod response;
pub mod streaming;
pub mod telemetry;

#[cfg(target_arch = "wasm32")]
mod filter;

pub use chain::{Chain, Rule, Transformed};
pub use config::{ConfigError, FilterConfig, ReplacementConfig};
pub use response::{ReplaceHandler, ReplaceWriter, ResponseWriter, ServeError, Upstream};
pub use streaming::StreamingReplacer;

// Register the filter with proxy-wasm runtime
#[cfg(target_arch = "wasm32")]
proxy_wasm::main! {{
    proxy_wasm::set_log_level(proxy_wasm::types::LogLevel::Debug);
    proxy_wasm::set_root_context(|_| -> Box<dyn proxy_wasm::traits::RootContext> {
        Box::new(filter::ReplaceRootContext::new())
    });
}}
