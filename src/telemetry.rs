//! Telemetry Module for the replace-response filter
//!
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

/// Replacement event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceEventType {
    /// Buffered body transformed and written
    BodyTransformed,
    /// Streaming body closed
    StreamCompleted,
    /// Body left untouched (too large, not buffered)
    PassedThrough,
    /// Configuration refused at startup
    ConfigRejected,
    /// Request failed while replacing
    ServeFailed,
}

/// Delivery mode of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Buffered,
    Streaming,
}

/// Replacement event for logging
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceEvent {
    /// Event type
    pub event_type: ReplaceEventType,
    /// Proxy-wasm context ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<u32>,
    /// Buffered or streaming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<DeliveryMode>,
    /// Body bytes before replacement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in: Option<usize>,
    /// Body bytes after replacement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_out: Option<usize>,
    /// Number of replacements made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacements: Option<usize>,
    /// Reason for action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReplaceEvent {
    /// Create a new event
    pub fn new(event_type: ReplaceEventType) -> Self {
        Self {
            event_type,
            context_id: None,
            mode: None,
            bytes_in: None,
            bytes_out: None,
            replacements: None,
            reason: None,
        }
    }

    /// Set context ID
    pub fn with_context_id(mut self, id: u32) -> Self {
        self.context_id = Some(id);
        self
    }

    /// Set delivery mode
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set body sizes
    pub fn with_sizes(mut self, bytes_in: usize, bytes_out: usize) -> Self {
        self.bytes_in = Some(bytes_in);
        self.bytes_out = Some(bytes_out);
        self
    }

    /// Set replacement count
    pub fn with_replacements(mut self, count: usize) -> Self {
        self.replacements = Some(count);
        self
    }

    /// Set reason
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                ReplaceEventType::ConfigRejected | ReplaceEventType::ServeFailed => {
                    warn!("[REPLACE-RESPONSE] {}", json);
                }
                _ => {
                    info!("[REPLACE-RESPONSE] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize replace event: {}", e);
            }
        }
    }
}

/// A buffered body was transformed
pub fn event_transformed(bytes_in: usize, bytes_out: usize, replacements: usize) -> ReplaceEvent {
    ReplaceEvent::new(ReplaceEventType::BodyTransformed)
        .with_mode(DeliveryMode::Buffered)
        .with_sizes(bytes_in, bytes_out)
        .with_replacements(replacements)
}

/// A streamed body was closed
pub fn event_stream_completed(replacements: usize) -> ReplaceEvent {
    ReplaceEvent::new(ReplaceEventType::StreamCompleted)
        .with_mode(DeliveryMode::Streaming)
        .with_replacements(replacements)
}

/// A body was passed through unmodified
pub fn event_passed_through(reason: &str) -> ReplaceEvent {
    ReplaceEvent::new(ReplaceEventType::PassedThrough).with_reason(reason)
}

/// Configuration was refused
pub fn event_config_rejected(error: &dyn std::error::Error) -> ReplaceEvent {
    ReplaceEvent::new(ReplaceEventType::ConfigRejected).with_reason(&error.to_string())
}

/// A request failed mid-replacement
pub fn event_serve_failed(mode: DeliveryMode, error: &dyn std::error::Error) -> ReplaceEvent {
    ReplaceEvent::new(ReplaceEventType::ServeFailed)
        .with_mode(mode)
        .with_reason(&error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_event_serialization() {
        let event = event_transformed(120, 98, 3).with_context_id(7);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"body_transformed\""));
        assert!(json.contains("\"mode\":\"buffered\""));
        assert!(json.contains("\"replacements\":3"));
        assert!(json.contains("\"context_id\":7"));
        assert!(!json.contains("reason"));
    }

    #[test]
    fn test_config_rejected_carries_error() {
        let event = event_config_rejected(&ConfigError::MissingSearch { index: 2 });
        assert_eq!(event.event_type, ReplaceEventType::ConfigRejected);
        assert!(event.reason.as_ref().unwrap().contains("replacement 2"));
    }

    #[test]
    fn test_stream_completed() {
        let event = event_stream_completed(4);
        assert_eq!(event.mode, Some(DeliveryMode::Streaming));
        assert_eq!(event.replacements, Some(4));
        assert!(event.bytes_in.is_none());
    }
}
