//! Streaming module for memory-bounded body replacement
//!
//! This module provides streaming primitives that:
//! - Keep only unresolved match prefixes between chunks
//! - Match literals with an FSM and regexes within a bounded lookahead
//! - Compose one stage per rule into a pipeline

pub mod pattern_fsm;
pub mod pipeline;
pub mod stage;
pub mod writer;

pub use pattern_fsm::{Advance, LiteralPattern, PatternState};
pub use pipeline::Replacer;
pub use stage::{LiteralStage, RegexStage, Stage};
pub use writer::StreamingReplacer;
