//! Mock recognizer servers for integration tests
//!
//! - WebSocket recognizer speaking the start / audio / end-of-stream protocol

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

pub mod websocket_mock;

pub use websocket_mock::{MockAsrServer, MockAsrState, ReceivedFrame};
