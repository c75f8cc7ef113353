//! Core types: protocol messages, errors and the tool identifier codec.

pub mod error;
pub mod mcp;
pub mod tool_id;
