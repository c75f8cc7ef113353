pub mod mcp;
pub mod streamable;
