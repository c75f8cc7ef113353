//! OpenAPI -> MCP gateway: exposes a REST API's operations as MCP tools over
//! a session-oriented streamable HTTP transport or stdio.

pub mod api;
pub mod cli;
pub mod clients;
pub mod core;
pub mod domain;
pub mod infra;
pub mod tools;
