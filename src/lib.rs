//! Server-side coordination engine for human-in-the-loop review of
//! agent-submitted plans: a content-addressed document store, a review
//! state machine, an event bus feeding SSE subscribers, and the HTTP/MCP
//! surfaces that front all of it.

pub mod config;
pub mod diff;
pub mod digest;
pub mod engine;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod http;
pub mod mcp;
pub mod mcp_http;
pub mod model;
pub mod store;
