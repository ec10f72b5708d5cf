//! MCP server that lets LLMs analyse GitHub pull requests and manage issues,
//! tags, and releases.
//!
//! Each tool forwards one request (or a short fixed sequence) to the GitHub
//! API and returns the response. An extra tool reports the host's public
//! IPv4/IPv6 addresses. In remote mode, tool calls are counted and exposed
//! as Prometheus metrics.

pub mod config;
pub mod error;
pub mod github;
pub mod ip;
pub mod metrics;
pub mod server;
