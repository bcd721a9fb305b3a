//! HTTP API: router, session middleware and error mapping.

pub mod app;
pub mod middleware;
