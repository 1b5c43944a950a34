//! HTTP API: authorization pipeline middleware, auth routes and process
//! configuration.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
