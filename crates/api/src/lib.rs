//! HTTP API: configuration, service wiring, routing.

pub mod app;
pub mod config;
