//! DNS Gateway - a caching DNS resolution gateway written in Rust

pub mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod resolution;
pub mod server;
pub mod types;
pub mod upstream;
