//! podpipe: stream HTTP request bodies into the stdin of ephemeral
//! Kubernetes worker pods.

pub mod cluster;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod template;
pub mod testing;
