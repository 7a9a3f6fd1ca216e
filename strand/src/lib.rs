//! strand: plain-text HTTP host for hot-reloading plugins
//!
//! The binary wires a [`strand_plugin_host::PluginRegistry`] into a small
//! HTTP/1 server. Everything here is glue; the reload logic lives in
//! `strand-plugin-host`.

pub mod config;
pub mod endpoint;
pub mod server;
pub mod tracing_support;

pub use config::Config;
pub use endpoint::{PluginEndpoint, PluginQuery, TextResponse};
