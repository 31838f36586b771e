//! The `http` service: serves one convention route tree over HTTP or HTTPS.

mod config;
pub mod middleware;
mod service;
pub mod tls;
mod web;

pub use config::HttpServiceConfig;
pub use service::{assemble_router, HttpService, HttpServiceFactory};
