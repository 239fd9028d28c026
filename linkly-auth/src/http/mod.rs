//! HTTP client building with retry middleware.

mod client;
mod retry;

pub use client::{HttpClient, HttpClientBuilder, HttpClientConfig};
pub use retry::BackoffPolicy;
