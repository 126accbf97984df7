//! HTTP client module.

mod http;

pub use http::*;
