//! Longest-prefix URI routing over the HTTP device.

mod core;

pub use core::{HttpRouter, RequestController, UriHandler};
