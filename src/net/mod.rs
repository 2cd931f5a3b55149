//! Request/response model and live network access.

mod client;
mod types;

pub use client::{HttpClient, Network};
pub use types::{Destination, Request, Response};
