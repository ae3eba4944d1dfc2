//! JSON-lines request handling: one `Request` per stdin line, one reply per
//! stdout line, routed by method name.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
