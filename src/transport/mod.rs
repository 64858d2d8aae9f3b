//! HTTP transport: the send seam, the credentialed base client, and the
//! per-entity REST clients built on top of it.

pub mod base_client;
pub mod entity_client;
pub mod http;

pub use base_client::*;
pub use entity_client::*;
pub use http::*;
