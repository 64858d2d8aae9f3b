//! Query cache: an actor owning every fetched page and record, with
//! optimistic changes kept as removable layers on top.

pub mod actor;
pub mod client;
pub(crate) mod layers;
pub mod messages;

pub use actor::QueryCache;
pub use client::CacheClient;
pub use messages::*;
