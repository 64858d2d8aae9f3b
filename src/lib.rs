//! Descriptor-driven admin console over a REST backend.
//!
//! One generic CRUD stack (transport, cached queries with optimistic
//! mutations, a headless screen model) serves every entity of a catalog.

pub mod app_system;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod query;
pub mod screen;
pub mod transport;

#[cfg(test)]
mod mock_framework;
