//! System orchestration, navigation, startup, and shutdown logic.

pub mod admin_system;
pub mod route;
pub mod tracing;

pub use admin_system::*;
pub use route::*;
pub use self::tracing::*;
