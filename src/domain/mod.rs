//! Entity descriptors and the typed records, ids and pages they describe.

pub mod descriptor;
pub mod page;
pub mod record;

pub use descriptor::*;
pub use page::*;
pub use record::*;
