//! Paged EEPROM/FRAM memory abstraction.
//!
//! [`MemoryFile`] presents the controller's two memory kinds as
//! byte-addressable ranges with page-level read caching (EEPROM only),
//! explicit write batching, and cache invalidation driven by the
//! asynchronous EEPROM-activate system event.

mod file;
mod types;

pub use file::MemoryFile;
pub use types::{MemoryAddress, MemoryKind, WriteBatch};
