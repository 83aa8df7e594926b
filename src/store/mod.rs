//! Persistence layer: progress aggregates in libSQL or memory.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlProgressStore;
pub use memory::MemoryProgressStore;
pub use traits::ProgressStore;
