//! Storage backends for the snip link store.
//!
//! - [`InMemoryRepository`]: a single lock-guarded map, optionally persisted
//!   to a line-oriented append log (see [`log`]).
//! - [`PgRepository`]: PostgreSQL, deduplicating urls through a unique
//!   constraint.

pub mod log;
pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;
pub use snip_core::{LinkRecord, Repository, StorageError, UserLinks};
