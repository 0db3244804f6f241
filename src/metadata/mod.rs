//! Metadata storage layer.
//!
//! The metadata store keeps track of tenant partitions and the blob records
//! inside them.  The [`store::MetadataStore`] trait defines the interface;
//! [`sqlite::SqliteMetadataStore`] is the default implementation and
//! [`memory::MemoryMetadataStore`] serves tests and ephemeral runs.

pub mod memory;
pub mod sqlite;
pub mod store;
