//! Blob storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where bytes
//! physically live.  The disk backend takes its directory layout from an
//! injected [`sharding::PathSharder`].

pub mod backend;
pub mod local;
pub mod memory;
pub mod sharding;
