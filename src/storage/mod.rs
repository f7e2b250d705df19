//! Date-partitioned persistence of filed articles.
//!
//! - [`layout`]: pure path computation (`{year}/{Month}/Week-{N}/{date}/{bucket}`)
//! - [`store`]: S3-compatible, filesystem and in-memory object stores
//! - [`writer`]: image + summary writes with per-object retries, daily manifest

pub mod layout;
pub mod store;
pub mod writer;

#[cfg(test)]
pub use store::MemoryStore;
pub use store::{FsStore, ObjectStore, S3Settings, S3Store};
pub use writer::{ManifestEntry, StorageWriter};
