//! cv-storage: where encrypted chunks live
//!
//! Every backend implements [`ChunkStore`], a per-object put/get/delete
//! contract keyed by an opaque identifier. Stores never see keys, names, or
//! plaintext: only ciphertext plus optional expiry/permission hints.

pub mod error;
pub mod fs;
pub mod health;
pub mod http;
pub mod opendal_store;
pub mod operator;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use fs::FsStore;
pub use health::check_health;
pub use http::HttpJobStore;
pub use opendal_store::OpendalStore;
pub use operator::{build_memory_operator, build_operator, check_transport, S3Config};
pub use store::{ChunkStore, ObjectMeta};
