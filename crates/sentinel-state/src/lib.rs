//! sentinel-state — embedded history and policy store for Sentinel.
//!
//! Backed by [redb](https://docs.rs/redb). Reports, per-target detail
//! rows, repair actions and policies are JSON-serialized into redb's
//! `&[u8]` value columns. Detail rows are keyed by a length-prefixed
//! target name followed by report id and index, so trend queries are a
//! single prefix scan.
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod policy;
pub mod store;
pub mod tables;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use error::{StateError, StateResult};
pub use policy::{PolicyDefaults, PolicyStore};
pub use store::{CleanupStats, StateStore};
pub use types::*;
