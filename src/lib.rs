//! Schema Modules
//!
//! Module resolution and image compilation for content-addressed schema
//! modules.
//!
//! ## Features
//!
//! - **Content Addressing**: Modules are pinned by name, commit, and a SHA256 digest of their files
//! - **Module Sets**: Target and dependency modules resolved into one deduplicated graph
//! - **Lock Files**: Versioned (v1beta1, v1, v2) YAML or JSON pins with atomic writes
//! - **Memoization**: Compute-once caches shared safely across threads
//! - **Image Compilation**: Topologically ordered, cycle-free, linked schema files
//!
//! ## Architecture
//!
//! ```text
//! ReadBucket ─► Module ─► ModuleSet ─┬─► LockFile (modules.lock)
//!                                    └─► ImageBuilder ─► Image
//! ```

pub mod bucket;
pub mod cache;
pub mod config;
pub mod digest;
pub mod error;
pub mod exec;
pub mod image;
pub mod lock_file;
pub mod module;
pub mod module_set;
pub mod name;

pub use bucket::{DirBucket, MemoryBucket, ReadBucket};
pub use cache::{MemoCache, OnceValue};
pub use config::EngineConfig;
pub use digest::{Digest, DigestType};
pub use error::{ModuleError, Result};
pub use exec::{CancellationToken, Executor};
pub use image::{BuildOptions, Image, ImageBuilder, ImageFile};
pub use lock_file::{FileVersion, LockFile, LockFormat};
pub use module::{Module, ModuleKey};
pub use module_set::ModuleSet;
pub use name::{ModuleFullName, ModuleRef};
