//! Dependency-package cache for gox builds.
//!
//! Parses package sources (direct URLs or GitHub release shorthand) into
//! cache-addressed [`Package`]s, then materializes them on disk once and
//! reuses them across parallel build targets. Archive handling lives in
//! the `gox-archive` crate.

pub mod cache;
pub mod error;
pub mod resolver;

pub use cache::{collect_paths, CacheEntry, PackageCache};
pub use error::{PackageError, Result};
pub use resolver::Package;
