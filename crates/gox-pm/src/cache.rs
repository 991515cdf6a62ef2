//! On-disk, content-addressed package cache.
//!
//! Layout: `<user-cache-dir>/gox/pkg/<cache-key>/{include,lib,bin}/`. A
//! cache key maps to at most one directory, and directory existence alone
//! marks a hit; contents are never re-validated. Downloads are staged into
//! a sibling temporary directory and renamed into place only after the
//! payload checks out, so a failed fetch never occupies a cache slot.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gox_archive::Downloader;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::error::{PackageError, Result};
use crate::resolver::Package;

/// Read-only snapshot of one cached package, for administrative listing.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub include_count: usize,
    pub lib_count: usize,
}

/// Content-addressed store of dependency packages.
#[derive(Clone)]
pub struct PackageCache {
    root: PathBuf,
    downloader: Downloader,
    // Per-key single-flight guard for the check-then-populate sequence.
    // In-process only; cross-process locking is out of scope.
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PackageCache {
    /// Cache rooted at the user cache directory (temp-dir fallback).
    pub fn new() -> Result<Self> {
        Self::with_root(default_cache_root())
    }

    pub fn with_root(root: PathBuf) -> Result<Self> {
        Ok(PackageCache {
            root,
            downloader: Downloader::new()?,
            locks: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parses a source string into a package rooted at this cache.
    pub fn resolve(&self, source: &str) -> Result<Package> {
        Package::parse(source, &self.root)
    }

    /// Idempotent: an existing cache directory is trusted as-is, otherwise
    /// the archive is downloaded and extracted. On success the directory
    /// contains `include/` and/or `lib/`.
    pub async fn ensure(&self, pkg: &Package) -> Result<()> {
        let lock = self.key_lock(&pkg.cache_key);
        let _guard = lock.lock().await;

        if pkg.is_cached() {
            log::debug!("{} already cached at {}", pkg.source, pkg.dir.display());
            return Ok(());
        }
        self.fetch(pkg).await.map_err(|e| PackageError::Fetch {
            package: pkg.source.clone(),
            source: Box::new(e),
        })
    }

    async fn fetch(&self, pkg: &Package) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-", pkg.cache_key))
            .tempdir_in(&self.root)?;

        self.downloader.download(&pkg.url, staging.path()).await?;

        if !staging.path().join("include").is_dir() && !staging.path().join("lib").is_dir() {
            return Err(PackageError::MissingPayload {
                package: pkg.source.clone(),
            });
        }
        fs::rename(staging.path(), &pkg.dir)?;
        log::debug!("cached {} at {}", pkg.source, pkg.dir.display());
        Ok(())
    }

    /// Parses every source up front, failing fast before any network I/O,
    /// then fetches the missing packages concurrently — one task per
    /// package, unbounded. Returns the first error observed.
    pub async fn ensure_all(&self, sources: &[String]) -> Result<Vec<Package>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let mut pkgs = Vec::with_capacity(sources.len());
        for source in sources {
            pkgs.push(self.resolve(source)?);
        }

        let mut seen = HashSet::new();
        let to_download: Vec<Package> = pkgs
            .iter()
            .filter(|p| !p.is_cached() && seen.insert(p.cache_key.clone()))
            .cloned()
            .collect();
        if to_download.is_empty() {
            return Ok(pkgs);
        }

        log::info!("downloading {} package(s)", to_download.len());
        let mut tasks = JoinSet::new();
        for pkg in to_download {
            let cache = self.clone();
            tasks.spawn(async move { cache.ensure(&pkg).await });
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(PackageError::Io(io::Error::other(e))));
            if let Err(e) = result {
                log::debug!("package fetch failed: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(pkgs),
        }
    }

    /// Shallow scan of the cache root's immediate subdirectories.
    pub fn list(&self) -> Result<Vec<CacheEntry>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-flight staging directories are not cache entries.
            if !entry.file_type()?.is_dir() || name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            result.push(CacheEntry {
                name,
                size: dir_size(&path),
                include_count: count_files(&path.join("include")),
                lib_count: count_files(&path.join("lib")),
                path,
            });
        }
        Ok(result)
    }

    /// Removes one cached package by cache-key name. Missing entries are
    /// not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        remove_tree(&self.root.join(name))
    }

    /// Removes the whole cache.
    pub fn remove_all(&self) -> Result<()> {
        remove_tree(&self.root)
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("cache lock poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }
}

/// Collects existing include, lib and bin directories from resolved
/// packages, probing common per-arch lib subdirectories.
pub fn collect_paths(pkgs: &[Package]) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
    let mut include = Vec::new();
    let mut lib = Vec::new();
    let mut bin = Vec::new();
    for pkg in pkgs {
        if pkg.include.is_dir() {
            include.push(pkg.include.clone());
        }
        if pkg.lib.is_dir() {
            lib.push(resolve_lib_dir(&pkg.lib));
        }
        if pkg.bin.is_dir() {
            bin.push(pkg.bin.clone());
        }
    }
    (include, lib, bin)
}

const LIB_ARCH_SUBDIRS: [&str; 5] = ["x64", "x86_64", "amd64", "Win32", "x86"];

fn resolve_lib_dir(lib: &Path) -> PathBuf {
    for arch in LIB_ARCH_SUBDIRS {
        let sub = lib.join(arch);
        if sub.is_dir() {
            return sub;
        }
    }
    lib.to_path_buf()
}

fn default_cache_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("gox").join("pkg"))
        .unwrap_or_else(|| std::env::temp_dir().join("gox").join("pkg"))
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn count_files(path: &Path) -> usize {
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(tmp: &TempDir) -> PackageCache {
        PackageCache::with_root(tmp.path().join("pkg")).unwrap()
    }

    fn populate(dir: &Path, include: &[&str], lib: &[&str]) {
        fs::create_dir_all(dir.join("include")).unwrap();
        fs::create_dir_all(dir.join("lib")).unwrap();
        for name in include {
            fs::write(dir.join("include").join(name), b"header").unwrap();
        }
        for name in lib {
            fs::write(dir.join("lib").join(name), b"library").unwrap();
        }
    }

    #[tokio::test]
    async fn test_ensure_cache_hit_skips_network() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);

        // Unreachable URL: success proves the hit short-circuits before
        // any network I/O.
        let pkg = cache.resolve("http://127.0.0.1:1/libfoo.tar.gz").unwrap();
        populate(&pkg.dir, &["foo.h"], &["libfoo.a"]);

        cache.ensure(&pkg).await.unwrap();
        cache.ensure(&pkg).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_all_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        assert!(cache.ensure_all(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_all_fails_fast_on_parse_error() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let sources = vec!["not a package source".to_string()];
        let err = cache.ensure_all(&sources).await.unwrap_err();
        assert!(matches!(err, PackageError::InvalidSource(_)));
    }

    #[tokio::test]
    async fn test_ensure_all_returns_cached_packages() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);

        let sources = vec!["http://127.0.0.1:1/liba.tar.gz".to_string()];
        let pkg = cache.resolve(&sources[0]).unwrap();
        populate(&pkg.dir, &["a.h"], &[]);

        let pkgs = cache.ensure_all(&sources).await.unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].cache_key, pkg.cache_key);
    }

    #[tokio::test]
    async fn test_ensure_fetch_failure_leaves_no_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);

        let pkg = cache.resolve("http://127.0.0.1:1/libfoo.tar.gz").unwrap();
        let err = cache.ensure(&pkg).await.unwrap_err();
        assert!(matches!(err, PackageError::Fetch { .. }));
        assert!(!pkg.dir.exists());
        // The failed attempt must not poison the hit check.
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_and_remove() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);

        populate(&cache.root().join("acme-widgets-v1-x"), &["a.h", "b.h"], &["lib.a"]);
        populate(&cache.root().join("acme-gadgets-v2-y"), &[], &["g.a"]);

        let mut entries = cache.list().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "acme-widgets-v1-x");
        assert_eq!(entries[1].include_count, 2);
        assert_eq!(entries[1].lib_count, 1);
        assert!(entries[1].size > 0);

        cache.remove("acme-widgets-v1-x").unwrap();
        assert_eq!(cache.list().unwrap().len(), 1);

        // Removing a missing entry is fine.
        cache.remove("acme-widgets-v1-x").unwrap();

        cache.remove_all().unwrap();
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_collect_paths_probes_arch_subdir() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);

        let pkg = cache.resolve("http://127.0.0.1:1/libfoo.tar.gz").unwrap();
        fs::create_dir_all(pkg.lib.join("x64")).unwrap();
        fs::create_dir_all(&pkg.include).unwrap();

        let (include, lib, bin) = collect_paths(std::slice::from_ref(&pkg));
        assert_eq!(include, vec![pkg.include.clone()]);
        assert_eq!(lib, vec![pkg.lib.join("x64")]);
        assert!(bin.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_ensure_all_downloads_real_package() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let sources = vec!["madler/zlib@v1.3.1/zlib131.zip".to_string()];
        // Exercises the full download/extract/validate path; the asset
        // layout decides whether this yields Ok or MissingPayload, either
        // of which proves the pipeline ran.
        let _ = cache.ensure_all(&sources).await;
    }
}
