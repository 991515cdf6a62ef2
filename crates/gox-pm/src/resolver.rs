//! Package source parsing: direct URLs and GitHub release shorthand.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{PackageError, Result};

lazy_static! {
    /// `owner/repo@version/asset` — the version must not contain `/`.
    static ref GH_RELEASE_RE: Regex = Regex::new(r"^([^/]+)/([^@]+)@([^/]+)/(.+)$").unwrap();
}

const ARCHIVE_EXTS: [&str; 5] = [".tar.gz", ".tgz", ".tar.xz", ".txz", ".zip"];

/// A dependency archive resolved to a cache location with include/lib/bin
/// directories. Paths are derived from the cache key before any I/O; the
/// directories only exist once [`PackageCache::ensure`](crate::PackageCache::ensure)
/// has run.
#[derive(Debug, Clone)]
pub struct Package {
    pub source: String,
    pub url: String,
    pub cache_key: String,
    pub dir: PathBuf,
    pub include: PathBuf,
    pub lib: PathBuf,
    pub bin: PathBuf,
}

impl Package {
    /// Parses a package source and derives its cache paths under
    /// `cache_root`. Performs no I/O.
    pub fn parse(source: &str, cache_root: &Path) -> Result<Package> {
        let (url, cache_key) = resolve_source(source)?;
        let dir = cache_root.join(&cache_key);
        Ok(Package {
            source: source.to_string(),
            url,
            include: dir.join("include"),
            lib: dir.join("lib"),
            bin: dir.join("bin"),
            cache_key,
            dir,
        })
    }

    /// True if the package's cache directory is already materialized.
    /// Directory existence is the sole cache-hit signal.
    pub fn is_cached(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Resolves a source string to `(download URL, cache key)`.
pub(crate) fn resolve_source(source: &str) -> Result<(String, String)> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok((source.to_string(), url_cache_key(source)));
    }
    if let Some(caps) = GH_RELEASE_RE.captures(source) {
        let (owner, repo, version, asset) = (&caps[1], &caps[2], &caps[3], &caps[4]);
        let url = format!(
            "https://github.com/{owner}/{repo}/releases/download/{version}/{asset}"
        );
        let key = format!("{owner}-{repo}-{version}-{}", trim_archive_ext(asset));
        return Ok((url, key));
    }
    Err(PackageError::InvalidSource(source.to_string()))
}

/// Stable short hash of the full URL, suffixed with the archive's base
/// filename (extension stripped) for readability.
fn url_cache_key(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    let mut name = url.rsplit('/').next().unwrap_or(url);
    if let Some(idx) = name.rfind('?') {
        if idx > 0 {
            name = &name[..idx];
        }
    }
    format!("url-{}-{}", &digest[..16], trim_archive_ext(name))
}

fn trim_archive_ext(name: &str) -> &str {
    for ext in ARCHIVE_EXTS {
        if let Some(stripped) = name.strip_suffix(ext) {
            return stripped;
        }
    }
    name
}
