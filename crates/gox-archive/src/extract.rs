//! Streaming, safe extraction of tar.gz, tar.xz and zip archives.
//!
//! Release archives typically wrap everything in a single top-level
//! directory; that shared prefix is stripped so contents land directly under
//! the destination. Stripping only happens when the whole archive agrees on
//! one leading segment. For zip the central directory makes that check
//! trivial; for tar the decision is made in a single streaming pass by
//! buffering a handful of small entries up front.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::{io_ctx, ArchiveError, Result};
use crate::format::Format;
use crate::path::{lexical_clean, safe_join};

/// Symlink chains are followed at most this many hops.
const MAX_SYMLINK_DEPTH: usize = 10;

/// While the prefix decision is pending, at most this many tar entries are
/// buffered in memory.
const MAX_BUFFERED_ENTRIES: usize = 5;

/// Entries larger than this are never buffered; seeing one forces the
/// prefix decision.
const MAX_BUFFERED_BYTES: u64 = 1024 * 1024;

/// Copy buffer for streaming entry bodies to disk.
const COPY_BUF_SIZE: usize = 256 * 1024;

/// Extracts an archive to the destination directory.
///
/// Supports .tar.gz, .tgz, .tar.xz, .txz and .zip. Any decode error, I/O
/// error or path-traversal violation aborts the whole extraction; files
/// already written stay on disk and are the caller's to clean up.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    match Format::detect(&archive_path.to_string_lossy()) {
        Format::Zip => extract_zip(archive_path, dest_dir),
        Format::TarXz => extract_tar(archive_path, dest_dir, Decompressor::Xz),
        Format::TarGz => extract_tar(archive_path, dest_dir, Decompressor::Gzip),
    }
}

/// Decompressor strategy feeding the tar reader.
enum Decompressor {
    Gzip,
    Xz,
}

impl Decompressor {
    fn wrap(&self, reader: BufReader<File>) -> Box<dyn Read> {
        match self {
            Decompressor::Gzip => Box::new(GzDecoder::new(reader)),
            Decompressor::Xz => Box::new(XzDecoder::new(reader)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tar
// ---------------------------------------------------------------------------

fn extract_tar(archive_path: &Path, dest_dir: &Path, decompress: Decompressor) -> Result<()> {
    let file = File::open(archive_path).map_err(io_ctx("open", archive_path))?;
    let mut archive = tar::Archive::new(decompress.wrap(BufReader::new(file)));

    let mut unpacker = TarUnpacker::new(archive_path, dest_dir);
    for entry in archive
        .entries()
        .map_err(|e| ArchiveError::decode(archive_path, e))?
    {
        let entry = entry.map_err(|e| ArchiveError::decode(archive_path, e))?;
        unpacker.process(entry)?;
    }
    unpacker.finish()
}

enum BufferedPayload {
    Dir,
    File { mode: u32, data: Vec<u8> },
    Symlink { target: String },
}

struct BufferedEntry {
    name: String,
    payload: BufferedPayload,
}

enum PrefixDecision {
    Pending,
    /// `Some(prefix)` strips `prefix` (with trailing slash) from every entry
    /// that carries it; `None` keeps full original paths.
    Confirmed(Option<String>),
}

/// Single-pass tar unpacker. Entries are buffered only while the
/// prefix-stripping decision is pending; afterwards everything streams
/// straight to disk.
struct TarUnpacker<'a> {
    writer: EntryWriter<'a>,
    decision: PrefixDecision,
    candidate: Option<String>,
    buffered: Vec<BufferedEntry>,
}

impl<'a> TarUnpacker<'a> {
    fn new(archive_path: &'a Path, dest_dir: &'a Path) -> Self {
        TarUnpacker {
            writer: EntryWriter::new(archive_path, dest_dir),
            decision: PrefixDecision::Pending,
            candidate: None,
            buffered: Vec::new(),
        }
    }

    fn process<R: Read>(&mut self, mut entry: tar::Entry<'_, R>) -> Result<()> {
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if name.is_empty() {
            return Ok(());
        }

        if let PrefixDecision::Confirmed(prefix) = &self.decision {
            let prefix = prefix.clone();
            return self.unpack_streaming(&name, prefix.as_deref(), &mut entry);
        }

        let top = leading_segment(&name).to_string();
        match &self.candidate {
            None => self.candidate = Some(top),
            Some(shared) if *shared != top => {
                // Mixed top-level segments: keep full original paths.
                self.confirm(false)?;
                return self.unpack_streaming(&name, None, &mut entry);
            }
            Some(_) => {}
        }

        let size = entry
            .header()
            .size()
            .map_err(|e| ArchiveError::decode(self.writer.archive, e))?;

        if size > MAX_BUFFERED_BYTES || self.buffered.len() == MAX_BUFFERED_ENTRIES {
            // Either too large to buffer or this is one entry past the
            // buffer cap: commit to the shared prefix and stream from here.
            self.confirm(true)?;
            let prefix = self.confirmed_prefix();
            return self.unpack_streaming(&name, prefix.as_deref(), &mut entry);
        }

        let entry_type = entry.header().entry_type();
        let payload = if entry_type.is_dir() {
            BufferedPayload::Dir
        } else if entry_type.is_symlink() {
            BufferedPayload::Symlink {
                target: link_target(&entry, self.writer.archive)?,
            }
        } else if entry_type.is_file() {
            let mode = entry
                .header()
                .mode()
                .map_err(|e| ArchiveError::decode(self.writer.archive, e))?;
            let mut data = Vec::with_capacity(size as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| ArchiveError::decode(self.writer.archive, e))?;
            BufferedPayload::File { mode, data }
        } else {
            return Ok(());
        };
        self.buffered.push(BufferedEntry { name, payload });
        Ok(())
    }

    /// Locks in the stripping decision and flushes everything buffered.
    fn confirm(&mut self, strip: bool) -> Result<()> {
        let prefix = if strip {
            self.candidate.as_ref().map(|seg| format!("{seg}/"))
        } else {
            None
        };
        self.decision = PrefixDecision::Confirmed(prefix.clone());

        for entry in std::mem::take(&mut self.buffered) {
            let Some(rel) = strip_name(&entry.name, prefix.as_deref()) else {
                continue;
            };
            let rel = rel.to_string();
            match entry.payload {
                BufferedPayload::Dir => self.writer.make_dir(&rel)?,
                BufferedPayload::File { mode, data } => {
                    self.writer.write_file_bytes(&rel, &data, Some(mode))?
                }
                BufferedPayload::Symlink { target } => self.writer.symlink(&rel, &target)?,
            }
        }
        Ok(())
    }

    fn confirmed_prefix(&self) -> Option<String> {
        match &self.decision {
            PrefixDecision::Confirmed(prefix) => prefix.clone(),
            PrefixDecision::Pending => None,
        }
    }

    fn unpack_streaming<R: Read>(
        &mut self,
        name: &str,
        prefix: Option<&str>,
        entry: &mut tar::Entry<'_, R>,
    ) -> Result<()> {
        let Some(rel) = strip_name(name, prefix) else {
            return Ok(());
        };
        let rel = rel.to_string();
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            self.writer.make_dir(&rel)
        } else if entry_type.is_symlink() {
            let target = link_target(entry, self.writer.archive)?;
            self.writer.symlink(&rel, &target)
        } else if entry_type.is_file() {
            let mode = entry
                .header()
                .mode()
                .map_err(|e| ArchiveError::decode(self.writer.archive, e))?;
            self.writer.write_file_streaming(&rel, entry, Some(mode))
        } else {
            Ok(())
        }
    }

    fn finish(mut self) -> Result<()> {
        if matches!(self.decision, PrefixDecision::Pending) {
            // The whole archive fit in the buffer and shared one top-level
            // segment, so it is safe to strip.
            self.confirm(true)?;
        }
        self.writer.finish()
    }
}

fn link_target<R: Read>(entry: &tar::Entry<'_, R>, archive: &Path) -> Result<String> {
    let target = entry
        .link_name()
        .map_err(|e| ArchiveError::decode(archive, e))?;
    Ok(target
        .map(|t| t.to_string_lossy().into_owned())
        .unwrap_or_default())
}

fn leading_segment(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Applies the stripping decision to an entry name. Returns `None` for
/// names that vanish entirely (e.g. the top-level directory itself).
fn strip_name<'a>(name: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    let stripped = match prefix {
        Some(prefix) => name.strip_prefix(prefix).unwrap_or(name),
        None => name,
    };
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

// ---------------------------------------------------------------------------
// Zip
// ---------------------------------------------------------------------------

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(io_ctx("open", archive_path))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| ArchiveError::decode(archive_path, e))?;

    let strip = zip_strip_prefix(&archive);
    let mut writer = EntryWriter::new(archive_path, dest_dir);

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::decode(archive_path, e))?;
        let name = entry.name().to_string();
        let Some(rel) = strip_name(&name, strip.as_deref()) else {
            continue;
        };
        let rel = rel.to_string();
        if entry.is_dir() {
            writer.make_dir(&rel)?;
        } else {
            let mode = entry.unix_mode();
            writer.write_file_streaming(&rel, &mut entry, mode)?;
        }
    }
    writer.finish()
}

/// Shared leading segment of a zip archive, verified against every entry.
/// Returns `None` when entries disagree, so contents keep their full paths.
fn zip_strip_prefix<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Option<String> {
    let first = archive.name_for_index(0)?;
    let slash = first.find('/')?;
    let prefix = first[..=slash].to_string();
    for i in 0..archive.len() {
        if !archive.name_for_index(i)?.starts_with(&prefix) {
            return None;
        }
    }
    Some(prefix)
}

// ---------------------------------------------------------------------------
// Entry writer
// ---------------------------------------------------------------------------

/// A symlink whose native creation failed; resolved by copying the chain's
/// terminal file after the main pass.
struct PendingSymlink {
    linkname: String,
    path: PathBuf,
}

/// Writes validated entries under the destination root. Parent directories
/// already created are remembered so runs of files in one directory avoid
/// redundant mkdir calls.
struct EntryWriter<'a> {
    archive: &'a Path,
    dest: &'a Path,
    created_dirs: HashSet<PathBuf>,
    copy_buf: Vec<u8>,
    pending_symlinks: Vec<PendingSymlink>,
}

impl<'a> EntryWriter<'a> {
    fn new(archive: &'a Path, dest: &'a Path) -> Self {
        EntryWriter {
            archive,
            dest,
            created_dirs: HashSet::new(),
            copy_buf: vec![0u8; COPY_BUF_SIZE],
            pending_symlinks: Vec::new(),
        }
    }

    fn make_dir(&mut self, rel: &str) -> Result<()> {
        let path = safe_join(self.dest, rel)?;
        fs::create_dir_all(&path).map_err(io_ctx("mkdir", &path))?;
        self.created_dirs.insert(path);
        Ok(())
    }

    fn ensure_parent(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !self.created_dirs.contains(parent) {
                fs::create_dir_all(parent).map_err(io_ctx("mkdir", parent))?;
                self.created_dirs.insert(parent.to_path_buf());
            }
        }
        Ok(())
    }

    fn write_file_streaming(
        &mut self,
        rel: &str,
        reader: &mut dyn Read,
        mode: Option<u32>,
    ) -> Result<()> {
        let path = safe_join(self.dest, rel)?;
        self.ensure_parent(&path)?;

        let mut file = File::create(&path).map_err(io_ctx("create", &path))?;
        loop {
            let n = reader
                .read(&mut self.copy_buf)
                .map_err(|e| ArchiveError::decode(self.archive, e))?;
            if n == 0 {
                break;
            }
            file.write_all(&self.copy_buf[..n])
                .map_err(io_ctx("write", &path))?;
        }
        drop(file);
        set_mode(&path, mode)
    }

    fn write_file_bytes(&mut self, rel: &str, data: &[u8], mode: Option<u32>) -> Result<()> {
        let path = safe_join(self.dest, rel)?;
        self.ensure_parent(&path)?;
        fs::write(&path, data).map_err(io_ctx("write", &path))?;
        set_mode(&path, mode)
    }

    fn symlink(&mut self, rel: &str, target: &str) -> Result<()> {
        let path = safe_join(self.dest, rel)?;
        self.ensure_parent(&path)?;
        if create_symlink(target, &path).is_err() {
            // Host without symlink support: resolve by copy after the main
            // pass, once the chain's terminal file exists on disk.
            log::debug!(
                "deferring symlink {} -> {}",
                path.display(),
                target
            );
            self.pending_symlinks.push(PendingSymlink {
                linkname: target.to_string(),
                path,
            });
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        resolve_pending_symlinks(self.pending_symlinks)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .map_err(io_ctx("chmod", path))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, path: &Path) -> std::io::Result<()> {
    let _ = fs::remove_file(path);
    std::os::unix::fs::symlink(target, path)
}

#[cfg(windows)]
fn create_symlink(target: &str, path: &Path) -> std::io::Result<()> {
    let _ = fs::remove_file(path);
    std::os::windows::fs::symlink_file(target, path)
}

/// Materializes deferred symlinks by copying the file at the end of each
/// chain. A terminal file absent from disk is assumed to live outside this
/// archive's payload and is skipped.
fn resolve_pending_symlinks(pending: Vec<PendingSymlink>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let links: HashMap<PathBuf, String> = pending
        .iter()
        .map(|p| (p.path.clone(), p.linkname.clone()))
        .collect();

    for link in &pending {
        let target = resolve_symlink_chain(&link.path, &link.linkname, &links);
        if !target.exists() {
            log::debug!(
                "symlink target {} not present, skipping {}",
                target.display(),
                link.path.display()
            );
            continue;
        }
        fs::copy(&target, &link.path).map_err(io_ctx("copy", &link.path))?;
    }
    Ok(())
}

/// Iterative hop-bounded walk: keep substituting mapped link targets until a
/// path with no mapping remains, which is treated as the real file.
fn resolve_symlink_chain(
    base: &Path,
    linkname: &str,
    links: &HashMap<PathBuf, String>,
) -> PathBuf {
    let dir = base.parent().unwrap_or(Path::new(""));
    let mut target = lexical_clean(&dir.join(linkname));
    for _ in 0..MAX_SYMLINK_DEPTH {
        match links.get(&target) {
            Some(next) => {
                let dir = target
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                target = lexical_clean(&dir.join(next));
            }
            None => return target,
        }
    }
    target
}
