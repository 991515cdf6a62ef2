//! Archive creation for distributable build outputs.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::error::{io_ctx, ArchiveError, Result};
use crate::format::Format;

/// Creates an archive from `src` (file or directory) for the given target
/// OS/arch and returns its path.
///
/// The archive is written alongside `src` as
/// `<basename(src)>-<os>-<arch><ext>`, zip for windows targets and tar.gz
/// for everything else. A directory is archived with paths relative to its
/// parent, so the top-level directory name survives inside the archive —
/// symmetric with the extractor's prefix stripping.
pub fn create(src: &Path, target_os: &str, target_arch: &str) -> Result<PathBuf> {
    let meta = fs::metadata(src).map_err(io_ctx("stat", src))?;
    let format = Format::for_os(target_os);

    let base = src
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dest = src.parent().unwrap_or_else(|| Path::new(".")).join(format!(
        "{}-{}-{}{}",
        base,
        target_os,
        target_arch,
        format.ext()
    ));

    match format {
        Format::Zip => create_zip(src, &dest, meta.is_dir())?,
        _ => create_tar_gz(src, &dest, meta.is_dir())?,
    }
    Ok(dest)
}

fn create_tar_gz(src: &Path, dest: &Path, is_dir: bool) -> Result<()> {
    let file = File::create(dest).map_err(io_ctx("create", dest))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    if is_dir {
        let base_dir = src.parent().unwrap_or_else(|| Path::new(""));
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(|e| ArchiveError::io("walk", src, e.into()))?;
            let rel = relative_to(entry.path(), base_dir)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                builder
                    .append_dir(&rel, entry.path())
                    .map_err(io_ctx("tar dir", entry.path()))?;
            } else if file_type.is_symlink() {
                // Stored with the literal, unresolved target text.
                let target = fs::read_link(entry.path()).map_err(io_ctx("readlink", entry.path()))?;
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder
                    .append_link(&mut header, &rel, &target)
                    .map_err(io_ctx("tar symlink", entry.path()))?;
            } else {
                let mut reader = File::open(entry.path()).map_err(io_ctx("open", entry.path()))?;
                builder
                    .append_file(&rel, &mut reader)
                    .map_err(io_ctx("tar file", entry.path()))?;
            }
        }
    } else {
        let name = src.file_name().unwrap_or_default();
        let mut reader = File::open(src).map_err(io_ctx("open", src))?;
        builder
            .append_file(Path::new(name), &mut reader)
            .map_err(io_ctx("tar file", src))?;
    }

    let encoder = builder.into_inner().map_err(io_ctx("finish tar", dest))?;
    encoder.finish().map_err(io_ctx("finish gzip", dest))?;
    Ok(())
}

fn create_zip(src: &Path, dest: &Path, is_dir: bool) -> Result<()> {
    let file = File::create(dest).map_err(io_ctx("create", dest))?;
    let mut writer = zip::ZipWriter::new(file);

    if is_dir {
        let base_dir = src.parent().unwrap_or_else(|| Path::new(""));
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(|e| ArchiveError::io("walk", src, e.into()))?;
            let rel = relative_to(entry.path(), base_dir)?;
            let file_type = entry.file_type();
            let options = zip_options(&entry)?;

            if file_type.is_dir() {
                writer
                    .add_directory(rel, options)
                    .map_err(|e| zip_write_err(dest, e))?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path()).map_err(io_ctx("readlink", entry.path()))?;
                writer
                    .add_symlink(rel, target.to_string_lossy(), options)
                    .map_err(|e| zip_write_err(dest, e))?;
            } else {
                writer
                    .start_file(rel, options)
                    .map_err(|e| zip_write_err(dest, e))?;
                let mut reader =
                    BufReader::new(File::open(entry.path()).map_err(io_ctx("open", entry.path()))?);
                io::copy(&mut reader, &mut writer).map_err(io_ctx("zip file", entry.path()))?;
            }
        }
    } else {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer
            .start_file(
                name,
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated),
            )
            .map_err(|e| zip_write_err(dest, e))?;
        let mut reader = BufReader::new(File::open(src).map_err(io_ctx("open", src))?);
        io::copy(&mut reader, &mut writer).map_err(io_ctx("zip file", src))?;
    }

    writer.finish().map_err(|e| zip_write_err(dest, e))?;
    Ok(())
}

/// Entry path relative to the archive base, with forward slashes.
fn relative_to(path: &Path, base: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|e| ArchiveError::io("relativize", path, io::Error::other(e)))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn zip_options(entry: &walkdir::DirEntry) -> Result<SimpleFileOptions> {
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = entry
            .metadata()
            .map_err(|e| ArchiveError::io("stat", entry.path(), e.into()))?;
        Ok(options.unix_permissions(meta.permissions().mode()))
    }
    #[cfg(not(unix))]
    {
        Ok(options)
    }
}

fn zip_write_err(dest: &Path, err: zip::result::ZipError) -> ArchiveError {
    ArchiveError::io("zip", dest, io::Error::other(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_names_archive_after_target() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("mylib");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();

        let archive = create(&src, "linux", "amd64").unwrap();
        assert_eq!(
            archive.file_name().unwrap().to_string_lossy(),
            "mylib-linux-amd64.tar.gz"
        );
        assert_eq!(archive.parent().unwrap(), tmp.path());
        assert!(archive.is_file());
    }

    #[test]
    fn test_create_zip_for_windows() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("mylib");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();

        let archive = create(&src, "windows", "arm64").unwrap();
        assert_eq!(
            archive.file_name().unwrap().to_string_lossy(),
            "mylib-windows-arm64.zip"
        );
    }

    #[test]
    fn test_create_single_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("gox.exe");
        fs::write(&src, b"binary").unwrap();

        let archive = create(&src, "windows", "amd64").unwrap();
        assert_eq!(
            archive.file_name().unwrap().to_string_lossy(),
            "gox.exe-windows-amd64.zip"
        );

        // The archive holds exactly the file, under its base name.
        let file = File::open(&archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len(), 1);
        assert_eq!(zip.by_index(0).unwrap().name(), "gox.exe");
    }

    #[test]
    fn test_create_missing_source_fails() {
        let tmp = TempDir::new().unwrap();
        let err = create(&tmp.path().join("absent"), "linux", "amd64").unwrap_err();
        assert!(matches!(err, ArchiveError::Io { op: "stat", .. }));
    }
}
