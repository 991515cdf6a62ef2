//! Create → extract round-trips over both archive formats.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// Relative path → contents for every regular file under `root`.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(rel, fs::read(entry.path()).unwrap());
        }
    }
    files
}

fn build_source_tree(root: &Path) {
    fs::create_dir_all(root.join("include")).unwrap();
    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(root.join("include/foo.h"), b"#define FOO 1\n").unwrap();
    fs::write(root.join("lib/libfoo.a"), b"!<arch>\nfake").unwrap();
    fs::write(root.join("README"), b"a test package").unwrap();
}

#[test]
fn tar_gz_roundtrip_preserves_tree() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("libfoo");
    build_source_tree(&src);

    let archive = gox_archive::create(&src, "linux", "amd64").unwrap();
    assert!(archive.to_string_lossy().ends_with("libfoo-linux-amd64.tar.gz"));

    let dest = tmp.path().join("out");
    gox_archive::extract(&archive, &dest).unwrap();

    // Same relative file set and bytes, modulo the top-level name, which
    // the extractor strips.
    assert_eq!(snapshot(&src), snapshot(&dest));
}

#[test]
fn zip_roundtrip_preserves_tree() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("libfoo");
    build_source_tree(&src);

    let archive = gox_archive::create(&src, "windows", "amd64").unwrap();
    assert!(archive.to_string_lossy().ends_with("libfoo-windows-amd64.zip"));

    let dest = tmp.path().join("out");
    gox_archive::extract(&archive, &dest).unwrap();

    assert_eq!(snapshot(&src), snapshot(&dest));
}

#[test]
fn single_file_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("hello.txt");
    fs::write(&src, b"hello").unwrap();

    let archive = gox_archive::create(&src, "linux", "arm64").unwrap();
    let dest = tmp.path().join("out");
    gox_archive::extract(&archive, &dest).unwrap();

    assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"hello");
}

#[cfg(unix)]
#[test]
fn tar_gz_roundtrip_preserves_symlinks() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("libfoo");
    build_source_tree(&src);
    std::os::unix::fs::symlink("libfoo.a", src.join("lib/libfoo.so")).unwrap();

    let archive = gox_archive::create(&src, "linux", "amd64").unwrap();
    let dest = tmp.path().join("out");
    gox_archive::extract(&archive, &dest).unwrap();

    assert_eq!(
        fs::read_link(dest.join("lib/libfoo.so")).unwrap(),
        std::path::PathBuf::from("libfoo.a")
    );
}

#[cfg(unix)]
#[test]
fn tar_gz_roundtrip_preserves_executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("tools");
    fs::create_dir_all(src.join("bin")).unwrap();
    fs::write(src.join("bin/run.sh"), b"#!/bin/sh\n").unwrap();
    fs::set_permissions(src.join("bin/run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

    let archive = gox_archive::create(&src, "linux", "amd64").unwrap();
    let dest = tmp.path().join("out");
    gox_archive::extract(&archive, &dest).unwrap();

    let mode = fs::metadata(dest.join("bin/run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0o111);
}
