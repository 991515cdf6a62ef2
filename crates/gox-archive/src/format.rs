//! Archive format detection.

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    TarGz,
    TarXz,
    Zip,
}

impl Format {
    /// File extension for the format, including the leading dot.
    pub fn ext(self) -> &'static str {
        match self {
            Format::TarGz => ".tar.gz",
            Format::TarXz => ".tar.xz",
            Format::Zip => ".zip",
        }
    }

    /// Determine the archive format from a filename or URL.
    ///
    /// Case-insensitive suffix match. Unrecognized names (including names
    /// without an extension) default to tar.gz, so this never fails.
    pub fn detect(name: &str) -> Format {
        let lower = name.to_lowercase();
        if lower.ends_with(".zip") {
            Format::Zip
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Format::TarXz
        } else {
            Format::TarGz
        }
    }

    /// Archive format appropriate for a target OS, independent of the host.
    pub fn for_os(os: &str) -> Format {
        if os == "windows" {
            Format::Zip
        } else {
            Format::TarGz
        }
    }
}
