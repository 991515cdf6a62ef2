//! Archive engine for gox: format detection, safe streaming extraction,
//! archive creation and HTTP download of dependency archives.

pub mod create;
pub mod download;
pub mod error;
pub mod extract;
pub mod format;
mod path;

pub use create::create;
pub use download::Downloader;
pub use error::{ArchiveError, Result};
pub use extract::extract;
pub use format::Format;
