//! Error types for the fat32-img library

use std::io;

use thiserror::Error;

/// Result type for fat32-img operations
pub type Result<T> = std::result::Result<T, Fat32Error>;

/// Main error type for fat32-img operations
#[derive(Debug, Error)]
pub enum Fat32Error {
    /// I/O error from the backing image file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk record shorter than its fixed layout
    #[error("truncated {record} record: got {len} bytes, need {need}")]
    TruncatedRecord {
        record: &'static str,
        len: usize,
        need: usize,
    },

    /// Boot sector parameters outside the ranges a FAT32 volume can have
    #[error("invalid FAT32 volume: {message}")]
    InvalidVolume { message: String },

    /// Path or name resolution failure
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Name collision on create
    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    /// A path segment or operation target is not a directory
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// Operation target is a directory where a file is required
    #[error("not a file: {path}")]
    NotAFile { path: String },

    /// Directory removal blocked by entries beyond `.` and `..`
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// No free cluster available
    #[error("volume full")]
    VolumeFull,

    /// Seek or read-length outside `[0, fileSize]`
    #[error("offset out of range: {offset} (file size {size})")]
    OutOfRange { offset: i64, size: u32 },

    /// Cluster-chain walk left the table bounds or failed to terminate
    #[error("corrupt cluster chain at cluster {cluster}")]
    CorruptChain { cluster: u32 },
}

// Convenience constructors
impl Fat32Error {
    pub fn invalid_volume(message: impl Into<String>) -> Self {
        Self::InvalidVolume {
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile { path: path.into() }
    }

    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty { path: path.into() }
    }
}
