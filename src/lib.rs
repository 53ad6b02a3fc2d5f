//! fat32-img: a user-space FAT32 driver for raw disk images

pub mod error;
pub mod fat32;

// Re-export main types
pub use error::{Fat32Error, Result};
pub use fat32::file::{FileHandle, WriteOutcome};
pub use fat32::volume::{Fat32Volume, FileStat};
pub use fat32::{FileAttributes, Geometry};
