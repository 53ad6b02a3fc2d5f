pub mod codec;
pub mod dir;
pub mod file;
pub mod name;
pub mod table;
pub mod volume;

use bitflags::bitflags;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const LFN_ATTRIBUTE: u8 = 0x0F;

/// Name byte 0: no further valid entries in this directory
pub(crate) const ENTRY_END: u8 = 0x00;
/// Name byte 0: deleted entry, slot reusable
pub(crate) const ENTRY_DELETED: u8 = 0xE5;

/// First 28-bit value of the end-of-chain range
pub const FAT32_EOC: u32 = 0x0FFFFFF8;
/// Free cluster marker
pub const FAT32_FREE: u32 = 0x00000000;
/// Mask selecting the 28 significant bits of a FAT32 entry
pub const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;

bitflags! {
    /// FAT directory-entry attribute bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY    = 0x01;
        const HIDDEN       = 0x02;
        const SYSTEM       = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY    = 0x10;
        const ARCHIVE      = 0x20;
        /// All four low bits set marks a long-name entry
        const LONG_NAME    = 0x0F;
    }
}

/// Volume geometry, derived once at mount and immutable afterwards
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub fsinfo_sector: u16,
    pub image_len: u64,
    pub cluster_size: u32,
    pub first_data_sector: u32,
    pub total_clusters: u32,
}

impl Geometry {
    /// Sector address of a data cluster
    pub fn cluster_to_lba(&self, cluster: u32) -> u64 {
        self.first_data_sector as u64
            + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    /// Byte offset of a data cluster in the backing image
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.cluster_to_lba(cluster) * self.bytes_per_sector as u64
    }
}
