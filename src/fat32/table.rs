//! Allocation table management
//!
//! Owns the in-memory mirror of the primary FAT copy plus the FSInfo
//! free-space hints, and is the only writer of both. Hints are advisory:
//! they are revalidated against the table before every use and dropped to
//! "unknown" whenever the on-disk FSInfo block is missing or corrupt.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use crate::error::{Fat32Error, Result};
use crate::fat32::codec::{FSINFO_NO_HINT, FsInfoSector};
use crate::fat32::{FAT32_ENTRY_MASK, FAT32_EOC, FAT32_FREE, Geometry};

/// FAT table manager
pub struct FatTable {
    /// Raw little-endian mirror of the primary FAT copy
    data: Vec<u8>,
    /// Byte offset of the primary FAT copy in the image
    offset: u64,
    /// Byte offset of the FSInfo sector in the image
    fsinfo_offset: u64,
    /// Decoded FSInfo sector, kept for write-back of the reserved regions
    fsinfo: FsInfoSector,
    /// Advisory free-cluster count, `None` when unknown
    free_count: Option<u32>,
    /// Advisory next-free search hint, `None` when unknown
    next_free: Option<u32>,
    root_cluster: u32,
}

impl FatTable {
    /// Load the primary FAT copy and the FSInfo sector from the image.
    pub fn load<F: Read + Seek>(file: &mut F, geo: &Geometry) -> Result<Self> {
        let bps = geo.bytes_per_sector as u64;
        let offset = geo.reserved_sectors as u64 * bps;
        let fat_bytes = geo.sectors_per_fat as u64 * bps;

        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; fat_bytes as usize];
        file.read_exact(&mut data)?;

        let fsinfo_offset = geo.fsinfo_sector as u64 * bps;
        let fsinfo = if geo.fsinfo_sector > 0
            && fsinfo_offset + FsInfoSector::SIZE as u64 <= geo.image_len
        {
            file.seek(SeekFrom::Start(fsinfo_offset))?;
            let mut sector = [0u8; FsInfoSector::SIZE];
            file.read_exact(&mut sector)?;
            FsInfoSector::decode(&sector)?
        } else {
            // no usable FSInfo sector; the invalid signature keeps the
            // hints unknown so persist() never writes it back
            let mut missing = FsInfoSector::fresh();
            missing.lead_signature = 0;
            missing
        };

        let total_clusters = (data.len() / 4) as u32;
        let (free_count, next_free) = if fsinfo.signatures_valid() {
            let count = if fsinfo.free_cluster_count == FSINFO_NO_HINT {
                total_clusters
            } else {
                fsinfo.free_cluster_count
            };
            let next = if fsinfo.next_free_cluster == FSINFO_NO_HINT {
                geo.root_cluster
            } else {
                fsinfo.next_free_cluster
            };
            (Some(count), Some(next))
        } else {
            warn!("FSInfo signatures invalid or missing, free-space hints disabled");
            (None, None)
        };

        Ok(Self {
            data,
            offset,
            fsinfo_offset,
            fsinfo,
            free_count,
            next_free,
            root_cluster: geo.root_cluster,
        })
    }

    /// Number of entries the table holds
    pub fn total_clusters(&self) -> u32 {
        (self.data.len() / 4) as u32
    }

    /// Advisory free-cluster count, `None` when unknown
    pub fn free_count(&self) -> Option<u32> {
        self.free_count
    }

    /// Masked 28-bit entry for a cluster; out-of-bounds reads as end-of-chain
    pub fn next_cluster(&self, cluster: u32) -> u32 {
        let offset = cluster as usize * 4;
        if offset + 4 > self.data.len() {
            return FAT32_EOC;
        }
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap()) & FAT32_ENTRY_MASK
    }

    fn set_entry(&mut self, cluster: u32, value: u32) {
        let offset = cluster as usize * 4;
        if offset + 4 > self.data.len() {
            return;
        }
        self.data[offset..offset + 4].copy_from_slice(&(value & FAT32_ENTRY_MASK).to_le_bytes());
    }

    /// Find the next free cluster, preferring the FSInfo hint when it is
    /// known and plausible. Falls back to a linear scan from the root
    /// cluster; `None` means the volume is full.
    pub fn next_free_cluster(&self) -> Option<u32> {
        let total = self.total_clusters();

        if let Some(hint) = self.next_free {
            if hint >= self.root_cluster && hint < total {
                for cluster in hint..total {
                    if self.next_cluster(cluster) == FAT32_FREE {
                        return Some(cluster);
                    }
                }
            }
        }

        for cluster in self.root_cluster..total {
            if self.next_cluster(cluster) == FAT32_FREE {
                return Some(cluster);
            }
        }

        None
    }

    /// Allocate one cluster and link it after `tail`. The new cluster is
    /// marked end-of-chain. `None` means the volume is full.
    pub fn append_cluster(&mut self, tail: u32) -> Option<u32> {
        let new = self.next_free_cluster()?;

        self.set_entry(tail, new);
        self.set_entry(new, FAT32_EOC);

        if let Some(count) = self.free_count {
            self.free_count = Some(count.saturating_sub(1));
        }
        if self.next_free.is_some() {
            self.next_free = Some(new + 1);
        }

        debug!("appended cluster {} after {}", new, tail);
        Some(new)
    }

    /// Allocate a single end-of-chain cluster with no predecessor, the
    /// first cluster of a new entry. `None` means the volume is full.
    pub fn allocate_first(&mut self) -> Option<u32> {
        let new = self.next_free_cluster()?;

        self.set_entry(new, FAT32_EOC);

        if let Some(count) = self.free_count {
            self.free_count = Some(count.saturating_sub(1));
        }
        if self.next_free.is_some() {
            self.next_free = Some(new + 1);
        }

        Some(new)
    }

    /// Release the chain starting at `start`, zeroing every visited entry.
    /// Stops defensively at an end-of-chain marker or an out-of-range
    /// cluster number. Returns the number of clusters released.
    pub fn free_chain(&mut self, start: u32) -> u32 {
        let total = self.total_clusters();
        let mut count = 0u32;
        let mut current = start;

        while current < FAT32_EOC {
            if current < 2 || current >= total {
                break;
            }
            let next = self.next_cluster(current);
            self.set_entry(current, FAT32_FREE);
            current = next;
            count += 1;
        }

        if let Some(free) = self.free_count {
            self.free_count = Some(free + count);
        }
        if self.next_free.is_some() {
            // Favor immediate reuse of the freed chain
            self.next_free = Some(start);
        }

        debug!("released {} clusters from chain at {}", count, start);
        count
    }

    /// Re-mark a just-released first cluster as a single end-of-chain
    /// cluster, the truncation-on-overwrite step: the entry keeps its
    /// first cluster and drops everything behind it.
    pub fn reclaim_first(&mut self, cluster: u32) {
        self.set_entry(cluster, FAT32_EOC);
        if let Some(count) = self.free_count {
            self.free_count = Some(count.saturating_sub(1));
        }
    }

    /// Walk the full chain from `start`, bounded by the table size.
    pub fn cluster_chain(&self, start: u32) -> Result<Vec<u32>> {
        let total = self.total_clusters();
        let mut chain = Vec::new();
        let mut current = start;

        while current < FAT32_EOC {
            if current < 2 || current >= total || chain.len() as u32 >= total {
                return Err(Fat32Error::CorruptChain { cluster: current });
            }
            chain.push(current);
            current = self.next_cluster(current);
        }

        Ok(chain)
    }

    /// Write the table and, when the hints are known, the FSInfo sector
    /// back to the image. Only the primary FAT copy is written; mirrors
    /// are left to diverge.
    pub fn persist<F: Write + Seek>(&mut self, file: &mut F) -> io::Result<()> {
        if let (Some(count), Some(next)) = (self.free_count, self.next_free) {
            self.fsinfo.free_cluster_count = count;
            self.fsinfo.next_free_cluster = next;
            file.seek(SeekFrom::Start(self.fsinfo_offset))?;
            file.write_all(&self.fsinfo.encode())?;
        }

        file.seek(SeekFrom::Start(self.offset))?;
        file.write_all(&self.data)?;
        Ok(())
    }
}
