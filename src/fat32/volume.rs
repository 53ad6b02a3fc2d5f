use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use crate::error::{Fat32Error, Result};
use crate::fat32::codec::{BootSector, DirEntry, ExtBootSector, FsInfoSector};
use crate::fat32::dir::parse_directory_entries;
use crate::fat32::name::{DOT_NAME, DOTDOT_NAME, format_short_name};
use crate::fat32::table::FatTable;
use crate::fat32::{
    DIR_ENTRY_SIZE, ENTRY_DELETED, ENTRY_END, FAT32_EOC, FileAttributes, Geometry,
};

/// Synthesized name of the root directory entry
const ROOT_NAME: [u8; 11] = *b"ROOT       ";

/// Resolved entry plus its full cluster chain, the `stat` result
#[derive(Debug)]
pub struct FileStat {
    pub entry: DirEntry,
    pub chain: Vec<u32>,
}

/// A mounted FAT32 image.
///
/// Owns the backing file, the geometry derived from the boot headers and
/// the in-memory allocation table. One exclusive session per image; all
/// I/O is synchronous and positioned.
pub struct Fat32Volume {
    pub(crate) file: File,
    pub(crate) geometry: Geometry,
    pub(crate) table: FatTable,
}

fn derive_geometry(boot: &BootSector, ext: &ExtBootSector, image_len: u64) -> Result<Geometry> {
    if boot.bytes_per_sector < 512 || boot.bytes_per_sector > 4096 {
        return Err(Fat32Error::invalid_volume("bytes_per_sector out of range"));
    }
    if boot.sectors_per_cluster == 0 || boot.sectors_per_cluster > 128 {
        return Err(Fat32Error::invalid_volume("sectors_per_cluster out of range"));
    }
    if boot.num_fats == 0 || boot.num_fats > 4 {
        return Err(Fat32Error::invalid_volume("num_fats out of range"));
    }
    if ext.fat_size_32 == 0 || ext.fat_size_32 > 1_000_000 {
        return Err(Fat32Error::invalid_volume("sectors_per_fat out of range"));
    }
    if ext.root_cluster < 2 {
        return Err(Fat32Error::invalid_volume("root_cluster out of range"));
    }

    let bps = boot.bytes_per_sector as u64;
    let first_data_sector =
        boot.reserved_sectors as u32 + boot.num_fats as u32 * ext.fat_size_32;
    if first_data_sector as u64 * bps >= image_len {
        return Err(Fat32Error::invalid_volume("data region beyond image end"));
    }

    Ok(Geometry {
        bytes_per_sector: boot.bytes_per_sector,
        sectors_per_cluster: boot.sectors_per_cluster,
        reserved_sectors: boot.reserved_sectors,
        num_fats: boot.num_fats,
        sectors_per_fat: ext.fat_size_32,
        root_cluster: ext.root_cluster,
        fsinfo_sector: ext.fsinfo_sector,
        image_len,
        cluster_size: boot.bytes_per_sector as u32 * boot.sectors_per_cluster as u32,
        first_data_sector,
        total_clusters: (ext.fat_size_32 as u64 * bps / 4) as u32,
    })
}

impl Fat32Volume {
    /// Mount an image file: parse the boot headers, load the allocation
    /// table and the FSInfo hints.
    pub fn mount<P: AsRef<Path>>(path: P) -> Result<Fat32Volume> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let image_len = file.metadata()?.len();

        let mut sector = [0u8; 512];
        file.read_exact(&mut sector)?;
        let boot = BootSector::decode(&sector)?;
        let ext = ExtBootSector::decode(&sector[ExtBootSector::OFFSET..])?;

        let geometry = derive_geometry(&boot, &ext, image_len)?;
        let table = FatTable::load(&mut file, &geometry)?;

        info!(
            "mounted {:?}: {} bytes/sector, {} sectors/cluster, root cluster {}, {} clusters",
            path.as_ref(),
            geometry.bytes_per_sector,
            geometry.sectors_per_cluster,
            geometry.root_cluster,
            geometry.total_clusters
        );

        Ok(Fat32Volume {
            file,
            geometry,
            table,
        })
    }

    /// Zero and re-sign the FAT and FSInfo regions of an already-sized
    /// image carrying valid boot headers.
    ///
    /// Every FAT copy is rewritten identically, the boot sector is
    /// mirrored to the backup sector when one is declared, and the root
    /// directory cluster is cleared so the formatted volume lists empty.
    pub fn format<P: AsRef<Path>>(path: P, create_fsinfo: bool) -> Result<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let image_len = file.metadata()?.len();

        let mut sector = [0u8; 512];
        file.read_exact(&mut sector)?;
        let boot = BootSector::decode(&sector)?;
        let ext = ExtBootSector::decode(&sector[ExtBootSector::OFFSET..])?;
        let geo = derive_geometry(&boot, &ext, image_len)?;

        let bps = geo.bytes_per_sector as u64;
        let fat_bytes = geo.sectors_per_fat as u64 * bps;
        let mut table = vec![0u8; fat_bytes as usize];
        // media/reserved markers for clusters 0 and 1, end-of-chain root
        table[0..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0x0F]);
        table[4..8].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x0F]);
        let root = geo.root_cluster as usize * 4;
        table[root..root + 4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x0F]);

        for copy in 0..geo.num_fats as u64 {
            let offset = (geo.reserved_sectors as u64 + copy * geo.sectors_per_fat as u64) * bps;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&table)?;
        }

        if ext.backup_boot_sector != 0 {
            file.seek(SeekFrom::Start(ext.backup_boot_sector as u64 * bps))?;
            file.write_all(&sector)?;
        }

        if create_fsinfo {
            file.seek(SeekFrom::Start(geo.fsinfo_sector as u64 * bps))?;
            file.write_all(&FsInfoSector::fresh().encode())?;
        }

        file.seek(SeekFrom::Start(geo.cluster_offset(geo.root_cluster)))?;
        file.write_all(&vec![0u8; geo.cluster_size as usize])?;

        info!("formatted {:?}", path.as_ref());
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn root_cluster(&self) -> u32 {
        self.geometry.root_cluster
    }

    /// Read-only view of the allocation table
    pub fn table(&self) -> &FatTable {
        &self.table
    }

    pub(crate) fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub(crate) fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>> {
        if cluster < 2 || cluster >= self.geometry.total_clusters {
            return Err(Fat32Error::CorruptChain { cluster });
        }
        self.file
            .seek(SeekFrom::Start(self.geometry.cluster_offset(cluster)))?;
        let mut buf = vec![0u8; self.geometry.cluster_size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_entry_at(&mut self, dir_cluster: u32, slot: usize, entry: &DirEntry) -> Result<()> {
        let offset = self.geometry.cluster_offset(dir_cluster) + (slot * DIR_ENTRY_SIZE) as u64;
        self.write_at(offset, &entry.encode())
    }

    /// The synthesized root directory entry: fixed cluster, directory and
    /// system attributes, never matched by name.
    fn root_entry(&self) -> DirEntry {
        let mut entry = DirEntry::zeroed();
        entry.name = ROOT_NAME;
        entry.attr = (FileAttributes::DIRECTORY | FileAttributes::SYSTEM).bits();
        entry.set_first_cluster(self.geometry.root_cluster);
        entry
    }

    /// Live entries of the directory chain rooted at `start_cluster`, in
    /// on-disk order. Stops at the first 0x00 slot, skips deleted slots.
    pub fn list_directory(&mut self, start_cluster: u32) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut current = start_cluster;
        let mut steps = 0u32;
        loop {
            let data = self.read_cluster(current)?;
            let (mut found, end) = parse_directory_entries(&data)?;
            entries.append(&mut found);
            if end {
                break;
            }
            let next = self.table.next_cluster(current);
            if next >= FAT32_EOC {
                break;
            }
            steps += 1;
            if steps > self.geometry.total_clusters {
                return Err(Fat32Error::CorruptChain { cluster: next });
            }
            current = next;
        }
        Ok(entries)
    }

    /// Linear exact-match scan for an 11-byte name.
    pub fn find_named(&mut self, dir_cluster: u32, name: &[u8; 11]) -> Result<Option<DirEntry>> {
        Ok(self
            .list_directory(dir_cluster)?
            .into_iter()
            .find(|entry| &entry.name == name))
    }

    /// Resolve an absolute path to its directory entry.
    ///
    /// Segments are short-name formatted before matching, so lookups are
    /// case-insensitive; literal `.` and `..` map to their fixed padded
    /// names. Fails with `NotADirectory` when an intermediate segment is
    /// not a directory.
    pub fn resolve_path(&mut self, path: &str) -> Result<DirEntry> {
        let mut entry = self.root_entry();
        let mut cluster = self.geometry.root_cluster;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !entry.is_directory() {
                return Err(Fat32Error::not_a_directory(path));
            }
            let name = match segment {
                "." => DOT_NAME,
                ".." => DOTDOT_NAME,
                _ => format_short_name(segment),
            };
            entry = self
                .find_named(cluster, &name)?
                .ok_or_else(|| Fat32Error::not_found(path))?;
            cluster = entry.first_cluster();
        }

        Ok(entry)
    }

    /// Split a path into its parent directory entry and final segment.
    pub(crate) fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(DirEntry, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (dirs, name) = match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(Fat32Error::not_found(path));
        }
        let parent = self.resolve_path(if dirs.is_empty() { "/" } else { dirs })?;
        if !parent.is_directory() {
            return Err(Fat32Error::not_a_directory(path));
        }
        Ok((parent, name))
    }

    /// Write a new entry into the first free slot of the parent chain.
    ///
    /// The whole chain is scanned for an exact-name collision before the
    /// slot is used; a full chain is extended by one zeroed cluster. The
    /// new entry gets a freshly allocated end-of-chain first cluster and
    /// zero size; directory entries are seeded with `.` and `..`.
    pub fn create_entry(
        &mut self,
        parent_cluster: u32,
        raw_name: &str,
        attrs: FileAttributes,
    ) -> Result<DirEntry> {
        let name = format_short_name(raw_name);

        let mut free_slot: Option<(u32, usize)> = None;
        let mut current = parent_cluster;
        let mut tail = parent_cluster;
        let mut steps = 0u32;
        'scan: loop {
            let data = self.read_cluster(current)?;
            for (i, slot) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                match slot[0] {
                    ENTRY_END => {
                        if free_slot.is_none() {
                            free_slot = Some((current, i));
                        }
                        break 'scan;
                    }
                    ENTRY_DELETED => {
                        if free_slot.is_none() {
                            free_slot = Some((current, i));
                        }
                    }
                    _ => {
                        if slot[0..11] == name {
                            return Err(Fat32Error::already_exists(raw_name));
                        }
                    }
                }
            }
            tail = current;
            let next = self.table.next_cluster(current);
            if next >= FAT32_EOC {
                break;
            }
            steps += 1;
            if steps > self.geometry.total_clusters {
                return Err(Fat32Error::CorruptChain { cluster: next });
            }
            current = next;
        }

        let first = self.table.allocate_first().ok_or(Fat32Error::VolumeFull)?;

        let (slot_cluster, slot_index) = match free_slot {
            Some(slot) => slot,
            None => {
                // directory full: grow it by one cluster and use its first slot
                let Some(new) = self.table.append_cluster(tail) else {
                    self.table.free_chain(first);
                    return Err(Fat32Error::VolumeFull);
                };
                self.write_at(
                    self.geometry.cluster_offset(new),
                    &vec![0u8; self.geometry.cluster_size as usize],
                )?;
                (new, 0)
            }
        };

        let mut entry = DirEntry::zeroed();
        entry.name = name;
        entry.attr = attrs.bits();
        entry.set_first_cluster(first);

        self.write_entry_at(slot_cluster, slot_index, &entry)?;

        if attrs.contains(FileAttributes::DIRECTORY) {
            let mut buf = vec![0u8; self.geometry.cluster_size as usize];

            let mut dot = entry.clone();
            dot.name = DOT_NAME;
            buf[0..DIR_ENTRY_SIZE].copy_from_slice(&dot.encode());

            let mut dotdot = entry.clone();
            dotdot.name = DOTDOT_NAME;
            dotdot.set_first_cluster(parent_cluster);
            buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.encode());

            self.write_at(self.geometry.cluster_offset(first), &buf)?;
        }

        self.table.persist(&mut self.file)?;
        debug!(
            "created entry {:?} at cluster {} in directory {}",
            raw_name, first, parent_cluster
        );
        Ok(entry)
    }

    /// Tombstone a named entry and release its cluster chain.
    ///
    /// Emptiness of directories is NOT checked here; `rmdir` enforces it.
    pub fn remove_entry(&mut self, parent_cluster: u32, raw_name: &str) -> Result<()> {
        let name = format_short_name(raw_name);
        let mut current = parent_cluster;
        let mut steps = 0u32;
        loop {
            let data = self.read_cluster(current)?;
            for (i, slot) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                if slot[0] == ENTRY_END {
                    return Err(Fat32Error::not_found(raw_name));
                }
                if slot[0] == ENTRY_DELETED {
                    continue;
                }
                if slot[0..11] == name {
                    let mut entry = DirEntry::decode(slot)?;
                    self.table.free_chain(entry.first_cluster());
                    entry.name[0] = ENTRY_DELETED;
                    self.write_entry_at(current, i, &entry)?;
                    self.table.persist(&mut self.file)?;
                    debug!("removed entry {:?} from directory {}", raw_name, parent_cluster);
                    return Ok(());
                }
            }
            let next = self.table.next_cluster(current);
            if next >= FAT32_EOC {
                return Err(Fat32Error::not_found(raw_name));
            }
            steps += 1;
            if steps > self.geometry.total_clusters {
                return Err(Fat32Error::CorruptChain { cluster: next });
            }
            current = next;
        }
    }

    /// List a directory by path.
    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let entry = self.resolve_path(path)?;
        if !entry.is_directory() {
            return Err(Fat32Error::not_a_directory(path));
        }
        self.list_directory(entry.first_cluster())
    }

    /// Create an empty archive file at `path`.
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        self.create_entry(parent.first_cluster(), name, FileAttributes::ARCHIVE)?;
        Ok(())
    }

    /// Remove a file at `path`. Directories are rejected with `NotAFile`.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let cluster = parent.first_cluster();
        let target = self
            .find_named(cluster, &format_short_name(name))?
            .ok_or_else(|| Fat32Error::not_found(path))?;
        if target.is_directory() {
            return Err(Fat32Error::not_a_file(path));
        }
        self.remove_entry(cluster, name)
    }

    /// Create a directory at `path`, seeded with `.` and `..`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        self.create_entry(parent.first_cluster(), name, FileAttributes::DIRECTORY)?;
        Ok(())
    }

    /// Remove a directory at `path`. Fails with `DirectoryNotEmpty` when
    /// the listing holds anything beyond `.` and `..`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let cluster = parent.first_cluster();
        let target = self
            .find_named(cluster, &format_short_name(name))?
            .ok_or_else(|| Fat32Error::not_found(path))?;
        if !target.is_directory() {
            return Err(Fat32Error::not_a_directory(path));
        }
        let children = self.list_directory(target.first_cluster())?;
        let occupied = children
            .iter()
            .any(|e| e.name != DOT_NAME && e.name != DOTDOT_NAME);
        if occupied {
            return Err(Fat32Error::directory_not_empty(path));
        }
        self.remove_entry(cluster, name)
    }

    /// Resolve a path and walk its full cluster chain.
    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        let entry = self.resolve_path(path)?;
        let chain = self.table.cluster_chain(entry.first_cluster())?;
        Ok(FileStat { entry, chain })
    }
}
