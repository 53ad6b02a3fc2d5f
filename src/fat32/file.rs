//! Cursor-based file I/O across cluster chains

use std::io::{Read, Seek, SeekFrom};

use log::{debug, warn};

use crate::error::{Fat32Error, Result};
use crate::fat32::codec::DirEntry;
use crate::fat32::name::format_short_name;
use crate::fat32::volume::Fat32Volume;
use crate::fat32::{DIR_ENTRY_SIZE, ENTRY_END, FAT32_EOC};

/// An open file: the entry value, its chain anchors and a byte cursor.
///
/// Ephemeral and process-local; holds no lock and is not safe to share
/// between concurrent writers. `current_cluster` caches the last cluster
/// the cursor touched so sequential access does not re-walk the chain.
#[derive(Debug)]
pub struct FileHandle {
    pub entry: DirEntry,
    pub first_cluster: u32,
    pub current_cluster: u32,
    /// First cluster of the parent directory, where the entry record
    /// lives and gets rewritten on size changes
    pub dir_cluster: u32,
    pub cursor: u32,
}

impl FileHandle {
    fn new(entry: DirEntry, dir_cluster: u32) -> Self {
        let cluster = entry.first_cluster();
        FileHandle {
            entry,
            first_cluster: cluster,
            current_cluster: cluster,
            dir_cluster,
            cursor: 0,
        }
    }

    pub fn file_size(&self) -> u32 {
        self.entry.file_size
    }
}

/// Outcome of a `write` call: how much landed, and whether all of it did.
/// An incomplete write means the volume filled up mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub complete: bool,
}

impl Fat32Volume {
    /// Open a path to a live handle. The path must name an entry inside
    /// a directory; the bare root cannot be opened.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        let (parent, name) = self.resolve_parent(path)?;
        let cluster = parent.first_cluster();
        let entry = self
            .find_named(cluster, &format_short_name(name))?
            .ok_or_else(|| Fat32Error::not_found(path))?;
        Ok(FileHandle::new(entry, cluster))
    }

    /// Move the cursor. The target must stay within `[0, fileSize]`;
    /// returns the bytes remaining to end-of-file.
    pub fn seek(&mut self, fd: &mut FileHandle, pos: SeekFrom) -> Result<u32> {
        let size = fd.entry.file_size as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => fd.cursor as i64 + offset,
            SeekFrom::End(offset) => size + offset,
        };
        if target < 0 || target > size {
            return Err(Fat32Error::OutOfRange {
                offset: target,
                size: fd.entry.file_size,
            });
        }

        // Walk to the cluster holding the last byte before the target so
        // a cluster-aligned target (including exact end-of-file) never
        // steps past the end of the chain.
        let cluster_size = self.geometry.cluster_size as i64;
        let hops = if target == 0 { 0 } else { (target - 1) / cluster_size };
        let mut cluster = fd.first_cluster;
        for _ in 0..hops {
            let next = self.table.next_cluster(cluster);
            if next >= FAT32_EOC {
                // size promises more clusters than the chain holds
                return Err(Fat32Error::CorruptChain { cluster });
            }
            cluster = next;
        }

        fd.current_cluster = cluster;
        fd.cursor = target as u32;
        Ok((size - target) as u32)
    }

    /// Read up to `max_count` bytes at the cursor, never past the file
    /// size. A chain that ends before the recorded size yields a short
    /// read with the cursor parked at end-of-file.
    pub fn read(&mut self, fd: &mut FileHandle, max_count: usize) -> Result<Vec<u8>> {
        let size = fd.entry.file_size;
        if size == 0 || fd.cursor >= size {
            return Ok(Vec::new());
        }

        let cluster_size = self.geometry.cluster_size;
        let mut remaining = max_count.min((size - fd.cursor) as usize);
        let mut content = Vec::with_capacity(remaining);

        while remaining > 0 {
            let within = fd.cursor % cluster_size;
            if within == 0 && fd.cursor > 0 {
                let next = self.table.next_cluster(fd.current_cluster);
                if next >= FAT32_EOC {
                    // chain shorter than the recorded size: short read
                    warn!(
                        "chain ended at cluster {} before size {}",
                        fd.current_cluster, size
                    );
                    fd.cursor = size;
                    break;
                }
                fd.current_cluster = next;
            }

            let left_in_cluster = (cluster_size - within) as usize;
            let to_read = remaining.min(left_in_cluster);
            let offset = self.geometry.cluster_offset(fd.current_cluster) + within as u64;
            self.file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; to_read];
            self.file.read_exact(&mut buf)?;
            content.extend_from_slice(&buf);

            fd.cursor += to_read as u32;
            remaining -= to_read;
        }

        Ok(content)
    }

    /// Write at the cursor, allocating clusters on demand past the end of
    /// the chain. Growing the cursor past the recorded size grows the
    /// size; the entry record is rewritten and the table persisted before
    /// returning. A full volume stops the write early with an incomplete
    /// outcome instead of an error.
    pub fn write(&mut self, fd: &mut FileHandle, buf: &[u8]) -> Result<WriteOutcome> {
        let cluster_size = self.geometry.cluster_size;
        let mut written = 0usize;
        let mut complete = true;

        while written < buf.len() {
            let within = fd.cursor % cluster_size;
            if within == 0 && fd.cursor > 0 {
                let next = self.table.next_cluster(fd.current_cluster);
                if next >= FAT32_EOC {
                    match self.table.append_cluster(fd.current_cluster) {
                        Some(new) => fd.current_cluster = new,
                        None => {
                            warn!("volume full, write stopped after {} bytes", written);
                            complete = false;
                            break;
                        }
                    }
                } else {
                    fd.current_cluster = next;
                }
            }

            let left_in_cluster = (cluster_size - within) as usize;
            let chunk = (buf.len() - written).min(left_in_cluster);
            let offset = self.geometry.cluster_offset(fd.current_cluster) + within as u64;
            self.write_at(offset, &buf[written..written + chunk])?;

            written += chunk;
            fd.cursor += chunk as u32;
        }

        if fd.cursor > fd.entry.file_size {
            fd.entry.file_size = fd.cursor;
        }

        self.rewrite_entry(fd)?;
        self.table.persist(&mut self.file)?;
        debug!("wrote {} bytes, file size now {}", written, fd.entry.file_size);
        Ok(WriteOutcome { written, complete })
    }

    /// Release an open file's content: drop the chain behind the first
    /// cluster, keep the first cluster as an empty end-of-chain, reset
    /// size and cursor. The caller-level overwrite contract used by copy.
    pub fn truncate(&mut self, fd: &mut FileHandle) -> Result<()> {
        self.table.free_chain(fd.first_cluster);
        self.table.reclaim_first(fd.first_cluster);
        fd.entry.file_size = 0;
        fd.cursor = 0;
        fd.current_cluster = fd.first_cluster;
        self.rewrite_entry(fd)?;
        self.table.persist(&mut self.file)?;
        Ok(())
    }

    /// Rewrite the handle's entry record at its slot in the parent chain.
    fn rewrite_entry(&mut self, fd: &FileHandle) -> Result<()> {
        let mut current = fd.dir_cluster;
        let mut steps = 0u32;
        loop {
            let data = self.read_cluster(current)?;
            for (i, slot) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                if slot[0] == ENTRY_END {
                    return Err(Fat32Error::not_found(String::from_utf8_lossy(
                        &fd.entry.name,
                    )));
                }
                if slot[0..11] == fd.entry.name {
                    let offset = self.geometry.cluster_offset(current)
                        + (i * DIR_ENTRY_SIZE) as u64;
                    return self.write_at(offset, &fd.entry.encode());
                }
            }
            let next = self.table.next_cluster(current);
            if next >= FAT32_EOC {
                return Err(Fat32Error::not_found(String::from_utf8_lossy(&fd.entry.name)));
            }
            steps += 1;
            if steps > self.geometry.total_clusters {
                return Err(Fat32Error::CorruptChain { cluster: next });
            }
            current = next;
        }
    }
}
