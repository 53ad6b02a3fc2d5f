//! Directory-cluster scanning helpers

use crate::error::Result;
use crate::fat32::codec::DirEntry;
use crate::fat32::{DIR_ENTRY_SIZE, ENTRY_DELETED, ENTRY_END, LFN_ATTRIBUTE};

/// Parse the live entries of one directory cluster, in on-disk order.
///
/// Returns the entries plus whether the 0x00 end sentinel was reached,
/// which stops the scan of the whole chain. Deleted slots (0xE5) and
/// long-name slots are skipped.
pub fn parse_directory_entries(cluster_data: &[u8]) -> Result<(Vec<DirEntry>, bool)> {
    let mut entries = Vec::new();
    for slot in cluster_data.chunks_exact(DIR_ENTRY_SIZE) {
        if slot[0] == ENTRY_END {
            return Ok((entries, true));
        }
        if slot[0] == ENTRY_DELETED || slot[11] == LFN_ATTRIBUTE {
            continue;
        }
        entries.push(DirEntry::decode(slot)?);
    }
    Ok((entries, false))
}
