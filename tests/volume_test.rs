use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use fat32_img::fat32::codec::{BootSector, ExtBootSector};
use fat32_img::{Fat32Error, Fat32Volume, FileAttributes};

const BYTES_PER_SECTOR: u16 = 512;
const RESERVED_SECTORS: u16 = 32;
const NUM_FATS: u8 = 2;

/// Unique throwaway image path under the system temp directory
fn temp_image(name: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("fat32img-{}-{}-{}", name, std::process::id(), stamp))
}

/// Build a zero-filled image with valid boot headers and format it.
/// `fat_sectors` bounds the cluster count: one 512-byte FAT sector holds
/// 128 table entries.
fn fresh_volume(name: &str, fat_sectors: u32) -> (PathBuf, Fat32Volume) {
    let path = temp_image(name);

    let total_clusters = fat_sectors * BYTES_PER_SECTOR as u32 / 4;
    let first_data_sector = RESERVED_SECTORS as u32 + NUM_FATS as u32 * fat_sectors;
    let total_sectors = first_data_sector + total_clusters - 2;

    let boot = BootSector {
        jmp_boot: [0xEB, 0x58, 0x90],
        oem_name: *b"MSWIN4.1",
        bytes_per_sector: BYTES_PER_SECTOR,
        sectors_per_cluster: 1,
        reserved_sectors: RESERVED_SECTORS,
        num_fats: NUM_FATS,
        root_entry_count: 0,
        total_sectors_16: 0,
        media_type: 0xF8,
        fat_size_16: 0,
        sectors_per_track: 63,
        num_heads: 255,
        hidden_sectors: 0,
        total_sectors_32: total_sectors,
    };
    let ext = ExtBootSector {
        fat_size_32: fat_sectors,
        ext_flags: 0,
        fs_version: 0,
        root_cluster: 2,
        fsinfo_sector: 1,
        backup_boot_sector: 6,
        reserved: [0u8; 12],
        drive_number: 0x80,
        reserved1: 0,
        boot_signature: 0x29,
        volume_id: 0x1234ABCD,
        volume_label: *b"TESTVOL    ",
        fs_type: *b"FAT32   ",
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    file.set_len(total_sectors as u64 * BYTES_PER_SECTOR as u64)
        .unwrap();
    file.write_all(&boot.encode()).unwrap();
    file.write_all(&ext.encode()).unwrap();
    file.seek(SeekFrom::Start(510)).unwrap();
    file.write_all(&[0x55, 0xAA]).unwrap();
    drop(file);

    Fat32Volume::format(&path, true).unwrap();
    let volume = Fat32Volume::mount(&path).unwrap();
    (path, volume)
}

fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

#[test]
fn formatted_volume_mounts_with_empty_root() {
    let (path, mut volume) = fresh_volume("empty-root", 8);

    assert!(volume.list("/").unwrap().is_empty());
    assert!(volume.table().free_count().is_some());
    assert_eq!(volume.root_cluster(), 2);

    cleanup(&path);
}

#[test]
fn created_file_opens_empty() {
    let (path, mut volume) = fresh_volume("create-open", 8);

    volume.mkdir("/a").unwrap();
    volume.create_file("/a/b.txt").unwrap();

    let mut fd = volume.open("/a/b.txt").unwrap();
    assert_eq!(fd.file_size(), 0);
    assert!(volume.read(&mut fd, 64).unwrap().is_empty());

    cleanup(&path);
}

#[test]
fn write_spanning_three_clusters_round_trips() {
    let (path, mut volume) = fresh_volume("three-clusters", 8);

    // three 512-byte clusters: two full plus a partial tail
    let content: Vec<u8> = (0..1224u32).map(|i| (i * 7 % 256) as u8).collect();

    volume.create_file("/data.bin").unwrap();
    let mut fd = volume.open("/data.bin").unwrap();
    let outcome = volume.write(&mut fd, &content).unwrap();
    assert_eq!(outcome.written, content.len());
    assert!(outcome.complete);

    let mut fd = volume.open("/data.bin").unwrap();
    assert_eq!(fd.file_size(), content.len() as u32);
    let back = volume.read(&mut fd, content.len()).unwrap();
    assert_eq!(back, content);

    let stat = volume.stat("/data.bin").unwrap();
    assert_eq!(stat.chain.len(), 3);

    cleanup(&path);
}

#[test]
fn removed_file_is_gone_and_its_clusters_are_reused() {
    let (path, mut volume) = fresh_volume("remove-reuse", 8);

    volume.create_file("/victim.txt").unwrap();
    let mut fd = volume.open("/victim.txt").unwrap();
    volume.write(&mut fd, &[0xAB; 1024]).unwrap();
    let freed: Vec<u32> = volume.stat("/victim.txt").unwrap().chain;

    volume.remove_file("/victim.txt").unwrap();
    assert!(matches!(
        volume.open("/victim.txt"),
        Err(Fat32Error::NotFound { .. })
    ));

    // the freed chain is offered again before anything beyond it
    volume.create_file("/next.txt").unwrap();
    let first = volume.stat("/next.txt").unwrap().chain[0];
    assert!(freed.contains(&first));

    cleanup(&path);
}

#[test]
fn tombstoned_slot_is_reused_for_the_next_entry() {
    let (path, mut volume) = fresh_volume("slot-reuse", 8);

    volume.create_file("/one.txt").unwrap();
    volume.create_file("/two.txt").unwrap();
    volume.remove_file("/one.txt").unwrap();

    volume.create_file("/three.txt").unwrap();
    let names: Vec<String> = volume
        .list("/")
        .unwrap()
        .iter()
        .map(|e| String::from_utf8_lossy(&e.name).into_owned())
        .collect();
    // the new entry took the tombstoned first slot
    assert_eq!(names, vec!["THREE   TXT", "TWO     TXT"]);

    cleanup(&path);
}

#[test]
fn rmdir_requires_empty_directory() {
    let (path, mut volume) = fresh_volume("rmdir", 8);

    volume.mkdir("/d").unwrap();
    let names: Vec<[u8; 11]> = volume.list("/d").unwrap().iter().map(|e| e.name).collect();
    assert_eq!(names, vec![*b".          ", *b"..         "]);
    volume.rmdir("/d").unwrap();

    volume.mkdir("/e").unwrap();
    volume.create_file("/e/x.txt").unwrap();
    assert!(matches!(
        volume.rmdir("/e"),
        Err(Fat32Error::DirectoryNotEmpty { .. })
    ));
    volume.remove_file("/e/x.txt").unwrap();
    volume.rmdir("/e").unwrap();

    cleanup(&path);
}

#[test]
fn seek_bounds_are_enforced() {
    let (path, mut volume) = fresh_volume("seek", 8);

    volume.create_file("/f.txt").unwrap();
    let mut fd = volume.open("/f.txt").unwrap();
    volume.write(&mut fd, &[0x42; 100]).unwrap();

    let mut fd = volume.open("/f.txt").unwrap();
    assert!(matches!(
        volume.seek(&mut fd, SeekFrom::Start(101)),
        Err(Fat32Error::OutOfRange { .. })
    ));
    assert!(matches!(
        volume.seek(&mut fd, SeekFrom::Current(-1)),
        Err(Fat32Error::OutOfRange { .. })
    ));

    // seeking to exactly the file size is fine and reads nothing
    assert_eq!(volume.seek(&mut fd, SeekFrom::Start(100)).unwrap(), 0);
    assert!(volume.read(&mut fd, 16).unwrap().is_empty());

    assert_eq!(volume.seek(&mut fd, SeekFrom::End(-40)).unwrap(), 40);
    assert_eq!(volume.read(&mut fd, 100).unwrap().len(), 40);

    cleanup(&path);
}

#[test]
fn seek_to_cluster_aligned_end_reads_empty() {
    let (path, mut volume) = fresh_volume("aligned-end", 8);

    volume.create_file("/f.bin").unwrap();
    let mut fd = volume.open("/f.bin").unwrap();
    volume.write(&mut fd, &[0x11; 1024]).unwrap();

    let mut fd = volume.open("/f.bin").unwrap();
    assert_eq!(volume.seek(&mut fd, SeekFrom::Start(1024)).unwrap(), 0);
    assert!(volume.read(&mut fd, 8).unwrap().is_empty());

    cleanup(&path);
}

#[test]
fn sparse_seek_then_read_window() {
    let (path, mut volume) = fresh_volume("window", 8);

    let content: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    volume.create_file("/w.bin").unwrap();
    let mut fd = volume.open("/w.bin").unwrap();
    volume.write(&mut fd, &content).unwrap();

    let mut fd = volume.open("/w.bin").unwrap();
    volume.seek(&mut fd, SeekFrom::Start(700)).unwrap();
    let window = volume.read(&mut fd, 600).unwrap();
    assert_eq!(window, &content[700..1300]);

    cleanup(&path);
}

#[test]
fn truncate_then_rewrite_replaces_content() {
    let (path, mut volume) = fresh_volume("truncate", 8);

    volume.create_file("/conf.txt").unwrap();
    let mut fd = volume.open("/conf.txt").unwrap();
    volume.write(&mut fd, &[0x55; 1500]).unwrap();

    let mut fd = volume.open("/conf.txt").unwrap();
    volume.truncate(&mut fd).unwrap();
    volume.write(&mut fd, b"new").unwrap();

    let mut fd = volume.open("/conf.txt").unwrap();
    assert_eq!(fd.file_size(), 3);
    assert_eq!(volume.read(&mut fd, 64).unwrap(), b"new");
    assert_eq!(volume.stat("/conf.txt").unwrap().chain.len(), 1);

    cleanup(&path);
}

#[test]
fn lookups_are_case_insensitive() {
    let (path, mut volume) = fresh_volume("case", 8);

    volume.mkdir("/Sub").unwrap();
    volume.create_file("/Sub/Hello.TXT").unwrap();
    assert!(volume.open("/sub/hello.txt").is_ok());
    assert!(matches!(
        volume.create_file("/SUB/HELLO.txt"),
        Err(Fat32Error::AlreadyExists { .. })
    ));

    cleanup(&path);
}

#[test]
fn dot_segments_resolve_to_fixed_entries() {
    let (path, mut volume) = fresh_volume("dots", 8);

    volume.mkdir("/outer").unwrap();
    volume.mkdir("/outer/inner").unwrap();
    volume.create_file("/outer/file.txt").unwrap();

    assert!(volume.open("/outer/inner/../file.txt").is_ok());
    assert!(volume.open("/outer/./file.txt").is_ok());

    cleanup(&path);
}

#[test]
fn directory_grows_past_one_cluster() {
    let (path, mut volume) = fresh_volume("dir-growth", 8);

    volume.mkdir("/many").unwrap();
    // a 512-byte cluster holds 16 slots; `.` and `..` use two
    for i in 0..20 {
        volume.create_file(&format!("/many/f{:02}.txt", i)).unwrap();
    }

    let entries = volume.list("/many").unwrap();
    assert_eq!(entries.len(), 22);
    for i in 0..20 {
        assert!(volume.open(&format!("/many/f{:02}.txt", i)).is_ok());
    }
    assert!(volume.stat("/many").unwrap().chain.len() >= 2);

    cleanup(&path);
}

#[test]
fn intermediate_file_segment_is_rejected() {
    let (path, mut volume) = fresh_volume("not-a-dir", 8);

    volume.create_file("/plain.txt").unwrap();
    assert!(matches!(
        volume.open("/plain.txt/below"),
        Err(Fat32Error::NotADirectory { .. })
    ));
    assert!(matches!(
        volume.remove_file("/missing/x"),
        Err(Fat32Error::NotFound { .. })
    ));

    cleanup(&path);
}

#[test]
fn remove_file_rejects_directories() {
    let (path, mut volume) = fresh_volume("unlink-dir", 8);

    volume.mkdir("/d").unwrap();
    assert!(matches!(
        volume.remove_file("/d"),
        Err(Fat32Error::NotAFile { .. })
    ));

    cleanup(&path);
}

#[test]
fn full_volume_yields_partial_write() {
    // one FAT sector: 128 entries, so 126 data clusters at most
    let (path, mut volume) = fresh_volume("full", 1);

    volume.create_file("/big.bin").unwrap();
    let mut fd = volume.open("/big.bin").unwrap();
    let outcome = volume.write(&mut fd, &vec![0x77u8; 70_000]).unwrap();
    assert!(!outcome.complete);
    assert!(outcome.written < 70_000);
    // every byte that was reported written is readable back
    let mut fd = volume.open("/big.bin").unwrap();
    assert_eq!(fd.file_size() as usize, outcome.written);
    let back = volume.read(&mut fd, outcome.written).unwrap();
    assert!(back.iter().all(|&b| b == 0x77));

    // and a later create has no cluster to allocate
    assert!(matches!(
        volume.create_file("/more.txt"),
        Err(Fat32Error::VolumeFull)
    ));

    cleanup(&path);
}

#[test]
fn corrupt_fsinfo_disables_hints_but_not_operations() {
    let (path, volume) = fresh_volume("no-hints", 8);
    drop(volume);

    // scribble over the FSInfo lead signature
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(512)).unwrap();
    file.write_all(&[0u8; 4]).unwrap();
    drop(file);

    let mut volume = Fat32Volume::mount(&path).unwrap();
    assert!(volume.table().free_count().is_none());

    volume.create_file("/still.txt").unwrap();
    let mut fd = volume.open("/still.txt").unwrap();
    volume.write(&mut fd, b"works without hints").unwrap();
    let mut fd = volume.open("/still.txt").unwrap();
    assert_eq!(volume.read(&mut fd, 64).unwrap(), b"works without hints");

    cleanup(&path);
}

#[test]
fn init_style_system_directories() {
    let (path, mut volume) = fresh_volume("sysdirs", 8);

    let attrs = FileAttributes::DIRECTORY | FileAttributes::SYSTEM | FileAttributes::READ_ONLY;
    let root = volume.root_cluster();
    for name in ["boot", "home", "bin"] {
        volume.create_entry(root, name, attrs).unwrap();
    }

    let entries = volume.list("/").unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| {
        e.is_directory() && e.attributes().contains(FileAttributes::SYSTEM)
    }));

    let stat = volume.stat("/boot").unwrap();
    assert!(stat.entry.attributes().contains(FileAttributes::READ_ONLY));

    cleanup(&path);
}
