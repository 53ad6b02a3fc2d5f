use std::env;
use std::fs::File;
use std::io::{Read, SeekFrom};
use std::process::ExitCode;

use fat32_img::fat32::name::short_name_to_string;
use fat32_img::{Fat32Volume, FileAttributes, Result};

fn help(program: &str) {
    println!("Usage: {} <image> <command> [options] <path1> [path2]", program);
    println!("\nAll image paths are absolute, starting with '/'");
    println!("\tinit  : format the image and seed the essential folders");
    println!("\t\t--no-fsinfo: skip writing a fresh FSInfo sector");
    println!("\t\t--boot <host-file>: copy a host file into /boot (repeatable)");
    println!("\tls    : list directory contents in <path1>");
    println!("\tcreat : create a file at <path1>");
    println!("\tunlink: remove the file at <path1>");
    println!("\tmkdir : create a directory at <path1>");
    println!("\trmdir : remove the empty directory at <path1>");
    println!("\tread  : print the file content at <path1>");
    println!("\t\t-s <n>: seek into the file");
    println!("\t\t-l <n>: amount of bytes to print");
    println!("\t\t-b: dump the content in hex");
    println!("\tstat  : show entry information and the cluster chain");
    println!("\tcp    : copy <path1> to <path2>");
    println!("\t\t-ex: <path1> is a host file copied into the image");
}

struct Args {
    flags: Vec<String>,
    values: Vec<(String, String)>,
    paths: Vec<String>,
}

fn parse_args(rest: &[String]) -> Args {
    let mut args = Args {
        flags: Vec::new(),
        values: Vec::new(),
        paths: Vec::new(),
    };
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "-s" | "-l" | "--boot" => {
                if i + 1 < rest.len() {
                    args.values.push((rest[i].clone(), rest[i + 1].clone()));
                    i += 1;
                }
            }
            flag if flag.starts_with('-') => args.flags.push(flag.to_string()),
            path => args.paths.push(path.to_string()),
        }
        i += 1;
    }
    args
}

impl Args {
    fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f == name)
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn values_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn path(&self, index: usize) -> Option<&str> {
        self.paths.get(index).map(String::as_str)
    }
}

fn main() -> ExitCode {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("fat32-img");

    if argv.len() >= 2 && matches!(argv[1].trim_start_matches('-'), "h" | "help") {
        help(program);
        return ExitCode::SUCCESS;
    }
    if argv.len() < 3 {
        eprintln!("try {} --help", program);
        return ExitCode::FAILURE;
    }

    let image = &argv[1];
    let command = argv[2].as_str();
    let args = parse_args(&argv[3..]);

    let outcome = run(image, command, &args, program);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(image: &str, command: &str, args: &Args, program: &str) -> Result<()> {
    if command == "init" {
        return init(image, args);
    }

    let mut volume = Fat32Volume::mount(image)?;
    let path1 = args.path(0);

    match command {
        "ls" => ls(&mut volume, path1.unwrap_or("/")),
        "creat" => volume.create_file(required(path1)?),
        "unlink" => unlink(&mut volume, required(path1)?),
        "mkdir" => volume.mkdir(required(path1)?),
        "rmdir" => volume.rmdir(required(path1)?),
        "read" => read(&mut volume, args, required(path1)?),
        "stat" => stat(&mut volume, required(path1)?),
        "cp" => cp(&mut volume, args, required(path1)?, required(args.path(1))?),
        _ => {
            eprintln!("invalid command! try {} --help", program);
            Ok(())
        }
    }
}

fn required(path: Option<&str>) -> Result<&str> {
    path.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing path argument").into()
    })
}

fn init(image: &str, args: &Args) -> Result<()> {
    Fat32Volume::format(image, !args.flag("--no-fsinfo"))?;
    let mut volume = Fat32Volume::mount(image)?;

    let system_dir =
        FileAttributes::DIRECTORY | FileAttributes::SYSTEM | FileAttributes::READ_ONLY;
    let root = volume.root_cluster();
    for name in ["boot", "home", "bin"] {
        volume.create_entry(root, name, system_dir)?;
    }

    for host_path in args.values_of("--boot").collect::<Vec<_>>() {
        let name = host_path.rsplit('/').next().unwrap_or(host_path);
        let dest = format!("/boot/{}", name);
        volume.create_file(&dest)?;
        copy_from_host(&mut volume, host_path, &dest)?;
        println!("installed {} -> {}", host_path, dest);
    }

    Ok(())
}

fn ls(volume: &mut Fat32Volume, path: &str) -> Result<()> {
    let entries = volume.list(path)?;
    for entry in &entries {
        let name = short_name_to_string(&entry.name);
        if entry.is_directory() {
            print!("{}/   ", name);
        } else {
            print!("{}   ", name);
        }
    }
    println!();
    Ok(())
}

fn unlink(volume: &mut Fat32Volume, path: &str) -> Result<()> {
    let stat = volume.stat(path)?;
    if stat.entry.attributes().contains(FileAttributes::SYSTEM) {
        eprintln!("refusing to unlink system file {}", path);
        return Ok(());
    }
    volume.remove_file(path)
}

fn read(volume: &mut Fat32Volume, args: &Args, path: &str) -> Result<()> {
    let mut fd = volume.open(path)?;
    if fd.entry.is_directory() {
        println!("Is a directory");
        return Ok(());
    }
    if fd.file_size() == 0 {
        println!("File is empty");
        return Ok(());
    }

    let size = fd.file_size() as u64;
    let seek: u64 = match args.value("-s") {
        Some(v) => v.parse().unwrap_or(u64::MAX),
        None => 0,
    };
    if seek >= size {
        eprintln!("Seek out of bounds");
        return Ok(());
    }
    let mut remaining: u64 = match args.value("-l") {
        Some(v) => {
            let len = v.parse().unwrap_or(u64::MAX);
            if len > size - seek {
                eprintln!("Read size out of bounds");
                return Ok(());
            }
            len
        }
        None => size - seek,
    };
    let hex = args.flag("-b");

    volume.seek(&mut fd, SeekFrom::Start(seek))?;
    while remaining > 0 {
        let chunk = volume.read(&mut fd, remaining.min(512) as usize)?;
        if chunk.is_empty() {
            break;
        }
        if hex {
            let line: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
            println!("{}", line.trim_end());
        } else {
            print!("{}", String::from_utf8_lossy(&chunk));
        }
        remaining -= chunk.len() as u64;
    }
    if !hex {
        println!();
    }
    Ok(())
}

fn stat(volume: &mut Fat32Volume, path: &str) -> Result<()> {
    let stat = volume.stat(path)?;
    let entry = &stat.entry;
    let attrs = entry.attributes();

    println!("name         :  {}", short_name_to_string(&entry.name));
    let mut names = Vec::new();
    for (bit, label) in [
        (FileAttributes::READ_ONLY, "RONLY"),
        (FileAttributes::HIDDEN, "Hidden"),
        (FileAttributes::SYSTEM, "System"),
        (FileAttributes::VOLUME_LABEL, "Volume"),
        (FileAttributes::DIRECTORY, "Directory"),
        (FileAttributes::ARCHIVE, "Archive"),
    ] {
        if attrs.contains(bit) {
            names.push(label);
        }
    }
    println!("attr         :  {}", names.join(" | "));
    println!("size         :  {}", entry.file_size);

    let cluster = entry.first_cluster();
    let lba = volume.geometry().cluster_to_lba(cluster);
    let byte_offset = lba * volume.geometry().bytes_per_sector as u64;
    println!("cluster      :  {}", cluster);
    println!("data LBA     :  {} - {}:{:#x}", lba, byte_offset, byte_offset);

    let chain: Vec<String> = stat.chain.iter().map(u32::to_string).collect();
    println!("chain        :  {} -> [EOF]", chain.join(" -> "));
    Ok(())
}

fn cp(volume: &mut Fat32Volume, args: &Args, src: &str, dst: &str) -> Result<()> {
    // a directory destination means "copy under it, keeping the name"
    let src_name = src.trim_end_matches('/').rsplit('/').next().unwrap_or(src);
    let dest = match volume.resolve_path(dst) {
        Ok(entry) if entry.is_directory() => {
            format!("{}/{}", dst.trim_end_matches('/'), src_name)
        }
        Ok(_) => dst.to_string(),
        Err(_) => dst.to_string(),
    };

    if volume.resolve_path(&dest).is_err() {
        volume.create_file(&dest)?;
    }

    if args.flag("-ex") {
        copy_from_host(volume, src, &dest)
    } else {
        copy_within(volume, src, &dest)
    }
}

fn copy_from_host(volume: &mut Fat32Volume, host_path: &str, dest: &str) -> Result<()> {
    let mut fd = volume.open(dest)?;
    if fd.file_size() > 0 {
        volume.truncate(&mut fd)?;
    }

    let cluster_size = volume.geometry().cluster_size as usize;
    let mut source = File::open(host_path)?;
    let mut buf = vec![0u8; cluster_size];
    loop {
        let got = source.read(&mut buf)?;
        if got == 0 {
            break;
        }
        let outcome = volume.write(&mut fd, &buf[..got])?;
        if !outcome.complete {
            eprintln!("volume full, copied {} bytes", fd.cursor);
            break;
        }
    }
    Ok(())
}

fn copy_within(volume: &mut Fat32Volume, src: &str, dest: &str) -> Result<()> {
    let mut src_fd = volume.open(src)?;
    let mut dst_fd = volume.open(dest)?;
    if dst_fd.file_size() > 0 {
        volume.truncate(&mut dst_fd)?;
    }

    let cluster_size = volume.geometry().cluster_size as usize;
    loop {
        let chunk = volume.read(&mut src_fd, cluster_size)?;
        if chunk.is_empty() {
            break;
        }
        let outcome = volume.write(&mut dst_fd, &chunk)?;
        if !outcome.complete {
            eprintln!("volume full, copied {} bytes", dst_fd.cursor);
            break;
        }
    }
    Ok(())
}
