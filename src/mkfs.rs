//! The `newfs-mkfs` tool creates a filesystem on a device.
//!
//! Mounting formats the device when no filesystem signature is present;
//! unmounting writes the fresh metadata out. The tool prints the resulting
//! layout either way.

use newfs::layout::{DATA_BLOCKS_PER_INODE, NAME_MAX};
use newfs::{MountOptions, NewFs};
use std::env::ArgsOs;
use std::fmt;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the device file on which the filesystem will be created.
    device_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args.skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => {
                res.device_path = Some(PathBuf::from(arg));
            }
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" newfs-mkfs [-h] device");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -h:\t\tprints usage");
    eprintln!(" device:\tthe device or image file to create the filesystem on");
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("newfs-mkfs: error: {msg}");
    exit(1);
}

fn main() {
    env_logger::init();

    let args = parse_args(std::env::args_os());
    if args.help {
        print_usage();
        exit(0);
    }
    let device = args.device_path.unwrap_or_else(|| {
        print_usage();
        exit(1);
    });

    let fs = NewFs::mount(&MountOptions {
        device: device.clone(),
    })
    .unwrap_or_else(|e| {
        error(format_args!("{}: {e}", device.display()));
    });

    println!("{}:", device.display());
    println!(" disk size:\t{} bytes", fs.disk_size());
    println!(" block size:\t{} bytes", fs.block_size());
    println!(" inodes:\t{} ({} allocated)", fs.max_inodes(), fs.allocated_inodes());
    println!(
        " data blocks:\t{} ({} allocated)",
        fs.max_data_blocks(),
        fs.allocated_data_blocks()
    );
    println!(" name length:\t{NAME_MAX} bytes max");
    println!(
        " file extent:\t{} blocks max",
        DATA_BLOCKS_PER_INODE
    );

    fs.umount().unwrap_or_else(|e| {
        error(format_args!("{}: {e}", device.display()));
    });
}
