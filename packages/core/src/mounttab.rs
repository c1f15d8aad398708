//! OS mount table queries.
//!
//! The engine never infers mount state on its own; when it needs to know
//! what the OS thinks is mounted (devices mounted outside this session,
//! post-mount verification), it asks a [`MountTable`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// Default mount table location on Linux.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of the OS mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount source, usually a device path.
    pub source: String,
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type (e.g. "ntfs3", "fuseblk").
    pub fs_type: String,
    /// True if mounted read-only.
    pub read_only: bool,
}

/// Query interface over the OS mount table.
pub trait MountTable: Send + Sync {
    /// Current mounts, in table order.
    fn entries(&self) -> Result<Vec<MountEntry>>;

    /// Free bytes available on the filesystem mounted at `mount_point`.
    fn free_bytes(&self, mount_point: &Path) -> Result<u64>;

    /// Finds the mount of a device, if it is mounted anywhere.
    fn find_by_device(&self, device: &Path) -> Result<Option<MountEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| same_path(Path::new(&e.source), device)))
    }

    /// Finds what is mounted at a mount point. The last entry wins, since
    /// later mounts shadow earlier ones on the same directory.
    fn find_by_mount_point(&self, mount_point: &Path) -> Result<Option<MountEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| same_path(&e.mount_point, mount_point)))
    }
}

/// Returns true if two paths name the same file.
///
/// Symlinks such as `/dev/disk/by-uuid/...` are resolved when possible.
pub fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// [`MountTable`] backed by `/proc/self/mountinfo` and `statvfs(3)`.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new(MOUNTINFO_PATH)
    }
}

impl ProcMountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MountTable for ProcMountTable {
    fn entries(&self) -> Result<Vec<MountEntry>> {
        let content = fs::read_to_string(&self.path).mount_table_context(&self.path)?;
        Ok(parse_mountinfo(&content))
    }

    fn free_bytes(&self, mount_point: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(mount_point)
            .map_err(std::io::Error::from)
            .mount_table_context(mount_point)?;
        Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
    }
}

/// Parses mountinfo content. Malformed lines are skipped.
///
/// Line format (see proc(5)):
/// `36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue`
pub fn parse_mountinfo(input: &str) -> Vec<MountEntry> {
    input.lines().filter_map(parse_mountinfo_line).collect()
}

fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let (left, right) = line.split_once(" - ")?;

    let left_fields: Vec<&str> = left.split_whitespace().collect();
    let mount_point = left_fields.get(4)?;
    let mount_options = left_fields.get(5)?;

    let mut right_fields = right.split_whitespace();
    let fs_type = right_fields.next()?;
    let source = right_fields.next()?;
    let super_options = right_fields.next().unwrap_or("");

    let read_only = has_option(mount_options, "ro") || has_option(super_options, "ro");

    Some(MountEntry {
        source: unescape_mount_field(source),
        mount_point: PathBuf::from(unescape_mount_field(mount_point)),
        fs_type: fs_type.to_string(),
        read_only,
    })
}

fn has_option(options: &str, name: &str) -> bool {
    options.split(',').any(|opt| opt == name)
}

/// Decodes the octal escapes (`\040` for space) the kernel uses in mountinfo.
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(byte) = u8::from_str_radix(octal, 8) {
                output.push(byte);
                index += 4;
                continue;
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
