//! In-memory OS seams for unit tests.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::disk::{DeviceSource, RawDevice, VolumeReader};
use crate::error::{Error, Result};
use crate::mount::{MountBackend, MountRequest};
use crate::mounttab::{MountEntry, MountTable};

const BOOT_SECTOR_SIZE: usize = 512;

type Sector = std::result::Result<[u8; BOOT_SECTOR_SIZE], io::ErrorKind>;

/// A raw device at `/dev/{name}`, labelled with its name.
pub fn raw_device(name: &str, size: u64, fstype: Option<&str>) -> RawDevice {
    RawDevice {
        name: name.to_string(),
        path: PathBuf::from(format!("/dev/{}", name)),
        label: Some(name.to_uppercase()),
        fstype: fstype.map(str::to_string),
        size,
        uuid: None,
    }
}

/// A valid NTFS boot sector: 512-byte sectors, 4 KiB clusters, 1 KiB file
/// records, MFT at cluster 4.
pub fn ntfs_boot_sector(total_sectors: u64) -> [u8; BOOT_SECTOR_SIZE] {
    let mut sector = [0u8; BOOT_SECTOR_SIZE];
    sector[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    sector[3..11].copy_from_slice(b"NTFS    ");
    sector[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    sector[0x0D] = 8;
    sector[0x15] = 0xF8;
    sector[0x26] = 0x80;
    sector[0x28..0x30].copy_from_slice(&total_sectors.to_le_bytes());
    sector[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
    sector[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
    sector[0x40] = 0xF6;
    sector[0x44] = 1;
    sector[0x48..0x50].copy_from_slice(&0x1234_5678_9ABC_DEF0u64.to_le_bytes());
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

#[derive(Default)]
struct SourceState {
    devices: Vec<(RawDevice, Sector)>,
    unavailable: bool,
}

/// Scriptable [`DeviceSource`]. Clones share state, so devices can be
/// attached or detached after the source has been handed to a scanner.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device: RawDevice, sector: Sector) {
        self.state.lock().unwrap().devices.push((device, sector));
    }

    pub fn remove(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .devices
            .retain(|(device, _)| device.name != name);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

impl DeviceSource for FakeSource {
    fn enumerate(&self) -> Result<Vec<RawDevice>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::BackendUnavailable {
                message: "lsblk not available".to_string(),
            });
        }
        Ok(state.devices.iter().map(|(device, _)| device.clone()).collect())
    }

    /// The image holds only the boot sector.
    fn open(&self, path: &Path) -> io::Result<Box<dyn VolumeReader>> {
        let state = self.state.lock().unwrap();
        match state.devices.iter().find(|(device, _)| device.path == path) {
            Some((_, Ok(sector))) => Ok(Box::new(Cursor::new(sector.to_vec()))),
            Some((_, Err(kind))) => Err(io::Error::from(*kind)),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

#[derive(Default)]
struct TableState {
    entries: Vec<MountEntry>,
    free_bytes: u64,
    broken: bool,
}

/// In-memory [`MountTable`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakeMountTable {
    state: Arc<Mutex<TableState>>,
}

impl FakeMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: &str, mount_point: impl AsRef<Path>, read_only: bool) {
        self.state.lock().unwrap().entries.push(MountEntry {
            source: source.to_string(),
            mount_point: mount_point.as_ref().to_path_buf(),
            fs_type: "fuseblk".to_string(),
            read_only,
        });
    }

    pub fn remove(&self, mount_point: &Path) {
        self.state
            .lock()
            .unwrap()
            .entries
            .retain(|entry| entry.mount_point != mount_point);
    }

    pub fn set_free_bytes(&self, free_bytes: u64) {
        self.state.lock().unwrap().free_bytes = free_bytes;
    }

    /// Makes every query fail as if the table could not be read.
    pub fn set_broken(&self, broken: bool) {
        self.state.lock().unwrap().broken = broken;
    }
}

impl MountTable for FakeMountTable {
    fn entries(&self) -> Result<Vec<MountEntry>> {
        let state = self.state.lock().unwrap();
        if state.broken {
            return Err(Error::MountTableRead {
                path: PathBuf::from("/proc/self/mountinfo"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        Ok(state.entries.clone())
    }

    fn free_bytes(&self, _mount_point: &Path) -> Result<u64> {
        Ok(self.state.lock().unwrap().free_bytes)
    }
}

#[derive(Default)]
struct BackendState {
    calls: Vec<String>,
    fail_mount: Option<fn(&str) -> Error>,
    fail_unmount: Option<fn(&Path) -> Error>,
    force_read_only: bool,
    invisible: bool,
    breaks_table: bool,
}

/// [`MountBackend`] that records calls and mutates a [`FakeMountTable`]
/// the way a real mount would.
#[derive(Clone)]
pub struct FakeBackend {
    table: FakeMountTable,
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new(table: FakeMountTable) -> Self {
        Self {
            table,
            state: Arc::default(),
        }
    }

    /// Backend invocations so far, as `"mount <dev> <mp> rw|ro"` or
    /// `"unmount <mp>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_mount(&self, error: fn(&str) -> Error) {
        self.state.lock().unwrap().fail_mount = Some(error);
    }

    pub fn fail_unmount(&self, error: fn(&Path) -> Error) {
        self.state.lock().unwrap().fail_unmount = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_mount = None;
        state.fail_unmount = None;
    }

    /// Mounts succeed but always land read-only.
    pub fn force_read_only(&self, force: bool) {
        self.state.lock().unwrap().force_read_only = force;
    }

    /// Mounts succeed but never show up in the mount table.
    pub fn invisible_mounts(&self, invisible: bool) {
        self.state.lock().unwrap().invisible = invisible;
    }

    /// The mount table becomes unreadable right after the next mount.
    pub fn break_table_on_mount(&self, breaks: bool) {
        self.state.lock().unwrap().breaks_table = breaks;
    }
}

impl MountBackend for FakeBackend {
    fn mount(&self, request: &MountRequest<'_>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "mount {} {} {}",
            request.device,
            request.mount_point.display(),
            if request.read_write { "rw" } else { "ro" }
        ));
        if let Some(error) = state.fail_mount {
            return Err(error(request.device));
        }
        if !state.invisible {
            let read_only = !request.read_write || state.force_read_only;
            self.table
                .insert(request.device, request.mount_point, read_only);
        }
        if state.breaks_table {
            self.table.set_broken(true);
        }
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("unmount {}", mount_point.display()));
        if let Some(error) = state.fail_unmount {
            return Err(error(mount_point));
        }
        self.table.remove(mount_point);
        Ok(())
    }
}
