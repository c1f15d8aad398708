//! Device scanning and NTFS classification.
//!
//! Raw block devices come from a [`DeviceSource`] (`lsblk` in production).
//! Each candidate is then opened and parsed with the `ntfs` crate; only
//! devices that classify as NTFS become [`DiskRecord`]s.
//! Devices that cannot be classified are dropped from the result rather
//! than reported, so an empty result is a valid outcome distinct from a
//! failed enumeration.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::Command;

use ntfs::{Ntfs, NtfsError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::mounttab::same_path;
use crate::status::describe;

/// Maximum device path length in bytes.
pub const DEVICE_PATH_MAX: usize = 255;
/// Maximum volume label length in bytes. Longer labels are truncated.
pub const LABEL_MAX: usize = 127;

/// One discovered NTFS volume.
///
/// Records are value snapshots: every scan produces fresh ones and nothing
/// in the engine keeps a reference into a returned collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskRecord {
    device_path: String,
    label: String,
    total_size: u64,
    free_size: u64,
    mounted: bool,
    writable: bool,
    serial_number: u64,
}

impl DiskRecord {
    /// Creates an unmounted record. The label is truncated to [`LABEL_MAX`].
    pub fn new(device_path: impl Into<String>, label: &str, total_size: u64) -> Self {
        Self {
            device_path: device_path.into(),
            label: truncate_label(label),
            total_size,
            free_size: 0,
            mounted: false,
            writable: false,
            serial_number: 0,
        }
    }

    pub fn with_serial_number(mut self, serial_number: u64) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Free bytes. Zero while unmounted, since it is unknown until then.
    pub fn free_size(&self) -> u64 {
        self.free_size
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// NTFS volume serial number. Zero when it could not be determined.
    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    /// Marks the record mounted. `free_size` is clamped to `total_size`.
    pub fn set_mounted(&mut self, writable: bool, free_size: u64) {
        self.mounted = true;
        self.writable = writable;
        self.free_size = free_size.min(self.total_size);
    }

    /// Marks the record unmounted, which also clears writable and free size.
    pub fn set_unmounted(&mut self) {
        self.mounted = false;
        self.writable = false;
        self.free_size = 0;
    }
}

/// Truncates a label to [`LABEL_MAX`] bytes on a character boundary.
fn truncate_label(label: &str) -> String {
    if label.len() <= LABEL_MAX {
        return label.to_string();
    }
    let mut end = LABEL_MAX;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    label[..end].to_string()
}

/// Raw block device record as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    /// Kernel name (e.g. "sdb1").
    pub name: String,
    /// Full device path (e.g. "/dev/sdb1").
    pub path: PathBuf,
    /// Volume label, if the OS knows one.
    pub label: Option<String>,
    /// Filesystem type hint from udev, if any.
    pub fstype: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Filesystem UUID from udev. For NTFS this is the serial number in hex.
    pub uuid: Option<String>,
}

impl RawDevice {
    /// Returns true if the OS already believes this is an NTFS volume.
    pub fn is_ntfs_hint(&self) -> bool {
        self.fstype.as_deref() == Some("ntfs")
    }

    /// Serial number as udev reports it, or zero.
    fn serial_hint(&self) -> u64 {
        self.uuid
            .as_deref()
            .and_then(|uuid| u64::from_str_radix(uuid, 16).ok())
            .unwrap_or(0)
    }
}

/// Seekable byte stream over a device.
pub trait VolumeReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> VolumeReader for T {}

/// OS device layer consumed by the scanner.
pub trait DeviceSource: Send {
    /// Lists candidate block devices (partitions and unpartitioned disks).
    fn enumerate(&self) -> Result<Vec<RawDevice>>;

    /// Opens a device for reading its on-disk metadata.
    fn open(&self, path: &Path) -> io::Result<Box<dyn VolumeReader>>;
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

impl LsblkDevice {
    fn has_children(&self) -> bool {
        self.children.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Partitions always qualify; whole disks and loop devices only when
    /// they carry a filesystem directly (no partition table).
    fn is_candidate(&self) -> bool {
        match self.device_type.as_deref() {
            Some("part") => true,
            Some("disk") | Some("loop") => !self.has_children(),
            _ => false,
        }
    }
}

/// [`DeviceSource`] backed by `lsblk --json --bytes`.
#[derive(Debug, Clone)]
pub struct LsblkSource {
    program: String,
}

impl Default for LsblkSource {
    fn default() -> Self {
        Self {
            program: "lsblk".to_string(),
        }
    }
}

impl LsblkSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceSource for LsblkSource {
    fn enumerate(&self) -> Result<Vec<RawDevice>> {
        let output = Command::new(&self.program)
            .args([
                "--json",
                "--bytes",
                "--output",
                "NAME,LABEL,FSTYPE,SIZE,TYPE,UUID",
            ])
            .output()
            .command_context(&self.program)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::CommandExit {
                command: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_lsblk(&stdout)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn VolumeReader>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Parses `lsblk --json` output into candidate devices, in listing order.
fn parse_lsblk(json: &str) -> Result<Vec<RawDevice>> {
    let lsblk_output: LsblkOutput = serde_json::from_str(json).map_err(|e| Error::LsblkParse {
        message: e.to_string(),
    })?;

    let mut devices = Vec::new();
    collect_devices(&lsblk_output.blockdevices, &mut devices);
    Ok(devices)
}

/// Recursively collect devices from lsblk output, including children (partitions).
fn collect_devices(lsblk_devices: &[LsblkDevice], devices: &mut Vec<RawDevice>) {
    for dev in lsblk_devices {
        if dev.is_candidate() {
            devices.push(RawDevice {
                name: dev.name.clone(),
                path: PathBuf::from(format!("/dev/{}", dev.name)),
                label: dev.label.clone(),
                fstype: dev.fstype.clone(),
                size: dev.size.unwrap_or(0),
                uuid: dev.uuid.clone(),
            });
        }

        if let Some(children) = &dev.children {
            collect_devices(children, devices);
        }
    }
}

/// What the scanner reads from a volume's own metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume size in bytes, from the boot sector.
    pub size: u64,
    pub serial_number: u64,
    /// Name stored in `$Volume`, if it could be read.
    pub label: Option<String>,
}

impl VolumeInfo {
    /// Validates the NTFS boot sector and reads size, serial and volume name.
    ///
    /// A volume whose `$Volume` record cannot be read still classifies as
    /// NTFS; only its `label` is missing then.
    pub fn read<T: Read + Seek>(fs: &mut T) -> std::result::Result<Self, NtfsError> {
        let ntfs = Ntfs::new(fs)?;
        let label = match ntfs.volume_name(fs) {
            Some(Ok(name)) => Some(name.name().to_string_lossy()),
            Some(Err(e)) => {
                debug!(error = %e, "volume name unreadable");
                None
            }
            None => None,
        };
        Ok(Self {
            size: ntfs.size(),
            serial_number: ntfs.serial_number(),
            label,
        })
    }
}

/// Enumerates devices and classifies NTFS volumes.
pub struct DeviceScanner {
    source: Box<dyn DeviceSource>,
}

impl DeviceScanner {
    pub fn new(source: Box<dyn DeviceSource>) -> Self {
        Self { source }
    }

    /// Returns every NTFS volume currently attached, in discovery order.
    ///
    /// Records come back unmounted; mount state is overlaid by the caller.
    pub fn scan(&self) -> Result<Vec<DiskRecord>> {
        let devices = self.enumerate()?;
        let records: Vec<DiskRecord> = devices
            .iter()
            .filter_map(|raw| match self.classify(raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(device = %raw.path.display(), reason = %describe(&e), "excluded from scan");
                    None
                }
            })
            .collect();

        debug!(candidates = devices.len(), ntfs = records.len(), "scan complete");
        Ok(records)
    }

    /// Independently verifies a single device path.
    ///
    /// Fails with `DeviceNotFound` if the OS does not list the device and
    /// with `NotNtfs` if it cannot be classified as NTFS.
    pub fn probe(&self, device_path: &str) -> Result<DiskRecord> {
        let path = Path::new(device_path);
        let devices = self.enumerate()?;
        let raw = devices
            .iter()
            .find(|d| same_path(&d.path, path))
            .ok_or_else(|| Error::DeviceNotFound {
                device: device_path.to_string(),
            })?;

        let mut record = self.classify(raw)?;
        // Keep the caller's spelling of the path (it may be a by-uuid link).
        record.device_path = device_path.to_string();
        Ok(record)
    }

    fn enumerate(&self) -> Result<Vec<RawDevice>> {
        self.source.enumerate().map_err(|e| match e {
            Error::BackendUnavailable { .. } => e,
            other => Error::BackendUnavailable {
                message: describe(&other),
            },
        })
    }

    fn classify(&self, raw: &RawDevice) -> Result<DiskRecord> {
        let device = raw.path.display().to_string();
        if device.len() > DEVICE_PATH_MAX {
            return Err(Error::InvalidDevice {
                value: device,
                reason: format!("device path longer than {} bytes", DEVICE_PATH_MAX),
            });
        }
        let udev_label = raw.label.as_deref().unwrap_or_default();

        let mut reader = match self.source.open(&raw.path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && raw.is_ntfs_hint() => {
                debug!(device = %device, "device unreadable, trusting udev metadata");
                return Ok(DiskRecord::new(device, udev_label, raw.size)
                    .with_serial_number(raw.serial_hint()));
            }
            Err(e) => {
                return Err(Error::NotNtfs {
                    device,
                    reason: format!("device unreadable: {}", e),
                });
            }
        };

        let volume = VolumeInfo::read(&mut reader).map_err(|e| Error::NotNtfs {
            device: device.clone(),
            reason: e.to_string(),
        })?;
        if volume.size == 0 {
            return Err(Error::NotNtfs {
                device,
                reason: "volume reports zero sectors".to_string(),
            });
        }

        // The partition can be larger than the volume, never smaller.
        let total_size = match raw.size {
            0 => volume.size,
            size => volume.size.min(size),
        };
        let label = volume
            .label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or(udev_label);

        Ok(DiskRecord::new(device, label, total_size).with_serial_number(volume.serial_number))
    }
}
