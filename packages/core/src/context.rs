//! The session object tying the engine together.
//!
//! A [`Context`] owns the scanner, the mount adapter, the mount tracker and
//! the last-error slot. All operations are synchronous and take `&mut self`;
//! callers sharing a context across threads must wrap it in their own lock.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::disk::{DEVICE_PATH_MAX, DeviceScanner, DeviceSource, DiskRecord, LsblkSource};
use crate::error::{Error, Result};
use crate::mount::{CommandBackend, MountAdapter, MountBackend};
use crate::mounttab::{MountEntry, MountTable, ProcMountTable, same_path};
use crate::status::{ErrorCode, LastError, describe};
use crate::tracker::{MountState, MountTracker};

/// Maximum mount point length in bytes.
pub const MOUNT_POINT_MAX: usize = 4095;

/// Everything released by [`Context::destroy`].
struct Engine {
    scanner: DeviceScanner,
    adapter: MountAdapter,
    table: Arc<dyn MountTable>,
    tracker: MountTracker,
    last_scan: Vec<DiskRecord>,
}

/// A volume-management session.
///
/// # Example
///
/// ```no_run
/// use ntfs_mount_core::Context;
///
/// let mut ctx = Context::new()?;
/// for disk in ctx.scan_disks()? {
///     println!("{} {}", disk.device_path(), disk.label());
/// }
/// ctx.destroy();
/// # Ok::<(), ntfs_mount_core::Error>(())
/// ```
pub struct Context {
    config: EngineConfig,
    engine: Option<Engine>,
    last_error: LastError,
}

impl Context {
    /// Creates a context configured from [`crate::config::CONFIG_ENV`].
    pub fn new() -> Result<Self> {
        Ok(Self::with_config(EngineConfig::from_env()?))
    }

    /// Creates a context over the real OS collaborators.
    pub fn with_config(config: EngineConfig) -> Self {
        let table: Arc<dyn MountTable> = Arc::new(ProcMountTable::new(&config.mountinfo_path));
        let backend = Box::new(CommandBackend::new(&config));
        Self::from_parts(config, Box::new(LsblkSource::new()), table, backend)
    }

    /// Creates a context over caller-supplied collaborators.
    pub fn from_parts(
        config: EngineConfig,
        source: Box<dyn DeviceSource>,
        table: Arc<dyn MountTable>,
        backend: Box<dyn MountBackend>,
    ) -> Self {
        debug!(driver = config.driver.name(), escalation = ?config.escalation, "context created");
        Self {
            config,
            engine: Some(Engine {
                scanner: DeviceScanner::new(source),
                adapter: MountAdapter::new(backend, Arc::clone(&table)),
                table,
                tracker: MountTracker::new(),
                last_scan: Vec::new(),
            }),
            last_error: LastError::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Releases the tracker and the adapter. Safe to call more than once.
    ///
    /// Volumes mounted by this session stay mounted.
    pub fn destroy(&mut self) {
        if let Some(engine) = self.engine.take() {
            for (device, mount_point, _) in engine.tracker.mounted() {
                warn!(device, mount_point = %mount_point.display(),
                    "context destroyed while volume is still mounted");
            }
            debug!(tracked = engine.tracker.len(), "context destroyed");
        }
        self.last_error.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.engine.is_none()
    }

    /// Enumerates attached NTFS volumes, including ones mounted elsewhere.
    pub fn scan_disks(&mut self) -> Result<Vec<DiskRecord>> {
        let result = self.engine_mut().and_then(Engine::scan);
        self.last_error.record(&result);
        result
    }

    /// Mounts `device` at `mount_point`, read-write if requested.
    pub fn mount(&mut self, device: &str, mount_point: &str, read_write: bool) -> Result<()> {
        let result = self
            .engine_mut()
            .and_then(|engine| engine.mount(device, mount_point, read_write));
        self.last_error.record(&result);
        result
    }

    /// Takes ownership of a volume already mounted at `mount_point`, for
    /// example by an earlier session, so that [`Context::unmount`] accepts it.
    ///
    /// The OS mount table must list a device at the mount point and that
    /// device must classify as NTFS. A mount point this session already
    /// tracks is left as it is.
    pub fn adopt(&mut self, mount_point: &str) -> Result<()> {
        let result = self
            .engine_mut()
            .and_then(|engine| engine.adopt(mount_point));
        self.last_error.record(&result);
        result
    }

    /// Unmounts a volume this session mounted or adopted.
    pub fn unmount(&mut self, mount_point: &str) -> Result<()> {
        let result = self
            .engine_mut()
            .and_then(|engine| engine.unmount(mount_point));
        self.last_error.record(&result);
        result
    }

    /// Returns true if the device is mounted, by this session or externally.
    ///
    /// Does not touch the last-error slot.
    pub fn is_mounted(&self, device: &str) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|engine| engine.is_mounted(device))
    }

    /// Current record for one device.
    pub fn get_status(&mut self, device: &str) -> Result<DiskRecord> {
        let result = self
            .engine_mut()
            .and_then(|engine| engine.status(device));
        self.last_error.record(&result);
        result
    }

    /// Tracked state of a device, if this session has seen it.
    pub fn state_of(&self, device: &str) -> Option<MountState> {
        self.engine
            .as_ref()
            .and_then(|engine| engine.tracker.state_of(device).cloned())
    }

    /// Message for the most recent fallible call. Empty after a success.
    pub fn last_error(&self) -> &str {
        self.last_error.message()
    }

    pub fn last_error_code(&self) -> ErrorCode {
        self.last_error.code()
    }

    /// Stores a failure detected outside the context (e.g. a bad C argument).
    pub(crate) fn record_error(&mut self, err: &Error) {
        self.last_error.set(err);
    }

    fn engine_mut(&mut self) -> Result<&mut Engine> {
        self.engine.as_mut().ok_or(Error::ContextDestroyed)
    }
}

impl Engine {
    fn scan(&mut self) -> Result<Vec<DiskRecord>> {
        let mut records = self.scanner.scan()?;
        let entries = self.mount_entries();
        for record in &mut records {
            self.tracker.register(record.device_path());
            self.forget_stale_mount(record.device_path())?;
            self.overlay(record, &entries);
        }
        self.last_scan = records.clone();
        Ok(records)
    }

    fn mount(&mut self, device: &str, mount_point: &str, read_write: bool) -> Result<()> {
        validate_device(device)?;
        validate_mount_point(mount_point)?;

        self.forget_stale_mount(device)?;
        if let Some(MountState::Mounted {
            mount_point: current,
            ..
        }) = self.tracker.state_of(device)
        {
            return Err(Error::AlreadyMounted {
                device: device.to_string(),
                mount_point: current.clone(),
            });
        }

        if let Err(e) = self.verify_ntfs(device) {
            self.tracker.record_failed(device, e.code());
            return Err(e);
        }

        let mount_point = Path::new(mount_point);
        self.tracker.begin_mount(device)?;
        match self.adapter.mount(device, mount_point, read_write) {
            Ok(()) => {
                self.tracker.record_mount(device, mount_point, read_write)?;
                info!(device, mount_point = %mount_point.display(), read_write, "volume mounted");
                Ok(())
            }
            Err(e) => {
                self.tracker.record_failed(device, e.code());
                Err(e)
            }
        }
    }

    fn unmount(&mut self, mount_point: &str) -> Result<()> {
        validate_mount_point(mount_point)?;
        let mount_point = Path::new(mount_point);

        let device = self
            .tracker
            .device_at(mount_point)
            .map(str::to_string)
            .ok_or_else(|| Error::NotMounted {
                path: mount_point.to_path_buf(),
            })?;

        match self.adapter.unmount(mount_point) {
            Ok(()) => {
                info!(device, mount_point = %mount_point.display(), "volume unmounted");
            }
            Err(Error::NotMounted { .. }) => {
                warn!(device, mount_point = %mount_point.display(),
                    "volume was already unmounted outside this session");
            }
            // A failed unmount leaves the tracked state as it is.
            Err(e) => return Err(e),
        }
        self.tracker.record_unmount(&device)
    }

    fn adopt(&mut self, mount_point: &str) -> Result<()> {
        validate_mount_point(mount_point)?;
        let mount_point = Path::new(mount_point);
        if self.tracker.device_at(mount_point).is_some() {
            return Ok(());
        }

        let entry = self
            .table
            .find_by_mount_point(mount_point)?
            .ok_or_else(|| Error::NotMounted {
                path: mount_point.to_path_buf(),
            })?;
        let record = self.scanner.probe(&entry.source)?;
        let device = record.device_path();

        self.tracker.register(device);
        self.forget_stale_mount(device)?;
        self.tracker
            .record_mount(device, mount_point, !entry.read_only)?;
        info!(device, mount_point = %mount_point.display(), writable = !entry.read_only,
            "adopted existing mount");
        Ok(())
    }

    /// The OS mount table is authoritative; the tracked state only answers
    /// when the table cannot be read.
    fn is_mounted(&self, device: &str) -> bool {
        if validate_device(device).is_err() {
            return false;
        }
        match self.table.find_by_device(Path::new(device)) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                let tracked = self.tracker.is_mounted(device);
                warn!(device, tracked, error = %describe(&e), "mount table probe failed");
                tracked
            }
        }
    }

    /// Moves a tracked mount back to `Unmounted` once the OS mount table no
    /// longer lists the device.
    fn forget_stale_mount(&mut self, device: &str) -> Result<()> {
        if !self.tracker.is_mounted(device) {
            return Ok(());
        }
        match self.table.find_by_device(Path::new(device)) {
            Ok(None) => {
                warn!(device, "tracked volume was unmounted outside this session");
                self.tracker.record_unmount(device)
            }
            Ok(Some(_)) => Ok(()),
            Err(e) => {
                debug!(device, error = %describe(&e), "cannot confirm tracked mount");
                Ok(())
            }
        }
    }

    fn status(&mut self, device: &str) -> Result<DiskRecord> {
        validate_device(device)?;

        let scanned = self.scanned(device).cloned();
        let mut record = match scanned {
            Some(record) => record,
            None => {
                let record = self.scanner.probe(device)?;
                self.tracker.register(device);
                record
            }
        };
        self.forget_stale_mount(device)?;
        let entries = self.mount_entries();
        self.overlay(&mut record, &entries);
        Ok(record)
    }

    /// The device must be in the last scan or probe as NTFS now.
    fn verify_ntfs(&self, device: &str) -> Result<()> {
        if self.scanned(device).is_some() {
            return Ok(());
        }
        self.scanner.probe(device).map(|_| ())
    }

    fn scanned(&self, device: &str) -> Option<&DiskRecord> {
        self.last_scan
            .iter()
            .find(|record| record.device_path() == device)
    }

    fn mount_entries(&self) -> Vec<MountEntry> {
        self.table.entries().unwrap_or_else(|e| {
            warn!(error = %describe(&e), "mount table unavailable, reporting tracked state only");
            Vec::new()
        })
    }

    /// Fills mount state into a record: tracked state first, OS mount table
    /// for everything else.
    fn overlay(&self, record: &mut DiskRecord, entries: &[MountEntry]) {
        let device = record.device_path();
        let mounted = match self.tracker.state_of(device) {
            Some(MountState::Mounted {
                mount_point,
                writable,
            }) => Some((mount_point.clone(), *writable)),
            _ => entries
                .iter()
                .find(|entry| same_path(Path::new(&entry.source), Path::new(device)))
                .map(|entry| (entry.mount_point.clone(), !entry.read_only)),
        };

        match mounted {
            Some((mount_point, writable)) => {
                let free = self.table.free_bytes(&mount_point).unwrap_or_else(|e| {
                    debug!(mount_point = %mount_point.display(), error = %describe(&e), "free space unknown");
                    0
                });
                record.set_mounted(writable, free);
            }
            None => record.set_unmounted(),
        }
    }
}

fn validate_device(device: &str) -> Result<()> {
    validate_bounded(device, DEVICE_PATH_MAX, "device path")
}

fn validate_mount_point(mount_point: &str) -> Result<()> {
    validate_bounded(mount_point, MOUNT_POINT_MAX, "mount point")
}

fn validate_bounded(value: &str, max: usize, what: &str) -> Result<()> {
    let reason = if value.is_empty() {
        format!("{} is empty", what)
    } else if value.len() > max {
        format!("{} longer than {} bytes", what, max)
    } else if value.contains('\0') {
        format!("{} contains a NUL byte", what)
    } else {
        return Ok(());
    };
    Err(Error::InvalidDevice {
        value: value.chars().take(64).collect(),
        reason,
    })
}
