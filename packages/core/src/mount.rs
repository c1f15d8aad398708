//! Mount backend adapter.
//!
//! [`MountBackend`] is the black-box NTFS driver invocation (`mount -t ntfs3`
//! or `ntfs-3g`, and `umount`). [`MountAdapter`] wraps a backend with the
//! checks that must hold around it: the mount point is an existing empty
//! directory, the device is not mounted yet, and a read-write request is
//! never silently downgraded to read-only. Every backend failure leaves
//! this module already translated into the engine's error taxonomy.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::ExecutionContext;
use crate::mounttab::MountTable;
use crate::status::describe;

/// NTFS driver used to mount volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountDriver {
    /// In-kernel ntfs3 driver.
    #[serde(rename = "ntfs3")]
    Ntfs3,
    /// FUSE-based ntfs-3g driver.
    #[default]
    #[serde(rename = "ntfs-3g")]
    Ntfs3g,
}

impl MountDriver {
    pub fn name(self) -> &'static str {
        match self {
            MountDriver::Ntfs3 => "ntfs3",
            MountDriver::Ntfs3g => "ntfs-3g",
        }
    }
}

impl FromStr for MountDriver {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ntfs3" => Ok(MountDriver::Ntfs3),
            "ntfs-3g" | "ntfs3g" => Ok(MountDriver::Ntfs3g),
            other => Err(format!("unknown NTFS driver '{}'", other)),
        }
    }
}

/// A single mount invocation.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    pub device: &'a str,
    pub mount_point: &'a Path,
    pub read_write: bool,
}

/// The external component that performs the actual mount/unmount.
pub trait MountBackend: Send {
    fn mount(&self, request: &MountRequest<'_>) -> Result<()>;

    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// [`MountBackend`] that shells out to the configured driver.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    driver: MountDriver,
    exec: ExecutionContext,
    extra_options: Vec<String>,
    privileged: bool,
}

impl CommandBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            driver: config.driver,
            exec: ExecutionContext::with_escalation(config.escalation),
            extra_options: config.extra_options.clone(),
            privileged: nix::unistd::Uid::effective().is_root(),
        }
    }

    /// Read-write mounts need root, either directly or through escalation.
    fn can_write(&self) -> bool {
        self.privileged || self.exec.escalates()
    }

    /// Program and arguments for a mount request.
    fn mount_command(&self, request: &MountRequest<'_>) -> (&'static str, Vec<String>) {
        let mut options = vec![if request.read_write { "rw" } else { "ro" }.to_string()];
        options.extend(self.extra_options.iter().cloned());
        let options = options.join(",");

        let device = request.device.to_string();
        let mount_point = request.mount_point.display().to_string();

        match self.driver {
            MountDriver::Ntfs3 => (
                "mount",
                vec![
                    "-t".to_string(),
                    "ntfs3".to_string(),
                    "-o".to_string(),
                    options,
                    device,
                    mount_point,
                ],
            ),
            MountDriver::Ntfs3g => (
                "ntfs-3g",
                vec!["-o".to_string(), options, device, mount_point],
            ),
        }
    }
}

impl MountBackend for CommandBackend {
    fn mount(&self, request: &MountRequest<'_>) -> Result<()> {
        if request.read_write && !self.can_write() {
            return Err(Error::PermissionDenied {
                message: "read-write mounts require root; run as root or configure pkexec/sudo escalation"
                    .to_string(),
            });
        }

        let (program, args) = self.mount_command(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(command = ?self.exec.command_line(program, &args), "running mount backend");

        let output = self.exec.run_privileged(program, &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    program,
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(classify_mount_failure(request, &message));
        }

        if request.read_write && reports_read_only_fallback(&format!("{}\n{}", stdout, stderr)) {
            if let Err(e) = self.unmount(request.mount_point) {
                warn!(mount_point = %request.mount_point.display(), error = %describe(&e),
                    "failed to undo read-only fallback mount");
            }
            return Err(Error::ReadOnlyFallback {
                device: request.device.to_string(),
            });
        }

        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let target = mount_point.display().to_string();
        let output = self.exec.run_privileged("umount", &[&target])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_unmount_failure(mount_point, &stderr));
        }

        Ok(())
    }
}

/// Checks if an error message indicates a dirty NTFS volume.
fn is_dirty_volume_error(stderr: &str) -> bool {
    let dirty_indicators = [
        "volume is dirty",
        "Volume is dirty",
        "force flag is not set",
        "The disk contains an unclean file system",
        "Windows is hibernated",
        "metadata kept in Windows cache",
    ];

    dirty_indicators
        .iter()
        .any(|indicator| stderr.contains(indicator))
}

/// Checks if driver output says it mounted read-only instead of read-write.
fn reports_read_only_fallback(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["falling back to read-only", "trying read-only", "mounted read-only"]
        .iter()
        .any(|indicator| lower.contains(indicator))
}

/// Translates a failed mount's diagnostics into the error taxonomy.
fn classify_mount_failure(request: &MountRequest<'_>, message: &str) -> Error {
    let device = request.device.to_string();
    let lower = message.to_lowercase();

    if is_dirty_volume_error(message) {
        return Error::DirtyVolume { device };
    }
    if ["must be superuser", "permission denied", "operation not permitted", "only root"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return Error::PermissionDenied {
            message: message.to_string(),
        };
    }
    if lower.contains("already mounted") {
        return Error::AlreadyMounted {
            device,
            mount_point: request.mount_point.to_path_buf(),
        };
    }
    if lower.contains("mount point does not exist") {
        return Error::MountPoint {
            path: request.mount_point.to_path_buf(),
            reason: "does not exist".to_string(),
        };
    }
    if ["does not exist", "no such file or directory", "failed to access volume"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return Error::DeviceNotFound { device };
    }
    if lower.contains("ntfs signature is missing") || lower.contains("not a valid ntfs") {
        return Error::NotNtfs {
            device,
            reason: message.to_string(),
        };
    }

    Error::Mount {
        device,
        message: message.to_string(),
    }
}

/// Translates a failed unmount's diagnostics into the error taxonomy.
fn classify_unmount_failure(mount_point: &Path, message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("not mounted") || lower.contains("no mount point specified") {
        return Error::NotMounted {
            path: mount_point.to_path_buf(),
        };
    }
    Error::Unmount {
        path: mount_point.to_path_buf(),
        message: if message.is_empty() {
            "umount failed".to_string()
        } else {
            message.to_string()
        },
    }
}

/// Validates that a mount point is an existing, empty directory.
///
/// The engine never creates or removes mount points.
pub fn check_mount_point(path: &Path) -> Result<()> {
    let invalid = |reason: &str| Error::MountPoint {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(invalid("does not exist"));
        }
        Err(e) => return Err(invalid(&e.to_string())),
    };
    if !metadata.is_dir() {
        return Err(invalid("not a directory"));
    }

    let mut entries = fs::read_dir(path).map_err(|e| invalid(&e.to_string()))?;
    if entries.next().is_some() {
        return Err(invalid("directory is not empty"));
    }

    Ok(())
}

/// Guards a [`MountBackend`] with mount point, conflict and downgrade checks.
pub struct MountAdapter {
    backend: Box<dyn MountBackend>,
    table: Arc<dyn MountTable>,
}

impl MountAdapter {
    pub fn new(backend: Box<dyn MountBackend>, table: Arc<dyn MountTable>) -> Self {
        Self { backend, table }
    }

    /// Mounts `device` at `mount_point`.
    pub fn mount(&self, device: &str, mount_point: &Path, read_write: bool) -> Result<()> {
        check_mount_point(mount_point)?;

        let table_error = |e: Error| Error::Mount {
            device: device.to_string(),
            message: describe(&e),
        };
        if let Some(entry) = self
            .table
            .find_by_device(Path::new(device))
            .map_err(table_error)?
        {
            return Err(Error::AlreadyMounted {
                device: device.to_string(),
                mount_point: entry.mount_point,
            });
        }
        if let Some(entry) = self
            .table
            .find_by_mount_point(mount_point)
            .map_err(table_error)?
        {
            return Err(Error::MountPointBusy {
                path: mount_point.to_path_buf(),
                source_device: entry.source,
            });
        }

        self.backend.mount(&MountRequest {
            device,
            mount_point,
            read_write,
        })?;

        if read_write {
            self.verify_writable(device, mount_point)?;
        }
        Ok(())
    }

    /// Unmounts whatever is mounted at `mount_point`.
    pub fn unmount(&self, mount_point: &Path) -> Result<()> {
        let mounted = self
            .table
            .find_by_mount_point(mount_point)
            .map_err(|e| Error::Unmount {
                path: mount_point.to_path_buf(),
                message: describe(&e),
            })?;
        if mounted.is_none() {
            return Err(Error::NotMounted {
                path: mount_point.to_path_buf(),
            });
        }

        self.backend.unmount(mount_point)
    }

    /// Confirms a read-write mount really is writable, undoing it otherwise.
    ///
    /// A mount whose mode cannot be confirmed is undone as well.
    fn verify_writable(&self, device: &str, mount_point: &Path) -> Result<()> {
        let failure = match self.table.find_by_mount_point(mount_point) {
            Ok(Some(entry)) if !entry.read_only => return Ok(()),
            Ok(Some(_)) => Error::ReadOnlyFallback {
                device: device.to_string(),
            },
            Ok(None) => Error::Mount {
                device: device.to_string(),
                message: format!("new mount not visible at {}", mount_point.display()),
            },
            Err(e) => Error::Mount {
                device: device.to_string(),
                message: format!("could not verify mount mode: {}", describe(&e)),
            },
        };

        if let Err(e) = self.backend.unmount(mount_point) {
            warn!(mount_point = %mount_point.display(), error = %describe(&e),
                "failed to undo unverified mount");
        }
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PrivilegeEscalation;
    use crate::status::ErrorCode;
    use crate::testing::{FakeBackend, FakeMountTable};

    fn request<'a>(mount_point: &'a Path, read_write: bool) -> MountRequest<'a> {
        MountRequest {
            device: "/dev/sdb1",
            mount_point,
            read_write,
        }
    }

    fn backend(driver: MountDriver, privileged: bool) -> CommandBackend {
        CommandBackend {
            driver,
            exec: ExecutionContext::new(),
            extra_options: vec!["uid=1000".to_string()],
            privileged,
        }
    }

    #[test]
    fn test_mount_command_ntfs3() {
        let mp = Path::new("/mnt/games");
        let (program, args) = backend(MountDriver::Ntfs3, true).mount_command(&request(mp, true));
        assert_eq!(program, "mount");
        assert_eq!(
            args,
            vec!["-t", "ntfs3", "-o", "rw,uid=1000", "/dev/sdb1", "/mnt/games"]
        );
    }

    #[test]
    fn test_mount_command_ntfs3g_read_only() {
        let mp = Path::new("/mnt/games");
        let (program, args) =
            backend(MountDriver::Ntfs3g, true).mount_command(&request(mp, false));
        assert_eq!(program, "ntfs-3g");
        assert_eq!(args, vec!["-o", "ro,uid=1000", "/dev/sdb1", "/mnt/games"]);
    }

    #[test]
    fn test_read_write_without_privilege_is_denied() {
        let mp = Path::new("/mnt/games");
        let err = backend(MountDriver::Ntfs3g, false)
            .mount(&request(mp, true))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[test]
    fn test_escalation_grants_write() {
        let mut backend = backend(MountDriver::Ntfs3g, false);
        assert!(!backend.can_write());
        backend.exec = ExecutionContext::with_escalation(PrivilegeEscalation::Pkexec);
        assert!(backend.can_write());
    }

    #[test]
    fn test_driver_names() {
        assert_eq!("ntfs3".parse::<MountDriver>().unwrap(), MountDriver::Ntfs3);
        assert_eq!("ntfs-3g".parse::<MountDriver>().unwrap(), MountDriver::Ntfs3g);
        assert!("ext4".parse::<MountDriver>().is_err());
        assert_eq!(
            serde_json::to_string(&MountDriver::Ntfs3g).unwrap(),
            "\"ntfs-3g\""
        );
    }

    #[test]
    fn test_is_dirty_volume_error() {
        assert!(is_dirty_volume_error("volume is dirty"));
        assert!(is_dirty_volume_error("Volume is dirty"));
        assert!(is_dirty_volume_error("ntfs3: force flag is not set"));
        assert!(is_dirty_volume_error(
            "The disk contains an unclean file system"
        ));
        assert!(!is_dirty_volume_error("mount successful"));
    }

    #[test]
    fn test_classify_mount_failure() {
        let mp = Path::new("/mnt/games");
        let req = request(mp, true);
        let code = |msg: &str| classify_mount_failure(&req, msg).code();

        assert_eq!(
            code("mount: /mnt/games: must be superuser to use mount."),
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            code("mount: /mnt/games: /dev/sdb1 already mounted on /media/x."),
            ErrorCode::AlreadyMounted
        );
        assert_eq!(
            code("mount: /mnt/games: special device /dev/sdb1 does not exist."),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            code("NTFS signature is missing.\nFailed to mount '/dev/sdb1'"),
            ErrorCode::NotNtfs
        );
        assert_eq!(
            code("Windows is hibernated, refused to mount."),
            ErrorCode::MountFailed
        );
        assert_eq!(
            code("mount: /mnt/games: wrong fs type, bad option, bad superblock"),
            ErrorCode::MountFailed
        );
        assert!(matches!(
            classify_mount_failure(&req, "The disk contains an unclean file system (0, 0)."),
            Error::DirtyVolume { .. }
        ));
    }

    #[test]
    fn test_classify_unmount_failure() {
        let mp = Path::new("/mnt/games");
        assert_eq!(
            classify_unmount_failure(mp, "umount: /mnt/games: target is busy.").code(),
            ErrorCode::MountFailed
        );
        assert_eq!(
            classify_unmount_failure(mp, "umount: /mnt/games: not mounted.").code(),
            ErrorCode::DeviceNotFound
        );
    }

    #[test]
    fn test_read_only_fallback_detection() {
        assert!(reports_read_only_fallback(
            "The NTFS partition is in an unsafe state. Falling back to read-only mount"
        ));
        assert!(!reports_read_only_fallback(""));
    }

    #[test]
    fn test_check_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_mount_point(dir.path()).is_ok());

        let missing = dir.path().join("missing");
        let err = check_mount_point(&missing).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MountFailed);
        assert!(err.to_string().contains("does not exist"));

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(check_mount_point(&file)
            .unwrap_err()
            .to_string()
            .contains("not a directory"));

        // `dir` now holds `file`, so it is no longer empty.
        assert!(check_mount_point(dir.path())
            .unwrap_err()
            .to_string()
            .contains("not empty"));
    }

    #[test]
    fn test_adapter_rejects_device_mounted_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        table.insert("/dev/sdb1", "/media/other", false);
        let backend = FakeBackend::new(table.clone());
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table));

        let err = adapter.mount("/dev/sdb1", dir.path(), true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyMounted);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_adapter_rejects_occupied_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        table.insert("/dev/sdc1", dir.path(), false);
        let backend = FakeBackend::new(table.clone());
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table));

        let err = adapter.mount("/dev/sdb1", dir.path(), false).unwrap_err();
        assert!(matches!(err, Error::MountPointBusy { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_adapter_undoes_read_only_downgrade() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        let backend = FakeBackend::new(table.clone());
        backend.force_read_only(true);
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table.clone()));

        let err = adapter.mount("/dev/sdb1", dir.path(), true).unwrap_err();
        assert!(matches!(err, Error::ReadOnlyFallback { .. }));
        assert!(table.entries().unwrap().is_empty());
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn test_adapter_unmount_requires_mount() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        let backend = FakeBackend::new(table.clone());
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table));

        let err = adapter.unmount(dir.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceNotFound);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_adapter_undoes_mount_missing_from_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        let backend = FakeBackend::new(table.clone());
        backend.invisible_mounts(true);
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table));

        let err = adapter.mount("/dev/sdb1", dir.path(), true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MountFailed);
        assert!(err.to_string().contains("not visible"));
        assert_eq!(
            backend.calls(),
            vec![
                format!("mount /dev/sdb1 {} rw", dir.path().display()),
                format!("unmount {}", dir.path().display()),
            ]
        );

        // Read-only mounts are not verified.
        adapter.mount("/dev/sdb1", dir.path(), false).unwrap();
        assert_eq!(backend.calls().len(), 3);
    }

    #[test]
    fn test_adapter_undoes_mount_when_table_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeMountTable::new();
        let backend = FakeBackend::new(table.clone());
        backend.break_table_on_mount(true);
        let adapter = MountAdapter::new(Box::new(backend.clone()), Arc::new(table.clone()));

        let err = adapter.mount("/dev/sdb1", dir.path(), true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MountFailed);
        assert!(err.to_string().contains("could not verify"));
        assert_eq!(backend.calls().len(), 2);

        table.set_broken(false);
        assert!(table.entries().unwrap().is_empty());
    }
}
