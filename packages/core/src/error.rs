//! Unified error types for the ntfs-mount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.
//! Every variant maps onto exactly one [`ErrorCode`] through [`Error::code`],
//! which is the only classification that crosses the engine boundary.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

use crate::status::ErrorCode;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse lsblk JSON output.
    #[snafu(display("failed to parse lsblk output: {message}"))]
    LsblkParse { message: String },

    /// Device enumeration is not possible at all.
    #[snafu(display("device enumeration unavailable: {message}"))]
    BackendUnavailable { message: String },

    /// The OS mount table could not be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file could not be read.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`crate::EngineConfig`].
    #[snafu(display("invalid configuration at {}: {message}", path.display()))]
    ConfigParse { path: PathBuf, message: String },

    /// An operation was issued on a context that has been destroyed.
    #[snafu(display("context has been destroyed"))]
    ContextDestroyed,

    /// Malformed or empty device path / mount point argument.
    #[snafu(display("invalid argument '{value}': {reason}"))]
    InvalidDevice { value: String, reason: String },

    /// Device path not present on the system.
    #[snafu(display("device '{device}' not found. Is it connected?"))]
    DeviceNotFound { device: String },

    /// Device exists but does not carry an NTFS volume.
    #[snafu(display("device '{device}' is not a valid NTFS volume: {reason}"))]
    NotNtfs { device: String, reason: String },

    /// Device is already mounted, by this engine or externally.
    #[snafu(display("device '{device}' is already mounted at {}", mount_point.display()))]
    AlreadyMounted { device: String, mount_point: PathBuf },

    /// The mount point is already occupied by another mount.
    #[snafu(display("mount point {} is already in use by {source_device}", path.display()))]
    MountPointBusy { path: PathBuf, source_device: String },

    /// Caller lacks rights for the requested operation.
    #[snafu(display("permission denied: {message}"))]
    PermissionDenied { message: String },

    /// User cancelled authentication dialog.
    #[snafu(display("authentication cancelled by user"))]
    AuthenticationCancelled,

    /// Privilege escalation tool (pkexec/sudo) not found.
    #[snafu(display(
        "privilege escalation tool '{tool}' not found. Please install it to use this feature."
    ))]
    EscalationToolNotFound { tool: String },

    /// Mount point is missing, not a directory, or not empty.
    #[snafu(display("mount point {} is unusable: {reason}", path.display()))]
    MountPoint { path: PathBuf, reason: String },

    /// Mount operation failed.
    #[snafu(display("failed to mount device '{device}': {message}"))]
    Mount { device: String, message: String },

    /// Device has a dirty NTFS volume.
    #[snafu(display(
        "device '{device}' has a dirty NTFS volume; repair it (e.g. `ntfsfix -d`) or boot Windows and shut down cleanly"
    ))]
    DirtyVolume { device: String },

    /// Backend mounted the volume read-only although read-write was requested.
    #[snafu(display(
        "backend fell back to a read-only mount of '{device}'; read-write was requested"
    ))]
    ReadOnlyFallback { device: String },

    /// No volume is mounted at the given mount point.
    #[snafu(display("no volume mounted at {}", path.display()))]
    NotMounted { path: PathBuf },

    /// Unmount operation failed.
    #[snafu(display("failed to unmount {}: {message}", path.display()))]
    Unmount { path: PathBuf, message: String },

    /// A state transition the tracker does not allow.
    #[snafu(display("cannot move '{device}' from state {from} to {to}"))]
    InvalidTransition {
        device: String,
        from: String,
        to: &'static str,
    },
}

impl Error {
    /// Returns the fixed boundary code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidDevice { .. } => ErrorCode::InvalidDevice,
            Error::DeviceNotFound { .. } | Error::NotMounted { .. } => ErrorCode::DeviceNotFound,
            Error::NotNtfs { .. } => ErrorCode::NotNtfs,
            Error::AlreadyMounted { .. } => ErrorCode::AlreadyMounted,
            Error::PermissionDenied { .. }
            | Error::AuthenticationCancelled
            | Error::EscalationToolNotFound { .. } => ErrorCode::PermissionDenied,
            Error::CommandExecution { .. }
            | Error::CommandExit { .. }
            | Error::MountPointBusy { .. }
            | Error::MountPoint { .. }
            | Error::Mount { .. }
            | Error::DirtyVolume { .. }
            | Error::ReadOnlyFallback { .. }
            | Error::Unmount { .. }
            | Error::InvalidTransition { .. } => ErrorCode::MountFailed,
            Error::LsblkParse { .. }
            | Error::BackendUnavailable { .. }
            | Error::MountTableRead { .. } => ErrorCode::BackendUnavailable,
            Error::ConfigRead { .. } | Error::ConfigParse { .. } | Error::ContextDestroyed => {
                ErrorCode::InitFailed
            }
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for configuration read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_failures_map_to_mount_failed() {
        let err = Error::DirtyVolume {
            device: "/dev/sdb1".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::MountFailed);

        let err = Error::Unmount {
            path: PathBuf::from("/mnt/games"),
            message: "target is busy".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::MountFailed);
    }

    #[test]
    fn test_escalation_failures_map_to_permission_denied() {
        assert_eq!(
            Error::AuthenticationCancelled.code(),
            ErrorCode::PermissionDenied
        );
        let err = Error::EscalationToolNotFound {
            tool: "pkexec".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[test]
    fn test_io_context_keeps_path() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = result.mount_table_context("/proc/self/mountinfo").unwrap_err();
        assert_eq!(err.code(), ErrorCode::BackendUnavailable);
        assert!(err.to_string().contains("/proc/self/mountinfo"));
    }
}
