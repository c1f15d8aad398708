//! ntfs-mount-core: NTFS volume management engine.
//!
//! This library discovers NTFS volumes on attached block devices, mounts
//! and unmounts them (read-only or read-write) through an external driver,
//! and tracks what it has mounted. It is exposed to Rust callers through
//! [`Context`] and to C/Swift hosts through the [`ffi`] module.
//!
//! # Modules
//!
//! - [`context`]: The session object that ties everything together
//! - [`disk`]: Device enumeration using `lsblk` and NTFS volume metadata
//! - [`mount`]: Mount backend (`mount -t ntfs3` / `ntfs-3g`) and its guards
//! - [`mounttab`]: OS mount table queries (`/proc/self/mountinfo`)
//! - [`tracker`]: Mount state of every device seen by a context
//! - [`executor`]: Privileged command execution (pkexec/sudo)
//! - [`status`]: Boundary error codes and the last-error slot
//! - [`config`]: Engine configuration
//! - [`ffi`]: C boundary
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use ntfs_mount_core::Context;
//!
//! let mut ctx = Context::new().unwrap();
//!
//! // Find the first NTFS volume and mount it read-write
//! let disks = ctx.scan_disks().unwrap();
//! if let Some(disk) = disks.first() {
//!     if ctx.mount(disk.device_path(), "/mnt/windows", true).is_err() {
//!         eprintln!("mount failed: {}", ctx.last_error());
//!     }
//! }
//!
//! ctx.destroy();
//! ```

pub mod config;
pub mod context;
pub mod disk;
pub mod error;
pub mod executor;
pub mod ffi;
pub mod logging;
pub mod mount;
pub mod mounttab;
pub mod status;
pub mod tracker;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::EngineConfig;
pub use context::Context;
pub use disk::DiskRecord;
pub use error::{Error, Result};
pub use executor::PrivilegeEscalation;
pub use mount::MountDriver;
pub use status::ErrorCode;
pub use tracker::MountState;
