//! Mount state tracking.
//!
//! The tracker is the engine's own record of what it has mounted. It only
//! changes through explicit `record_*` calls made after a backend operation
//! has finished; it never looks at the OS to infer anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::status::ErrorCode;

/// Tracked state of one device path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    Mounted { mount_point: PathBuf, writable: bool },
    MountInProgress,
    /// The last mount attempt failed with this code.
    Failed { kind: ErrorCode },
}

impl MountState {
    pub fn name(&self) -> &'static str {
        match self {
            MountState::Unmounted => "unmounted",
            MountState::Mounted { .. } => "mounted",
            MountState::MountInProgress => "mount-in-progress",
            MountState::Failed { .. } => "failed",
        }
    }

    pub fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted { .. })
    }
}

/// Map from device path to its single current [`MountState`].
#[derive(Debug, Default)]
pub struct MountTracker {
    states: HashMap<String, MountState>,
}

impl MountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a device as `Unmounted`. Known devices keep their state.
    pub fn register(&mut self, device: &str) {
        self.states
            .entry(device.to_string())
            .or_insert(MountState::Unmounted);
    }

    /// Marks a mount attempt as started.
    pub fn begin_mount(&mut self, device: &str) -> Result<()> {
        self.transition(device, "mount-in-progress", |state| match state {
            MountState::Unmounted | MountState::Failed { .. } => Some(MountState::MountInProgress),
            _ => None,
        })
    }

    /// Records a successful mount.
    pub fn record_mount(&mut self, device: &str, mount_point: &Path, writable: bool) -> Result<()> {
        self.transition(device, "mounted", |state| match state {
            MountState::Unmounted | MountState::Failed { .. } | MountState::MountInProgress => {
                Some(MountState::Mounted {
                    mount_point: mount_point.to_path_buf(),
                    writable,
                })
            }
            MountState::Mounted { .. } => None,
        })
    }

    /// Records a failed mount attempt. A device that is already mounted
    /// stays mounted.
    pub fn record_failed(&mut self, device: &str, kind: ErrorCode) {
        let state = self
            .states
            .entry(device.to_string())
            .or_insert(MountState::Unmounted);
        if !state.is_mounted() {
            *state = MountState::Failed { kind };
        }
    }

    /// Records a successful unmount.
    pub fn record_unmount(&mut self, device: &str) -> Result<()> {
        self.transition(device, "unmounted", |state| match state {
            MountState::Mounted { .. } => Some(MountState::Unmounted),
            _ => None,
        })
    }

    /// Current state of a device, or `None` if it has never been seen.
    pub fn state_of(&self, device: &str) -> Option<&MountState> {
        self.states.get(device)
    }

    /// True only for devices this session has mounted.
    pub fn is_mounted(&self, device: &str) -> bool {
        self.states.get(device).is_some_and(MountState::is_mounted)
    }

    /// Finds the device this session mounted at `mount_point`.
    pub fn device_at(&self, mount_point: &Path) -> Option<&str> {
        self.mounted()
            .find(|(_, mp, _)| *mp == mount_point)
            .map(|(device, _, _)| device)
    }

    /// Devices currently mounted by this session.
    pub fn mounted(&self) -> impl Iterator<Item = (&str, &Path, bool)> {
        self.states.iter().filter_map(|(device, state)| match state {
            MountState::Mounted {
                mount_point,
                writable,
            } => Some((device.as_str(), mount_point.as_path(), *writable)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn transition(
        &mut self,
        device: &str,
        to: &'static str,
        next: impl FnOnce(&MountState) -> Option<MountState>,
    ) -> Result<()> {
        let state = self
            .states
            .entry(device.to_string())
            .or_insert(MountState::Unmounted);
        match next(state) {
            Some(new_state) => {
                *state = new_state;
                Ok(())
            }
            None => Err(Error::InvalidTransition {
                device: device.to_string(),
                from: state.name().to_string(),
                to,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_lifecycle() {
        let mut tracker = MountTracker::new();
        tracker.register("/dev/sdb1");
        assert_eq!(tracker.state_of("/dev/sdb1"), Some(&MountState::Unmounted));

        tracker.begin_mount("/dev/sdb1").unwrap();
        assert_eq!(
            tracker.state_of("/dev/sdb1"),
            Some(&MountState::MountInProgress)
        );

        tracker
            .record_mount("/dev/sdb1", Path::new("/mnt/games"), true)
            .unwrap();
        assert!(tracker.is_mounted("/dev/sdb1"));
        assert_eq!(tracker.device_at(Path::new("/mnt/games")), Some("/dev/sdb1"));

        tracker.record_unmount("/dev/sdb1").unwrap();
        assert!(!tracker.is_mounted("/dev/sdb1"));
        assert_eq!(tracker.device_at(Path::new("/mnt/games")), None);
    }

    #[test]
    fn test_mount_only_from_unmounted_or_failed() {
        let mut tracker = MountTracker::new();
        tracker.record_failed("/dev/sdb1", ErrorCode::PermissionDenied);
        assert_eq!(
            tracker.state_of("/dev/sdb1"),
            Some(&MountState::Failed {
                kind: ErrorCode::PermissionDenied
            })
        );

        tracker
            .record_mount("/dev/sdb1", Path::new("/mnt/a"), false)
            .unwrap();
        let err = tracker
            .record_mount("/dev/sdb1", Path::new("/mnt/b"), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(tracker.device_at(Path::new("/mnt/a")), Some("/dev/sdb1"));
        assert!(tracker.begin_mount("/dev/sdb1").is_err());
    }

    #[test]
    fn test_unmount_only_from_mounted() {
        let mut tracker = MountTracker::new();
        tracker.register("/dev/sdb1");
        assert!(tracker.record_unmount("/dev/sdb1").is_err());
        assert_eq!(tracker.state_of("/dev/sdb1"), Some(&MountState::Unmounted));
    }

    #[test]
    fn test_failure_does_not_unmount() {
        let mut tracker = MountTracker::new();
        tracker
            .record_mount("/dev/sdb1", Path::new("/mnt/a"), true)
            .unwrap();
        tracker.record_failed("/dev/sdb1", ErrorCode::MountFailed);
        assert!(tracker.is_mounted("/dev/sdb1"));
    }

    #[test]
    fn test_register_keeps_existing_state() {
        let mut tracker = MountTracker::new();
        tracker
            .record_mount("/dev/sdb1", Path::new("/mnt/a"), true)
            .unwrap();
        tracker.register("/dev/sdb1");
        assert!(tracker.is_mounted("/dev/sdb1"));
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.is_empty());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = MountState::Failed {
            kind: ErrorCode::NotNtfs,
        };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"state":"failed","kind":"not_ntfs"}"#
        );
    }
}
