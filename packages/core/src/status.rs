//! Error/status reporting.
//!
//! Every failure in the engine ends up as one fixed [`ErrorCode`] plus a
//! freeform message. The message keeps backend detail (command stderr, OS
//! error text) that the code does not carry. [`LastError`] is the
//! per-context slot holding the outcome of the most recent fallible call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Boundary status code. `0` is success, failures are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    /// Malformed or empty device identifier / mount point.
    InvalidDevice = -1,
    /// Backend-level failure not covered by a more specific code.
    MountFailed = -2,
    /// Caller lacks rights for the requested mode.
    PermissionDenied = -3,
    /// Device already mounted, by this engine or externally.
    AlreadyMounted = -4,
    /// Device exists but is not an NTFS volume.
    NotNtfs = -5,
    /// Device path not present on the system.
    DeviceNotFound = -6,
    /// Device enumeration backend unavailable.
    BackendUnavailable = -7,
    /// Context creation failed, or the context was destroyed.
    InitFailed = -8,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::Success,
        ErrorCode::InvalidDevice,
        ErrorCode::MountFailed,
        ErrorCode::PermissionDenied,
        ErrorCode::AlreadyMounted,
        ErrorCode::NotNtfs,
        ErrorCode::DeviceNotFound,
        ErrorCode::BackendUnavailable,
        ErrorCode::InitFailed,
    ];

    /// Returns the integer value used at the C boundary.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Converts a raw boundary value back into a code.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_raw() == raw)
    }

    /// Short fixed description of the code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::InvalidDevice => "invalid device",
            ErrorCode::MountFailed => "mount failed",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::AlreadyMounted => "already mounted",
            ErrorCode::NotNtfs => "not an NTFS volume",
            ErrorCode::DeviceNotFound => "device not found",
            ErrorCode::BackendUnavailable => "device backend unavailable",
            ErrorCode::InitFailed => "context not initialized",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl<T> From<&Result<T>> for ErrorCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ErrorCode::Success,
            Err(err) => err.code(),
        }
    }
}

/// Renders an error together with its source chain.
///
/// SNAFU display strings describe only the outermost context, so the
/// underlying OS error text is appended here.
pub fn describe(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    if message.trim().is_empty() {
        message = err.code().description().to_string();
    }
    message
}

/// Most-recent-result slot owned by a context.
///
/// Overwritten by every fallible call. Not synchronized: concurrent callers
/// sharing one context will observe each other's outcomes.
#[derive(Debug, Clone)]
pub struct LastError {
    code: ErrorCode,
    message: String,
}

impl Default for LastError {
    fn default() -> Self {
        Self {
            code: ErrorCode::Success,
            message: String::new(),
        }
    }
}

impl LastError {
    /// Records the outcome of a call, replacing whatever was there.
    pub fn record<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.clear(),
            Err(err) => self.set(err),
        }
    }

    /// Stores a failure.
    pub fn set(&mut self, err: &Error) {
        self.code = err.code();
        self.message = describe(err);
    }

    /// Resets the slot after a successful call.
    pub fn clear(&mut self) {
        self.code = ErrorCode::Success;
        self.message.clear();
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Message for the last call. Empty after a success.
    pub fn message(&self) -> &str {
        &self.message
    }
}
