//! C boundary for the engine.
//!
//! Mirrors `include/ntfs_mount.h`. Every function takes the opaque
//! [`NtfsMountContext`] handle returned by [`ntfs_mount_init`]; status codes
//! are the raw values of [`ErrorCode`].

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use nix::libc;
use tracing::error;

use crate::context::Context;
use crate::disk::DiskRecord;
use crate::error::{Error, Result};
use crate::logging;
use crate::status::{ErrorCode, describe};

/// Error codes
pub const NTFS_MOUNT_SUCCESS: c_int = ErrorCode::Success as c_int;
pub const NTFS_MOUNT_ERR_INVALID_DEVICE: c_int = ErrorCode::InvalidDevice as c_int;
pub const NTFS_MOUNT_ERR_MOUNT_FAILED: c_int = ErrorCode::MountFailed as c_int;
pub const NTFS_MOUNT_ERR_PERMISSION_DENIED: c_int = ErrorCode::PermissionDenied as c_int;
pub const NTFS_MOUNT_ERR_ALREADY_MOUNTED: c_int = ErrorCode::AlreadyMounted as c_int;
pub const NTFS_MOUNT_ERR_NOT_NTFS: c_int = ErrorCode::NotNtfs as c_int;
pub const NTFS_MOUNT_ERR_DEVICE_NOT_FOUND: c_int = ErrorCode::DeviceNotFound as c_int;
pub const NTFS_MOUNT_ERR_BACKEND_UNAVAILABLE: c_int = ErrorCode::BackendUnavailable as c_int;
pub const NTFS_MOUNT_ERR_INIT_FAILED: c_int = ErrorCode::InitFailed as c_int;

/// Size of [`NtfsDiskInfo::device_path`], including the terminating NUL.
pub const DEVICE_PATH_BUF: usize = 256;
/// Size of [`NtfsDiskInfo::volume_label`], including the terminating NUL.
pub const VOLUME_LABEL_BUF: usize = 128;

/// Disk information as laid out for C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NtfsDiskInfo {
    pub device_path: [c_char; DEVICE_PATH_BUF],
    pub volume_label: [c_char; VOLUME_LABEL_BUF],
    pub total_size: u64,
    pub free_size: u64,
    pub is_mounted: bool,
    pub is_writable: bool,
    pub serial_number: u64,
}

impl From<&DiskRecord> for NtfsDiskInfo {
    fn from(record: &DiskRecord) -> Self {
        let mut info = NtfsDiskInfo {
            device_path: [0; DEVICE_PATH_BUF],
            volume_label: [0; VOLUME_LABEL_BUF],
            total_size: record.total_size(),
            free_size: record.free_size(),
            is_mounted: record.is_mounted(),
            is_writable: record.is_writable(),
            serial_number: record.serial_number(),
        };
        copy_c_string(&mut info.device_path, record.device_path());
        copy_c_string(&mut info.volume_label, record.label());
        info
    }
}

/// Copies `value` into a fixed buffer, always leaving it NUL-terminated.
fn copy_c_string(buf: &mut [c_char], value: &str) {
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(buf.len().saturating_sub(1));
    for (dst, src) in buf.iter_mut().zip(&bytes[..copy_len]) {
        *dst = *src as c_char;
    }
    if let Some(terminator) = buf.get_mut(copy_len) {
        *terminator = 0;
    }
}

/// Opaque handle to an engine session.
pub struct NtfsMountContext {
    ctx: Context,
    last_error: CString,
}

impl NtfsMountContext {
    fn new(ctx: Context) -> Self {
        Self {
            ctx,
            last_error: CString::default(),
        }
    }

    /// Records a failure found while decoding arguments and returns its code.
    fn reject(&mut self, err: Error) -> c_int {
        self.ctx.record_error(&err);
        err.code().as_raw()
    }
}

fn code_of<T>(result: &Result<T>) -> c_int {
    ErrorCode::from(result).as_raw()
}

/// Converts a list length into the C count type.
fn list_len(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| Error::BackendUnavailable {
        message: format!("{} disks do not fit in the count type", len),
    })
}

/// Decodes a borrowed C string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::InvalidDevice {
            value: String::new(),
            reason: format!("{} is null", what),
        });
    }
    let raw = unsafe { CStr::from_ptr(ptr) };
    raw.to_str().map_err(|_| Error::InvalidDevice {
        value: raw.to_string_lossy().into_owned(),
        reason: format!("{} is not valid UTF-8", what),
    })
}

/// Get the library version
///
/// # Safety
/// Returns a pointer to a static string. Do not free.
#[unsafe(no_mangle)]
pub extern "C" fn ntfs_mount_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Create a new engine context.
///
/// Returns null if the configuration named by `NTFS_MOUNT_CONFIG` cannot be
/// loaded. The handle must be released with [`ntfs_mount_destroy`].
#[unsafe(no_mangle)]
pub extern "C" fn ntfs_mount_init() -> *mut NtfsMountContext {
    logging::init_logging();
    match Context::new() {
        Ok(ctx) => Box::into_raw(Box::new(NtfsMountContext::new(ctx))),
        Err(e) => {
            error!(error = %describe(&e), "failed to initialise context");
            ptr::null_mut()
        }
    }
}

/// Destroy a context and free the handle.
///
/// # Safety
/// - `handle` must be null or a handle returned by `ntfs_mount_init`
/// - The handle must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_destroy(handle: *mut NtfsMountContext) {
    if handle.is_null() {
        return;
    }
    let mut handle = unsafe { Box::from_raw(handle) };
    handle.ctx.destroy();
}

/// Scan for NTFS volumes.
///
/// On success `*disks_out` holds `*count_out` records (null when zero) to be
/// released with [`ntfs_mount_free_disk_list`].
///
/// # Safety
/// - `handle` must be a valid handle
/// - `disks_out` and `count_out` must be valid pointers
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_scan_disks(
    handle: *mut NtfsMountContext,
    disks_out: *mut *mut NtfsDiskInfo,
    count_out: *mut c_int,
) -> c_int {
    if handle.is_null() {
        return NTFS_MOUNT_ERR_INIT_FAILED;
    }
    let handle = unsafe { &mut *handle };
    if disks_out.is_null() || count_out.is_null() {
        return handle.reject(Error::InvalidDevice {
            value: String::new(),
            reason: "output pointer is null".to_string(),
        });
    }
    unsafe {
        *disks_out = ptr::null_mut();
        *count_out = 0;
    }

    let records = match handle.ctx.scan_disks() {
        Ok(records) => records,
        Err(e) => return e.code().as_raw(),
    };
    if records.is_empty() {
        return NTFS_MOUNT_SUCCESS;
    }

    let count = match list_len(records.len()) {
        Ok(count) => count,
        Err(e) => return handle.reject(e),
    };
    let list = unsafe { libc::calloc(records.len(), std::mem::size_of::<NtfsDiskInfo>()) }
        as *mut NtfsDiskInfo;
    if list.is_null() {
        return handle.reject(Error::BackendUnavailable {
            message: "out of memory allocating disk list".to_string(),
        });
    }
    for (index, record) in records.iter().enumerate() {
        unsafe { list.add(index).write(NtfsDiskInfo::from(record)) };
    }

    unsafe {
        *disks_out = list;
        *count_out = count;
    }
    NTFS_MOUNT_SUCCESS
}

/// Free a disk list returned by `ntfs_mount_scan_disks`.
///
/// # Safety
/// `disks` must be null or a list returned by `ntfs_mount_scan_disks` that
/// has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_free_disk_list(disks: *mut NtfsDiskInfo) {
    if !disks.is_null() {
        unsafe { libc::free(disks.cast()) };
    }
}

/// Mount an NTFS volume.
///
/// # Safety
/// - `handle` must be a valid handle
/// - `device_path` and `mount_point` must be valid NUL-terminated strings
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_mount(
    handle: *mut NtfsMountContext,
    device_path: *const c_char,
    mount_point: *const c_char,
    read_write: bool,
) -> c_int {
    if handle.is_null() {
        return NTFS_MOUNT_ERR_INIT_FAILED;
    }
    let handle = unsafe { &mut *handle };
    let device = match unsafe { str_arg(device_path, "device path") } {
        Ok(device) => device,
        Err(e) => return handle.reject(e),
    };
    let mount_point = match unsafe { str_arg(mount_point, "mount point") } {
        Ok(mount_point) => mount_point,
        Err(e) => return handle.reject(e),
    };
    code_of(&handle.ctx.mount(device, mount_point, read_write))
}

/// Take ownership of a volume already mounted at `mount_point`, so that
/// [`ntfs_mount_unmount`] accepts it.
///
/// # Safety
/// - `handle` must be a valid handle
/// - `mount_point` must be a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_adopt(
    handle: *mut NtfsMountContext,
    mount_point: *const c_char,
) -> c_int {
    if handle.is_null() {
        return NTFS_MOUNT_ERR_INIT_FAILED;
    }
    let handle = unsafe { &mut *handle };
    match unsafe { str_arg(mount_point, "mount point") } {
        Ok(mount_point) => code_of(&handle.ctx.adopt(mount_point)),
        Err(e) => handle.reject(e),
    }
}

/// Unmount a volume mounted or adopted through this context.
///
/// # Safety
/// - `handle` must be a valid handle
/// - `mount_point` must be a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_unmount(
    handle: *mut NtfsMountContext,
    mount_point: *const c_char,
) -> c_int {
    if handle.is_null() {
        return NTFS_MOUNT_ERR_INIT_FAILED;
    }
    let handle = unsafe { &mut *handle };
    match unsafe { str_arg(mount_point, "mount point") } {
        Ok(mount_point) => code_of(&handle.ctx.unmount(mount_point)),
        Err(e) => handle.reject(e),
    }
}

/// Check whether a device is mounted, by this context or externally.
///
/// # Safety
/// - `handle` must be a valid handle
/// - `device_path` must be a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_is_mounted(
    handle: *mut NtfsMountContext,
    device_path: *const c_char,
) -> bool {
    if handle.is_null() {
        return false;
    }
    let handle = unsafe { &*handle };
    match unsafe { str_arg(device_path, "device path") } {
        Ok(device) => handle.ctx.is_mounted(device),
        Err(_) => false,
    }
}

/// Get status information for one device.
///
/// # Safety
/// - `handle` must be a valid handle
/// - `device_path` must be a valid NUL-terminated string
/// - `info_out` must point to writable memory for one `NtfsDiskInfo`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_get_status(
    handle: *mut NtfsMountContext,
    device_path: *const c_char,
    info_out: *mut NtfsDiskInfo,
) -> c_int {
    if handle.is_null() {
        return NTFS_MOUNT_ERR_INIT_FAILED;
    }
    let handle = unsafe { &mut *handle };
    if info_out.is_null() {
        return handle.reject(Error::InvalidDevice {
            value: String::new(),
            reason: "output pointer is null".to_string(),
        });
    }
    let device = match unsafe { str_arg(device_path, "device path") } {
        Ok(device) => device,
        Err(e) => return handle.reject(e),
    };

    match handle.ctx.get_status(device) {
        Ok(record) => {
            unsafe { info_out.write(NtfsDiskInfo::from(&record)) };
            NTFS_MOUNT_SUCCESS
        }
        Err(e) => e.code().as_raw(),
    }
}

/// Get the message for the most recent fallible call.
///
/// # Safety
/// - `handle` must be null or a valid handle
/// - The returned string is owned by the handle and valid until the next
///   call on it. Do not free.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntfs_mount_last_error(handle: *mut NtfsMountContext) -> *const c_char {
    if handle.is_null() {
        return c"invalid context handle".as_ptr();
    }
    let handle = unsafe { &mut *handle };
    let message = handle.ctx.last_error().replace('\0', " ");
    handle.last_error = CString::new(message).unwrap_or_default();
    handle.last_error.as_ptr()
}
