use std::ffi::CStr;
use std::io;
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use libusb1_sys as libusb;
use libusb1_sys::constants::{
    LIBUSB_ERROR_INTERRUPTED, LIBUSB_ERROR_NO_DEVICE, LIBUSB_ERROR_NOT_FOUND,
    LIBUSB_ERROR_PIPE, LIBUSB_ERROR_TIMEOUT, LIBUSB_TRANSFER_CANCELLED,
    LIBUSB_TRANSFER_ERROR, LIBUSB_TRANSFER_NO_DEVICE, LIBUSB_TRANSFER_OVERFLOW,
    LIBUSB_TRANSFER_STALL, LIBUSB_TRANSFER_TIMED_OUT,
};

#[derive(Copy, Clone)]
pub(crate) struct LibusbCtxPtr(pub(crate) *mut libusb::libusb_context);

unsafe impl Send for LibusbCtxPtr {}
unsafe impl Sync for LibusbCtxPtr {}

/// A raw device handle pointer, sendable across the callback boundary.
#[derive(Copy, Clone)]
pub(crate) struct LibusbHandlePtr(pub(crate) *mut libusb::libusb_device_handle);

unsafe impl Send for LibusbHandlePtr {}
unsafe impl Sync for LibusbHandlePtr {}

/// RAII wrapper owning a libusb context and the background thread that pumps
/// its event loop so asynchronous transfer callbacks fire.
pub struct LibusbContext {
    pub(crate) ptr: LibusbCtxPtr,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LibusbContext {
    pub fn new() -> io::Result<Arc<Self>> {
        let mut ctx = ptr::null_mut();
        let rc = unsafe { libusb::libusb_init(&mut ctx) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }

        let ctx_ptr = LibusbCtxPtr(ctx);
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();

        let handle = std::thread::Builder::new()
            .name("gen4-usb-events".into())
            .spawn(move || {
                let ctx_ptr = ctx_ptr;
                // 1s poll matches the producer's "bounded by a 1s timeout" contract.
                let mut timeval = libc::timeval { tv_sec: 1, tv_usec: 0 };
                while running_thread.load(Ordering::SeqCst) {
                    let rc = unsafe {
                        libusb::libusb_handle_events_timeout_completed(
                            ctx_ptr.0,
                            &mut timeval,
                            ptr::null_mut(),
                        )
                    };
                    if rc == LIBUSB_ERROR_INTERRUPTED {
                        continue;
                    }
                    if rc < 0 && running_thread.load(Ordering::SeqCst) {
                        log::warn!("libusb_handle_events_timeout_completed returned {rc}");
                    }
                }
            })
            .map_err(|e| io::Error::other(format!("failed to spawn libusb event thread: {e}")))?;

        Ok(Arc::new(LibusbContext {
            ptr: ctx_ptr,
            running,
            thread: Mutex::new(Some(handle)),
        }))
    }

    pub(crate) fn raw(&self) -> *mut libusb::libusb_context {
        self.ptr.0
    }
}

impl Drop for LibusbContext {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        unsafe {
            let mut zero = libc::timeval { tv_sec: 0, tv_usec: 0 };
            let _ =
                libusb::libusb_handle_events_timeout_completed(self.ptr.0, &mut zero, ptr::null_mut());
        }
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
        unsafe { libusb::libusb_exit(self.ptr.0) };
    }
}

pub(crate) fn libusb_error_string(code: i32) -> String {
    unsafe {
        let ptr = libusb::libusb_error_name(code);
        if ptr.is_null() {
            format!("libusb error {code}")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

pub(crate) fn map_libusb_error(code: i32) -> io::Error {
    let kind = match code {
        LIBUSB_ERROR_TIMEOUT => io::ErrorKind::WouldBlock,
        LIBUSB_ERROR_PIPE => io::ErrorKind::BrokenPipe,
        LIBUSB_ERROR_NO_DEVICE => io::ErrorKind::NotConnected,
        LIBUSB_ERROR_NOT_FOUND => io::ErrorKind::NotFound,
        LIBUSB_ERROR_INTERRUPTED => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, libusb_error_string(code))
}

/// The outcome of one completed asynchronous bulk transfer, as reported by
/// libusb's `status` field. Mirrors the dispatch table the acquisition
/// producer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    TimedOut,
    Stall,
    Cancelled,
    Overflow,
    Error,
    NoDevice,
    Unknown(i32),
}

pub(crate) fn classify_transfer_status(status: i32) -> TransferOutcome {
    match status {
        s if s == libusb::constants::LIBUSB_TRANSFER_COMPLETED => TransferOutcome::Completed,
        s if s == LIBUSB_TRANSFER_TIMED_OUT => TransferOutcome::TimedOut,
        s if s == LIBUSB_TRANSFER_STALL => TransferOutcome::Stall,
        s if s == LIBUSB_TRANSFER_CANCELLED => TransferOutcome::Cancelled,
        s if s == LIBUSB_TRANSFER_OVERFLOW => TransferOutcome::Overflow,
        s if s == LIBUSB_TRANSFER_ERROR => TransferOutcome::Error,
        s if s == LIBUSB_TRANSFER_NO_DEVICE => TransferOutcome::NoDevice,
        other => TransferOutcome::Unknown(other),
    }
}

pub(crate) fn get_device_descriptor(
    device: *mut libusb::libusb_device,
) -> io::Result<libusb::libusb_device_descriptor> {
    let mut desc = MaybeUninit::<libusb::libusb_device_descriptor>::uninit();
    let rc = unsafe { libusb::libusb_get_device_descriptor(device, desc.as_mut_ptr()) };
    if rc < 0 {
        return Err(map_libusb_error(rc));
    }
    Ok(unsafe { desc.assume_init() })
}

pub(crate) fn read_string_descriptor_ascii(
    handle: *mut libusb::libusb_device_handle,
    index: u8,
) -> Option<String> {
    if index == 0 {
        return None;
    }
    let mut buf = vec![0u8; 255];
    let len = unsafe {
        libusb::libusb_get_string_descriptor_ascii(
            handle,
            index,
            buf.as_mut_ptr(),
            buf.len() as c_int,
        )
    };
    if len < 0 {
        return None;
    }
    buf.truncate(len as usize);
    String::from_utf8(buf).ok()
}
