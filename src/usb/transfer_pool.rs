use std::collections::HashSet;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use libusb1_sys as libusb;

use super::context::{classify_transfer_status, TransferOutcome};
use super::enumerate::ENDPOINT_IN;
use super::interface::Interface;
use crate::error::CameraError;

/// A pool of perpetually-resubmitting bulk-read transfers feeding the
/// acquisition producer.
///
/// Unlike the one-shot `bulk_read`/`bulk_read_callback` pair this is
/// generalized from, a completed transfer here is never the end of the
/// story: on success its buffer is handed to `on_buffer` and a fresh
/// transfer is submitted on the same endpoint immediately, so the pool
/// keeps `depth` reads in flight for as long as it is alive.
pub struct TransferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    handle: super::context::LibusbHandlePtr,
    endpoint: u8,
    buffer_size: usize,
    stopping: AtomicBool,
    in_flight: AtomicUsize,
    /// Addresses of the currently-submitted `libusb_transfer`s, kept so
    /// shutdown can explicitly cancel every one still in flight instead of
    /// waiting indefinitely on a read that may never otherwise complete.
    active: Mutex<HashSet<usize>>,
    on_buffer: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    on_error: Box<dyn Fn(CameraError) + Send + Sync>,
}

struct TransferState {
    inner: Arc<PoolInner>,
    buffer: Vec<u8>,
}

impl TransferPool {
    /// Submits `depth` bulk reads on the acquisition endpoint and keeps
    /// resubmitting on every completion until dropped or [`Self::stop`] is
    /// called. `on_buffer` runs on the libusb event thread, directly from
    /// the transfer callback, matching the original driver's producer loop.
    pub fn start(
        interface: &Interface,
        depth: usize,
        buffer_size: usize,
        on_buffer: Box<dyn Fn(Vec<u8>) + Send + Sync>,
        on_error: Box<dyn Fn(CameraError) + Send + Sync>,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            handle: super::context::LibusbHandlePtr(interface.raw()),
            endpoint: ENDPOINT_IN,
            buffer_size,
            stopping: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            active: Mutex::new(HashSet::new()),
            on_buffer,
            on_error,
        });
        for _ in 0..depth {
            submit(inner.clone());
        }
        TransferPool { inner }
    }

    /// Stops resubmitting once currently in-flight transfers drain; does not
    /// block waiting for them.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
    }

    /// Cancels every transfer currently in flight. Cancellation is
    /// asynchronous: each one still runs its callback (with status
    /// `CANCELLED`) once libusb processes the request.
    pub fn cancel_all(&self) {
        let active = self.inner.active.lock().unwrap();
        for &address in active.iter() {
            unsafe { libusb::libusb_cancel_transfer(address as *mut libusb::libusb_transfer) };
        }
    }

    /// Blocks, polling briefly, until no transfer is in flight or `timeout`
    /// elapses. Returns whether the pool is actually idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TransferPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn submit(inner: Arc<PoolInner>) {
    if inner.stopping.load(Ordering::SeqCst) {
        return;
    }
    let buffer_size = inner.buffer_size;
    let state = Box::new(TransferState { inner: inner.clone(), buffer: vec![0u8; buffer_size] });
    let transfer = unsafe { libusb::libusb_alloc_transfer(0) };
    if transfer.is_null() {
        (inner.on_error)(CameraError::Transport {
            call: "libusb_alloc_transfer",
            source: std::io::Error::other("libusb_alloc_transfer returned null"),
        });
        return;
    }
    let endpoint = inner.endpoint;
    let state_ptr = Box::into_raw(state);
    unsafe {
        (*transfer).dev_handle = inner.handle.0;
        (*transfer).endpoint = endpoint;
        (*transfer).transfer_type = libusb::constants::LIBUSB_TRANSFER_TYPE_BULK;
        (*transfer).timeout = 0;
        (*transfer).callback = transfer_callback;
        (*transfer).user_data = state_ptr as *mut c_void;
        let buffer = (&mut *state_ptr).buffer.as_mut_ptr();
        (*transfer).buffer = buffer;
        (*transfer).length = buffer_size as c_int;
    }
    inner.in_flight.fetch_add(1, Ordering::SeqCst);
    let rc = unsafe { libusb::libusb_submit_transfer(transfer) };
    if rc < 0 {
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        let state = unsafe { Box::from_raw(state_ptr) };
        unsafe { libusb::libusb_free_transfer(transfer) };
        (state.inner.on_error)(CameraError::Transport {
            call: "libusb_submit_transfer",
            source: super::context::map_libusb_error(rc),
        });
        return;
    }
    inner.active.lock().unwrap().insert(transfer as usize);
}

/// Dispatches one completed transfer per the producer's status switch:
/// cancelled transfers are dropped silently (they only happen on shutdown),
/// completed/timed-out/stalled transfers are delivered and resubmitted,
/// overflow/error/unknown are fatal, and a vanished device gets its own
/// error variant so callers can tell it apart from a generic transport fault.
extern "system" fn transfer_callback(transfer: *mut libusb::libusb_transfer) {
    let state = unsafe { Box::from_raw((*transfer).user_data as *mut TransferState) };
    let inner = state.inner.clone();
    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    inner.active.lock().unwrap().remove(&(transfer as usize));

    let status = unsafe { (*transfer).status };
    let actual_length = unsafe { (*transfer).actual_length } as usize;
    let outcome = classify_transfer_status(status);
    unsafe { libusb::libusb_free_transfer(transfer) };

    let mut resubmit = true;
    match outcome {
        TransferOutcome::Cancelled => {
            resubmit = false;
        }
        TransferOutcome::Completed | TransferOutcome::TimedOut | TransferOutcome::Stall => {
            let mut buffer = state.buffer;
            buffer.truncate(actual_length);
            (inner.on_buffer)(buffer);
        }
        TransferOutcome::Overflow => {
            resubmit = false;
            inner.stopping.store(true, Ordering::SeqCst);
            (inner.on_error)(CameraError::Transport {
                call: "acquisition transfer",
                source: std::io::Error::other("LIBUSB_TRANSFER_OVERFLOW"),
            });
        }
        TransferOutcome::Error | TransferOutcome::Unknown(_) => {
            resubmit = false;
            inner.stopping.store(true, Ordering::SeqCst);
            (inner.on_error)(CameraError::Transport {
                call: "acquisition transfer",
                source: std::io::Error::other(format!("{outcome:?}")),
            });
        }
        TransferOutcome::NoDevice => {
            resubmit = false;
            inner.stopping.store(true, Ordering::SeqCst);
            (inner.on_error)(CameraError::DeviceDisconnected);
        }
    }

    if resubmit && !inner.stopping.load(Ordering::SeqCst) {
        submit(inner);
    }
}
