use std::io;
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys as libusb;

use super::context::{map_libusb_error, read_string_descriptor_ascii, LibusbContext};
use crate::config::DeviceSpeed;
use crate::error::CameraError;

fn duration_to_timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

struct RawHandle(*mut libusb::libusb_device_handle);
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

/// An opened and claimed USB interface.
///
/// On drop it releases the interface then closes the handle, exactly once,
/// mirroring `usb::interface`'s deleter ordering in the original driver.
/// Copying is forbidden; moving transfers both the claim flag and the handle
/// and clears them in the source (enforced here simply by ownership, since
/// Rust has no implicit copy).
pub struct Interface {
    _context: Arc<LibusbContext>,
    handle: RawHandle,
    interface_number: i32,
    claimed: bool,
}

impl Interface {
    /// Opens `device`, claims `interface_number`, and returns the RAII wrapper.
    pub(crate) fn claim(
        context: Arc<LibusbContext>,
        device: *mut libusb::libusb_device,
        interface_number: i32,
    ) -> Result<Self, CameraError> {
        let mut raw = ptr::null_mut();
        let rc = unsafe { libusb::libusb_open(device, &mut raw) };
        if rc < 0 {
            return Err(CameraError::Transport { call: "libusb_open", source: map_libusb_error(rc) });
        }
        unsafe {
            // Kernel driver detachment is best-effort; not all platforms support it.
            libusb::libusb_set_auto_detach_kernel_driver(raw, 1);
        }
        let rc = unsafe { libusb::libusb_claim_interface(raw, interface_number) };
        if rc < 0 {
            unsafe { libusb::libusb_close(raw) };
            if rc == libusb1_sys::constants::LIBUSB_ERROR_BUSY {
                return Err(CameraError::DeviceBusy);
            }
            return Err(CameraError::Transport {
                call: "libusb_claim_interface",
                source: map_libusb_error(rc),
            });
        }
        Ok(Interface {
            _context: context,
            handle: RawHandle(raw),
            interface_number,
            claimed: true,
        })
    }

    pub(crate) fn raw(&self) -> *mut libusb::libusb_device_handle {
        self.handle.0
    }

    pub fn get_string_descriptor_ascii(&self, index: u8) -> Option<String> {
        read_string_descriptor_ascii(self.handle.0, index)
    }

    pub fn device_speed(&self) -> DeviceSpeed {
        let device = unsafe { libusb::libusb_get_device(self.handle.0) };
        let speed = unsafe { libusb::libusb_get_device_speed(device) };
        match speed {
            1 => DeviceSpeed::Low,
            2 => DeviceSpeed::Full,
            3 => DeviceSpeed::High,
            4 => DeviceSpeed::Super,
            5 => DeviceSpeed::SuperPlus,
            _ => DeviceSpeed::Unknown,
        }
    }

    pub fn halt(&self, endpoint: u8) -> Result<(), CameraError> {
        let rc = unsafe { libusb::libusb_clear_halt(self.handle.0, endpoint) };
        if rc < 0 {
            return Err(CameraError::Transport { call: "libusb_clear_halt", source: map_libusb_error(rc) });
        }
        Ok(())
    }

    /// A control transfer without validating the transferred byte count.
    pub fn unchecked_control_transfer(
        &self,
        _call: &'static str,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, CameraError> {
        let rc = unsafe {
            libusb::libusb_control_transfer(
                self.handle.0,
                bm_request_type,
                b_request,
                w_value,
                w_index,
                buffer.as_mut_ptr(),
                buffer.len() as u16,
                duration_to_timeout_ms(timeout),
            )
        };
        if rc < 0 {
            return Err(CameraError::Transport { call: "libusb_control_transfer", source: map_libusb_error(rc) });
        }
        Ok(rc as usize)
    }

    /// A control transfer validating that the transferred byte count equals
    /// the supplied buffer's size.
    pub fn control_transfer(
        &self,
        call: &'static str,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<(), CameraError> {
        let transferred = self.unchecked_control_transfer(
            call,
            bm_request_type,
            b_request,
            w_value,
            w_index,
            buffer,
            timeout,
        )?;
        if transferred != buffer.len() {
            return Err(CameraError::Transport {
                call: "control_transfer",
                source: io::Error::other(format!(
                    "{call}: non-matching data and transfer sizes ({transferred} != {})",
                    buffer.len()
                )),
            });
        }
        Ok(())
    }

    /// A control transfer that additionally compares the returned buffer
    /// against `expected`, failing with [`CameraError::UnexpectedResponse`]
    /// on any byte mismatch.
    pub fn checked_control_transfer(
        &self,
        call: &'static str,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        expected: &[u8],
        timeout: Duration,
    ) -> Result<(), CameraError> {
        let mut buffer = expected.to_vec();
        self.control_transfer(call, bm_request_type, b_request, w_value, w_index, &mut buffer, timeout)?;
        if buffer != expected {
            return Err(CameraError::UnexpectedResponse { call });
        }
        Ok(())
    }

    pub fn bulk_transfer(
        &self,
        _call: &'static str,
        endpoint: u8,
        buffer: &mut Vec<u8>,
        timeout: Duration,
    ) -> Result<(), CameraError> {
        let mut transferred: c_int = 0;
        let rc = unsafe {
            libusb::libusb_bulk_transfer(
                self.handle.0,
                endpoint,
                buffer.as_mut_ptr(),
                buffer.len() as c_int,
                &mut transferred,
                duration_to_timeout_ms(timeout),
            )
        };
        if rc < 0 {
            return Err(CameraError::Transport { call: "libusb_bulk_transfer", source: map_libusb_error(rc) });
        }
        buffer.truncate(transferred as usize);
        Ok(())
    }

    /// Like [`Self::bulk_transfer`] but tolerates `LIBUSB_ERROR_TIMEOUT`
    /// without failing; the buffer is still truncated to whatever arrived
    /// (possibly nothing). Used by the bring-up flush loop.
    pub fn bulk_transfer_accept_timeout(
        &self,
        _call: &'static str,
        endpoint: u8,
        buffer: &mut Vec<u8>,
        timeout: Duration,
    ) -> Result<(), CameraError> {
        let mut transferred: c_int = 0;
        let rc = unsafe {
            libusb::libusb_bulk_transfer(
                self.handle.0,
                endpoint,
                buffer.as_mut_ptr(),
                buffer.len() as c_int,
                &mut transferred,
                duration_to_timeout_ms(timeout),
            )
        };
        if rc < 0 && rc != libusb1_sys::constants::LIBUSB_ERROR_TIMEOUT {
            return Err(CameraError::Transport { call: "libusb_bulk_transfer", source: map_libusb_error(rc) });
        }
        buffer.truncate(transferred.max(0) as usize);
        Ok(())
    }

    pub fn interface_number(&self) -> i32 {
        self.interface_number
    }

    /// Reads the device's manufacturer and product string descriptors, used
    /// during bring-up to validate the device identity. Either is `None` if
    /// the device descriptor or the string itself can't be read.
    pub fn manufacturer_and_product(&self) -> (Option<String>, Option<String>) {
        let device = unsafe { libusb::libusb_get_device(self.handle.0) };
        let descriptor = match super::context::get_device_descriptor(device) {
            Ok(descriptor) => descriptor,
            Err(_) => return (None, None),
        };
        (
            self.get_string_descriptor_ascii(descriptor.iManufacturer),
            self.get_string_descriptor_ascii(descriptor.iProduct),
        )
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        if self.claimed {
            unsafe {
                libusb::libusb_release_interface(self.handle.0, self.interface_number);
                libusb::libusb_close(self.handle.0);
            }
            self.claimed = false;
        }
    }
}
