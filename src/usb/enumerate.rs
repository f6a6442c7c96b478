use std::io;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys as libusb;

use super::context::{get_device_descriptor, map_libusb_error, LibusbContext};
use super::interface::Interface;
use crate::config::{DeviceIdentity, DeviceType};
use crate::error::CameraError;

/// Bulk endpoint used for outgoing register/serial requests.
pub const ENDPOINT_OUT: u8 = 0x02;
/// Bulk endpoint the acquisition producer reads raw event data from.
pub const ENDPOINT_IN: u8 = 0x81;
/// Bulk endpoint register reads and the serial/type exchange read their
/// response from. Distinct from `ENDPOINT_IN`, which is reserved for the
/// high-volume acquisition stream.
pub const ENDPOINT_COMMAND_IN: u8 = 0x82;

const INTERFACE_NUMBER: i32 = 0;

/// Calls `handle_device` for every connected device matching one of
/// `identities`, stopping and returning `Some` the first time it returns
/// `Some`. Mirrors `usb::any_of` from the original transport.
fn any_of<T>(
    identities: &[DeviceIdentity],
    context: &Arc<LibusbContext>,
    mut handle_device: impl FnMut(*mut libusb::libusb_device) -> io::Result<Option<T>>,
) -> io::Result<Option<T>> {
    let mut list: *const *mut libusb::libusb_device = ptr::null();
    let count = unsafe { libusb::libusb_get_device_list(context.raw(), &mut list) };
    if count < 0 {
        return Err(map_libusb_error(count as i32));
    }
    let result = (|| {
        for index in 0..count {
            let device = unsafe { *list.offset(index as isize) };
            let descriptor = match get_device_descriptor(device) {
                Ok(d) => d,
                Err(_) => continue,
            };
            let matches = identities
                .iter()
                .any(|id| id.vendor_id == descriptor.idVendor && id.product_id == descriptor.idProduct);
            if !matches {
                continue;
            }
            if let Some(value) = handle_device(device)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    })();
    unsafe { libusb::libusb_free_device_list(list, 1) };
    result
}

/// Opens and claims the device's (fixed) interface 0, returning the handle.
fn open_and_claim(
    context: &Arc<LibusbContext>,
    device: *mut libusb::libusb_device,
) -> Result<Interface, CameraError> {
    Interface::claim(context.clone(), device, INTERFACE_NUMBER)
}

/// Calls `get_type_and_serial` against every connected candidate, swallowing
/// per-device errors so that one misbehaving device does not abort
/// enumeration of the others.
pub fn available_devices<T>(
    identities: &[DeviceIdentity],
    context: &Arc<LibusbContext>,
    mut get_type_and_serial: impl FnMut(&Interface) -> Result<T, CameraError>,
) -> Vec<T> {
    let mut found = Vec::new();
    let _ = any_of::<()>(identities, context, |device| {
        if let Ok(interface) = open_and_claim(context, device) {
            if let Ok(value) = get_type_and_serial(&interface) {
                found.push(value);
            }
        }
        Ok(None)
    });
    found
}

/// Opens the first connected device matching `identities`, optionally
/// filtered further by `serial` and/or `device_type`.
pub fn open<T: PartialEq>(
    identities: &[DeviceIdentity],
    context: &Arc<LibusbContext>,
    mut get_type_and_serial: impl FnMut(&Interface) -> Result<(T, String), CameraError>,
    serial: Option<&str>,
    device_type: Option<&T>,
) -> Result<Interface, CameraError> {
    if serial.is_none() && device_type.is_none() {
        return any_of(identities, context, |device| match open_and_claim(context, device) {
            Ok(interface) => Ok(Some(interface)),
            Err(_) => Ok(None),
        })
        .map_err(|source| CameraError::Transport { call: "libusb_get_device_list", source })?
        .ok_or(CameraError::NoDeviceAvailable);
    }

    any_of(identities, context, |device| {
        let interface = match open_and_claim(context, device) {
            Ok(interface) => interface,
            Err(_) => return Ok(None),
        };
        let (found_type, found_serial) = match get_type_and_serial(&interface) {
            Ok(pair) => pair,
            Err(_) => return Ok(None),
        };
        let serial_ok = serial.is_none_or(|wanted| wanted == found_serial);
        let type_ok = device_type.is_none_or(|wanted| *wanted == found_type);
        if serial_ok && type_ok {
            Ok(Some(interface))
        } else {
            Ok(None)
        }
    })
    .map_err(|source| CameraError::Transport { call: "libusb_get_device_list", source })?
    .ok_or_else(|| CameraError::SerialNotAvailable {
        serial: serial.map(str::to_owned),
        device_type: device_type.map(|_| "requested type"),
    })
}

pub fn resolve_device_type(byte0: u8) -> Option<DeviceType> {
    match byte0 {
        0x30 => Some(DeviceType::Evk3Hd),
        0x31 => Some(DeviceType::Evk4),
        0x32 => Some(DeviceType::Psee413),
        _ => None,
    }
}

pub fn wait_for_flush(interface: &Interface, timeout: Duration) -> Result<(), CameraError> {
    loop {
        let mut buffer = vec![0u8; 1 << 17];
        interface.bulk_transfer_accept_timeout("flushing the camera", ENDPOINT_IN, &mut buffer, timeout)?;
        if buffer.is_empty() {
            return Ok(());
        }
    }
}
