//! Device identification: the control-transfer sensor-type probe and the
//! bulk-request serial exchange, plus the public enumeration entry point.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeviceDescriptor, DeviceIdentity, DeviceType};
use crate::error::CameraError;
use crate::usb::enumerate::{self, ENDPOINT_COMMAND_IN, ENDPOINT_OUT};
use crate::usb::{Interface, LibusbContext};

const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Issues the bulk "get type and serial" request (first byte `0x72`) and
/// parses the 16-byte response: byte 0 carries the sensor family, bytes
/// 8..=11 carry the serial as four big-endian hex digits.
pub fn get_type_and_serial(interface: &Interface) -> Result<(DeviceType, String), CameraError> {
    let request: [u8; 8] = [0x72, 0, 0, 0, 0, 0, 0, 0];
    let mut buffer = request.to_vec();
    interface.bulk_transfer("serial request", ENDPOINT_OUT, &mut buffer, IDENTIFY_TIMEOUT)?;

    let mut response = vec![0u8; 16];
    interface.bulk_transfer("serial response", ENDPOINT_COMMAND_IN, &mut response, IDENTIFY_TIMEOUT)?;
    if response.len() != 16 {
        return Err(CameraError::UnexpectedResponse { call: "serial response" });
    }

    let device_type = enumerate::resolve_device_type(response[0])
        .ok_or(CameraError::UnexpectedResponse { call: "sensor type byte" })?;

    let serial = response[8..12].iter().rev().map(|b| format!("{b:02x}")).collect::<String>();

    Ok((device_type, serial))
}

/// Issues the handful of identification bulk requests the original bring-up
/// sequence sends and discards (release version, build date, and the two
/// device-tree compatible-string probes), each followed by a throwaway read
/// of the reserved `0x0014` register. None of the responses are interpreted;
/// the sensor simply expects to see them before it accepts further commands.
pub fn probe_discarded_fields(interface: &Interface) -> Result<(), CameraError> {
    let requests: [&[u8]; 6] = [
        &[0x79, 0, 0, 0, 0, 0, 0, 0],
        &[0x7a, 0, 0, 0, 0, 0, 0, 0],
        &[0x00, 0, 0x01, 0, 0, 0, 0, 0],
        &[0x03, 0, 0x01, 0, 0x04, 0, 0, 0, 0, 0, 0, 0],
        &[0x00, 0, 0x01, 0, 0, 0, 0, 0],
        &[0x01, 0, 0x01, 0, 0x04, 0, 0, 0, 0, 0, 0, 0],
    ];
    for request in requests {
        let mut buffer = request.to_vec();
        interface.bulk_transfer("identification probe", ENDPOINT_OUT, &mut buffer, IDENTIFY_TIMEOUT)?;
        let mut response = vec![0u8; 1024];
        interface.bulk_transfer("identification probe response", ENDPOINT_COMMAND_IN, &mut response, IDENTIFY_TIMEOUT)?;
    }
    crate::sensor::read_register(interface, 0x0014)?;
    Ok(())
}

/// Lists every connected candidate that answers the identification probe,
/// swallowing per-device errors so one misbehaving unit doesn't hide the
/// rest.
pub fn available_devices(
    identities: &[DeviceIdentity],
    context: &Arc<LibusbContext>,
) -> Vec<DeviceDescriptor> {
    enumerate::available_devices(identities, context, |interface| {
        let (device_type, serial) = get_type_and_serial(interface)?;
        Ok(DeviceDescriptor { device_type, serial, speed: interface.device_speed() })
    })
}

/// Opens and claims the first connected device matching `identities`,
/// optionally narrowed further by `serial` and/or `device_type`. Returns the
/// claimed interface along with the identity it reported.
pub fn open(
    identities: &[DeviceIdentity],
    context: &Arc<LibusbContext>,
    serial: Option<&str>,
    device_type: Option<DeviceType>,
) -> Result<(Interface, DeviceType, String), CameraError> {
    let interface = enumerate::open(identities, context, get_type_and_serial, serial, device_type.as_ref())?;
    let (found_type, found_serial) = get_type_and_serial(&interface)?;
    Ok((interface, found_type, found_serial))
}
