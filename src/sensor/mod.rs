//! Shared register-framing, bias-diff, and ROI-mask machinery used by both
//! `evk4` and `psee413`.

pub mod evk4;
pub mod psee413;

use std::time::Duration;

use crate::error::CameraError;
use crate::usb::enumerate::{ENDPOINT_COMMAND_IN, ENDPOINT_OUT};
use crate::usb::Interface;

const REGISTER_TIMEOUT: Duration = Duration::from_millis(1000);

/// The analog-bias flag bits common to every EVK4-family bias write:
/// `buf_stg(1) | mux_en | buf_en | idac_en | single`.
pub const BIAS_FLAGS: u32 = 0x11A1_0000;

fn bulk_request(interface: &Interface, request: &[u8; 20]) -> Result<Vec<u8>, CameraError> {
    let mut out = request.to_vec();
    interface.bulk_transfer("register request", ENDPOINT_OUT, &mut out, REGISTER_TIMEOUT)?;

    let mut response = vec![0u8; 1024];
    interface.bulk_transfer("register response", ENDPOINT_COMMAND_IN, &mut response, REGISTER_TIMEOUT)?;
    Ok(response)
}

fn frame_request(address: u32, value: u32, write: bool) -> [u8; 20] {
    let mut request = [0u8; 20];
    request[0] = 0x02;
    request[1] = 0x01;
    request[2] = 0x01;
    request[3] = if write { 0x40 } else { 0x00 };
    request[4] = 0x0c;
    request[12..16].copy_from_slice(&address.to_le_bytes());
    request[16..20].copy_from_slice(&value.to_le_bytes());
    request
}

/// Writes `value` to `address` via the 20-byte register protocol.
pub fn write_register(interface: &Interface, address: u32, value: u32) -> Result<(), CameraError> {
    bulk_request(interface, &frame_request(address, value, true))?;
    Ok(())
}

/// Reads the 32-bit value at `address`, validating that the response's
/// first 16 bytes mirror the request's.
pub fn read_register(interface: &Interface, address: u32) -> Result<u32, CameraError> {
    let request = frame_request(address, 1, false);
    let response = bulk_request(interface, &request)?;
    if response.len() != 20 || response[..16] != request[..16] {
        return Err(CameraError::UnexpectedResponse { call: "read_register" });
    }
    Ok(u32::from_le_bytes(response[16..20].try_into().unwrap()))
}

pub fn sleep_micros(micros: u64) {
    std::thread::sleep(Duration::from_micros(micros));
}

pub fn sleep_millis(millis: u64) {
    std::thread::sleep(Duration::from_millis(millis));
}

/// One bring-up/teardown register table entry, optionally followed by a
/// sleep. `sleep_micros == 0` means "no sleep", matching the original's
/// tables where most rows have none.
#[derive(Debug, Clone, Copy)]
pub struct RegisterWrite {
    pub address: u32,
    pub value: u32,
    pub sleep_micros: u64,
}

pub fn run_register_table(interface: &Interface, table: &[RegisterWrite]) -> Result<(), CameraError> {
    for entry in table {
        write_register(interface, entry.address, entry.value)?;
        if entry.sleep_micros > 0 {
            sleep_micros(entry.sleep_micros);
        }
    }
    Ok(())
}

/// A device's named bias fields in their fixed wire order, each paired with
/// the dedicated register address it's written to.
pub trait BiasTable: Copy + Clone + PartialEq {
    fn entries(&self) -> Vec<(u32, u8)>;
}

/// Sends every bias whose cached value differs from the incoming one (or
/// every bias, if `force`), then updates the shadow copy.
pub fn send_biases<B: BiasTable>(
    interface: &Interface,
    biases: &B,
    shadow: &mut Option<B>,
    force: bool,
) -> Result<(), CameraError> {
    let previous_entries = shadow.as_ref().map(BiasTable::entries);
    let entries = biases.entries();
    for (index, (address, value)) in entries.iter().enumerate() {
        let unchanged = !force
            && previous_entries.as_ref().is_some_and(|previous| previous[index].1 == *value);
        if unchanged {
            continue;
        }
        write_register(interface, *address, (*value as u32) | BIAS_FLAGS)?;
    }
    *shadow = Some(*biases);
    Ok(())
}

/// The region-of-interest mask shared by EVK4 and PSEE413: a 20 × 64-bit
/// x-mask and a 12 × 64-bit y-mask over a 1280×720 sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiMask {
    pub x_mask: [u64; 20],
    pub y_mask: [u64; 12],
    pub mask_intersection_only: bool,
}

impl Default for RoiMask {
    fn default() -> Self {
        RoiMask { x_mask: [0; 20], y_mask: [0; 12], mask_intersection_only: false }
    }
}

fn reverse_bits(byte: u8) -> u8 {
    let byte = ((byte & 0xf0) >> 4) | ((byte & 0x0f) << 4);
    let byte = ((byte & 0xcc) >> 2) | ((byte & 0x33) << 2);
    ((byte & 0xaa) >> 1) | ((byte & 0x55) << 1)
}

/// Writes the x-mask as 40 half-words (low, then high, of each of the 20
/// u64s) and the y-mask in the original's reversed, bit-reversed,
/// sentinel-terminated layout, then the final ROI-control register.
pub fn write_roi_mask(
    interface: &Interface,
    roi: &RoiMask,
    x_begin: u32,
    x_end: u32,
    y_begin: u32,
    y_end: u32,
    roi_ctrl_address: u32,
    roi_ctrl_base_value: u32,
) -> Result<(), CameraError> {
    let mut address = x_begin;
    while address < x_end {
        let offset = (address - x_begin) / 4;
        let word = roi.x_mask[(offset / 2) as usize];
        let value = if offset % 2 == 0 { word as u32 } else { (word >> 32) as u32 };
        write_register(interface, address, value)?;
        address += 4;
    }

    let len = roi.y_mask.len();
    let mut address = y_begin;
    while address < y_end {
        let offset = (address - y_begin) / 4;
        let value = if offset % 2 == 0 {
            let bytes = roi.y_mask[len - 1 - (offset / 2) as usize].to_le_bytes();
            let (byte2, byte3) = (bytes[0], bytes[1]);
            if (offset as usize) < len * 2 - 2 {
                let bytes2 = roi.y_mask[len - 2 - (offset / 2) as usize].to_le_bytes();
                let (byte0, byte1) = (bytes2[6], bytes2[7]);
                u32::from_le_bytes([
                    reverse_bits(byte3),
                    reverse_bits(byte2),
                    reverse_bits(byte1),
                    reverse_bits(byte0),
                ])
            } else {
                u32::from_le_bytes([reverse_bits(byte3), reverse_bits(byte2), 0xff, 0x00])
            }
        } else {
            let bytes = roi.y_mask[len - 2 - (offset / 2) as usize].to_le_bytes();
            let (byte0, byte1, byte2, byte3) = (bytes[2], bytes[3], bytes[4], bytes[5]);
            u32::from_le_bytes([
                reverse_bits(byte3),
                reverse_bits(byte2),
                reverse_bits(byte1),
                reverse_bits(byte0),
            ])
        };
        write_register(interface, address, value)?;
        address += 4;
    }

    let ctrl = roi_ctrl_value(roi_ctrl_base_value, roi.mask_intersection_only);
    write_register(interface, roi_ctrl_address, ctrl)
}

fn roi_ctrl_value(base: u32, mask_intersection_only: bool) -> u32 {
    base | if mask_intersection_only { 0 } else { 1 << 6 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_bits_is_involutive() {
        for byte in 0u8..=255 {
            assert_eq!(reverse_bits(reverse_bits(byte)), byte);
        }
    }

    #[test]
    fn reverse_bits_known_value() {
        assert_eq!(reverse_bits(0b1000_0001), 0b1000_0001);
        assert_eq!(reverse_bits(0b0000_0001), 0b1000_0000);
    }
}
