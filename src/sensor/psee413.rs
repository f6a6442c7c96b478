//! PSEE413 sensor bring-up, teardown, and bias/ROI control.
//!
//! The retrieved reference material has no literal PSEE413 register table
//! (see DESIGN.md's Open Question decision); this module reproduces the
//! three-block bring-up shape and the bias/ROI machinery `evk4` uses,
//! populated with a PSEE413-specific register base and its own 10-field
//! bias set. It is a documented extrapolation, not a second verbatim table.

use std::time::Duration;

use crate::error::CameraError;
use crate::usb::Interface;

use super::{read_register, run_register_table, send_biases, write_register, write_roi_mask, BiasTable, RegisterWrite, RoiMask};

pub const NAME: &str = "PSEE413";
pub const WIDTH: u16 = 1280;
pub const HEIGHT: u16 = 720;

pub const MANUFACTURER_SIGNATURES: [&str; 2] = ["Prophesee", "CenturyArks"];
pub const PRODUCT_SIGNATURES: [&str; 1] = ["PSEE413"];

pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1000);

mod registers {
    pub const RESET: u32 = 0x40_0004;
    pub const ROI_CTRL: u32 = 0x0004;
    pub const TIME_BASE_CTRL: u32 = 0x9008;
    pub const RO_CTRL: u32 = 0x9028;
    pub const MIPI_CONTROL: u32 = 0xB000;

    pub const BIAS_PR: u32 = 0x3000;
    pub const BIAS_FO_P: u32 = 0x3004;
    pub const BIAS_FO_N: u32 = 0x3008;
    pub const BIAS_HPF: u32 = 0x300C;
    pub const BIAS_DIFF_ON: u32 = 0x3010;
    pub const BIAS_DIFF: u32 = 0x3014;
    pub const BIAS_DIFF_OFF: u32 = 0x3018;
    pub const BIAS_REFR: u32 = 0x301C;
    pub const BIAS_REQPUY: u32 = 0x3020;
    pub const BIAS_BLK: u32 = 0x3024;

    pub const TD_ROI_X_BEGIN: u32 = 0x2000;
    pub const TD_ROI_X_END: u32 = 0x20A0;
    pub const TD_ROI_Y_BEGIN: u32 = 0x4000;
    pub const TD_ROI_Y_END: u32 = 0x405C;
}
use registers::*;

/// PSEE413's 10 named analog biases, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Biases {
    pub pr: u8,
    pub fo_p: u8,
    pub fo_n: u8,
    pub hpf: u8,
    pub diff_on: u8,
    pub diff: u8,
    pub diff_off: u8,
    pub refr: u8,
    pub reqpuy: u8,
    pub blk: u8,
}

impl Default for Biases {
    fn default() -> Self {
        Biases {
            pr: 0x7c,
            fo_p: 0x53,
            fo_n: 0x53,
            hpf: 0x00,
            diff_on: 0x66,
            diff: 0x4d,
            diff_off: 0x49,
            refr: 0x14,
            reqpuy: 0x8c,
            blk: 0x70,
        }
    }
}

impl BiasTable for Biases {
    fn entries(&self) -> Vec<(u32, u8)> {
        vec![
            (BIAS_PR, self.pr),
            (BIAS_FO_P, self.fo_p),
            (BIAS_FO_N, self.fo_n),
            (BIAS_HPF, self.hpf),
            (BIAS_DIFF_ON, self.diff_on),
            (BIAS_DIFF, self.diff),
            (BIAS_DIFF_OFF, self.diff_off),
            (BIAS_REFR, self.refr),
            (BIAS_REQPUY, self.reqpuy),
            (BIAS_BLK, self.blk),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    pub biases: Biases,
    pub roi: RoiMask,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters { biases: Biases::default(), roi: RoiMask::default() }
    }
}

pub fn send_parameters(
    interface: &Interface,
    parameters: &Parameters,
    shadow: &mut Option<Biases>,
    force: bool,
) -> Result<(), CameraError> {
    send_biases(interface, &parameters.biases, shadow, force)
}

fn stop(interface: &Interface) -> Result<(), CameraError> {
    write_register(interface, ROI_CTRL, 0xf000_5042)?;
    write_register(interface, RO_CTRL, 0x0000_0002)?;
    super::sleep_millis(1);
    read_register(interface, TIME_BASE_CTRL)?;
    write_register(interface, TIME_BASE_CTRL, 0x0000_0644)?;
    write_register(interface, MIPI_CONTROL, 0x0000_02f8)?;
    super::sleep_micros(300);
    Ok(())
}

fn destroy(interface: &Interface) -> Result<(), CameraError> {
    const TABLE: &[RegisterWrite] = &[
        RegisterWrite { address: 0xb044, value: 0x0000_0000, sleep_micros: 200 },
        RegisterWrite { address: 0xb040, value: 0x0000_000e, sleep_micros: 200 },
        RegisterWrite { address: 0xb0c8, value: 0x0000_0000, sleep_micros: 0 },
        RegisterWrite { address: 0xb040, value: 0x0000_0004, sleep_micros: 0 },
    ];
    run_register_table(interface, TABLE)
}

fn init(interface: &Interface) -> Result<(), CameraError> {
    write_register(interface, RESET, 0x0000_0001)?;
    super::sleep_millis(1000);
    write_register(interface, RESET, 0x0000_0000)?;
    super::sleep_millis(500);
    write_register(interface, MIPI_CONTROL, 0x0000_0158)?;
    super::sleep_millis(1000);
    write_register(interface, TIME_BASE_CTRL, 0x0000_0644)?;
    write_register(interface, ROI_CTRL, 0xf000_5042)?;
    Ok(())
}

fn start(interface: &Interface, mask_intersection_only: bool) -> Result<(), CameraError> {
    write_register(interface, MIPI_CONTROL, 0x0000_02f9)?;
    write_register(interface, RO_CTRL, 0x0000_0000)?;
    read_register(interface, TIME_BASE_CTRL)?;
    write_register(interface, TIME_BASE_CTRL, 0x0000_0645)?;
    let ctrl = 0xf000_5422 | if mask_intersection_only { 0 } else { 1 << 6 };
    write_register(interface, ROI_CTRL, ctrl)
}

pub fn identify(interface: &Interface) -> Result<(), CameraError> {
    let (manufacturer, product) = interface.manufacturer_and_product();
    let manufacturer_ok = manufacturer.as_deref().is_some_and(|m| MANUFACTURER_SIGNATURES.contains(&m));
    let product_ok = product.as_deref().is_some_and(|p| PRODUCT_SIGNATURES.contains(&p));
    if !manufacturer_ok || !product_ok {
        return Err(CameraError::UnrecognizedDevice { manufacturer, product });
    }
    Ok(())
}

pub fn bring_up(interface: &Interface, parameters: &Parameters) -> Result<Option<Biases>, CameraError> {
    identify(interface)?;
    crate::identity::probe_discarded_fields(interface)?;

    stop(interface)?;
    destroy(interface)?;
    init(interface)?;

    write_roi_mask(
        interface,
        &parameters.roi,
        TD_ROI_X_BEGIN,
        TD_ROI_X_END,
        TD_ROI_Y_BEGIN,
        TD_ROI_Y_END,
        ROI_CTRL,
        0xf000_5022,
    )?;

    let mut shadow = None;
    send_parameters(interface, parameters, &mut shadow, true)?;

    start(interface, parameters.roi.mask_intersection_only)?;
    crate::usb::enumerate::wait_for_flush(interface, IDENTIFY_TIMEOUT)?;

    Ok(shadow)
}

pub fn tear_down(interface: &Interface) -> Result<(), CameraError> {
    stop(interface)?;
    destroy(interface)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_entries_are_in_wire_order() {
        let biases = Biases::default();
        let entries = biases.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries.first().map(|(address, _)| *address), Some(BIAS_PR));
        assert_eq!(entries.last().map(|(address, _)| *address), Some(BIAS_BLK));
    }
}
