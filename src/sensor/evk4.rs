//! EVK4 (IMX636) sensor bring-up, teardown, and bias/ROI control.
//!
//! The register tables below reproduce the manufacturer's bring-up sequence
//! verbatim; most of the raw addresses have no publicly documented meaning
//! beyond what's noted inline, so they're kept as bare hex constants rather
//! than invented names.

use std::time::Duration;

use crate::error::CameraError;
use crate::usb::Interface;

use super::{read_register, run_register_table, send_biases, write_register, write_roi_mask, BiasTable, RegisterWrite, RoiMask};

pub const NAME: &str = "EVK4";
pub const WIDTH: u16 = 1280;
pub const HEIGHT: u16 = 720;

pub const MANUFACTURER_SIGNATURES: [&str; 2] = ["Prophesee", "CenturyArks"];
pub const PRODUCT_SIGNATURES: [&str; 2] = ["EVK4", "SilkyEvCam HD v03.09.00C"];

mod registers {
    pub const RESET: u32 = 0x40_0004;
    pub const ROI_CTRL: u32 = 0x0004;
    pub const LIFO_CTRL: u32 = 0x000C;
    pub const RESERVED_0014: u32 = 0x0014;
    pub const SPARE0: u32 = 0x0018;
    pub const ADC_CONTROL: u32 = 0x004C;
    pub const ADC_MISC_CTRL: u32 = 0x0054;
    pub const TEMP_CTRL: u32 = 0x005C;
    pub const IPH_MIRR_CTRL: u32 = 0x0074;

    pub const BIAS_PR: u32 = 0x1000;
    pub const BIAS_FO: u32 = 0x1004;
    pub const BIAS_HPF: u32 = 0x100C;
    pub const BIAS_DIFF_ON: u32 = 0x1010;
    pub const BIAS_DIFF: u32 = 0x1014;
    pub const BIAS_DIFF_OFF: u32 = 0x1018;
    pub const BIAS_INV: u32 = 0x101C;
    pub const BIAS_REFR: u32 = 0x1020;
    pub const BIAS_REQPUY: u32 = 0x1040;
    pub const BIAS_REQPUX: u32 = 0x1044;
    pub const BIAS_SENDREQPDY: u32 = 0x1048;
    pub const BIAS_UNKNOWN_1: u32 = 0x104C;
    pub const BIAS_UNKNOWN_2: u32 = 0x1050;

    pub const TD_ROI_X_BEGIN: u32 = 0x2000;
    pub const TD_ROI_X_END: u32 = 0x20A0;
    pub const TD_ROI_Y_BEGIN: u32 = 0x4000;
    pub const TD_ROI_Y_END: u32 = 0x405C;

    pub const ERC_RESERVED_6000: u32 = 0x6000;
    pub const IN_DROP_RATE_CONTROL: u32 = 0x6004;
    pub const REFERENCE_PERIOD: u32 = 0x6008;
    pub const TD_TARGET_EVENT_RATE: u32 = 0x600C;
    pub const ERC_ENABLE: u32 = 0x6028;
    pub const ERC_RESERVED_602C: u32 = 0x602C;
    pub const T_DROPPING_CONTROL: u32 = 0x6050;
    pub const H_DROPPING_CONTROL: u32 = 0x6060;
    pub const V_DROPPING_CONTROL: u32 = 0x6070;
    pub const T_DROP_LUT_BEGIN: u32 = 0x6400;
    pub const T_DROP_LUT_END: u32 = 0x6800;
    pub const ERC_RESERVED_6800_6B98_BEGIN: u32 = 0x6800;
    pub const ERC_RESERVED_6800_6B98_END: u32 = 0x6B98;

    pub const EDF_PIPELINE_CONTROL: u32 = 0x7000;
    pub const EDF_RESERVED_7004: u32 = 0x7004;

    pub const READOUT_CTRL: u32 = 0x9000;
    pub const RO_FSM_CTRL: u32 = 0x9004;
    pub const TIME_BASE_CTRL: u32 = 0x9008;
    pub const RO_CTRL: u32 = 0x9028;

    pub const MIPI_CONTROL: u32 = 0xB000;
    pub const MIPI_PACKET_SIZE: u32 = 0xB020;
    pub const MIPI_FRAME_PERIOD: u32 = 0xB028;
    pub const MIPI_FRAME_BLANKING: u32 = 0xB030;
}
use registers::*;

/// EVK4's 13 named analog biases, in the fixed wire order the original sends
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Biases {
    pub pr: u8,
    pub fo: u8,
    pub hpf: u8,
    pub diff_on: u8,
    pub diff: u8,
    pub diff_off: u8,
    pub inv: u8,
    pub refr: u8,
    pub reqpuy: u8,
    pub reqpux: u8,
    pub sendreqpdy: u8,
    pub unknown_1: u8,
    pub unknown_2: u8,
}

impl Default for Biases {
    fn default() -> Self {
        Biases {
            pr: 0x7c,
            fo: 0x53,
            hpf: 0x00,
            diff_on: 0x66,
            diff: 0x4d,
            diff_off: 0x49,
            inv: 0x5b,
            refr: 0x14,
            reqpuy: 0x8c,
            reqpux: 0x7c,
            sendreqpdy: 0x94,
            unknown_1: 0x74,
            unknown_2: 0x51,
        }
    }
}

impl BiasTable for Biases {
    fn entries(&self) -> Vec<(u32, u8)> {
        vec![
            (BIAS_PR, self.pr),
            (BIAS_FO, self.fo),
            (BIAS_HPF, self.hpf),
            (BIAS_DIFF_ON, self.diff_on),
            (BIAS_DIFF, self.diff),
            (BIAS_DIFF_OFF, self.diff_off),
            (BIAS_INV, self.inv),
            (BIAS_REFR, self.refr),
            (BIAS_REQPUY, self.reqpuy),
            (BIAS_REQPUX, self.reqpux),
            (BIAS_SENDREQPDY, self.sendreqpdy),
            (BIAS_UNKNOWN_1, self.unknown_1),
            (BIAS_UNKNOWN_2, self.unknown_2),
        ]
    }
}

/// Full camera parameter set: biases plus the region-of-interest mask.
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

/// Sends every changed bias (or all of them if `force`), and tracks the
/// shadow for future diffing.
pub fn send_parameters(
    interface: &Interface,
    parameters: &Parameters,
    shadow: &mut Option<Biases>,
    force: bool,
) -> Result<(), CameraError> {
    send_biases(interface, &parameters.biases, shadow, force)
}

fn issd_stop(interface: &Interface) -> Result<(), CameraError> {
    write_register(interface, ROI_CTRL, 0xf000_5042)?;
    write_register(interface, 0x002c, 0x0022_c324)?;
    write_register(interface, RO_CTRL, 0x0000_0002)?;
    super::sleep_millis(1);
    read_register(interface, TIME_BASE_CTRL)?;
    write_register(interface, TIME_BASE_CTRL, 0x0000_0644)?;
    write_register(interface, MIPI_CONTROL, 0x0000_02f8)?;
    super::sleep_micros(300);
    Ok(())
}

fn issd_destroy(interface: &Interface) -> Result<(), CameraError> {
    const TABLE: &[RegisterWrite] = &[
        RegisterWrite { address: 0x0070, value: 0x0040_0008, sleep_micros: 0 },
        RegisterWrite { address: 0x006c, value: 0x0ee4_7114, sleep_micros: 500 },
        RegisterWrite { address: 0xa00c, value: 0x0002_0400, sleep_micros: 500 },
        RegisterWrite { address: 0xa010, value: 0x0000_8068, sleep_micros: 200 },
        RegisterWrite { address: 0x1104, value: 0x0000_0000, sleep_micros: 200 },
        RegisterWrite { address: 0xa020, value: 0x0000_0050, sleep_micros: 200 },
        RegisterWrite { address: 0xa004, value: 0x000b_0500, sleep_micros: 200 },
        RegisterWrite { address: 0xa008, value: 0x0000_2404, sleep_micros: 200 },
        RegisterWrite { address: 0xa000, value: 0x000b_0500, sleep_micros: 0 },
        RegisterWrite { address: 0xb044, value: 0x0000_0000, sleep_micros: 0 },
        RegisterWrite { address: 0xb004, value: 0x0000_000a, sleep_micros: 0 },
        RegisterWrite { address: 0xb040, value: 0x0000_000e, sleep_micros: 0 },
        RegisterWrite { address: 0xb0c8, value: 0x0000_0000, sleep_micros: 0 },
        RegisterWrite { address: 0xb040, value: 0x0000_0006, sleep_micros: 0 },
        RegisterWrite { address: 0xb040, value: 0x0000_0004, sleep_micros: 0 },
        RegisterWrite { address: 0x0000, value: 0x4f00_6442, sleep_micros: 0 },
        RegisterWrite { address: 0x0000, value: 0x0f00_6442, sleep_micros: 0 },
        RegisterWrite { address: 0x00b8, value: 0x0000_0401, sleep_micros: 0 },
        RegisterWrite { address: 0x00b8, value: 0x0000_0400, sleep_micros: 0 },
        RegisterWrite { address: 0xb07c, value: 0x0000_0000, sleep_micros: 0 },
    ];
    run_register_table(interface, TABLE)
}

fn issd_init(interface: &Interface) -> Result<(), CameraError> {
    write_register(interface, 0x001c, 0x0000_0001)?;
    write_register(interface, RESET, 0x0000_0001)?;
    super::sleep_millis(1000);
    write_register(interface, RESET, 0x0000_0000)?;
    super::sleep_millis(500);
    write_register(interface, MIPI_CONTROL, 0x0000_0158)?;
    super::sleep_millis(1000);
    write_register(interface, 0xb044, 0x0000_0000)?;
    super::sleep_micros(300);
    write_register(interface, 0xb004, 0x0000_000a)?;
    write_register(interface, 0xb040, 0x0000_0000)?;
    write_register(interface, 0xb0c8, 0x0000_0000)?;
    write_register(interface, 0xb040, 0x0000_0000)?;
    write_register(interface, 0xb040, 0x0000_0000)?;
    write_register(interface, 0x0000, 0x4f00_6442)?;
    write_register(interface, 0x0000, 0x0f00_6442)?;
    write_register(interface, 0x00b8, 0x0000_0400)?;
    write_register(interface, 0x00b8, 0x0000_0400)?;
    write_register(interface, 0xb07c, 0x0000_0000)?;
    write_register(interface, 0xb074, 0x0000_0002)?;
    write_register(interface, 0xb078, 0x0000_00a0)?;
    write_register(interface, 0x00c0, 0x0000_0110)?;
    write_register(interface, 0x00c0, 0x0000_0210)?;
    write_register(interface, 0xb120, 0x0000_0001)?;
    write_register(interface, 0xe120, 0x0000_0000)?;
    write_register(interface, 0xb068, 0x0000_0004)?;
    write_register(interface, 0xb07c, 0x0000_0001)?;
    super::sleep_micros(10);
    write_register(interface, 0xb07c, 0x0000_0003)?;
    super::sleep_millis(1);
    write_register(interface, 0x00b8, 0x0000_0401)?;
    write_register(interface, 0x00b8, 0x0000_0409)?;
    write_register(interface, 0x0000, 0x4f00_6442)?;
    write_register(interface, 0x0000, 0x4f00_644a)?;
    write_register(interface, 0xb080, 0x0000_0077)?;
    write_register(interface, 0xb084, 0x0000_000f)?;
    write_register(interface, 0xb088, 0x0000_0037)?;
    write_register(interface, 0xb08c, 0x0000_0037)?;
    write_register(interface, 0xb090, 0x0000_00df)?;
    write_register(interface, 0xb094, 0x0000_0057)?;
    write_register(interface, 0xb098, 0x0000_0037)?;
    write_register(interface, 0xb09c, 0x0000_0067)?;
    write_register(interface, 0xb0a0, 0x0000_0037)?;
    write_register(interface, 0xb0a4, 0x0000_002f)?;
    write_register(interface, 0xb0ac, 0x0000_0028)?;
    write_register(interface, 0xb0cc, 0x0000_0001)?;
    write_register(interface, MIPI_CONTROL, 0x0000_02f8)?;
    write_register(interface, 0xb004, 0x0000_008a)?;
    write_register(interface, 0xb01c, 0x0000_0030)?;
    write_register(interface, MIPI_PACKET_SIZE, 0x0000_2000)?;
    write_register(interface, 0xb02c, 0x0000_00ff)?;
    write_register(interface, MIPI_FRAME_BLANKING, 0x0000_3e80)?;
    write_register(interface, MIPI_FRAME_PERIOD, 0x0000_0fa0)?;
    write_register(interface, 0xa000, 0x000b_0501)?;
    super::sleep_micros(200);
    write_register(interface, 0xa008, 0x0000_2405)?;
    super::sleep_micros(200);
    write_register(interface, 0xa004, 0x000b_0501)?;
    super::sleep_micros(200);
    write_register(interface, 0xa020, 0x0000_0150)?;
    super::sleep_micros(200);
    write_register(interface, 0xb040, 0x0000_0007)?;
    write_register(interface, 0xb064, 0x0000_0006)?;
    write_register(interface, 0xb040, 0x0000_000f)?;
    super::sleep_micros(100);
    write_register(interface, 0xb004, 0x0000_008a)?;
    super::sleep_micros(200);
    write_register(interface, 0xb0c8, 0x0000_0003)?;
    super::sleep_micros(200);
    write_register(interface, 0xb044, 0x0000_0001)?;
    write_register(interface, MIPI_CONTROL, 0x0000_02f9)?;
    write_register(interface, 0x7008, 0x0000_0001)?;
    write_register(interface, EDF_PIPELINE_CONTROL, 0x0007_0001)?;
    write_register(interface, 0x8000, 0x0001_e085)?;
    write_register(interface, TIME_BASE_CTRL, 0x0000_0644)?;
    write_register(interface, ROI_CTRL, 0xf000_5042)?;
    write_register(interface, SPARE0, 0x0000_0200)?;
    write_register(interface, BIAS_DIFF, 0x11a1_504d)?;
    write_register(interface, RO_FSM_CTRL, 0x0000_0000)?;
    super::sleep_millis(1);
    write_register(interface, READOUT_CTRL, 0x0000_0200)?;
    Ok(())
}

fn analog_front_end_baseline(interface: &Interface) -> Result<(), CameraError> {
    read_register(interface, ADC_CONTROL)?;
    write_register(interface, ADC_CONTROL, 0x0000_7641)?;
    read_register(interface, ADC_CONTROL)?;
    write_register(interface, ADC_CONTROL, 0x0000_7643)?;
    read_register(interface, ADC_MISC_CTRL)?;
    write_register(interface, ADC_MISC_CTRL, 0x0000_0212)?;
    read_register(interface, TEMP_CTRL)?;
    write_register(interface, TEMP_CTRL, 0x0020_0082)?;
    read_register(interface, TEMP_CTRL)?;
    write_register(interface, TEMP_CTRL, 0x0020_0083)?;
    read_register(interface, ADC_CONTROL)?;
    write_register(interface, ADC_CONTROL, 0x0000_7641)?;
    read_register(interface, IPH_MIRR_CTRL)?;
    write_register(interface, IPH_MIRR_CTRL, 0x0000_0003)?;
    read_register(interface, IPH_MIRR_CTRL)?;
    write_register(interface, IPH_MIRR_CTRL, 0x0000_0003)?;
    read_register(interface, LIFO_CTRL)?;
    write_register(interface, LIFO_CTRL, 0x0000_0001)?;
    read_register(interface, LIFO_CTRL)?;
    write_register(interface, LIFO_CTRL, 0x0000_0003)?;
    read_register(interface, LIFO_CTRL)?;
    write_register(interface, LIFO_CTRL, 0x0000_0007)?;
    Ok(())
}

fn event_rate_controller_baseline(interface: &Interface) -> Result<(), CameraError> {
    read_register(interface, ERC_RESERVED_6000)?;
    write_register(interface, ERC_RESERVED_6000, 0x0015_5400)?;
    read_register(interface, IN_DROP_RATE_CONTROL)?;
    write_register(interface, IN_DROP_RATE_CONTROL, 0x0000_0001)?;
    read_register(interface, REFERENCE_PERIOD)?;
    write_register(interface, REFERENCE_PERIOD, 0x0000_00c8)?;
    read_register(interface, TD_TARGET_EVENT_RATE)?;
    write_register(interface, TD_TARGET_EVENT_RATE, 0x0000_0fa0)?;
    read_register(interface, ERC_ENABLE)?;
    write_register(interface, ERC_ENABLE, 0x0000_0003)?;

    read_register(interface, ERC_RESERVED_602C)?;
    write_register(interface, ERC_RESERVED_602C, 0x0000_0001)?;
    let mut address = ERC_RESERVED_6800_6B98_BEGIN;
    while address < ERC_RESERVED_6800_6B98_END {
        read_register(interface, address)?;
        write_register(interface, address, 0x0808_0808)?;
        address += 4;
    }
    read_register(interface, ERC_RESERVED_602C)?;
    write_register(interface, ERC_RESERVED_602C, 0x0000_0002)?;

    let mut address = T_DROP_LUT_BEGIN;
    while address < T_DROP_LUT_END {
        read_register(interface, address)?;
        let half = address / 2;
        write_register(interface, address, ((half + 1) << 16) | half)?;
        address += 4;
    }

    read_register(interface, T_DROPPING_CONTROL)?;
    write_register(interface, T_DROPPING_CONTROL, 0x0000_0000)?;
    read_register(interface, H_DROPPING_CONTROL)?;
    write_register(interface, H_DROPPING_CONTROL, 0x0000_0000)?;
    read_register(interface, V_DROPPING_CONTROL)?;
    write_register(interface, V_DROPPING_CONTROL, 0x0000_0000)?;
    read_register(interface, ERC_RESERVED_6000)?;
    write_register(interface, ERC_RESERVED_6000, 0x0015_5401)?;
    read_register(interface, T_DROPPING_CONTROL)?;
    write_register(interface, T_DROPPING_CONTROL, 0x0000_0000)?;
    write_register(interface, TD_TARGET_EVENT_RATE, 0x0000_0fa0)?;
    Ok(())
}

fn issd_start(interface: &Interface, mask_intersection_only: bool) -> Result<(), CameraError> {
    write_register(interface, MIPI_CONTROL, 0x0000_02f9)?;
    write_register(interface, RO_CTRL, 0x0000_0000)?;
    read_register(interface, TIME_BASE_CTRL)?;
    write_register(interface, TIME_BASE_CTRL, 0x0000_0645)?;
    write_register(interface, 0x002c, 0x0022_c724)?;
    let ctrl = 0xf000_5422 | if mask_intersection_only { 0 } else { 1 << 6 };
    write_register(interface, ROI_CTRL, ctrl)
}

fn flush(interface: &Interface) -> Result<(), CameraError> {
    crate::usb::enumerate::wait_for_flush(interface, IDENTIFY_TIMEOUT)
}

/// Runs the full bring-up contract: stop, destroy, init, ROI, biases, start,
/// flush. Returns the bias shadow seeded by the forced initial send.
pub fn bring_up(interface: &Interface, parameters: &Parameters) -> Result<Option<Biases>, CameraError> {
    identify(interface)?;
    crate::identity::probe_discarded_fields(interface)?;

    issd_stop(interface)?;
    issd_destroy(interface)?;
    issd_init(interface)?;
    analog_front_end_baseline(interface)?;
    event_rate_controller_baseline(interface)?;

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

    read_register(interface, EDF_RESERVED_7004)?;
    write_register(interface, EDF_RESERVED_7004, 0x0000_c5ff)?;
    flush(interface)?;

    let mut shadow = None;
    send_parameters(interface, parameters, &mut shadow, true)?;

    read_register(interface, REFERENCE_PERIOD)?;
    read_register(interface, TD_TARGET_EVENT_RATE)?;
    read_register(interface, ERC_RESERVED_6000)?;
    read_register(interface, ERC_RESERVED_6000)?;
    read_register(interface, T_DROPPING_CONTROL)?;

    issd_start(interface, parameters.roi.mask_intersection_only)?;

    Ok(shadow)
}

/// Teardown: stop-then-destroy, matching the original's `reset()`.
pub fn tear_down(interface: &Interface) -> Result<(), CameraError> {
    issd_stop(interface)?;
    issd_destroy(interface)?;
    Ok(())
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

pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_biases_match_factory_tuning() {
        let biases = Biases::default();
        assert_eq!(biases.pr, 0x7c);
        assert_eq!(biases.unknown_2, 0x51);
    }

    #[test]
    fn bias_entries_are_in_wire_order() {
        let biases = Biases::default();
        let entries = biases.entries();
        assert_eq!(entries.first().map(|(address, _)| *address), Some(BIAS_PR));
        assert_eq!(entries.last().map(|(address, _)| *address), Some(BIAS_UNKNOWN_2));
        assert_eq!(entries.len(), 13);
    }
}
