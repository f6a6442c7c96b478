//! Raw libusb1-sys transport: context lifecycle, interface claiming, device
//! enumeration and the resubmitting bulk-read pool that feeds acquisition.

pub mod context;
pub mod enumerate;
pub mod interface;
pub mod transfer_pool;

pub use context::{LibusbContext, TransferOutcome};
pub use enumerate::{available_devices, open, resolve_device_type, wait_for_flush, ENDPOINT_IN, ENDPOINT_OUT};
pub use interface::Interface;
pub use transfer_pool::TransferPool;
