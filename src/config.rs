use std::time::Duration;

/// A (vendor_id, product_id) pair recognized as a Prophesee Gen4 candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The three USB identities a Gen4 sensor can enumerate under.
pub const IDENTITIES: [DeviceIdentity; 3] = [
    DeviceIdentity { vendor_id: 0x04b4, product_id: 0x00f4 },
    DeviceIdentity { vendor_id: 0x04b4, product_id: 0x00f5 },
    DeviceIdentity { vendor_id: 0x31f7, product_id: 0x0003 },
];

/// The sensor family identified during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Evk3Hd,
    Evk4,
    Psee413,
}

impl DeviceType {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Evk3Hd => "EVK3-HD",
            DeviceType::Evk4 => "EVK4",
            DeviceType::Psee413 => "PSEE413",
        }
    }
}

/// The USB transfer speed reported for a claimed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpeed {
    Unknown,
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

/// A connected candidate's identifying information, as returned by
/// [`crate::identity::available_devices`].
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub device_type: DeviceType,
    pub serial: String,
    pub speed: DeviceSpeed,
}

/// Constructor-time configuration for [`crate::camera::open`].
///
/// This is a plain data type, not a CLI: turning process arguments or a JSON
/// document into a `CameraConfig` is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub identities: Vec<DeviceIdentity>,
    pub serial: Option<String>,
    pub device_type: Option<DeviceType>,
    pub buffer_pool_size: usize,
    pub buffer_size: usize,
    pub fifo_capacity: usize,
    pub poll_timeout: Duration,
    /// FIFO capacity above which new buffers are dropped. `0` means unbounded.
    pub drop_threshold: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            identities: IDENTITIES.to_vec(),
            serial: None,
            device_type: None,
            buffer_pool_size: 32,
            buffer_size: 1 << 17,
            fifo_capacity: 4096,
            poll_timeout: Duration::from_millis(100),
            drop_threshold: 0,
        }
    }
}
