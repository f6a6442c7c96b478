//! User-space driver and acquisition pipeline for Prophesee Gen4 event
//! cameras (EVK4, PSEE413): USB transport, device identification, sensor
//! bring-up, wire decoding, and the Event-Stream file codec.

pub mod camera;
pub mod config;
pub mod control_log;
pub mod decode;
pub mod engine;
pub mod error;
pub mod event_stream;
pub mod fifo;
pub mod identity;
pub mod sensor;
pub mod usb;

pub use camera::{available_devices, open, Camera, Evk4Camera, Psee413Camera};
pub use config::{CameraConfig, DeviceDescriptor, DeviceIdentity, DeviceSpeed, DeviceType, IDENTITIES};
pub use error::{CameraError, Result};
