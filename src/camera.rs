//! Public facade: `available_devices`, `open`, the object-safe `Camera`
//! trait, and the two concrete cameras that back it. A small, dyn-compatible
//! trait delegating anything device-specific to the backing struct.

use std::sync::Arc;

use crate::config::{CameraConfig, DeviceDescriptor, DeviceIdentity, DeviceType};
use crate::engine::{
    AcquisitionEngine, AfterBufferHook, BeforeBufferHook, EventHandler, ExceptionHandler, Handlers, SensorFamily,
    TriggerHandler,
};
use crate::error::CameraError;
use crate::identity;
use crate::sensor::{evk4, psee413};
use crate::usb::LibusbContext;

/// Adapts `sensor::evk4`'s free functions to [`SensorFamily`].
pub struct Evk4Family;

impl SensorFamily for Evk4Family {
    type Biases = evk4::Biases;
    type Parameters = evk4::Parameters;
    const WIDTH: u16 = evk4::WIDTH;
    const HEIGHT: u16 = evk4::HEIGHT;

    fn bring_up(interface: &crate::usb::Interface, parameters: &Self::Parameters) -> Result<Option<Self::Biases>, CameraError> {
        evk4::bring_up(interface, parameters)
    }

    fn tear_down(interface: &crate::usb::Interface) -> Result<(), CameraError> {
        evk4::tear_down(interface)
    }

    fn send_parameters(
        interface: &crate::usb::Interface,
        parameters: &Self::Parameters,
        shadow: &mut Option<Self::Biases>,
        force: bool,
    ) -> Result<(), CameraError> {
        evk4::send_parameters(interface, parameters, shadow, force)
    }
}

/// Adapts `sensor::psee413`'s free functions to [`SensorFamily`].
pub struct Psee413Family;

impl SensorFamily for Psee413Family {
    type Biases = psee413::Biases;
    type Parameters = psee413::Parameters;
    const WIDTH: u16 = psee413::WIDTH;
    const HEIGHT: u16 = psee413::HEIGHT;

    fn bring_up(interface: &crate::usb::Interface, parameters: &Self::Parameters) -> Result<Option<Self::Biases>, CameraError> {
        psee413::bring_up(interface, parameters)
    }

    fn tear_down(interface: &crate::usb::Interface) -> Result<(), CameraError> {
        psee413::tear_down(interface)
    }

    fn send_parameters(
        interface: &crate::usb::Interface,
        parameters: &Self::Parameters,
        shadow: &mut Option<Self::Biases>,
        force: bool,
    ) -> Result<(), CameraError> {
        psee413::send_parameters(interface, parameters, shadow, force)
    }
}

/// The small, object-safe surface shared by every camera family. Anything
/// that needs the device's own parameter type (`update_parameters`) lives on
/// the concrete struct instead, since it can't be expressed generically in a
/// dyn-compatible trait.
pub trait Camera: Send {
    fn device_type(&self) -> DeviceType;
    fn serial(&self) -> &str;
    fn width(&self) -> u16;
    fn height(&self) -> u16;

    fn on_event(&self, handler: EventHandler) -> Result<(), CameraError>;
    fn on_trigger(&self, handler: TriggerHandler) -> Result<(), CameraError>;
    fn on_before_buffer(&self, hook: BeforeBufferHook) -> Result<(), CameraError>;
    fn on_after_buffer(&self, hook: AfterBufferHook) -> Result<(), CameraError>;
    fn on_exception(&self, handler: ExceptionHandler) -> Result<(), CameraError>;

    fn set_drop_threshold(&self, threshold: u64);
    fn dropped_count(&self) -> u64;
    fn is_running(&self) -> bool;
}

macro_rules! impl_camera {
    ($struct_name:ident, $family:ty) => {
        pub struct $struct_name {
            engine: AcquisitionEngine<$family>,
        }

        impl $struct_name {
            pub fn open(config: &CameraConfig, parameters: <$family as SensorFamily>::Parameters) -> Result<Self, CameraError> {
                let engine = AcquisitionEngine::open(config, parameters, Handlers::default())?;
                Ok(Self { engine })
            }

            pub fn update_parameters(&self, parameters: <$family as SensorFamily>::Parameters) -> Result<(), CameraError> {
                self.engine.update_parameters(parameters)
            }
        }

        impl Camera for $struct_name {
            fn device_type(&self) -> DeviceType {
                self.engine.device_type()
            }

            fn serial(&self) -> &str {
                self.engine.serial()
            }

            fn width(&self) -> u16 {
                <$family as SensorFamily>::WIDTH
            }

            fn height(&self) -> u16 {
                <$family as SensorFamily>::HEIGHT
            }

            fn on_event(&self, handler: EventHandler) -> Result<(), CameraError> {
                self.engine.set_event_handler(handler)
            }

            fn on_trigger(&self, handler: TriggerHandler) -> Result<(), CameraError> {
                self.engine.set_trigger_handler(handler)
            }

            fn on_before_buffer(&self, hook: BeforeBufferHook) -> Result<(), CameraError> {
                self.engine.set_before_buffer_hook(hook)
            }

            fn on_after_buffer(&self, hook: AfterBufferHook) -> Result<(), CameraError> {
                self.engine.set_after_buffer_hook(hook)
            }

            fn on_exception(&self, handler: ExceptionHandler) -> Result<(), CameraError> {
                self.engine.set_exception_handler(handler)
            }

            fn set_drop_threshold(&self, threshold: u64) {
                self.engine.set_drop_threshold(threshold)
            }

            fn dropped_count(&self) -> u64 {
                self.engine.dropped_count()
            }

            fn is_running(&self) -> bool {
                self.engine.is_running()
            }
        }
    };
}

impl_camera!(Evk4Camera, Evk4Family);
impl_camera!(Psee413Camera, Psee413Family);

/// Lists every connected candidate matching `identities`, without claiming
/// any of them.
pub fn available_devices(identities: &[DeviceIdentity]) -> Result<Vec<DeviceDescriptor>, CameraError> {
    let context = LibusbContext::new().map_err(|source| CameraError::Transport { call: "libusb_init", source })?;
    Ok(identity::available_devices(identities, &context))
}

/// Opens the first connected device matching `config`'s identities (and
/// optional serial/type filter), resolves which sensor family it is, and
/// returns the matching `Camera` with default biases and a blank ROI mask.
/// Callers refine either with [`Evk4Camera::update_parameters`] /
/// [`Psee413Camera::update_parameters`] once they've downcast, or by opening
/// the concrete struct directly when the family is known ahead of time.
pub fn open(config: &CameraConfig) -> Result<Box<dyn Camera>, CameraError> {
    let context: Arc<LibusbContext> =
        LibusbContext::new().map_err(|source| CameraError::Transport { call: "libusb_init", source })?;
    let (interface, device_type, serial) =
        identity::open(&config.identities, &context, config.serial.as_deref(), config.device_type)?;

    match device_type {
        DeviceType::Evk4 => {
            let engine = AcquisitionEngine::<Evk4Family>::from_claimed(
                context,
                interface,
                device_type,
                serial,
                config,
                evk4::Parameters::default(),
                Handlers::default(),
            )?;
            Ok(Box::new(Evk4Camera { engine }))
        }
        DeviceType::Psee413 => {
            let engine = AcquisitionEngine::<Psee413Family>::from_claimed(
                context,
                interface,
                device_type,
                serial,
                config,
                psee413::Parameters::default(),
                Handlers::default(),
            )?;
            Ok(Box::new(Psee413Camera { engine }))
        }
        DeviceType::Evk3Hd => Err(CameraError::UnrecognizedDevice {
            manufacturer: None,
            product: Some("EVK3-HD (no sensor bring-up implemented for this family)".to_string()),
        }),
    }
}
