//! The acquisition engine: three OS threads (USB producer, decoding
//! consumer, parameter updater) wired around a claimed interface, generic
//! over the sensor family so `camera.rs` can share one implementation for
//! both EVK4 and PSEE413.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::CameraConfig;
use crate::decode::{CdEvent, Decoder, TriggerEvent};
use crate::error::CameraError;
use crate::fifo::Fifo;
use crate::identity;
use crate::usb::transfer_pool::TransferPool;
use crate::usb::{Interface, LibusbContext};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The device-specific half of an [`AcquisitionEngine`]: bring-up, teardown
/// and the bias-diffing parameter write, implemented once per sensor family
/// in `sensor::evk4` / `sensor::psee413` and adapted here so the engine and
/// the public facade (`camera.rs`) stay generic over both.
pub trait SensorFamily: Send + Sync + 'static {
    type Biases: Copy + Clone + PartialEq + Send + 'static;
    type Parameters: Clone + Send + 'static;

    const WIDTH: u16;
    const HEIGHT: u16;

    fn bring_up(interface: &Interface, parameters: &Self::Parameters) -> Result<Option<Self::Biases>, CameraError>;
    fn tear_down(interface: &Interface) -> Result<(), CameraError>;
    fn send_parameters(
        interface: &Interface,
        parameters: &Self::Parameters,
        shadow: &mut Option<Self::Biases>,
        force: bool,
    ) -> Result<(), CameraError>;
}

pub type EventHandler = Box<dyn FnMut(&CdEvent) + Send>;
pub type TriggerHandler = Box<dyn FnMut(&TriggerEvent) + Send>;
pub type BeforeBufferHook = Box<dyn FnMut(usize, usize) -> bool + Send>;
pub type AfterBufferHook = Box<dyn FnMut() + Send>;
pub type ExceptionHandler = Box<dyn FnMut(&CameraError) + Send>;

/// The caller-supplied callbacks an engine dispatches into. Stored behind a
/// mutex per field (rather than moved once into the consumer thread) so a
/// `Camera` can replace any of them after construction.
pub struct Handlers {
    pub event: Mutex<EventHandler>,
    pub trigger: Mutex<TriggerHandler>,
    pub before_buffer: Mutex<BeforeBufferHook>,
    pub after_buffer: Mutex<AfterBufferHook>,
    pub exception: Mutex<ExceptionHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Handlers {
            event: Mutex::new(Box::new(|_| {})),
            trigger: Mutex::new(Box::new(|_| {})),
            before_buffer: Mutex::new(Box::new(|_, _| true)),
            after_buffer: Mutex::new(Box::new(|| {})),
            exception: Mutex::new(Box::new(|err| log::error!("camera fatal error: {err}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Opening,
    Ready,
    Running,
    Stopping,
    Closed,
}

struct ParameterRequest<P> {
    pending: Option<P>,
    update_required: bool,
}

/// One claimed device driven by its three worker threads. Dropping it is the
/// only way to stop: it cancels in-flight transfers, drains them, runs
/// teardown, and joins both software threads before returning.
pub struct AcquisitionEngine<F: SensorFamily> {
    interface: Arc<Interface>,
    _context: Arc<LibusbContext>,
    transfer_pool: Option<TransferPool>,
    fifo: Arc<Fifo>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    handlers: Arc<Handlers>,
    parameters: Arc<(Mutex<ParameterRequest<F::Parameters>>, Condvar)>,
    consumer: Option<JoinHandle<()>>,
    parameter_thread: Option<JoinHandle<()>>,
    device_type: crate::config::DeviceType,
    serial: String,
}

impl<F: SensorFamily> AcquisitionEngine<F> {
    /// Opens a matching device by identity/serial/type, runs bring-up, and
    /// starts all three threads. Blocks for the full bring-up sequence.
    pub fn open(config: &CameraConfig, parameters: F::Parameters, handlers: Handlers) -> Result<Self, CameraError> {
        let context = LibusbContext::new()
            .map_err(|source| CameraError::Transport { call: "libusb_init", source })?;
        let (interface, device_type, serial) = identity::open(
            &config.identities,
            &context,
            config.serial.as_deref(),
            config.device_type,
        )?;
        Self::from_claimed(context, interface, device_type, serial, config, parameters, handlers)
    }

    /// Runs bring-up and starts all three threads over an interface the
    /// caller has already claimed and identified. Used by the facade
    /// (`camera::open`), which must resolve the device's family before it
    /// can pick which `SensorFamily` to instantiate.
    pub(crate) fn from_claimed(
        context: Arc<LibusbContext>,
        interface: Interface,
        device_type: crate::config::DeviceType,
        serial: String,
        config: &CameraConfig,
        parameters: F::Parameters,
        handlers: Handlers,
    ) -> Result<Self, CameraError> {
        let interface = Arc::new(interface);
        let state = Arc::new(Mutex::new(EngineState::Opening));

        let initial_shadow = F::bring_up(&interface, &parameters)?;
        *state.lock().unwrap() = EngineState::Ready;

        let running = Arc::new(AtomicBool::new(true));
        let handlers = Arc::new(handlers);

        let fifo = Arc::new(Fifo::with_drop_handler(
            config.fifo_capacity,
            config.drop_threshold,
            Some(Box::new(|dropped| {
                log::debug!("acquisition FIFO dropped a buffer (total {dropped})");
            })),
        ));

        let producer_running = running.clone();
        let producer_state = state.clone();
        let producer_handlers = handlers.clone();
        let on_error: Box<dyn Fn(CameraError) + Send + Sync> = Box::new(move |err: CameraError| {
            if producer_running.swap(false, Ordering::SeqCst) {
                *producer_state.lock().unwrap() = EngineState::Stopping;
                (producer_handlers.exception.lock().unwrap())(&err);
            }
        });
        let buffer_fifo = fifo.clone();
        let on_buffer: Box<dyn Fn(Vec<u8>) + Send + Sync> = Box::new(move |buffer: Vec<u8>| {
            buffer_fifo.push_with_timestamp(buffer);
        });

        let transfer_pool =
            TransferPool::start(&interface, config.buffer_pool_size, config.buffer_size, on_buffer, on_error);
        *state.lock().unwrap() = EngineState::Running;

        let consumer = spawn_consumer::<F>(fifo.clone(), running.clone(), state.clone(), handlers.clone(), config.poll_timeout)?;

        let parameters_shared =
            Arc::new((Mutex::new(ParameterRequest { pending: None, update_required: false }), Condvar::new()));
        let parameter_thread = spawn_parameter_thread::<F>(
            interface.clone(),
            running.clone(),
            state.clone(),
            handlers.clone(),
            parameters_shared.clone(),
            initial_shadow,
            config.poll_timeout,
        )?;

        Ok(AcquisitionEngine {
            interface,
            _context: context,
            transfer_pool: Some(transfer_pool),
            fifo,
            running,
            state,
            handlers,
            parameters: parameters_shared,
            consumer: Some(consumer),
            parameter_thread: Some(parameter_thread),
            device_type,
            serial,
        })
    }

    pub fn device_type(&self) -> crate::config::DeviceType {
        self.device_type
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn alive(&self) -> Result<(), CameraError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CameraError::AlreadyStopped)
        }
    }

    pub fn set_event_handler(&self, handler: EventHandler) -> Result<(), CameraError> {
        self.alive()?;
        *self.handlers.event.lock().unwrap() = handler;
        Ok(())
    }

    pub fn set_trigger_handler(&self, handler: TriggerHandler) -> Result<(), CameraError> {
        self.alive()?;
        *self.handlers.trigger.lock().unwrap() = handler;
        Ok(())
    }

    pub fn set_before_buffer_hook(&self, hook: BeforeBufferHook) -> Result<(), CameraError> {
        self.alive()?;
        *self.handlers.before_buffer.lock().unwrap() = hook;
        Ok(())
    }

    pub fn set_after_buffer_hook(&self, hook: AfterBufferHook) -> Result<(), CameraError> {
        self.alive()?;
        *self.handlers.after_buffer.lock().unwrap() = hook;
        Ok(())
    }

    pub fn set_exception_handler(&self, handler: ExceptionHandler) -> Result<(), CameraError> {
        self.alive()?;
        *self.handlers.exception.lock().unwrap() = handler;
        Ok(())
    }

    /// Queues `parameters` for the parameter thread; only the most recently
    /// queued set survives if several updates land before it wakes.
    pub fn update_parameters(&self, parameters: F::Parameters) -> Result<(), CameraError> {
        self.alive()?;
        let (lock, condvar) = &*self.parameters;
        let mut request = lock.lock().unwrap();
        request.pending = Some(parameters);
        request.update_required = true;
        drop(request);
        condvar.notify_one();
        Ok(())
    }

    pub fn set_drop_threshold(&self, threshold: u64) {
        self.fifo.set_drop_threshold(threshold);
    }

    pub fn dropped_count(&self) -> u64 {
        self.fifo.dropped_count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn spawn_consumer<F: SensorFamily>(
    fifo: Arc<Fifo>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    handlers: Arc<Handlers>,
    poll_timeout: Duration,
) -> Result<JoinHandle<()>, CameraError> {
    std::thread::Builder::new()
        .name("gen4-decode".into())
        .spawn(move || {
            let event_handlers = handlers.clone();
            let trigger_handlers = handlers.clone();
            let before_handlers = handlers.clone();
            let after_handlers = handlers.clone();
            let mut decoder = Decoder::new(
                F::WIDTH,
                F::HEIGHT,
                move |event: &CdEvent| (event_handlers.event.lock().unwrap())(event),
                move |trigger: &TriggerEvent| (trigger_handlers.trigger.lock().unwrap())(trigger),
                move |used, size| (before_handlers.before_buffer.lock().unwrap())(used, size),
                move || (after_handlers.after_buffer.lock().unwrap())(),
            );
            while running.load(Ordering::SeqCst) {
                let (buffer, result) = fifo.pop(poll_timeout);
                if let Some(buffer) = buffer {
                    decoder.decode(&buffer, result.used, result.capacity);
                }
            }
            let mut guard = state.lock().unwrap();
            if *guard == EngineState::Running {
                *guard = EngineState::Stopping;
            }
        })
        .map_err(|source| CameraError::Transport { call: "thread::spawn", source })
}

fn spawn_parameter_thread<F: SensorFamily>(
    interface: Arc<Interface>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    handlers: Arc<Handlers>,
    parameters: Arc<(Mutex<ParameterRequest<F::Parameters>>, Condvar)>,
    mut shadow: Option<F::Biases>,
    poll_timeout: Duration,
) -> Result<JoinHandle<()>, CameraError> {
    std::thread::Builder::new()
        .name("gen4-parameters".into())
        .spawn(move || {
            let (lock, condvar) = &*parameters;
            while running.load(Ordering::SeqCst) {
                let mut request = lock.lock().unwrap();
                let (guard, _) = condvar
                    .wait_timeout_while(request, poll_timeout, |r| !r.update_required)
                    .unwrap();
                request = guard;
                if !request.update_required {
                    continue;
                }
                let next = request.pending.take();
                request.update_required = false;
                drop(request);

                let Some(next) = next else { continue };
                if let Err(err) = F::send_parameters(&interface, &next, &mut shadow, false) {
                    if running.swap(false, Ordering::SeqCst) {
                        *state.lock().unwrap() = EngineState::Stopping;
                        (handlers.exception.lock().unwrap())(&err);
                    }
                    break;
                }
            }
        })
        .map_err(|source| CameraError::Transport { call: "thread::spawn", source })
}

impl<F: SensorFamily> Drop for AcquisitionEngine<F> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = EngineState::Stopping;

        if let Some(pool) = &self.transfer_pool {
            pool.stop();
            pool.cancel_all();
        }
        self.fifo.close();
        self.parameters.1.notify_all();

        if let Some(pool) = self.transfer_pool.take() {
            if !pool.wait_until_idle(SHUTDOWN_DRAIN_TIMEOUT) {
                log::warn!("acquisition transfers did not drain within the shutdown timeout");
            }
        }

        if let Err(err) = F::tear_down(&self.interface) {
            log::error!("teardown failed while closing the camera: {err}");
        }

        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.parameter_thread.take() {
            let _ = handle.join();
        }

        *self.state.lock().unwrap() = EngineState::Closed;
    }
}
