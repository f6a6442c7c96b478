//! Minimal illustration of wiring a camera's handlers together: opens the
//! first matching device, records CD events to an Event-Stream file and
//! triggers to a JSON-Lines control log until interrupted. Not part of the
//! crate's public contract.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use prophesee_gen4_driver::camera::Camera;
use prophesee_gen4_driver::control_log::ControlLogEntry;
use prophesee_gen4_driver::event_stream::header::EventType;
use prophesee_gen4_driver::event_stream::{self, Event};
use prophesee_gen4_driver::CameraConfig;

fn wall_clock_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn main() -> Result<()> {
    env_logger::init();

    let config = CameraConfig::default();
    let camera = prophesee_gen4_driver::open(&config).context("opening a Gen4 camera")?;
    log::info!(
        "opened {} (serial {}) at {}x{}",
        camera.device_type().name(),
        camera.serial(),
        camera.width(),
        camera.height()
    );

    let events_file = File::create("recording.es").context("creating recording.es")?;
    let writer = Arc::new(Mutex::new(
        event_stream::write(EventType::Dvs, BufWriter::new(events_file), camera.width(), camera.height())
            .context("writing the Event Stream header")?,
    ));
    let control_log = Arc::new(Mutex::new(BufWriter::new(
        File::create("control_log.jsonl").context("creating control_log.jsonl")?,
    )));

    let event_writer = writer.clone();
    camera
        .on_event(Box::new(move |event| {
            let record = Event::Dvs(event_stream::dvs::DvsEvent { t: event.t, x: event.x, y: event.y, on: event.on });
            if let Err(err) = event_writer.lock().unwrap().write(&record) {
                log::error!("failed to record event: {err}");
            }
        }))
        .context("installing the event handler")?;

    let trigger_log = control_log.clone();
    camera
        .on_trigger(Box::new(move |trigger| {
            let entry = ControlLogEntry::trigger(wall_clock_nanos(), trigger);
            let mut sink = trigger_log.lock().unwrap();
            match serde_json::to_writer(&mut *sink, &entry) {
                Ok(()) => {
                    let _ = writeln!(sink);
                }
                Err(err) => log::error!("failed to record trigger: {err}"),
            }
        }))
        .context("installing the trigger handler")?;

    camera
        .on_exception(Box::new(|err| log::error!("camera stopped: {err}")))
        .context("installing the exception handler")?;

    log::info!("recording to recording.es and control_log.jsonl; interrupt the process to stop");
    while camera.is_running() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    writer.lock().unwrap().flush().context("flushing recording.es")?;
    control_log.lock().unwrap().flush().context("flushing control_log.jsonl")?;
    Ok(())
}
