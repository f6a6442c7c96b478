//! Event Stream (`.es`) file codec: header framing plus one delta-encoding
//! scheme per event type, and a `Replay` driver that paces file playback.

pub mod atis;
pub mod color;
pub mod dvs;
pub mod generic;
pub mod header;
pub mod replay;

use std::io::Write;

use crate::error::CameraError;
use atis::{AtisEncoder, AtisEvent};
use color::{ColorEncoder, ColorEvent};
use dvs::{DvsEncoder, DvsEvent};
use generic::{GenericEncoder, GenericEvent};
use header::{write_header, EventType, Header};

/// One decoded (or to-be-encoded) Event-Stream record, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Dvs(DvsEvent),
    Atis(AtisEvent),
    Generic(GenericEvent),
    Color(ColorEvent),
}

enum Encoder {
    Dvs(DvsEncoder),
    Atis(AtisEncoder),
    Generic(GenericEncoder),
    Color(ColorEncoder),
}

/// A sink obeying the Event-Stream wire contract: constructing it
/// writes the header immediately, and every subsequent [`Self::write`] call
/// delta-encodes one event of the type fixed at construction.
pub struct EventStreamWriter<W: Write> {
    sink: W,
    event_type: EventType,
    encoder: Encoder,
}

impl<W: Write> EventStreamWriter<W> {
    pub fn create(event_type: EventType, mut sink: W, width: u16, height: u16) -> Result<Self, CameraError> {
        write_header(&mut sink, &Header { event_type, width, height })?;
        let encoder = match event_type {
            EventType::Dvs => Encoder::Dvs(DvsEncoder::new(width, height)),
            EventType::Atis => Encoder::Atis(AtisEncoder::new(width, height)),
            EventType::Generic => Encoder::Generic(GenericEncoder::new()),
            EventType::Color => Encoder::Color(ColorEncoder::new(width, height)),
        };
        Ok(EventStreamWriter { sink, event_type, encoder })
    }

    /// Encodes and writes `event`. Fails with
    /// [`CameraError::UnexpectedResponse`] if its variant doesn't match the
    /// type this writer was created for.
    pub fn write(&mut self, event: &Event) -> Result<(), CameraError> {
        let bytes = match (&mut self.encoder, event) {
            (Encoder::Dvs(encoder), Event::Dvs(event)) => encoder.encode(*event)?,
            (Encoder::Atis(encoder), Event::Atis(event)) => encoder.encode(*event)?,
            (Encoder::Generic(encoder), Event::Generic(event)) => encoder.encode(event)?,
            (Encoder::Color(encoder), Event::Color(event)) => encoder.encode(*event)?,
            _ => return Err(CameraError::UnexpectedResponse { call: "write: event type mismatch" }),
        };
        self.sink.write_all(&bytes).map_err(CameraError::Io)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn flush(&mut self) -> Result<(), CameraError> {
        self.sink.flush().map_err(CameraError::Io)
    }
}

/// Top-level entry point matching the facade's `write(type, sink, width,
/// height)` signature.
pub fn write<W: Write>(
    event_type: EventType,
    sink: W,
    width: u16,
    height: u16,
) -> Result<EventStreamWriter<W>, CameraError> {
    EventStreamWriter::create(event_type, sink, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_then_events() {
        let mut buffer = Vec::new();
        {
            let mut writer = write(EventType::Dvs, &mut buffer, 64, 64).unwrap();
            writer.write(&Event::Dvs(DvsEvent { t: 0, x: 1, y: 2, on: true })).unwrap();
        }
        assert!(buffer.starts_with(header::SIGNATURE));
    }

    #[test]
    fn rejects_mismatched_event_variant() {
        let mut buffer = Vec::new();
        let mut writer = write(EventType::Dvs, &mut buffer, 64, 64).unwrap();
        let err = writer.write(&Event::Color(ColorEvent { t: 0, x: 0, y: 0, r: 0, g: 0, b: 0 }));
        assert!(matches!(err, Err(CameraError::UnexpectedResponse { .. })));
    }
}
