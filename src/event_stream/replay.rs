//! Drives a byte-fed event decoder against a `Read` source, optionally
//! pacing delivery to match the recording's own timing.

use std::io::Read;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::CameraError;

use super::atis::{AtisDecoder, AtisEvent};
use super::color::{ColorDecoder, ColorEvent};
use super::dvs::{DvsDecoder, DvsEvent};
use super::generic::{GenericDecoder, GenericEvent};

/// How a [`Replay`] paces delivery of decoded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Rebase the first event's `t` to zero and pace against a steady
    /// (monotonic) clock from there.
    SynchronouslyButSkipOffset,
    /// Pace by treating `t` as wall-clock microseconds since the Unix epoch.
    Synchronously,
    /// Deliver every event as soon as it decodes, with no pacing.
    AsFastAsPossible,
}

/// One byte-at-a-time decoder usable by [`Replay`].
pub trait ByteDecoder {
    type Event;
    fn handle_byte(&mut self, byte: u8) -> Result<Option<Self::Event>, CameraError>;
    fn timestamp(event: &Self::Event) -> u64;
}

impl ByteDecoder for DvsDecoder {
    type Event = DvsEvent;
    fn handle_byte(&mut self, byte: u8) -> Result<Option<Self::Event>, CameraError> {
        DvsDecoder::handle_byte(self, byte)
    }
    fn timestamp(event: &Self::Event) -> u64 {
        event.t
    }
}

impl ByteDecoder for AtisDecoder {
    type Event = AtisEvent;
    fn handle_byte(&mut self, byte: u8) -> Result<Option<Self::Event>, CameraError> {
        AtisDecoder::handle_byte(self, byte)
    }
    fn timestamp(event: &Self::Event) -> u64 {
        event.t
    }
}

impl ByteDecoder for GenericDecoder {
    type Event = GenericEvent;
    fn handle_byte(&mut self, byte: u8) -> Result<Option<Self::Event>, CameraError> {
        GenericDecoder::handle_byte(self, byte)
    }
    fn timestamp(event: &Self::Event) -> u64 {
        event.t
    }
}

impl ByteDecoder for ColorDecoder {
    type Event = ColorEvent;
    fn handle_byte(&mut self, byte: u8) -> Result<Option<Self::Event>, CameraError> {
        ColorDecoder::handle_byte(self, byte)
    }
    fn timestamp(event: &Self::Event) -> u64 {
        event.t
    }
}

/// Reads events from `source` through `decoder`, invoking `on_event` for
/// each one, paced per `mode`. Loops back to `restart_from` and rebuilds a
/// fresh decoder via `new_decoder` on end-of-stream as long as
/// `should_restart` returns `true`; otherwise returns
/// [`CameraError::EndOfFile`].
pub fn run<R, D, NewDecoder>(
    mut source: R,
    mut decoder: D,
    new_decoder: NewDecoder,
    mode: DispatchMode,
    mut should_restart: impl FnMut() -> bool,
    mut on_event: impl FnMut(&D::Event),
) -> Result<(), CameraError>
where
    R: Read + std::io::Seek,
    D: ByteDecoder,
    NewDecoder: Fn() -> D,
{
    let data_start = source.stream_position().map_err(CameraError::Io)?;
    let mut byte = [0u8; 1];
    let mut steady_origin: Option<(Instant, u64)> = None;

    loop {
        match source.read(&mut byte).map_err(CameraError::Io)? {
            0 => {
                if should_restart() {
                    source.seek(std::io::SeekFrom::Start(data_start)).map_err(CameraError::Io)?;
                    decoder = new_decoder();
                    steady_origin = None;
                    continue;
                }
                return Err(CameraError::EndOfFile);
            }
            _ => {
                if let Some(event) = decoder.handle_byte(byte[0])? {
                    pace(mode, &mut steady_origin, D::timestamp(&event));
                    on_event(&event);
                }
            }
        }
    }
}

fn pace(mode: DispatchMode, origin: &mut Option<(Instant, u64)>, t: u64) {
    match mode {
        DispatchMode::AsFastAsPossible => {}
        DispatchMode::SynchronouslyButSkipOffset => {
            let (start, first_t) = *origin.get_or_insert((Instant::now(), t));
            let elapsed_micros = t.saturating_sub(first_t);
            let target = start + Duration::from_micros(elapsed_micros);
            sleep_until_instant(target);
        }
        DispatchMode::Synchronously => {
            let target = UNIX_EPOCH + Duration::from_micros(t);
            if let Ok(delay) = target.duration_since(SystemTime::now()) {
                std::thread::sleep(delay);
            }
        }
    }
}

fn sleep_until_instant(target: Instant) {
    let now = Instant::now();
    if target > now {
        std::thread::sleep(target - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn as_fast_as_possible_delivers_every_event_once() {
        let mut encoder = super::super::dvs::DvsEncoder::new(64, 64);
        let mut bytes = Vec::new();
        for i in 0..5u64 {
            bytes.extend(encoder.encode(DvsEvent { t: i * 10, x: 0, y: 0, on: true }).unwrap());
        }

        let mut count = 0;
        run(
            Cursor::new(bytes),
            DvsDecoder::new(64, 64),
            || DvsDecoder::new(64, 64),
            DispatchMode::AsFastAsPossible,
            || false,
            |_| count += 1,
        )
        .unwrap_err(); // EndOfFile once the cursor drains

        assert_eq!(count, 5);
    }

    #[test]
    fn restart_predicate_loops_back_to_start() {
        let mut encoder = super::super::dvs::DvsEncoder::new(64, 64);
        let bytes = encoder.encode(DvsEvent { t: 0, x: 0, y: 0, on: true }).unwrap();

        let mut count = 0;
        let result = run(
            Cursor::new(bytes),
            DvsDecoder::new(64, 64),
            || DvsDecoder::new(64, 64),
            DispatchMode::AsFastAsPossible,
            || {
                count += 1;
                count < 3
            },
            |_| {},
        );
        assert!(matches!(result, Err(CameraError::EndOfFile)));
        assert_eq!(count, 3);
    }
}
