//! DVS event codec: one event per 5 bytes, plus standalone `0xff` overflow
//! bytes that each add 127 to the running timestamp.

use crate::error::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvsEvent {
    pub t: u64,
    pub x: u16,
    pub y: u16,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Byte0,
    Byte1,
    Byte2,
    Byte3,
}

/// Byte-at-a-time decoder state machine, mirroring `handle_byte<dvs>`
/// exactly: a `0xff` byte in `Idle` is a pure 127-tick overflow with no
/// state transition, a `0xfe` byte in `Idle` is silently skipped, and any
/// other byte there begins a new 5-byte event.
pub struct DvsDecoder {
    state: State,
    event: DvsEvent,
    width: u16,
    height: u16,
}

impl DvsDecoder {
    pub fn new(width: u16, height: u16) -> Self {
        DvsDecoder { state: State::Idle, event: DvsEvent { t: 0, x: 0, y: 0, on: false }, width, height }
    }

    /// Feeds one byte in. Returns `Ok(Some(event))` when a 5-byte event just
    /// completed, `Ok(None)` while still mid-event or after an overflow
    /// byte, and `Err` on an out-of-range coordinate.
    pub fn handle_byte(&mut self, byte: u8) -> Result<Option<DvsEvent>, CameraError> {
        match self.state {
            State::Idle => {
                if byte == 0b1111_1111 {
                    self.event.t += 127;
                } else if byte != 0b1111_1110 {
                    self.event.t += (byte >> 1) as u64;
                    self.event.on = byte & 1 == 1;
                    self.state = State::Byte0;
                }
                Ok(None)
            }
            State::Byte0 => {
                self.event.x = byte as u16;
                self.state = State::Byte1;
                Ok(None)
            }
            State::Byte1 => {
                self.event.x |= (byte as u16) << 8;
                if self.event.x >= self.width {
                    return Err(CameraError::CoordinatesOverflow {
                        x: self.event.x,
                        y: self.event.y,
                        width: self.width,
                        height: self.height,
                    });
                }
                self.state = State::Byte2;
                Ok(None)
            }
            State::Byte2 => {
                self.event.y = byte as u16;
                self.state = State::Byte3;
                Ok(None)
            }
            State::Byte3 => {
                self.event.y |= (byte as u16) << 8;
                if self.event.y >= self.height {
                    return Err(CameraError::CoordinatesOverflow {
                        x: self.event.x,
                        y: self.event.y,
                        width: self.width,
                        height: self.height,
                    });
                }
                self.state = State::Idle;
                Ok(Some(self.event))
            }
        }
    }
}

/// Encodes one DVS event into the byte stream, tracking the previous
/// event's timestamp to compute the relative delta.
pub struct DvsEncoder {
    previous_t: u64,
    width: u16,
    height: u16,
}

impl DvsEncoder {
    pub fn new(width: u16, height: u16) -> Self {
        DvsEncoder { previous_t: 0, width, height }
    }

    pub fn encode(&mut self, event: DvsEvent) -> Result<Vec<u8>, CameraError> {
        if event.x >= self.width || event.y >= self.height {
            return Err(CameraError::CoordinatesOverflow {
                x: event.x,
                y: event.y,
                width: self.width,
                height: self.height,
            });
        }
        if event.t < self.previous_t {
            return Err(CameraError::TimestampRegression { t: event.t, previous_t: self.previous_t });
        }

        let mut relative_t = event.t - self.previous_t;
        let mut bytes = Vec::new();
        if relative_t >= 127 {
            let overflow_bytes = relative_t / 127;
            bytes.extend(std::iter::repeat(0xffu8).take(overflow_bytes as usize));
            relative_t -= overflow_bytes * 127;
        }
        bytes.push(((relative_t << 1) as u8) | u8::from(event.on));
        bytes.push((event.x & 0xff) as u8);
        bytes.push(((event.x >> 8) & 0xff) as u8);
        bytes.push((event.y & 0xff) as u8);
        bytes.push(((event.y >> 8) & 0xff) as u8);

        self.previous_t = event.t;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let mut decoder = DvsDecoder::new(1280, 720);
        let bytes = [0b0000_0101, 10, 0, 20, 0];
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(DvsEvent { t: 2, x: 10, y: 20, on: true }));
    }

    #[test]
    fn overflow_byte_advances_time_without_emitting() {
        let mut decoder = DvsDecoder::new(1280, 720);
        assert_eq!(decoder.handle_byte(0xff).unwrap(), None);
        assert_eq!(decoder.event.t, 127);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut encoder = DvsEncoder::new(1280, 720);
        let event = DvsEvent { t: 500, x: 3, y: 4, on: false };
        let bytes = encoder.encode(event).unwrap();

        let mut decoder = DvsDecoder::new(1280, 720);
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn rejects_out_of_range_x() {
        let mut encoder = DvsEncoder::new(64, 64);
        let err = encoder.encode(DvsEvent { t: 0, x: 64, y: 0, on: true });
        assert!(matches!(err, Err(CameraError::CoordinatesOverflow { .. })));
    }

    #[test]
    fn rejects_timestamp_regression() {
        let mut encoder = DvsEncoder::new(64, 64);
        encoder.encode(DvsEvent { t: 10, x: 0, y: 0, on: true }).unwrap();
        let err = encoder.encode(DvsEvent { t: 5, x: 0, y: 0, on: true });
        assert!(matches!(err, Err(CameraError::TimestampRegression { .. })));
    }
}
