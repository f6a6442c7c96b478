//! ATIS event codec: a 6-bit relative-timestamp field packed with polarity
//! and threshold-crossing flags into one byte, followed by two little-endian
//! 16-bit coordinates. Overflow past the 6-bit field is carried by
//! group-of-three `0xff` bytes plus an optional single remainder byte.

use crate::error::CameraError;

const TIME_QUANTUM: u64 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtisEvent {
    pub t: u64,
    pub x: u16,
    pub y: u16,
    pub polarity: bool,
    pub threshold_crossing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Byte0,
    Byte1,
    Byte2,
    Byte3,
}

pub struct AtisDecoder {
    state: State,
    overflow_units: u64,
    event: AtisEvent,
    width: u16,
    height: u16,
}

impl AtisDecoder {
    pub fn new(width: u16, height: u16) -> Self {
        AtisDecoder {
            state: State::Idle,
            overflow_units: 0,
            event: AtisEvent { t: 0, x: 0, y: 0, polarity: false, threshold_crossing: false },
            width,
            height,
        }
    }

    pub fn handle_byte(&mut self, byte: u8) -> Result<Option<AtisEvent>, CameraError> {
        if self.state == State::Idle {
            match byte {
                0xff => {
                    self.overflow_units += 3;
                    return Ok(None);
                }
                0xfd => {
                    self.overflow_units += 1;
                    return Ok(None);
                }
                0xfe => {
                    self.overflow_units += 2;
                    return Ok(None);
                }
                _ => {
                    let relative_t = self.overflow_units * TIME_QUANTUM + (byte >> 2) as u64;
                    self.overflow_units = 0;
                    self.event.t += relative_t;
                    self.event.polarity = (byte >> 1) & 1 == 1;
                    self.event.threshold_crossing = byte & 1 == 1;
                    self.state = State::Byte0;
                    return Ok(None);
                }
            }
        }

        match self.state {
            State::Idle => unreachable!(),
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

pub struct AtisEncoder {
    previous_t: u64,
    width: u16,
    height: u16,
}

impl AtisEncoder {
    pub fn new(width: u16, height: u16) -> Self {
        AtisEncoder { previous_t: 0, width, height }
    }

    pub fn encode(&mut self, event: AtisEvent) -> Result<Vec<u8>, CameraError> {
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

        let mut overflow_units = relative_t / TIME_QUANTUM;
        relative_t %= TIME_QUANTUM;
        while overflow_units >= 3 {
            bytes.push(0xff);
            overflow_units -= 3;
        }
        if overflow_units > 0 {
            bytes.push(0b1111_1100 | overflow_units as u8);
        }

        let final_byte = ((relative_t as u8) << 2)
            | (u8::from(event.polarity) << 1)
            | u8::from(event.threshold_crossing);
        bytes.push(final_byte);
        bytes.extend_from_slice(&event.x.to_le_bytes());
        bytes.extend_from_slice(&event.y.to_le_bytes());

        self.previous_t = event.t;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut encoder = AtisEncoder::new(640, 480);
        let event = AtisEvent { t: 200, x: 7, y: 9, polarity: true, threshold_crossing: false };
        let bytes = encoder.encode(event).unwrap();

        let mut decoder = AtisDecoder::new(640, 480);
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn large_delta_uses_overflow_bytes() {
        let mut encoder = AtisEncoder::new(640, 480);
        let first = AtisEvent { t: 0, x: 0, y: 0, polarity: false, threshold_crossing: false };
        let second = AtisEvent { t: 500, x: 1, y: 1, polarity: true, threshold_crossing: true };
        let first_bytes = encoder.encode(first).unwrap();
        let second_bytes = encoder.encode(second).unwrap();
        assert!(second_bytes.len() > 5, "large deltas must spill into overflow bytes");

        let mut decoder = AtisDecoder::new(640, 480);
        let mut out = None;
        for byte in first_bytes {
            out = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(out, Some(first));

        let mut out = None;
        for byte in second_bytes {
            out = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(out, Some(second));
    }
}
