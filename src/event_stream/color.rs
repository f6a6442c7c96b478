//! Color event codec: the same plain delta-timestamp byte as `generic`,
//! followed by little-endian x/y coordinates and three raw RGB bytes.

use crate::error::CameraError;

const TIME_STEP: u64 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorEvent {
    pub t: u64,
    pub x: u16,
    pub y: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Time,
    Byte0,
    Byte1,
    Byte2,
    Byte3,
    Red,
    Green,
    Blue,
}

pub struct ColorDecoder {
    state: State,
    t: u64,
    time_overflow: u64,
    event: ColorEvent,
    width: u16,
    height: u16,
}

impl ColorDecoder {
    pub fn new(width: u16, height: u16) -> Self {
        ColorDecoder {
            state: State::Time,
            t: 0,
            time_overflow: 0,
            event: ColorEvent { t: 0, x: 0, y: 0, r: 0, g: 0, b: 0 },
            width,
            height,
        }
    }

    pub fn handle_byte(&mut self, byte: u8) -> Result<Option<ColorEvent>, CameraError> {
        match self.state {
            State::Time => {
                if byte == 0xff {
                    self.time_overflow += TIME_STEP;
                } else {
                    self.t += self.time_overflow + byte as u64;
                    self.time_overflow = 0;
                    self.event.t = self.t;
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
                self.state = State::Red;
                Ok(None)
            }
            State::Red => {
                self.event.r = byte;
                self.state = State::Green;
                Ok(None)
            }
            State::Green => {
                self.event.g = byte;
                self.state = State::Blue;
                Ok(None)
            }
            State::Blue => {
                self.event.b = byte;
                self.state = State::Time;
                Ok(Some(self.event))
            }
        }
    }
}

pub struct ColorEncoder {
    previous_t: u64,
    width: u16,
    height: u16,
}

impl ColorEncoder {
    pub fn new(width: u16, height: u16) -> Self {
        ColorEncoder { previous_t: 0, width, height }
    }

    pub fn encode(&mut self, event: ColorEvent) -> Result<Vec<u8>, CameraError> {
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
        while relative_t >= TIME_STEP {
            bytes.push(0xff);
            relative_t -= TIME_STEP;
        }
        bytes.push(relative_t as u8);
        bytes.extend_from_slice(&event.x.to_le_bytes());
        bytes.extend_from_slice(&event.y.to_le_bytes());
        bytes.push(event.r);
        bytes.push(event.g);
        bytes.push(event.b);

        self.previous_t = event.t;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut encoder = ColorEncoder::new(640, 480);
        let event = ColorEvent { t: 10, x: 1, y: 2, r: 255, g: 128, b: 0 };
        let bytes = encoder.encode(event).unwrap();

        let mut decoder = ColorDecoder::new(640, 480);
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn rejects_out_of_range_y() {
        let mut encoder = ColorEncoder::new(640, 480);
        let err = encoder.encode(ColorEvent { t: 0, x: 0, y: 480, r: 0, g: 0, b: 0 });
        assert!(matches!(err, Err(CameraError::CoordinatesOverflow { .. })));
    }
}
