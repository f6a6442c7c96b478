//! Generic event codec: an opaque, variable-length payload behind a plain
//! delta-encoded timestamp byte (no polarity/threshold flags to share the
//! byte with, unlike `dvs`/`atis`).

use crate::error::CameraError;

const TIME_STEP: u64 = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericEvent {
    pub t: u64,
    pub payload: Vec<u8>,
}

fn encode_varint_size(size: u64) -> Vec<u8> {
    let mut groups = vec![(size & 0x7f) as u8];
    let mut remaining = size >> 7;
    while remaining > 0 {
        groups.push((remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    groups.reverse();
    let last = groups.len() - 1;
    groups
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| (chunk << 1) | u8::from(i != last))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Time,
    SizeVarint,
    Payload,
}

pub struct GenericDecoder {
    state: State,
    t: u64,
    time_overflow: u64,
    size: u64,
    payload: Vec<u8>,
}

impl GenericDecoder {
    pub fn new() -> Self {
        GenericDecoder { state: State::Time, t: 0, time_overflow: 0, size: 0, payload: Vec::new() }
    }

    pub fn handle_byte(&mut self, byte: u8) -> Result<Option<GenericEvent>, CameraError> {
        match self.state {
            State::Time => {
                if byte == 0xff {
                    self.time_overflow += TIME_STEP;
                } else {
                    self.t += self.time_overflow + byte as u64;
                    self.time_overflow = 0;
                    self.size = 0;
                    self.state = State::SizeVarint;
                }
                Ok(None)
            }
            State::SizeVarint => {
                let more = byte & 1 == 1;
                self.size = (self.size << 7) | (byte >> 1) as u64;
                if !more {
                    self.payload = Vec::with_capacity(self.size as usize);
                    self.state = if self.size == 0 { State::Time } else { State::Payload };
                    if self.size == 0 {
                        let event = GenericEvent { t: self.t, payload: Vec::new() };
                        return Ok(Some(event));
                    }
                }
                Ok(None)
            }
            State::Payload => {
                self.payload.push(byte);
                if self.payload.len() as u64 == self.size {
                    self.state = State::Time;
                    let event = GenericEvent { t: self.t, payload: std::mem::take(&mut self.payload) };
                    return Ok(Some(event));
                }
                Ok(None)
            }
        }
    }
}

impl Default for GenericDecoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GenericEncoder {
    previous_t: u64,
}

impl GenericEncoder {
    pub fn new() -> Self {
        GenericEncoder { previous_t: 0 }
    }

    pub fn encode(&mut self, event: &GenericEvent) -> Result<Vec<u8>, CameraError> {
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
        bytes.extend(encode_varint_size(event.payload.len() as u64));
        bytes.extend_from_slice(&event.payload);

        self.previous_t = event.t;
        Ok(bytes)
    }
}

impl Default for GenericEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_small_payload() {
        let mut encoder = GenericEncoder::new();
        let event = GenericEvent { t: 42, payload: vec![1, 2, 3] };
        let bytes = encoder.encode(&event).unwrap();

        let mut decoder = GenericDecoder::new();
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut encoder = GenericEncoder::new();
        let event = GenericEvent { t: 1, payload: Vec::new() };
        let bytes = encoder.encode(&event).unwrap();

        let mut decoder = GenericDecoder::new();
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn large_payload_uses_multi_byte_varint() {
        let mut encoder = GenericEncoder::new();
        let event = GenericEvent { t: 0, payload: vec![7u8; 400] };
        let bytes = encoder.encode(&event).unwrap();

        let mut decoder = GenericDecoder::new();
        let mut result = None;
        for byte in bytes {
            result = decoder.handle_byte(byte).unwrap();
        }
        assert_eq!(result, Some(event));
    }

    #[test]
    fn large_delta_uses_overflow_bytes() {
        let mut encoder = GenericEncoder::new();
        let bytes = encoder.encode(&GenericEvent { t: 1000, payload: vec![] }).unwrap();
        assert!(bytes[0] == 0xff);
    }
}
