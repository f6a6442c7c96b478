//! The 16-bit-word wire protocol: change-detection (CD) and external
//! trigger events packed into a stream of little-endian half-words, plus a
//! trailing 8-byte little-endian host timestamp appended per buffer by the
//! producer.

const OP_Y_ADDRESS: u8 = 0b0000;
const OP_X_IMMEDIATE: u8 = 0b0010;
const OP_X_BASE: u8 = 0b0011;
const OP_VECT_12: u8 = 0b0100;
const OP_VECT_8: u8 = 0b0101;
const OP_TIME_LOW: u8 = 0b0110;
const OP_TIME_HIGH: u8 = 0b1000;
const OP_EXT_TRIGGER: u8 = 0b1010;

/// A MSB step larger than this, in the decreasing direction, is the 12-bit
/// counter wrapping rather than a legitimate jump.
const OVERFLOW_THRESHOLD: u32 = (1 << 12) - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdEvent {
    pub t: u64,
    pub x: u16,
    pub y: u16,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub t: u64,
    pub system_timestamp: u64,
    pub id: u8,
    pub rising: bool,
}

/// Unpacks the contiguous 11-bit x address (payload bits 0..10) and the
/// polarity bit (payload bit 11), per the wire format's "X-address with
/// immediate polarity" / "X-address base" opcodes.
fn unpack_x_and_polarity(payload: u32) -> (u16, bool) {
    let on = (payload >> 11) & 1 == 1;
    let x = (payload & 0x7ff) as u16;
    (x, on)
}

/// Decodes one raw acquisition buffer into CD and trigger events.
///
/// `before_buffer` is called first with `(used, size)` and decides whether
/// this buffer is worth dispatching at all (`true`) or merely worth tracking
/// state for (`false`) — the latter still advances timestamps, x/on and the
/// vector-burst cursor exactly as the dispatching path would, it just never
/// invokes `handle_event`/`handle_trigger_event`. `after_buffer` runs once
/// per call regardless of which path was taken.
pub struct Decoder<HandleEvent, HandleTrigger, BeforeBuffer, AfterBuffer>
where
    HandleEvent: FnMut(&CdEvent),
    HandleTrigger: FnMut(&TriggerEvent),
    BeforeBuffer: FnMut(usize, usize) -> bool,
    AfterBuffer: FnMut(),
{
    handle_event: HandleEvent,
    handle_trigger_event: HandleTrigger,
    before_buffer: BeforeBuffer,
    after_buffer: AfterBuffer,
    width: u16,
    height: u16,
    previous_lsb_t: u32,
    previous_msb_t: u32,
    overflows: u64,
    event: CdEvent,
}

impl<HandleEvent, HandleTrigger, BeforeBuffer, AfterBuffer>
    Decoder<HandleEvent, HandleTrigger, BeforeBuffer, AfterBuffer>
where
    HandleEvent: FnMut(&CdEvent),
    HandleTrigger: FnMut(&TriggerEvent),
    BeforeBuffer: FnMut(usize, usize) -> bool,
    AfterBuffer: FnMut(),
{
    pub fn new(
        width: u16,
        height: u16,
        handle_event: HandleEvent,
        handle_trigger_event: HandleTrigger,
        before_buffer: BeforeBuffer,
        after_buffer: AfterBuffer,
    ) -> Self {
        Decoder {
            handle_event,
            handle_trigger_event,
            before_buffer,
            after_buffer,
            width,
            height,
            previous_lsb_t: 0,
            previous_msb_t: 0,
            overflows: 0,
            event: CdEvent { t: 0, x: 0, y: 0, on: false },
        }
    }

    fn update_time_low(&mut self, payload: u32) {
        self.previous_lsb_t = payload & 0xfff;
        self.apply_reconstructed_timestamp();
    }

    fn update_time_high(&mut self, payload: u32) {
        let msb = payload & 0xfff;
        if msb < self.previous_msb_t && self.previous_msb_t - msb > OVERFLOW_THRESHOLD {
            self.overflows += 1;
        }
        self.previous_msb_t = msb;
        self.previous_lsb_t = 0;
        self.apply_reconstructed_timestamp();
    }

    fn apply_reconstructed_timestamp(&mut self) {
        let t = (self.previous_lsb_t as u64 | ((self.previous_msb_t as u64) << 12)) + (self.overflows << 24);
        if t >= self.event.t {
            self.event.t = t;
        }
    }

    /// Decodes `buffer`, treating its final 8 little-endian bytes as the host
    /// arrival timestamp rather than wire data. `used`/`size` are forwarded
    /// to `before_buffer` verbatim (queue depth and buffer capacity).
    pub fn decode(&mut self, buffer: &[u8], used: usize, size: usize) {
        let dispatch = (self.before_buffer)(used, size);
        let payload_len = buffer.len().saturating_sub(8);
        let system_timestamp = u64::from_le_bytes(buffer[payload_len..].try_into().unwrap_or([0; 8]));
        let words = buffer[..payload_len].chunks_exact(2);

        for word in words {
            let raw = u16::from_le_bytes([word[0], word[1]]);
            let opcode = (raw >> 12) as u8;
            let payload = (raw & 0x0fff) as u32;

            match opcode {
                OP_Y_ADDRESS => {
                    let y = payload as u16;
                    self.event.y = if y < self.height { self.height - 1 - y } else { y };
                }
                OP_X_IMMEDIATE => {
                    let (x, on) = unpack_x_and_polarity(payload);
                    self.event.x = x;
                    self.event.on = on;
                    if dispatch && self.event.x < self.width && self.event.y < self.height {
                        (self.handle_event)(&self.event);
                    }
                }
                OP_X_BASE => {
                    let (x, on) = unpack_x_and_polarity(payload);
                    self.event.x = x;
                    self.event.on = on;
                }
                OP_VECT_12 => {
                    if dispatch {
                        for bit in 0..12u32 {
                            if (payload >> bit) & 1 == 1 && self.event.x < self.width && self.event.y < self.height {
                                (self.handle_event)(&self.event);
                            }
                            self.event.x += 1;
                        }
                    } else {
                        self.event.x += 12;
                    }
                }
                OP_VECT_8 => {
                    if dispatch {
                        for bit in 0..8u32 {
                            if (payload >> bit) & 1 == 1 && self.event.x < self.width && self.event.y < self.height {
                                (self.handle_event)(&self.event);
                            }
                            self.event.x += 1;
                        }
                    } else {
                        self.event.x += 8;
                    }
                }
                OP_TIME_LOW => self.update_time_low(payload),
                OP_TIME_HIGH => self.update_time_high(payload),
                OP_EXT_TRIGGER => {
                    if dispatch {
                        let byte0 = (payload & 0xff) as u8;
                        let byte1 = ((payload >> 8) & 0xff) as u8;
                        let trigger = TriggerEvent {
                            t: self.event.t,
                            system_timestamp,
                            id: byte1 & 0x0f,
                            rising: byte0 & 1 != 0,
                        };
                        (self.handle_trigger_event)(&trigger);
                    }
                }
                _ => {}
            }
        }

        (self.after_buffer)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(opcode: u8, payload: u16) -> [u8; 2] {
        let raw = ((opcode as u16) << 12) | (payload & 0x0fff);
        raw.to_le_bytes()
    }

    fn x_payload(x: u16, on: bool) -> u16 {
        ((x & 0x7ff) | (u16::from(on) << 11)) & 0x0fff
    }

    #[test]
    fn decodes_single_event_with_vertical_flip() {
        let mut events = Vec::new();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&word(OP_Y_ADDRESS, 10));
        buffer.extend_from_slice(&word(OP_X_IMMEDIATE, x_payload(20, true)));
        buffer.extend_from_slice(&[0u8; 8]);

        let mut decoder =
            Decoder::new(1280, 720, |e: &CdEvent| events.push(*e), |_: &TriggerEvent| {}, |_, _| true, || {});
        decoder.decode(&buffer, 0, buffer.len());

        assert_eq!(events, vec![CdEvent { t: 0, x: 20, y: 709, on: true }]);
    }

    #[test]
    fn vector_burst_emits_one_event_per_set_bit() {
        let mut events = Vec::new();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&word(OP_Y_ADDRESS, 5));
        buffer.extend_from_slice(&word(OP_X_BASE, x_payload(100, true)));
        buffer.extend_from_slice(&word(OP_VECT_12, 0b0000_0000_0101));
        buffer.extend_from_slice(&[0u8; 8]);

        let mut decoder =
            Decoder::new(1280, 720, |e: &CdEvent| events.push(*e), |_: &TriggerEvent| {}, |_, _| true, || {});
        decoder.decode(&buffer, 0, buffer.len());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].x, 100);
        assert_eq!(events[1].x, 102);
    }

    #[test]
    fn out_of_range_event_is_not_dispatched() {
        let mut events = Vec::new();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&word(OP_Y_ADDRESS, 5));
        buffer.extend_from_slice(&word(OP_X_IMMEDIATE, x_payload(1279, true)));
        buffer.extend_from_slice(&word(OP_X_IMMEDIATE, x_payload(1280, true)));
        buffer.extend_from_slice(&[0u8; 8]);

        let mut decoder =
            Decoder::new(1280, 720, |e: &CdEvent| events.push(*e), |_: &TriggerEvent| {}, |_, _| true, || {});
        decoder.decode(&buffer, 0, buffer.len());

        assert_eq!(events, vec![CdEvent { t: 0, x: 1279, y: 714, on: true }]);
    }

    #[test]
    fn non_dispatched_buffer_still_advances_vector_cursor() {
        let mut events = Vec::new();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&word(OP_X_BASE, x_payload(100, true)));
        buffer.extend_from_slice(&word(OP_VECT_12, 0xfff));
        buffer.extend_from_slice(&word(OP_X_IMMEDIATE, x_payload(999, false)));
        buffer.extend_from_slice(&[0u8; 8]);

        let mut decoder =
            Decoder::new(1280, 720, |e: &CdEvent| events.push(*e), |_: &TriggerEvent| {}, |_, _| false, || {});
        decoder.decode(&buffer, 0, buffer.len());

        assert_eq!(decoder.event.x, 999);
        drop(decoder);
        assert!(events.is_empty());
    }

    #[test]
    fn trigger_only_fires_when_dispatching() {
        let mut triggers = Vec::new();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&word(OP_EXT_TRIGGER, 0b1_0000_0001));
        buffer.extend_from_slice(&42u64.to_le_bytes());

        let mut decoder =
            Decoder::new(1280, 720, |_: &CdEvent| {}, |t: &TriggerEvent| triggers.push(*t), |_, _| false, || {});
        decoder.decode(&buffer, 0, buffer.len());
        assert!(triggers.is_empty());

        let mut decoder =
            Decoder::new(1280, 720, |_: &CdEvent| {}, |t: &TriggerEvent| triggers.push(*t), |_, _| true, || {});
        decoder.decode(&buffer, 0, buffer.len());
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].system_timestamp, 42);
        assert!(triggers[0].rising);
    }

    #[test]
    fn timestamp_overflow_increments_only_on_downward_wrap() {
        let mut decoder = Decoder::new(1280, 720, |_: &CdEvent| {}, |_: &TriggerEvent| {}, |_, _| true, || {});
        decoder.update_time_high(0xffe);
        assert_eq!(decoder.overflows, 0);
        decoder.update_time_high(0x001);
        assert_eq!(decoder.overflows, 1);

        let mut decoder = Decoder::new(1280, 720, |_: &CdEvent| {}, |_: &TriggerEvent| {}, |_, _| true, || {});
        decoder.update_time_high(0x001);
        decoder.update_time_high(0xffe);
        assert_eq!(decoder.overflows, 0, "an upward jump is not a wrap");
    }
}
