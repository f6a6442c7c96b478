//! Event Stream (`.es`) file header: a 12-byte signature, a 3-byte version,
//! a type byte, and (for every type but `Generic`) a little-endian
//! width/height pair.

use std::io::{self, Read, Write};

use crate::error::CameraError;

pub const SIGNATURE: &[u8; 12] = b"Event Stream";
pub const SUPPORTED_VERSION: (u8, u8, u8) = (2, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Generic,
    Dvs,
    Atis,
    Color,
}

impl EventType {
    fn to_byte(self) -> u8 {
        match self {
            EventType::Generic => 0,
            EventType::Dvs => 1,
            EventType::Atis => 2,
            EventType::Color => 4,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, CameraError> {
        match byte {
            0 => Ok(EventType::Generic),
            1 => Ok(EventType::Dvs),
            2 => Ok(EventType::Atis),
            4 => Ok(EventType::Color),
            other => Err(CameraError::UnsupportedEventType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub event_type: EventType,
    pub width: u16,
    pub height: u16,
}

/// Reads and validates a header, mapping every malformed-stream case onto
/// its own [`CameraError`] variant rather than a generic I/O error.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header, CameraError> {
    let mut signature = [0u8; 12];
    read_exact_or_incomplete(reader, &mut signature)?;
    if &signature != SIGNATURE {
        return Err(CameraError::WrongSignature);
    }

    let mut version = [0u8; 3];
    read_exact_or_incomplete(reader, &mut version)?;
    if version[0] != SUPPORTED_VERSION.0 {
        return Err(CameraError::UnsupportedVersion { major: version[0], minor: version[1], patch: version[2] });
    }

    let mut type_byte = [0u8; 1];
    read_exact_or_incomplete(reader, &mut type_byte)?;
    let event_type = EventType::from_byte(type_byte[0])?;

    let (width, height) = if event_type == EventType::Generic {
        (0, 0)
    } else {
        let mut dims = [0u8; 4];
        read_exact_or_incomplete(reader, &mut dims)?;
        (u16::from_le_bytes([dims[0], dims[1]]), u16::from_le_bytes([dims[2], dims[3]]))
    };

    Ok(Header { event_type, width, height })
}

fn read_exact_or_incomplete<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<(), CameraError> {
    match reader.read_exact(buffer) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CameraError::IncompleteHeader),
        Err(e) => Err(CameraError::Io(e)),
    }
}

pub fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<(), CameraError> {
    writer.write_all(SIGNATURE)?;
    writer.write_all(&[SUPPORTED_VERSION.0, SUPPORTED_VERSION.1, SUPPORTED_VERSION.2])?;
    writer.write_all(&[header.event_type.to_byte()])?;
    if header.event_type != EventType::Generic {
        writer.write_all(&header.width.to_le_bytes())?;
        writer.write_all(&header.height.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_dvs_header() {
        let header = Header { event_type: EventType::Dvs, width: 1280, height: 720 };
        let mut buffer = Vec::new();
        write_header(&mut buffer, &header).unwrap();
        let decoded = read_header(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn generic_header_carries_no_dimensions() {
        let header = Header { event_type: EventType::Generic, width: 0, height: 0 };
        let mut buffer = Vec::new();
        write_header(&mut buffer, &header).unwrap();
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn rejects_wrong_signature() {
        let err = read_header(&mut Cursor::new(b"not an event stream!".to_vec()));
        assert!(matches!(err, Err(CameraError::WrongSignature)));
    }

    #[test]
    fn rejects_truncated_header() {
        let err = read_header(&mut Cursor::new(SIGNATURE.to_vec()));
        assert!(matches!(err, Err(CameraError::IncompleteHeader)));
    }

    #[test]
    fn rejects_unsupported_event_type() {
        let mut buffer = SIGNATURE.to_vec();
        buffer.extend_from_slice(&[2, 0, 0, 99]);
        let err = read_header(&mut Cursor::new(buffer));
        assert!(matches!(err, Err(CameraError::UnsupportedEventType(99))));
    }
}
