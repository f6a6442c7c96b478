use thiserror::Error;

/// The complete error taxonomy surfaced by the transport, bring-up, acquisition
/// and event-stream layers.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("transport error during {call}: {source}")]
    Transport {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("device is busy (interface already claimed)")]
    DeviceBusy,

    #[error("no device matching the requested identities is available")]
    NoDeviceAvailable,

    #[error("no device with serial {serial:?} (type filter {device_type:?}) is available")]
    SerialNotAvailable {
        serial: Option<String>,
        device_type: Option<&'static str>,
    },

    #[error("device was disconnected during acquisition")]
    DeviceDisconnected,

    #[error("unrecognized device (manufacturer {manufacturer:?}, product {product:?})")]
    UnrecognizedDevice { manufacturer: Option<String>, product: Option<String> },

    #[error("unexpected response during {call}")]
    UnexpectedResponse { call: &'static str },

    #[error("coordinates ({x}, {y}) fall outside the declared {width}x{height} frame")]
    CoordinatesOverflow { x: u16, y: u16, width: u16, height: u16 },

    #[error("event timestamp {t} is smaller than the previous event's timestamp {previous_t}")]
    TimestampRegression { t: u64, previous_t: u64 },

    #[error("unsupported Event Stream version {major}.{minor}.{patch}")]
    UnsupportedVersion { major: u8, minor: u8, patch: u8 },

    #[error("unsupported Event Stream type byte {0:#04x}")]
    UnsupportedEventType(u8),

    #[error("end of file reached while reading the Event Stream header")]
    IncompleteHeader,

    #[error("stream does not begin with the \"Event Stream\" signature")]
    WrongSignature,

    #[error("end of file reached")]
    EndOfFile,

    #[error("the camera has already stopped after a fatal error")]
    AlreadyStopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;
