use num_derive::{FromPrimitive, ToPrimitive};
use std::num::NonZeroU32;

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        num_traits::FromPrimitive::from_u32(value).unwrap_or(ErrorCode::InternalError)
    }

    #[must_use]
    pub fn to_wire(self) -> u32 {
        num_traits::ToPrimitive::to_u32(&self).expect("ErrorCode is repr(u32)")
    }

    /// A stream closed by this code is safe for a higher layer to retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::NoError | ErrorCode::Cancel | ErrorCode::RefusedStream
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HpackError {
    #[error("decoded header list exceeds SETTINGS_MAX_HEADER_LIST_SIZE")]
    HeaderListTooLarge,
    #[error("invalid HPACK integer encoding")]
    InvalidInteger,
    #[error("invalid HPACK string literal")]
    InvalidStringLiteral,
    #[error("index {0} not present in static or dynamic table")]
    InvalidIndex(usize),
    #[error("dynamic table size update out of bounds")]
    InvalidTableSizeUpdate,
    #[error("unexpected end of header block")]
    UnexpectedEof,
}

#[derive(thiserror::Error, Debug)]
pub enum FrameDecodeError {
    #[error("unknown frame type {0}")]
    UnknownType(u8),
    #[error("payload shorter than the frame's declared fields require")]
    PayloadTooShort,
    #[error("frame length {0} exceeds the negotiated max frame size {1}")]
    TooLarge(u32, u32),
    #[error("SETTINGS length {0} is not a multiple of 6")]
    SettingsNotAligned(u32),
    #[error("invalid pad length in a PADDED frame")]
    InvalidPadding,
    #[error("zero stream id where one is required")]
    ZeroStreamId,
    #[error("nonzero stream id where zero is required")]
    NonZeroStreamId,
}

/// Top-level error for the connection core.
///
/// Connection-scoped variants terminate the whole connection (GOAWAY);
/// stream-scoped variants terminate a single stream (RST_STREAM) and are
/// recovered locally.
#[derive(thiserror::Error, Debug)]
pub enum Http2Error {
    #[error("connection error {code:?}: {message}")]
    Connection { code: ErrorCode, message: String },

    #[error("stream {stream} error {code:?}: {message}")]
    Stream {
        stream: NonZeroU32,
        code: ErrorCode,
        message: String,
    },

    #[error("frame codec error")]
    Frame(#[from] FrameDecodeError),

    #[error("HPACK error")]
    Hpack(#[from] HpackError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("connection closed: {0}")]
    Closed(String),
}

impl Http2Error {
    #[must_use]
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Http2Error::Connection {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn stream(stream: NonZeroU32, code: ErrorCode, message: impl Into<String>) -> Self {
        Http2Error::Stream {
            stream,
            code,
            message: message.into(),
        }
    }

    /// The GOAWAY/RST_STREAM code this error maps to, when it carries one.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Http2Error::Connection { code, .. } | Http2Error::Stream { code, .. } => *code,
            Http2Error::Frame(FrameDecodeError::TooLarge(..)) => ErrorCode::FrameSizeError,
            Http2Error::Frame(FrameDecodeError::SettingsNotAligned(_)) => ErrorCode::FrameSizeError,
            Http2Error::Frame(_) => ErrorCode::ProtocolError,
            Http2Error::Hpack(_) => ErrorCode::CompressionError,
            Http2Error::Io(_) | Http2Error::Closed(_) => ErrorCode::InternalError,
        }
    }

    /// Connection errors (and fatal HPACK errors) propagate to every open
    /// stream and close the connection; stream errors do not.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Http2Error::Stream { .. })
    }
}
