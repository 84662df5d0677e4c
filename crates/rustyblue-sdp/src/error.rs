//! Error types for the rustyblue-sdp library
//!
//! Three families live here: `SdpError` for local failures returned to a
//! caller, `SdpErrorCode` for the codes carried in an SDP Error Response, and
//! `SdpStatus` for the result handed to a discovery completion callback.

use thiserror::Error;

/// Error codes carried in an SDP Error Response PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpErrorCode {
    /// Invalid/unsupported SDP version
    InvalidVersion,
    /// Invalid service record handle
    InvalidServiceRecordHandle,
    /// Invalid request syntax
    InvalidRequestSyntax,
    /// Invalid PDU size
    InvalidPduSize,
    /// Invalid continuation state
    InvalidContinuationState,
    /// Insufficient resources to satisfy request
    NoResources,
    /// Code not defined by the protocol
    Unknown(u16),
}

impl From<u16> for SdpErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0x0001 => SdpErrorCode::InvalidVersion,
            0x0002 => SdpErrorCode::InvalidServiceRecordHandle,
            0x0003 => SdpErrorCode::InvalidRequestSyntax,
            0x0004 => SdpErrorCode::InvalidPduSize,
            0x0005 => SdpErrorCode::InvalidContinuationState,
            0x0006 => SdpErrorCode::NoResources,
            _ => SdpErrorCode::Unknown(code),
        }
    }
}

impl From<SdpErrorCode> for u16 {
    fn from(code: SdpErrorCode) -> Self {
        match code {
            SdpErrorCode::InvalidVersion => 0x0001,
            SdpErrorCode::InvalidServiceRecordHandle => 0x0002,
            SdpErrorCode::InvalidRequestSyntax => 0x0003,
            SdpErrorCode::InvalidPduSize => 0x0004,
            SdpErrorCode::InvalidContinuationState => 0x0005,
            SdpErrorCode::NoResources => 0x0006,
            SdpErrorCode::Unknown(code) => code,
        }
    }
}

/// Local SDP error type
#[derive(Debug, Error)]
pub enum SdpError {
    #[error("Malformed PDU: {0}")]
    MalformedPdu(String),

    #[error("Unknown data element size class {0}")]
    UnknownSizeClass(u8),

    #[error("Unknown data element type {0}")]
    UnknownType(u8),

    #[error("Data element nesting deeper than {0}")]
    NestingTooDeep(usize),

    #[error("Invalid request syntax: {0}")]
    InvalidRequestSyntax(String),

    #[error("Invalid PDU size: declared {declared}, actual {actual}")]
    InvalidPduSize { declared: usize, actual: usize },

    #[error("Invalid continuation state")]
    InvalidContinuationState,

    #[error("Invalid service record handle: 0x{0:08X}")]
    InvalidServiceRecordHandle(u32),

    #[error("Database full")]
    DatabaseFull,

    #[error("Service record not found: 0x{0:08X}")]
    RecordNotFound(u32),

    #[error("Attribute not found: 0x{0:04X}")]
    AttributeNotFound(u16),

    #[error("Attribute capacity exceeded")]
    AttributeCapacityExceeded,

    #[error("Attribute value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),

    #[error("Too many filters: {0}")]
    TooManyFilters(usize),

    #[error("Insufficient resources")]
    NoResources,

    #[error("Connection not found: {0}")]
    ConnectionNotFound(u16),

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Peer returned error: {0:?}")]
    Protocol(SdpErrorCode),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdpError {
    /// Convert to the error code reported to a remote peer
    pub fn to_error_code(&self) -> SdpErrorCode {
        match self {
            SdpError::MalformedPdu(_)
            | SdpError::UnknownSizeClass(_)
            | SdpError::UnknownType(_)
            | SdpError::NestingTooDeep(_)
            | SdpError::InvalidRequestSyntax(_)
            | SdpError::TooManyFilters(_)
            | SdpError::InvalidAttributeValue(_)
            | SdpError::UnexpectedResponse(_)
            | SdpError::Io(_) => SdpErrorCode::InvalidRequestSyntax,
            SdpError::InvalidPduSize { .. } => SdpErrorCode::InvalidPduSize,
            SdpError::InvalidContinuationState => SdpErrorCode::InvalidContinuationState,
            SdpError::InvalidServiceRecordHandle(_) | SdpError::RecordNotFound(_) => {
                SdpErrorCode::InvalidServiceRecordHandle
            }
            SdpError::Protocol(code) => *code,
            SdpError::DatabaseFull
            | SdpError::AttributeNotFound(_)
            | SdpError::AttributeCapacityExceeded
            | SdpError::ValueTooLarge(_)
            | SdpError::NoResources
            | SdpError::ConnectionNotFound(_)
            | SdpError::InvalidState
            | SdpError::Transport(_) => SdpErrorCode::NoResources,
        }
    }

    /// Whether a server must release the connection after reporting this error
    pub fn is_protocol_state_error(&self) -> bool {
        matches!(
            self.to_error_code(),
            SdpErrorCode::InvalidContinuationState | SdpErrorCode::InvalidServiceRecordHandle
        )
    }
}

/// SDP Result type
pub type SdpResult<T> = Result<T, SdpError>;

/// Result code delivered to a discovery completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpStatus {
    Success,
    InvalidVersion,
    InvalidServiceRecordHandle,
    InvalidRequestSyntax,
    InvalidPduSize,
    InvalidContinuationState,
    NoResources,
    NoRecordsMatch,
    ConnectionFailed,
    ConfigFailed,
    GenericError,
    DatabaseFull,
    InvalidPdu,
    SecurityError,
    ConnectionRejected,
    Cancelled,
    Timeout,
}

impl SdpStatus {
    /// Numeric value of the status as used by the reference stack
    pub fn code(&self) -> u16 {
        match self {
            SdpStatus::Success => 0x0000,
            SdpStatus::InvalidVersion => 0x0001,
            SdpStatus::InvalidServiceRecordHandle => 0x0002,
            SdpStatus::InvalidRequestSyntax => 0x0003,
            SdpStatus::InvalidPduSize => 0x0004,
            SdpStatus::InvalidContinuationState => 0x0005,
            SdpStatus::NoResources => 0x0006,
            SdpStatus::NoRecordsMatch => 0xFFF0,
            SdpStatus::ConnectionFailed => 0xFFF1,
            SdpStatus::ConfigFailed => 0xFFF2,
            SdpStatus::GenericError => 0xFFF3,
            SdpStatus::DatabaseFull => 0xFFF4,
            SdpStatus::InvalidPdu => 0xFFF5,
            SdpStatus::SecurityError => 0xFFF6,
            SdpStatus::ConnectionRejected => 0xFFF7,
            SdpStatus::Cancelled => 0xFFF8,
            SdpStatus::Timeout => 0xFFF9,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == SdpStatus::Success
    }
}

impl From<SdpErrorCode> for SdpStatus {
    fn from(code: SdpErrorCode) -> Self {
        match code {
            SdpErrorCode::InvalidVersion => SdpStatus::InvalidVersion,
            SdpErrorCode::InvalidServiceRecordHandle => SdpStatus::InvalidServiceRecordHandle,
            SdpErrorCode::InvalidRequestSyntax => SdpStatus::InvalidRequestSyntax,
            SdpErrorCode::InvalidPduSize => SdpStatus::InvalidPduSize,
            SdpErrorCode::InvalidContinuationState => SdpStatus::InvalidContinuationState,
            SdpErrorCode::NoResources => SdpStatus::NoResources,
            SdpErrorCode::Unknown(_) => SdpStatus::GenericError,
        }
    }
}

impl From<&SdpError> for SdpStatus {
    fn from(err: &SdpError) -> Self {
        match err {
            SdpError::DatabaseFull => SdpStatus::DatabaseFull,
            SdpError::InvalidContinuationState => SdpStatus::InvalidContinuationState,
            SdpError::MalformedPdu(_)
            | SdpError::UnknownSizeClass(_)
            | SdpError::UnknownType(_)
            | SdpError::NestingTooDeep(_)
            | SdpError::InvalidPduSize { .. }
            | SdpError::Io(_) => SdpStatus::InvalidPdu,
            SdpError::Protocol(code) => SdpStatus::from(*code),
            SdpError::NoResources => SdpStatus::NoResources,
            _ => SdpStatus::GenericError,
        }
    }
}
