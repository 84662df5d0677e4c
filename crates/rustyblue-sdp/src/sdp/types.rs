//! Core SDP data types
use super::constants::*;
use crate::error::{SdpError, SdpResult};
use crate::uuid::Uuid;

/// Service record handle
pub type RecordHandle = u32;

/// Attribute identifier
pub type AttributeId = u16;

/// SDP PDU kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpPdu {
    ErrorResponse = 0x01,
    ServiceSearchRequest = 0x02,
    ServiceSearchResponse = 0x03,
    ServiceAttributeRequest = 0x04,
    ServiceAttributeResponse = 0x05,
    ServiceSearchAttributeRequest = 0x06,
    ServiceSearchAttributeResponse = 0x07,
}

impl SdpPdu {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SDP_PDU_ERROR_RESPONSE => Some(SdpPdu::ErrorResponse),
            SDP_PDU_SERVICE_SEARCH_REQUEST => Some(SdpPdu::ServiceSearchRequest),
            SDP_PDU_SERVICE_SEARCH_RESPONSE => Some(SdpPdu::ServiceSearchResponse),
            SDP_PDU_SERVICE_ATTRIBUTE_REQUEST => Some(SdpPdu::ServiceAttributeRequest),
            SDP_PDU_SERVICE_ATTRIBUTE_RESPONSE => Some(SdpPdu::ServiceAttributeResponse),
            SDP_PDU_SERVICE_SEARCH_ATTRIBUTE_REQUEST => Some(SdpPdu::ServiceSearchAttributeRequest),
            SDP_PDU_SERVICE_SEARCH_ATTRIBUTE_RESPONSE => {
                Some(SdpPdu::ServiceSearchAttributeResponse)
            }
            _ => None,
        }
    }

    /// The response kind that answers this request kind
    pub fn response_kind(&self) -> Option<SdpPdu> {
        match self {
            SdpPdu::ServiceSearchRequest => Some(SdpPdu::ServiceSearchResponse),
            SdpPdu::ServiceAttributeRequest => Some(SdpPdu::ServiceAttributeResponse),
            SdpPdu::ServiceSearchAttributeRequest => Some(SdpPdu::ServiceSearchAttributeResponse),
            _ => None,
        }
    }
}

/// Data element type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Nil,
    UInt,
    SignedInt,
    Uuid,
    Text,
    Bool,
    Sequence,
    Alternative,
    Url,
}

impl AttributeType {
    pub fn from_tag(tag: u8) -> SdpResult<Self> {
        match tag {
            DE_TYPE_NIL => Ok(AttributeType::Nil),
            DE_TYPE_UINT => Ok(AttributeType::UInt),
            DE_TYPE_INT => Ok(AttributeType::SignedInt),
            DE_TYPE_UUID => Ok(AttributeType::Uuid),
            DE_TYPE_TEXT => Ok(AttributeType::Text),
            DE_TYPE_BOOL => Ok(AttributeType::Bool),
            DE_TYPE_SEQUENCE => Ok(AttributeType::Sequence),
            DE_TYPE_ALTERNATIVE => Ok(AttributeType::Alternative),
            DE_TYPE_URL => Ok(AttributeType::Url),
            other => Err(SdpError::UnknownType(other)),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            AttributeType::Nil => DE_TYPE_NIL,
            AttributeType::UInt => DE_TYPE_UINT,
            AttributeType::SignedInt => DE_TYPE_INT,
            AttributeType::Uuid => DE_TYPE_UUID,
            AttributeType::Text => DE_TYPE_TEXT,
            AttributeType::Bool => DE_TYPE_BOOL,
            AttributeType::Sequence => DE_TYPE_SEQUENCE,
            AttributeType::Alternative => DE_TYPE_ALTERNATIVE,
            AttributeType::Url => DE_TYPE_URL,
        }
    }

    /// Whether the value length is carried explicitly after the descriptor
    pub fn is_variable_length(&self) -> bool {
        matches!(
            self,
            AttributeType::Text | AttributeType::Sequence | AttributeType::Alternative | AttributeType::Url
        )
    }

    /// Whether the value is a byte range of nested data elements
    pub fn is_container(&self) -> bool {
        matches!(self, AttributeType::Sequence | AttributeType::Alternative)
    }

    /// Check that `len` is a legal value length for this type
    pub fn validate_len(&self, len: usize) -> SdpResult<()> {
        let ok = match self {
            AttributeType::Nil => len == 0,
            AttributeType::UInt | AttributeType::SignedInt => matches!(len, 1 | 2 | 4 | 8 | 16),
            AttributeType::Uuid => matches!(len, 2 | 4 | 16),
            AttributeType::Bool => len == 1,
            _ => len <= u32::MAX as usize,
        };
        if ok {
            Ok(())
        } else {
            Err(SdpError::InvalidAttributeValue(format!(
                "{:?} value cannot be {} bytes",
                self, len
            )))
        }
    }
}

/// A decoded data element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    Nil,
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Unsigned128([u8; 16]),
    Signed8(i8),
    Signed16(i16),
    Signed32(i32),
    Signed64(i64),
    Signed128([u8; 16]),
    Uuid(Uuid),
    /// Text string; SDP does not mandate an encoding, so bytes are kept as received
    Text(Vec<u8>),
    Boolean(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(Vec<u8>),
}

impl DataElement {
    pub fn text(s: &str) -> Self {
        DataElement::Text(s.as_bytes().to_vec())
    }

    pub fn url(s: &str) -> Self {
        DataElement::Url(s.as_bytes().to_vec())
    }

    pub fn attribute_type(&self) -> AttributeType {
        match self {
            DataElement::Nil => AttributeType::Nil,
            DataElement::Unsigned8(_)
            | DataElement::Unsigned16(_)
            | DataElement::Unsigned32(_)
            | DataElement::Unsigned64(_)
            | DataElement::Unsigned128(_) => AttributeType::UInt,
            DataElement::Signed8(_)
            | DataElement::Signed16(_)
            | DataElement::Signed32(_)
            | DataElement::Signed64(_)
            | DataElement::Signed128(_) => AttributeType::SignedInt,
            DataElement::Uuid(_) => AttributeType::Uuid,
            DataElement::Text(_) => AttributeType::Text,
            DataElement::Boolean(_) => AttributeType::Bool,
            DataElement::Sequence(_) => AttributeType::Sequence,
            DataElement::Alternative(_) => AttributeType::Alternative,
            DataElement::Url(_) => AttributeType::Url,
        }
    }

    /// Widen any unsigned integer element to u64
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            DataElement::Unsigned8(v) => Some(*v as u64),
            DataElement::Unsigned16(v) => Some(*v as u64),
            DataElement::Unsigned32(v) => Some(*v as u64),
            DataElement::Unsigned64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            DataElement::Uuid(uuid) => Some(*uuid),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[DataElement]> {
        match self {
            DataElement::Sequence(items) | DataElement::Alternative(items) => Some(items),
            _ => None,
        }
    }
}

/// Client-supplied attribute ID range, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeRange {
    pub start: AttributeId,
    pub end: AttributeId,
}

impl AttributeRange {
    pub fn new(start: AttributeId, end: AttributeId) -> Self {
        Self { start, end }
    }

    pub fn single(id: AttributeId) -> Self {
        Self { start: id, end: id }
    }

    /// The range covering every attribute
    pub fn all() -> Self {
        Self { start: 0x0000, end: 0xFFFF }
    }

    pub fn contains(&self, id: AttributeId) -> bool {
        self.start <= id && id <= self.end
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

/// Check `id` against a list of ranges
pub fn ranges_contain(ranges: &[AttributeRange], id: AttributeId) -> bool {
    ranges.iter().any(|range| range.contains(id))
}
