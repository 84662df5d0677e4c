//! SDP PDU framing and request/response parameter layouts
use super::codec::{
    decode_attribute_id_list, decode_uuid_list, encode_attribute_id_list, encode_uuid_list,
};
use super::constants::*;
use super::types::{AttributeRange, RecordHandle, SdpPdu};
use crate::error::{SdpError, SdpErrorCode, SdpResult};
use crate::uuid::Uuid;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Smallest attribute byte count a request may ask for
pub const MIN_ATTRIBUTE_BYTE_COUNT: u16 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpPacket {
    pub pdu_id: SdpPdu,
    pub transaction_id: u16,
    pub parameters: Vec<u8>,
}

impl SdpPacket {
    pub fn new(pdu_id: SdpPdu, transaction_id: u16, parameters: Vec<u8>) -> Self {
        Self {
            pdu_id,
            transaction_id,
            parameters,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(SDP_PDU_HEADER_SIZE + self.parameters.len());
        buffer.push(self.pdu_id as u8);
        buffer.extend_from_slice(&self.transaction_id.to_be_bytes());
        buffer.extend_from_slice(&(self.parameters.len() as u16).to_be_bytes());
        buffer.extend_from_slice(&self.parameters);
        buffer
    }

    /// Transaction ID of a raw PDU, if the header is present
    pub fn peek_transaction_id(data: &[u8]) -> Option<u16> {
        if data.len() < 3 {
            return None;
        }
        Some(u16::from_be_bytes([data[1], data[2]]))
    }

    /// Parse one complete PDU. The declared parameter length must match the
    /// bytes actually present.
    pub fn deserialize(data: &[u8]) -> SdpResult<Self> {
        if data.len() < SDP_PDU_HEADER_SIZE {
            return Err(SdpError::MalformedPdu("SDP packet too short".into()));
        }

        let mut cursor = Cursor::new(data);
        let raw_id = cursor.read_u8()?;
        let transaction_id = cursor.read_u16::<BigEndian>()?;
        let parameters_length = cursor.read_u16::<BigEndian>()? as usize;

        let pdu_id = SdpPdu::from_u8(raw_id)
            .ok_or_else(|| SdpError::MalformedPdu(format!("Unknown SDP PDU ID 0x{:02X}", raw_id)))?;

        let actual = data.len() - SDP_PDU_HEADER_SIZE;
        if actual != parameters_length {
            return Err(SdpError::InvalidPduSize {
                declared: parameters_length,
                actual,
            });
        }

        Ok(Self {
            pdu_id,
            transaction_id,
            parameters: data[SDP_PDU_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Opaque continuation token, at most `SDP_MAX_CONTINUATION_LEN` bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: &[u8]) -> SdpResult<Self> {
        if bytes.len() > SDP_MAX_CONTINUATION_LEN {
            return Err(SdpError::InvalidContinuationState);
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Token carrying a 16-bit offset, as issued by this server
    pub fn from_offset(offset: u16) -> Self {
        Self(offset.to_be_bytes().to_vec())
    }

    /// Offset carried by a server-issued token
    pub fn offset(&self) -> SdpResult<u16> {
        if self.0.len() != SDP_CONTINUATION_TOKEN_LEN {
            return Err(SdpError::InvalidContinuationState);
        }
        Ok(u16::from_be_bytes([self.0[0], self.0[1]]))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.0.len() as u8);
        out.extend_from_slice(&self.0);
    }

    /// Read the trailing continuation field; it must end exactly at `data.len()`.
    fn read(data: &[u8], pos: usize) -> SdpResult<Self> {
        let len = *data
            .get(pos)
            .ok_or_else(|| SdpError::MalformedPdu("missing continuation state".into()))?
            as usize;
        if len > SDP_MAX_CONTINUATION_LEN {
            return Err(SdpError::InvalidContinuationState);
        }
        if pos + 1 + len != data.len() {
            return Err(SdpError::InvalidPduSize {
                declared: pos + 1 + len,
                actual: data.len(),
            });
        }
        Ok(Self(data[pos + 1..].to_vec()))
    }
}

fn read_u16_at(data: &[u8], pos: &mut usize) -> SdpResult<u16> {
    if *pos + 2 > data.len() {
        return Err(SdpError::MalformedPdu(format!("16-bit field truncated at {}", pos)));
    }
    let mut cursor = Cursor::new(&data[*pos..]);
    let value = cursor.read_u16::<BigEndian>()?;
    *pos += 2;
    Ok(value)
}

fn read_u32_at(data: &[u8], pos: &mut usize) -> SdpResult<u32> {
    if *pos + 4 > data.len() {
        return Err(SdpError::MalformedPdu(format!("32-bit field truncated at {}", pos)));
    }
    let mut cursor = Cursor::new(&data[*pos..]);
    let value = cursor.read_u32::<BigEndian>()?;
    *pos += 4;
    Ok(value)
}

/// Bounds applied when parsing a request
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_uuids: usize,
    pub max_ranges: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSearchRequest {
    pub uuids: Vec<Uuid>,
    pub max_records: u16,
    pub continuation: ContinuationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAttributeRequest {
    pub handle: RecordHandle,
    pub max_byte_count: u16,
    pub ranges: Vec<AttributeRange>,
    pub continuation: ContinuationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSearchAttributeRequest {
    pub uuids: Vec<Uuid>,
    pub max_byte_count: u16,
    pub ranges: Vec<AttributeRange>,
    pub continuation: ContinuationToken,
}

/// A decoded request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpRequest {
    ServiceSearch(ServiceSearchRequest),
    ServiceAttribute(ServiceAttributeRequest),
    ServiceSearchAttribute(ServiceSearchAttributeRequest),
}

fn syntax(err: SdpError) -> SdpError {
    match err {
        SdpError::MalformedPdu(msg) => SdpError::InvalidRequestSyntax(msg),
        SdpError::UnknownSizeClass(class) => {
            SdpError::InvalidRequestSyntax(format!("unknown size class {}", class))
        }
        SdpError::UnknownType(tag) => SdpError::InvalidRequestSyntax(format!("unknown type {}", tag)),
        SdpError::TooManyFilters(n) => SdpError::InvalidRequestSyntax(format!("{} filters", n)),
        other => other,
    }
}

fn check_byte_count(count: u16) -> SdpResult<u16> {
    if count < MIN_ATTRIBUTE_BYTE_COUNT {
        return Err(SdpError::InvalidRequestSyntax(format!(
            "maximum attribute byte count {} below {}",
            count, MIN_ATTRIBUTE_BYTE_COUNT
        )));
    }
    Ok(count)
}

impl SdpRequest {
    pub fn pdu_id(&self) -> SdpPdu {
        match self {
            SdpRequest::ServiceSearch(_) => SdpPdu::ServiceSearchRequest,
            SdpRequest::ServiceAttribute(_) => SdpPdu::ServiceAttributeRequest,
            SdpRequest::ServiceSearchAttribute(_) => SdpPdu::ServiceSearchAttributeRequest,
        }
    }

    pub fn continuation(&self) -> &ContinuationToken {
        match self {
            SdpRequest::ServiceSearch(req) => &req.continuation,
            SdpRequest::ServiceAttribute(req) => &req.continuation,
            SdpRequest::ServiceSearchAttribute(req) => &req.continuation,
        }
    }

    pub fn parse(packet: &SdpPacket, limits: &RequestLimits) -> SdpResult<Self> {
        let data = &packet.parameters;
        let mut pos = 0;

        let request = match packet.pdu_id {
            SdpPdu::ServiceSearchRequest => {
                let uuids =
                    decode_uuid_list(data, &mut pos, data.len(), limits.max_uuids).map_err(syntax)?;
                let max_records = read_u16_at(data, &mut pos).map_err(syntax)?;
                let continuation = ContinuationToken::read(data, pos)?;
                SdpRequest::ServiceSearch(ServiceSearchRequest {
                    uuids,
                    max_records,
                    continuation,
                })
            }
            SdpPdu::ServiceAttributeRequest => {
                let handle = read_u32_at(data, &mut pos).map_err(syntax)?;
                let max_byte_count = check_byte_count(read_u16_at(data, &mut pos).map_err(syntax)?)?;
                let ranges = decode_attribute_id_list(data, &mut pos, data.len(), limits.max_ranges)
                    .map_err(syntax)?;
                let continuation = ContinuationToken::read(data, pos)?;
                SdpRequest::ServiceAttribute(ServiceAttributeRequest {
                    handle,
                    max_byte_count,
                    ranges,
                    continuation,
                })
            }
            SdpPdu::ServiceSearchAttributeRequest => {
                let uuids =
                    decode_uuid_list(data, &mut pos, data.len(), limits.max_uuids).map_err(syntax)?;
                let max_byte_count = check_byte_count(read_u16_at(data, &mut pos).map_err(syntax)?)?;
                let ranges = decode_attribute_id_list(data, &mut pos, data.len(), limits.max_ranges)
                    .map_err(syntax)?;
                let continuation = ContinuationToken::read(data, pos)?;
                SdpRequest::ServiceSearchAttribute(ServiceSearchAttributeRequest {
                    uuids,
                    max_byte_count,
                    ranges,
                    continuation,
                })
            }
            other => {
                return Err(SdpError::InvalidRequestSyntax(format!(
                    "{:?} is not a request",
                    other
                )))
            }
        };

        Ok(request)
    }

    pub fn to_packet(&self, transaction_id: u16) -> SdpResult<SdpPacket> {
        let mut params = Vec::new();
        match self {
            SdpRequest::ServiceSearch(req) => {
                encode_uuid_list(&req.uuids, &mut params)?;
                params.write_u16::<BigEndian>(req.max_records)?;
                req.continuation.write(&mut params);
            }
            SdpRequest::ServiceAttribute(req) => {
                params.write_u32::<BigEndian>(req.handle)?;
                params.write_u16::<BigEndian>(req.max_byte_count)?;
                encode_attribute_id_list(&req.ranges, &mut params)?;
                req.continuation.write(&mut params);
            }
            SdpRequest::ServiceSearchAttribute(req) => {
                encode_uuid_list(&req.uuids, &mut params)?;
                params.write_u16::<BigEndian>(req.max_byte_count)?;
                encode_attribute_id_list(&req.ranges, &mut params)?;
                req.continuation.write(&mut params);
            }
        }
        Ok(SdpPacket::new(self.pdu_id(), transaction_id, params))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSearchResponse {
    pub total_count: u16,
    pub handles: Vec<RecordHandle>,
    pub continuation: ContinuationToken,
}

/// Attribute (or attribute-lists) response fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListResponse {
    pub attribute_bytes: Vec<u8>,
    pub continuation: ContinuationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: SdpErrorCode,
    pub info: Vec<u8>,
}

/// A decoded response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpResponse {
    Error(ErrorResponse),
    ServiceSearch(ServiceSearchResponse),
    ServiceAttribute(AttributeListResponse),
    ServiceSearchAttribute(AttributeListResponse),
}

impl SdpResponse {
    pub fn pdu_id(&self) -> SdpPdu {
        match self {
            SdpResponse::Error(_) => SdpPdu::ErrorResponse,
            SdpResponse::ServiceSearch(_) => SdpPdu::ServiceSearchResponse,
            SdpResponse::ServiceAttribute(_) => SdpPdu::ServiceAttributeResponse,
            SdpResponse::ServiceSearchAttribute(_) => SdpPdu::ServiceSearchAttributeResponse,
        }
    }

    pub fn to_packet(&self, transaction_id: u16) -> SdpResult<SdpPacket> {
        let mut params = Vec::new();
        match self {
            SdpResponse::Error(rsp) => {
                params.write_u16::<BigEndian>(rsp.code.into())?;
                params.extend_from_slice(&rsp.info);
            }
            SdpResponse::ServiceSearch(rsp) => {
                params.write_u16::<BigEndian>(rsp.total_count)?;
                params.write_u16::<BigEndian>(rsp.handles.len() as u16)?;
                for handle in &rsp.handles {
                    params.write_u32::<BigEndian>(*handle)?;
                }
                rsp.continuation.write(&mut params);
            }
            SdpResponse::ServiceAttribute(rsp) | SdpResponse::ServiceSearchAttribute(rsp) => {
                params.write_u16::<BigEndian>(rsp.attribute_bytes.len() as u16)?;
                params.extend_from_slice(&rsp.attribute_bytes);
                rsp.continuation.write(&mut params);
            }
        }
        Ok(SdpPacket::new(self.pdu_id(), transaction_id, params))
    }

    pub fn parse(packet: &SdpPacket) -> SdpResult<Self> {
        let data = &packet.parameters;
        let mut pos = 0;

        let response = match packet.pdu_id {
            SdpPdu::ErrorResponse => {
                let code = SdpErrorCode::from(read_u16_at(data, &mut pos)?);
                SdpResponse::Error(ErrorResponse {
                    code,
                    info: data[pos..].to_vec(),
                })
            }
            SdpPdu::ServiceSearchResponse => {
                let total_count = read_u16_at(data, &mut pos)?;
                let current = read_u16_at(data, &mut pos)?;
                let mut handles = Vec::with_capacity(current as usize);
                for _ in 0..current {
                    handles.push(read_u32_at(data, &mut pos)?);
                }
                if current > total_count {
                    return Err(SdpError::MalformedPdu(format!(
                        "{} handles returned of {} total",
                        current, total_count
                    )));
                }
                let continuation = ContinuationToken::read(data, pos)?;
                SdpResponse::ServiceSearch(ServiceSearchResponse {
                    total_count,
                    handles,
                    continuation,
                })
            }
            SdpPdu::ServiceAttributeResponse | SdpPdu::ServiceSearchAttributeResponse => {
                let count = read_u16_at(data, &mut pos)? as usize;
                if pos + count > data.len() {
                    return Err(SdpError::MalformedPdu(format!(
                        "attribute byte count {} overruns PDU",
                        count
                    )));
                }
                let attribute_bytes = data[pos..pos + count].to_vec();
                let continuation = ContinuationToken::read(data, pos + count)?;
                let rsp = AttributeListResponse {
                    attribute_bytes,
                    continuation,
                };
                if packet.pdu_id == SdpPdu::ServiceAttributeResponse {
                    SdpResponse::ServiceAttribute(rsp)
                } else {
                    SdpResponse::ServiceSearchAttribute(rsp)
                }
            }
            other => {
                return Err(SdpError::MalformedPdu(format!("{:?} is not a response", other)))
            }
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: RequestLimits = RequestLimits {
        max_uuids: 3,
        max_ranges: 15,
    };

    #[test]
    fn test_header_length_must_match() {
        let packet = SdpPacket::new(SdpPdu::ErrorResponse, 7, vec![0x00, 0x05]);
        let mut bytes = packet.serialize();
        assert_eq!(bytes, vec![0x01, 0x00, 0x07, 0x00, 0x02, 0x00, 0x05]);

        let parsed = SdpPacket::deserialize(&bytes).unwrap();
        assert_eq!(parsed.transaction_id, 7);
        assert_eq!(parsed.pdu_id, SdpPdu::ErrorResponse);

        bytes.push(0xFF);
        assert!(matches!(
            SdpPacket::deserialize(&bytes),
            Err(SdpError::InvalidPduSize { declared: 2, actual: 3 })
        ));
        assert!(SdpPacket::deserialize(&[0x01, 0x00]).is_err());
        assert!(SdpPacket::deserialize(&[0x09, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_service_search_request_layout() {
        let request = SdpRequest::ServiceSearch(ServiceSearchRequest {
            uuids: vec![Uuid::from_u16(0x1101)],
            max_records: 10,
            continuation: ContinuationToken::none(),
        });
        let packet = request.to_packet(1).unwrap();
        assert_eq!(packet.parameters, vec![0x35, 0x03, 0x19, 0x11, 0x01, 0x00, 0x0A, 0x00]);
        assert_eq!(SdpRequest::parse(&packet, &LIMITS).unwrap(), request);
    }

    #[test]
    fn test_attribute_request_with_continuation() {
        let request = SdpRequest::ServiceAttribute(ServiceAttributeRequest {
            handle: 0x0001_0000,
            max_byte_count: 1000,
            ranges: vec![AttributeRange::all()],
            continuation: ContinuationToken::from_offset(1000),
        });
        let packet = request.to_packet(2).unwrap();
        let parsed = SdpRequest::parse(&packet, &LIMITS).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.continuation().offset().unwrap(), 1000);
    }

    #[test]
    fn test_oversized_continuation_rejected() {
        let mut params = Vec::new();
        encode_uuid_list(&[Uuid::from_u16(0x1101)], &mut params).unwrap();
        params.extend_from_slice(&[0x00, 0x0A, 17]);
        params.extend_from_slice(&[0u8; 17]);
        let packet = SdpPacket::new(SdpPdu::ServiceSearchRequest, 1, params);
        assert!(matches!(
            SdpRequest::parse(&packet, &LIMITS),
            Err(SdpError::InvalidContinuationState)
        ));
    }

    #[test]
    fn test_small_byte_count_rejected() {
        let request = SdpRequest::ServiceAttribute(ServiceAttributeRequest {
            handle: 1,
            max_byte_count: 3,
            ranges: vec![AttributeRange::all()],
            continuation: ContinuationToken::none(),
        });
        let packet = request.to_packet(1).unwrap();
        assert!(matches!(
            SdpRequest::parse(&packet, &LIMITS),
            Err(SdpError::InvalidRequestSyntax(_))
        ));
    }

    #[test]
    fn test_response_round_trip() {
        let responses = vec![
            SdpResponse::ServiceSearch(ServiceSearchResponse {
                total_count: 3,
                handles: vec![0x10000, 0x10001],
                continuation: ContinuationToken::from_offset(2),
            }),
            SdpResponse::ServiceSearchAttribute(AttributeListResponse {
                attribute_bytes: vec![0x35, 0x00],
                continuation: ContinuationToken::none(),
            }),
            SdpResponse::Error(ErrorResponse {
                code: SdpErrorCode::InvalidContinuationState,
                info: Vec::new(),
            }),
        ];
        for response in responses {
            let bytes = response.to_packet(9).unwrap().serialize();
            let packet = SdpPacket::deserialize(&bytes).unwrap();
            assert_eq!(SdpResponse::parse(&packet).unwrap(), response);
        }
    }
}
