//! SDP data element codec
//!
//! Every value SDP puts on the wire is a data element: a one-byte descriptor
//! `(type << 3) | size_class`, an optional explicit length, then the value.
//! Sequences and alternatives carry a byte range that is itself a
//! concatenation of data elements. All readers here take an explicit `limit`
//! (the end of the enclosing region) and never read past it.

use super::constants::*;
use super::types::{AttributeId, AttributeRange, AttributeType, DataElement};
use crate::error::{SdpError, SdpResult};
use crate::uuid::Uuid;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Default bound on sequence/alternative nesting
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 8;

/// Decoded data element descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub attr_type: AttributeType,
    pub size_class: u8,
    /// Descriptor byte plus any explicit length bytes
    pub header_len: usize,
    pub value_len: usize,
}

impl ElementHeader {
    pub fn total_len(&self) -> usize {
        self.header_len + self.value_len
    }
}

/// A data element located inside a buffer, value not yet interpreted
#[derive(Debug, Clone, Copy)]
pub struct RawElement<'a> {
    pub header: ElementHeader,
    pub value: &'a [u8],
    /// Position just past the element
    pub next: usize,
}

fn malformed(what: &str, pos: usize) -> SdpError {
    SdpError::MalformedPdu(format!("{} at offset {}", what, pos))
}

/// Read the descriptor at `pos`, checking that the whole element ends at or before `limit`.
pub fn read_element_header(data: &[u8], pos: usize, limit: usize) -> SdpResult<ElementHeader> {
    let limit = limit.min(data.len());
    if pos >= limit {
        return Err(malformed("data element truncated", pos));
    }

    let mut cursor = Cursor::new(&data[..limit]);
    cursor.set_position(pos as u64);

    let descriptor = cursor.read_u8()?;
    let attr_type = AttributeType::from_tag(descriptor >> DE_TYPE_SHIFT)?;
    let size_class = descriptor & DE_SIZE_MASK;

    let value_len = match size_class {
        DE_SIZE_1 if attr_type == AttributeType::Nil => 0,
        DE_SIZE_1 => 1,
        DE_SIZE_2 => 2,
        DE_SIZE_4 => 4,
        DE_SIZE_8 => 8,
        DE_SIZE_16 => 16,
        DE_SIZE_IN_NEXT_BYTE | DE_SIZE_IN_NEXT_WORD | DE_SIZE_IN_NEXT_LONG => {
            if !attr_type.is_variable_length() {
                return Err(SdpError::UnknownSizeClass(size_class));
            }
            let needed = match size_class {
                DE_SIZE_IN_NEXT_BYTE => 1,
                DE_SIZE_IN_NEXT_WORD => 2,
                _ => 4,
            };
            if pos + 1 + needed > limit {
                return Err(malformed("data element length truncated", pos));
            }
            match size_class {
                DE_SIZE_IN_NEXT_BYTE => cursor.read_u8()? as usize,
                DE_SIZE_IN_NEXT_WORD => cursor.read_u16::<BigEndian>()? as usize,
                _ => cursor.read_u32::<BigEndian>()? as usize,
            }
        }
        other => return Err(SdpError::UnknownSizeClass(other)),
    };

    if attr_type.is_variable_length() && size_class < DE_SIZE_IN_NEXT_BYTE {
        return Err(SdpError::UnknownSizeClass(size_class));
    }
    if !attr_type.is_variable_length() {
        attr_type
            .validate_len(value_len)
            .map_err(|_| malformed("illegal size class for element type", pos))?;
    }

    let header_len = cursor.position() as usize - pos;
    let header = ElementHeader {
        attr_type,
        size_class,
        header_len,
        value_len,
    };

    if pos
        .checked_add(header.total_len())
        .map_or(true, |end| end > limit)
    {
        return Err(malformed("data element overruns enclosing length", pos));
    }

    Ok(header)
}

/// Read one element at `pos` without interpreting its value.
pub fn read_raw_element(data: &[u8], pos: usize, limit: usize) -> SdpResult<RawElement<'_>> {
    let header = read_element_header(data, pos, limit)?;
    let start = pos + header.header_len;
    let end = start + header.value_len;
    Ok(RawElement {
        header,
        value: &data[start..end],
        next: end,
    })
}

/// Number of descriptor bytes needed for a value of `len` bytes
pub fn element_header_len(attr_type: AttributeType, len: usize) -> usize {
    if !attr_type.is_variable_length() {
        1
    } else if len <= u8::MAX as usize {
        2
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

/// Write a descriptor for a value of `len` bytes, choosing the smallest size class.
pub fn write_element_header(out: &mut Vec<u8>, attr_type: AttributeType, len: usize) -> SdpResult<()> {
    attr_type.validate_len(len)?;
    let tag = attr_type.tag() << DE_TYPE_SHIFT;

    if attr_type.is_variable_length() {
        if len <= u8::MAX as usize {
            out.write_u8(tag | DE_SIZE_IN_NEXT_BYTE)?;
            out.write_u8(len as u8)?;
        } else if len <= u16::MAX as usize {
            out.write_u8(tag | DE_SIZE_IN_NEXT_WORD)?;
            out.write_u16::<BigEndian>(len as u16)?;
        } else {
            out.write_u8(tag | DE_SIZE_IN_NEXT_LONG)?;
            out.write_u32::<BigEndian>(len as u32)?;
        }
        return Ok(());
    }

    let size_class = match len {
        0 | 1 => DE_SIZE_1,
        2 => DE_SIZE_2,
        4 => DE_SIZE_4,
        8 => DE_SIZE_8,
        _ => DE_SIZE_16,
    };
    out.write_u8(tag | size_class)?;
    Ok(())
}

/// Encode a data element from its type and raw value bytes.
pub fn encode_raw_element(out: &mut Vec<u8>, attr_type: AttributeType, value: &[u8]) -> SdpResult<()> {
    write_element_header(out, attr_type, value.len())?;
    out.extend_from_slice(value);
    Ok(())
}

/// Encoded length of a raw element
pub fn raw_element_len(attr_type: AttributeType, value_len: usize) -> usize {
    element_header_len(attr_type, value_len) + value_len
}

/// Raw value bytes of an element (the part after the descriptor).
pub fn element_value_bytes(element: &DataElement) -> SdpResult<Vec<u8>> {
    let mut value = Vec::new();
    match element {
        DataElement::Nil => {}
        DataElement::Unsigned8(v) => value.write_u8(*v)?,
        DataElement::Unsigned16(v) => value.write_u16::<BigEndian>(*v)?,
        DataElement::Unsigned32(v) => value.write_u32::<BigEndian>(*v)?,
        DataElement::Unsigned64(v) => value.write_u64::<BigEndian>(*v)?,
        DataElement::Unsigned128(v) | DataElement::Signed128(v) => value.extend_from_slice(v),
        DataElement::Signed8(v) => value.write_i8(*v)?,
        DataElement::Signed16(v) => value.write_i16::<BigEndian>(*v)?,
        DataElement::Signed32(v) => value.write_i32::<BigEndian>(*v)?,
        DataElement::Signed64(v) => value.write_i64::<BigEndian>(*v)?,
        DataElement::Uuid(uuid) => value.extend_from_slice(&uuid.to_be_vec()),
        DataElement::Text(bytes) | DataElement::Url(bytes) => value.extend_from_slice(bytes),
        DataElement::Boolean(b) => value.write_u8(u8::from(*b))?,
        DataElement::Sequence(items) | DataElement::Alternative(items) => {
            for item in items {
                encode_element(item, &mut value)?;
            }
        }
    }
    Ok(value)
}

/// Append the wire encoding of `element` to `out`.
pub fn encode_element(element: &DataElement, out: &mut Vec<u8>) -> SdpResult<()> {
    let value = element_value_bytes(element)?;
    encode_raw_element(out, element.attribute_type(), &value)
}

/// Wire encoding of `element` as a fresh buffer
pub fn encode(element: &DataElement) -> SdpResult<Vec<u8>> {
    let mut out = Vec::new();
    encode_element(element, &mut out)?;
    Ok(out)
}

/// Encoded length of `element` without building it
pub fn encoded_len(element: &DataElement) -> usize {
    let value_len = match element {
        DataElement::Nil => 0,
        DataElement::Unsigned8(_) | DataElement::Signed8(_) | DataElement::Boolean(_) => 1,
        DataElement::Unsigned16(_) | DataElement::Signed16(_) => 2,
        DataElement::Unsigned32(_) | DataElement::Signed32(_) => 4,
        DataElement::Unsigned64(_) | DataElement::Signed64(_) => 8,
        DataElement::Unsigned128(_) | DataElement::Signed128(_) => 16,
        DataElement::Uuid(uuid) => uuid.encoded_len(),
        DataElement::Text(bytes) | DataElement::Url(bytes) => bytes.len(),
        DataElement::Sequence(items) | DataElement::Alternative(items) => {
            items.iter().map(encoded_len).sum()
        }
    };
    raw_element_len(element.attribute_type(), value_len)
}

fn interpret_scalar(attr_type: AttributeType, value: &[u8], pos: usize) -> SdpResult<DataElement> {
    let mut cursor = Cursor::new(value);
    let element = match (attr_type, value.len()) {
        (AttributeType::Nil, _) => DataElement::Nil,
        (AttributeType::UInt, 1) => DataElement::Unsigned8(cursor.read_u8()?),
        (AttributeType::UInt, 2) => DataElement::Unsigned16(cursor.read_u16::<BigEndian>()?),
        (AttributeType::UInt, 4) => DataElement::Unsigned32(cursor.read_u32::<BigEndian>()?),
        (AttributeType::UInt, 8) => DataElement::Unsigned64(cursor.read_u64::<BigEndian>()?),
        (AttributeType::SignedInt, 1) => DataElement::Signed8(cursor.read_i8()?),
        (AttributeType::SignedInt, 2) => DataElement::Signed16(cursor.read_i16::<BigEndian>()?),
        (AttributeType::SignedInt, 4) => DataElement::Signed32(cursor.read_i32::<BigEndian>()?),
        (AttributeType::SignedInt, 8) => DataElement::Signed64(cursor.read_i64::<BigEndian>()?),
        (AttributeType::UInt, 16) | (AttributeType::SignedInt, 16) => {
            let mut wide = [0u8; 16];
            wide.copy_from_slice(value);
            if attr_type == AttributeType::UInt {
                DataElement::Unsigned128(wide)
            } else {
                DataElement::Signed128(wide)
            }
        }
        (AttributeType::Uuid, _) => DataElement::Uuid(
            Uuid::try_from_slice_be(value).ok_or_else(|| malformed("bad UUID length", pos))?,
        ),
        (AttributeType::Bool, 1) => DataElement::Boolean(value[0] != 0),
        (AttributeType::Text, _) => DataElement::Text(value.to_vec()),
        (AttributeType::Url, _) => DataElement::Url(value.to_vec()),
        _ => return Err(malformed("illegal element length", pos)),
    };
    Ok(element)
}

fn decode_at_depth(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    depth: usize,
    max_depth: usize,
) -> SdpResult<DataElement> {
    let raw = read_raw_element(data, *pos, limit)?;
    let element_pos = *pos;

    let element = if raw.header.attr_type.is_container() {
        if depth >= max_depth {
            return Err(SdpError::NestingTooDeep(max_depth));
        }
        let mut items = Vec::new();
        let mut inner = element_pos + raw.header.header_len;
        while inner < raw.next {
            items.push(decode_at_depth(data, &mut inner, raw.next, depth + 1, max_depth)?);
        }
        if raw.header.attr_type == AttributeType::Sequence {
            DataElement::Sequence(items)
        } else {
            DataElement::Alternative(items)
        }
    } else {
        interpret_scalar(raw.header.attr_type, raw.value, element_pos)?
    };

    *pos = raw.next;
    Ok(element)
}

/// Decode the element at `*pos`, advancing `*pos` past it.
pub fn decode_element(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    max_depth: usize,
) -> SdpResult<DataElement> {
    decode_at_depth(data, pos, limit, 0, max_depth)
}

/// Decode a complete buffer holding exactly one element.
pub fn decode(data: &[u8]) -> SdpResult<DataElement> {
    let mut pos = 0;
    let element = decode_element(data, &mut pos, data.len(), DEFAULT_MAX_NESTING_DEPTH)?;
    if pos != data.len() {
        return Err(malformed("trailing bytes after element", pos));
    }
    Ok(element)
}

/// Length of an attribute ID element (UInt16 descriptor + 2 bytes)
pub const ATTRIBUTE_ID_ELEMENT_LEN: usize = 3;

/// Append an attribute ID/value pair, ID first as a 2-byte unsigned integer.
pub fn encode_attribute_entry(id: AttributeId, element: &DataElement, out: &mut Vec<u8>) -> SdpResult<()> {
    encode_element(&DataElement::Unsigned16(id), out)?;
    encode_element(element, out)
}

/// Append an attribute ID/value pair from a stored raw value.
pub fn encode_raw_attribute_entry(
    out: &mut Vec<u8>,
    id: AttributeId,
    attr_type: AttributeType,
    value: &[u8],
) -> SdpResult<()> {
    encode_element(&DataElement::Unsigned16(id), out)?;
    encode_raw_element(out, attr_type, value)
}

/// Encoded length of an attribute ID/value pair
pub fn raw_attribute_entry_len(attr_type: AttributeType, value_len: usize) -> usize {
    ATTRIBUTE_ID_ELEMENT_LEN + raw_element_len(attr_type, value_len)
}

/// Read the attribute ID element at `*pos`, leaving `*pos` at the value.
pub fn read_attribute_id(data: &[u8], pos: &mut usize, limit: usize) -> SdpResult<AttributeId> {
    let raw = read_raw_element(data, *pos, limit)?;
    if raw.header.attr_type != AttributeType::UInt || raw.value.len() != 2 {
        return Err(malformed("attribute ID is not a 16-bit unsigned integer", *pos));
    }
    *pos = raw.next;
    Ok(u16::from_be_bytes([raw.value[0], raw.value[1]]))
}

/// Decode an attribute ID/value pair.
pub fn decode_attribute_entry(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    max_depth: usize,
) -> SdpResult<(AttributeId, DataElement)> {
    let id = read_attribute_id(data, pos, limit)?;
    let value = decode_element(data, pos, limit, max_depth)?;
    Ok((id, value))
}

/// Open the sequence at `*pos`, returning the end of its contents and leaving
/// `*pos` at the first nested element.
pub fn enter_sequence(data: &[u8], pos: &mut usize, limit: usize) -> SdpResult<usize> {
    let header = read_element_header(data, *pos, limit)?;
    if header.attr_type != AttributeType::Sequence {
        return Err(malformed("expected data element sequence", *pos));
    }
    *pos += header.header_len;
    Ok(*pos + header.value_len)
}

/// Encode a request's attribute ID list. Single IDs go out as UInt16,
/// ranges as UInt32 `start << 16 | end`.
pub fn encode_attribute_id_list(ranges: &[AttributeRange], out: &mut Vec<u8>) -> SdpResult<()> {
    let items: Vec<DataElement> = ranges
        .iter()
        .map(|range| {
            if range.is_single() {
                DataElement::Unsigned16(range.start)
            } else {
                DataElement::Unsigned32(((range.start as u32) << 16) | range.end as u32)
            }
        })
        .collect();
    encode_element(&DataElement::Sequence(items), out)
}

/// Decode a request's attribute ID list, at most `max_ranges` entries.
pub fn decode_attribute_id_list(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    max_ranges: usize,
) -> SdpResult<Vec<AttributeRange>> {
    let end = enter_sequence(data, pos, limit)
        .map_err(|e| SdpError::InvalidRequestSyntax(format!("attribute ID list: {}", e)))?;
    let mut ranges = Vec::new();

    while *pos < end {
        let raw = read_raw_element(data, *pos, end)?;
        let range = match (raw.header.attr_type, raw.value.len()) {
            (AttributeType::UInt, 2) => {
                AttributeRange::single(u16::from_be_bytes([raw.value[0], raw.value[1]]))
            }
            (AttributeType::UInt, 4) => AttributeRange::new(
                u16::from_be_bytes([raw.value[0], raw.value[1]]),
                u16::from_be_bytes([raw.value[2], raw.value[3]]),
            ),
            _ => {
                return Err(SdpError::InvalidRequestSyntax(
                    "attribute ID list entry is not UInt16/UInt32".into(),
                ))
            }
        };
        if range.start > range.end {
            return Err(SdpError::InvalidRequestSyntax(format!(
                "inverted attribute range 0x{:04X}-0x{:04X}",
                range.start, range.end
            )));
        }
        if ranges.len() == max_ranges {
            return Err(SdpError::TooManyFilters(max_ranges + 1));
        }
        ranges.push(range);
        *pos = raw.next;
    }

    if ranges.is_empty() {
        return Err(SdpError::InvalidRequestSyntax("empty attribute ID list".into()));
    }
    Ok(ranges)
}

/// Encode a service search pattern.
pub fn encode_uuid_list(uuids: &[Uuid], out: &mut Vec<u8>) -> SdpResult<()> {
    let items = uuids.iter().map(|uuid| DataElement::Uuid(*uuid)).collect();
    encode_element(&DataElement::Sequence(items), out)
}

/// Decode a service search pattern, at most `max_uuids` entries.
pub fn decode_uuid_list(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    max_uuids: usize,
) -> SdpResult<Vec<Uuid>> {
    let end = enter_sequence(data, pos, limit)
        .map_err(|e| SdpError::InvalidRequestSyntax(format!("service search pattern: {}", e)))?;
    let mut uuids = Vec::new();

    while *pos < end {
        let raw = read_raw_element(data, *pos, end)?;
        if raw.header.attr_type != AttributeType::Uuid {
            return Err(SdpError::InvalidRequestSyntax(
                "service search pattern entry is not a UUID".into(),
            ));
        }
        let uuid = Uuid::try_from_slice_be(raw.value)
            .ok_or_else(|| SdpError::InvalidRequestSyntax("bad UUID length".into()))?;
        if uuids.len() == max_uuids {
            return Err(SdpError::TooManyFilters(max_uuids + 1));
        }
        uuids.push(uuid);
        *pos = raw.next;
    }

    if uuids.is_empty() {
        return Err(SdpError::InvalidRequestSyntax("empty service search pattern".into()));
    }
    Ok(uuids)
}

/// Whether a stored value is, or recursively contains, `target`.
///
/// Nested elements deeper than `max_depth` are not inspected; a malformed
/// nested range simply does not match.
pub fn raw_value_contains_uuid(
    attr_type: AttributeType,
    value: &[u8],
    target: &Uuid,
    max_depth: usize,
) -> bool {
    match attr_type {
        AttributeType::Uuid => Uuid::try_from_slice_be(value).map_or(false, |uuid| uuid == *target),
        AttributeType::Sequence | AttributeType::Alternative if max_depth > 0 => {
            let mut pos = 0;
            while pos < value.len() {
                let raw = match read_raw_element(value, pos, value.len()) {
                    Ok(raw) => raw,
                    Err(_) => return false,
                };
                if raw_value_contains_uuid(raw.header.attr_type, raw.value, target, max_depth - 1) {
                    return true;
                }
                pos = raw.next;
            }
            false
        }
        _ => false,
    }
}
