//! Client-side discovery database
//!
//! A bounded arena of discovered records and attributes. Nodes link to their
//! siblings and nested children by index, and every node is charged against
//! a fixed byte budget so a hostile peer cannot grow the database without
//! bound.
use super::admin::ProtocolElement;
use super::codec::{enter_sequence, read_attribute_id, read_raw_element, DEFAULT_MAX_NESTING_DEPTH};
use super::constants::*;
use super::types::{AttributeId, AttributeRange, AttributeType};
use crate::address::BdAddr;
use crate::error::{SdpError, SdpResult};
use crate::uuid::Uuid;
use log::{debug, warn};

/// Bytes charged for each discovered record
pub const RECORD_NODE_SIZE: usize = 24;
/// Bytes charged for each discovered attribute, on top of its scalar value
pub const ATTRIBUTE_NODE_SIZE: usize = 16;

/// Index of a record in a [`DiscoveryDatabase`]
pub type RecordIndex = usize;
/// Index of an attribute in a [`DiscoveryDatabase`]
pub type AttributeIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRecord {
    pub peer: BdAddr,
    first_attribute: Option<AttributeIndex>,
    last_attribute: Option<AttributeIndex>,
}

/// Value of a discovered attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveredValue {
    /// Raw big-endian value bytes of a non-container element
    Scalar(Vec<u8>),
    /// Sequence or alternative; children hang off `first_child`
    Nested { first_child: Option<AttributeIndex> },
}

/// One discovered attribute, or one element nested inside a container (id 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAttribute {
    pub id: AttributeId,
    pub attr_type: AttributeType,
    pub value: DiscoveredValue,
    next: Option<AttributeIndex>,
}

impl DiscoveredAttribute {
    pub fn scalar(&self) -> Option<&[u8]> {
        match &self.value {
            DiscoveredValue::Scalar(bytes) => Some(bytes),
            DiscoveredValue::Nested { .. } => None,
        }
    }

    /// Unsigned integer value of up to 32 bits
    pub fn as_u32(&self) -> Option<u32> {
        if self.attr_type != AttributeType::UInt {
            return None;
        }
        match self.scalar()? {
            [a] => Some(*a as u32),
            [a, b] => Some(u16::from_be_bytes([*a, *b]) as u32),
            [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.as_u32().and_then(|v| u16::try_from(v).ok())
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        if self.attr_type != AttributeType::Uuid {
            return None;
        }
        Uuid::try_from_slice_be(self.scalar()?)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (self.attr_type, self.scalar()?) {
            (AttributeType::Bool, [b]) => Some(*b != 0),
            _ => None,
        }
    }

    /// Text or URL bytes
    pub fn as_text(&self) -> Option<&[u8]> {
        match self.attr_type {
            AttributeType::Text | AttributeType::Url => self.scalar(),
            _ => None,
        }
    }
}

/// Bounded copy of the raw attribute streams received
#[derive(Debug, Clone)]
struct RawCapture {
    data: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

/// Results of one discovery session
#[derive(Debug, Clone)]
pub struct DiscoveryDatabase {
    capacity: usize,
    used: usize,
    max_depth: usize,
    uuid_filters: Vec<Uuid>,
    attr_filters: Vec<AttributeRange>,
    records: Vec<DiscoveredRecord>,
    attributes: Vec<DiscoveredAttribute>,
    raw: Option<RawCapture>,
}

impl DiscoveryDatabase {
    /// Create an empty database of `capacity` bytes holding the session's filters.
    ///
    /// An empty attribute filter list means every attribute.
    pub fn new(
        capacity: usize,
        uuid_filters: &[Uuid],
        attr_filters: &[AttributeRange],
    ) -> SdpResult<Self> {
        if uuid_filters.is_empty() {
            return Err(SdpError::InvalidRequestSyntax("no UUID filters".into()));
        }
        if attr_filters.iter().any(|range| range.start > range.end) {
            return Err(SdpError::InvalidRequestSyntax("inverted attribute range".into()));
        }
        let attr_filters = if attr_filters.is_empty() {
            vec![AttributeRange::all()]
        } else {
            attr_filters.to_vec()
        };

        Ok(Self {
            capacity,
            used: 0,
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
            uuid_filters: uuid_filters.to_vec(),
            attr_filters,
            records: Vec::new(),
            attributes: Vec::new(),
            raw: None,
        })
    }

    /// Also keep a verbatim copy of up to `capacity` bytes of received attribute data
    pub fn with_raw_capture(mut self, capacity: usize) -> Self {
        self.raw = Some(RawCapture {
            data: Vec::with_capacity(capacity),
            capacity,
            truncated: false,
        });
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn uuid_filters(&self) -> &[Uuid] {
        &self.uuid_filters
    }

    pub fn attr_filters(&self) -> &[AttributeRange] {
        &self.attr_filters
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn memory_used(&self) -> usize {
        self.used
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, index: RecordIndex) -> Option<&DiscoveredRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordIndex, &DiscoveredRecord)> {
        self.records.iter().enumerate()
    }

    pub fn raw_data(&self) -> Option<&[u8]> {
        self.raw.as_ref().map(|raw| raw.data.as_slice())
    }

    pub fn raw_data_truncated(&self) -> bool {
        self.raw.as_ref().map_or(false, |raw| raw.truncated)
    }

    pub(crate) fn capture_raw(&mut self, data: &[u8]) {
        if let Some(raw) = self.raw.as_mut() {
            let room = raw.capacity - raw.data.len();
            if data.len() > room {
                warn!("Raw discovery capture full, dropping {} bytes", data.len() - room);
                raw.truncated = true;
            }
            raw.data.extend_from_slice(&data[..data.len().min(room)]);
        }
    }

    fn charge(&mut self, bytes: usize) -> SdpResult<()> {
        if self.used + bytes > self.capacity {
            warn!(
                "Discovery database exhausted ({} of {} bytes used, {} more needed)",
                self.used, self.capacity, bytes
            );
            return Err(SdpError::DatabaseFull);
        }
        self.used += bytes;
        Ok(())
    }

    pub fn add_record(&mut self, peer: BdAddr) -> SdpResult<RecordIndex> {
        self.charge(RECORD_NODE_SIZE)?;
        self.records.push(DiscoveredRecord {
            peer,
            first_attribute: None,
            last_attribute: None,
        });
        Ok(self.records.len() - 1)
    }

    /// Add an attribute to a record from its encoded value, materializing
    /// nested elements.
    pub fn add_attribute(
        &mut self,
        record: RecordIndex,
        id: AttributeId,
        attr_type: AttributeType,
        value: &[u8],
    ) -> SdpResult<AttributeIndex> {
        if record >= self.records.len() {
            return Err(SdpError::InvalidState);
        }
        let index = self.materialize(id, attr_type, value, 0)?;

        let entry = &mut self.records[record];
        let previous = entry.last_attribute.replace(index);
        match previous {
            Some(last) => self.attributes[last].next = Some(index),
            None => entry.first_attribute = Some(index),
        }
        Ok(index)
    }

    fn materialize(
        &mut self,
        id: AttributeId,
        attr_type: AttributeType,
        value: &[u8],
        depth: usize,
    ) -> SdpResult<AttributeIndex> {
        if !attr_type.is_container() {
            self.charge(ATTRIBUTE_NODE_SIZE + value.len())?;
            self.attributes.push(DiscoveredAttribute {
                id,
                attr_type,
                value: DiscoveredValue::Scalar(value.to_vec()),
                next: None,
            });
            return Ok(self.attributes.len() - 1);
        }

        if depth >= self.max_depth {
            return Err(SdpError::NestingTooDeep(depth));
        }
        self.charge(ATTRIBUTE_NODE_SIZE)?;
        self.attributes.push(DiscoveredAttribute {
            id,
            attr_type,
            value: DiscoveredValue::Nested { first_child: None },
            next: None,
        });
        let parent = self.attributes.len() - 1;

        let mut last_child: Option<AttributeIndex> = None;
        let mut pos = 0;
        while pos < value.len() {
            let raw = read_raw_element(value, pos, value.len())?;
            let child = self.materialize(0, raw.header.attr_type, raw.value, depth + 1)?;
            match last_child {
                Some(last) => self.attributes[last].next = Some(child),
                None => self.attributes[parent].value = DiscoveredValue::Nested { first_child: Some(child) },
            }
            last_child = Some(child);
            pos = raw.next;
        }
        Ok(parent)
    }

    /// Add one record from a complete attribute list sequence.
    ///
    /// On failure the database is left exactly as it was before the call.
    pub fn add_record_from_attribute_list(
        &mut self,
        peer: BdAddr,
        data: &[u8],
    ) -> SdpResult<RecordIndex> {
        let (records, attributes, used) = (self.records.len(), self.attributes.len(), self.used);
        let result = self.parse_attribute_list(peer, data);
        if result.is_err() {
            self.records.truncate(records);
            self.attributes.truncate(attributes);
            self.used = used;
        }
        result
    }

    fn parse_attribute_list(&mut self, peer: BdAddr, data: &[u8]) -> SdpResult<RecordIndex> {
        let mut pos = 0;
        let end = enter_sequence(data, &mut pos, data.len())?;
        let record = self.add_record(peer)?;

        while pos < end {
            let id = read_attribute_id(data, &mut pos, end)?;
            let raw = read_raw_element(data, pos, end)?;
            self.add_attribute(record, id, raw.header.attr_type, raw.value)?;
            pos = raw.next;
        }
        debug!("Discovered record {} from {}", record, peer);
        Ok(record)
    }

    pub fn attribute(&self, index: AttributeIndex) -> Option<&DiscoveredAttribute> {
        self.attributes.get(index)
    }

    fn sibling_chain(&self, first: Option<AttributeIndex>) -> SiblingIter<'_> {
        SiblingIter {
            attributes: &self.attributes,
            next: first,
        }
    }

    /// Top-level attributes of a record, in received order
    pub fn attributes(&self, record: RecordIndex) -> impl Iterator<Item = &DiscoveredAttribute> {
        let first = self.records.get(record).and_then(|r| r.first_attribute);
        self.sibling_chain(first)
    }

    /// Elements nested inside a sequence or alternative
    pub fn children<'a>(
        &'a self,
        attr: &DiscoveredAttribute,
    ) -> impl Iterator<Item = &'a DiscoveredAttribute> {
        let first = match attr.value {
            DiscoveredValue::Nested { first_child } => first_child,
            DiscoveredValue::Scalar(_) => None,
        };
        self.sibling_chain(first)
    }

    pub fn find_attribute_in_record(
        &self,
        record: RecordIndex,
        id: AttributeId,
    ) -> Option<&DiscoveredAttribute> {
        self.attributes(record).find(|attr| attr.id == id)
    }

    fn contains_uuid(&self, attr: &DiscoveredAttribute, uuid: &Uuid) -> bool {
        match attr.value {
            DiscoveredValue::Scalar(_) => attr.as_uuid().as_ref() == Some(uuid),
            DiscoveredValue::Nested { .. } => self.children(attr).any(|child| self.contains_uuid(child, uuid)),
        }
    }

    fn next_record_after(&self, cursor: Option<RecordIndex>) -> std::ops::Range<RecordIndex> {
        let start = cursor.map_or(0, |index| index + 1);
        start.min(self.records.len())..self.records.len()
    }

    /// Next record after `cursor` whose service class list contains `uuid`
    pub fn find_service_in_db(&self, uuid: &Uuid, cursor: Option<RecordIndex>) -> Option<RecordIndex> {
        self.next_record_after(cursor).find(|&record| {
            self.find_attribute_in_record(record, ATTR_ID_SERVICE_CLASS_ID_LIST)
                .map_or(false, |list| self.contains_uuid(list, uuid))
        })
    }

    /// Next record after `cursor` carrying `uuid` in any attribute
    pub fn find_service_uuid_in_db(
        &self,
        uuid: &Uuid,
        cursor: Option<RecordIndex>,
    ) -> Option<RecordIndex> {
        self.next_record_after(cursor).find(|&record| {
            self.attributes(record).any(|attr| self.contains_uuid(attr, uuid))
        })
    }

    /// Parameters of `protocol_uuid` in the record's protocol descriptor list
    pub fn find_protocol_list_elem_in_record(
        &self,
        record: RecordIndex,
        protocol_uuid: u16,
    ) -> Option<ProtocolElement> {
        let list = self.find_attribute_in_record(record, ATTR_ID_PROTOCOL_DESC_LIST)?;
        self.find_protocol_in_list(list, protocol_uuid)
    }

    /// Like [`Self::find_protocol_list_elem_in_record`] but over every
    /// additional protocol descriptor list
    pub fn find_additional_protocol_list_elem_in_record(
        &self,
        record: RecordIndex,
        protocol_uuid: u16,
    ) -> Option<ProtocolElement> {
        let lists = self.find_attribute_in_record(record, ATTR_ID_ADDITION_PROTO_DESC_LISTS)?;
        self.children(lists)
            .find_map(|list| self.find_protocol_in_list(list, protocol_uuid))
    }

    fn find_protocol_in_list(
        &self,
        list: &DiscoveredAttribute,
        protocol_uuid: u16,
    ) -> Option<ProtocolElement> {
        let target = Uuid::from_u16(protocol_uuid);
        self.children(list).find_map(|layer| {
            let mut items = self.children(layer);
            if items.next()?.as_uuid()? != target {
                return None;
            }
            let params = items
                .take(SDP_MAX_PROTOCOL_PARAMS)
                .filter_map(DiscoveredAttribute::as_u16)
                .collect::<Vec<_>>();
            Some(ProtocolElement {
                protocol_uuid,
                params,
            })
        })
    }

    /// Version the record declares for `profile_uuid`
    pub fn find_profile_version_in_record(&self, record: RecordIndex, profile_uuid: &Uuid) -> Option<u16> {
        let list = self.find_attribute_in_record(record, ATTR_ID_BT_PROFILE_DESC_LIST)?;
        self.children(list).find_map(|descriptor| {
            let mut items = self.children(descriptor);
            if items.next()?.as_uuid()? != *profile_uuid {
                return None;
            }
            items.next()?.as_u16()
        })
    }
}

struct SiblingIter<'a> {
    attributes: &'a [DiscoveredAttribute],
    next: Option<AttributeIndex>,
}

impl<'a> Iterator for SiblingIter<'a> {
    type Item = &'a DiscoveredAttribute;

    fn next(&mut self) -> Option<Self::Item> {
        let attr = self.attributes.get(self.next?)?;
        self.next = attr.next;
        Some(attr)
    }
}
