//! Server-side service record database
//!
//! Each record owns a bounded value pad plus an id-sorted list of
//! descriptors pointing into it by offset. Deleting an attribute compacts
//! the pad and shifts the offsets of every value stored after the hole.
use super::codec::{raw_value_contains_uuid, DEFAULT_MAX_NESTING_DEPTH};
use super::constants::*;
use super::types::{AttributeId, AttributeType, RecordHandle};
use crate::error::{SdpError, SdpResult};
use crate::uuid::Uuid;
use log::{debug, warn};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Capacity limits for the record database
#[derive(Debug, Clone)]
pub struct DatabaseLimits {
    /// Maximum number of service records
    pub max_records: usize,
    /// Maximum number of attributes in one record
    pub max_attributes_per_record: usize,
    /// Value pad size of one record in bytes
    pub max_pad_len: usize,
    /// Largest single attribute value in bytes
    pub max_attribute_len: usize,
    /// Cut text values down to the free pad space instead of failing.
    /// Kept for compatibility with stacks that always truncated; off by default.
    pub truncate_oversized_text: bool,
    /// Nesting depth searched for UUIDs inside sequences
    pub max_search_depth: usize,
}

impl Default for DatabaseLimits {
    fn default() -> Self {
        Self {
            max_records: 30,
            max_attributes_per_record: 25,
            max_pad_len: 300,
            max_attribute_len: 400,
            truncate_oversized_text: false,
            max_search_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// Where one attribute's value lives in its record's pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub id: AttributeId,
    pub attr_type: AttributeType,
    pub offset: usize,
    pub len: usize,
}

/// Borrowed view of one stored attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeView<'a> {
    pub id: AttributeId,
    pub attr_type: AttributeType,
    pub value: &'a [u8],
}

/// A service record
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    handle: RecordHandle,
    /// Sorted ascending by id
    attributes: Vec<AttributeDescriptor>,
    /// Value storage; its length is the next free pad offset
    pad: Vec<u8>,
}

impl ServiceRecord {
    fn new(handle: RecordHandle) -> Self {
        Self {
            handle,
            attributes: Vec::new(),
            pad: Vec::new(),
        }
    }

    pub fn handle(&self) -> RecordHandle {
        self.handle
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Bytes of pad in use
    pub fn pad_used(&self) -> usize {
        self.pad.len()
    }

    pub fn descriptors(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    fn view(&self, desc: &AttributeDescriptor) -> AttributeView<'_> {
        AttributeView {
            id: desc.id,
            attr_type: desc.attr_type,
            value: &self.pad[desc.offset..desc.offset + desc.len],
        }
    }

    /// All attributes in ascending id order
    pub fn attributes(&self) -> impl Iterator<Item = AttributeView<'_>> {
        self.attributes.iter().map(move |desc| self.view(desc))
    }

    pub fn attribute(&self, id: AttributeId) -> Option<AttributeView<'_>> {
        self.attributes
            .iter()
            .find(|desc| desc.id == id)
            .map(|desc| self.view(desc))
    }

    /// First attribute with `start_id <= id <= end_id`
    pub fn find_attribute_in_range(
        &self,
        start_id: AttributeId,
        end_id: AttributeId,
    ) -> Option<AttributeView<'_>> {
        self.attributes
            .iter()
            .find(|desc| desc.id >= start_id && desc.id <= end_id)
            .map(|desc| self.view(desc))
    }

    /// Whether every UUID in `uuids` appears in some UUID-valued attribute,
    /// directly or nested inside a sequence.
    pub fn matches_uuids(&self, uuids: &[Uuid], max_depth: usize) -> bool {
        uuids.iter().all(|uuid| {
            self.attributes().any(|attr| {
                raw_value_contains_uuid(attr.attr_type, attr.value, uuid, max_depth)
            })
        })
    }

    fn remove_attribute(&mut self, id: AttributeId) -> Option<AttributeDescriptor> {
        let index = self.attributes.iter().position(|desc| desc.id == id)?;
        let removed = self.attributes.remove(index);

        for desc in self.attributes.iter_mut() {
            if desc.offset > removed.offset {
                desc.offset -= removed.len;
            }
        }
        self.pad.drain(removed.offset..removed.offset + removed.len);

        Some(removed)
    }

    fn insert_attribute(&mut self, id: AttributeId, attr_type: AttributeType, value: &[u8]) {
        let index = self
            .attributes
            .iter()
            .position(|desc| desc.id >= id)
            .unwrap_or(self.attributes.len());

        let desc = AttributeDescriptor {
            id,
            attr_type,
            offset: self.pad.len(),
            len: value.len(),
        };
        self.pad.extend_from_slice(value);
        self.attributes.insert(index, desc);
    }
}

/// The server's service record database
#[derive(Debug)]
pub struct ServiceDatabase {
    limits: DatabaseLimits,
    /// Ascending handle order, which is creation order
    records: Vec<ServiceRecord>,
    next_handle: RecordHandle,
    pub(crate) primary_device_id_handle: Option<RecordHandle>,
}

impl Default for ServiceDatabase {
    fn default() -> Self {
        Self::new(DatabaseLimits::default())
    }
}

impl ServiceDatabase {
    pub fn new(limits: DatabaseLimits) -> Self {
        Self {
            limits,
            records: Vec::new(),
            next_handle: SDP_FIRST_RECORD_HANDLE,
            primary_device_id_handle: None,
        }
    }

    pub fn limits(&self) -> &DatabaseLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.records.iter()
    }

    pub fn primary_device_id_handle(&self) -> Option<RecordHandle> {
        self.primary_device_id_handle
    }

    /// Create an empty record carrying only its handle attribute
    pub fn create_record(&mut self) -> SdpResult<RecordHandle> {
        if self.records.len() >= self.limits.max_records {
            return Err(SdpError::DatabaseFull);
        }
        let handle = self.next_handle;
        self.next_handle = handle.checked_add(1).ok_or(SdpError::DatabaseFull)?;

        self.records.push(ServiceRecord::new(handle));
        if let Err(e) = self.add_attribute(
            handle,
            ATTR_ID_SERVICE_RECORD_HANDLE,
            AttributeType::UInt,
            &handle.to_be_bytes(),
        ) {
            self.records.pop();
            return Err(e);
        }

        debug!("Created service record 0x{:08X}", handle);
        Ok(handle)
    }

    /// Delete one record, or every record when `handle` is `SDP_ALL_RECORDS`
    pub fn delete_record(&mut self, handle: RecordHandle) -> SdpResult<()> {
        if handle == SDP_ALL_RECORDS {
            debug!("Deleting all {} service records", self.records.len());
            self.records.clear();
            self.primary_device_id_handle = None;
            return Ok(());
        }

        let index = self
            .records
            .iter()
            .position(|record| record.handle == handle)
            .ok_or(SdpError::RecordNotFound(handle))?;
        self.records.remove(index);

        if self.primary_device_id_handle == Some(handle) {
            self.primary_device_id_handle = None;
        }
        debug!("Deleted service record 0x{:08X}", handle);
        Ok(())
    }

    pub fn find_record(&self, handle: RecordHandle) -> Option<&ServiceRecord> {
        self.records.iter().find(|record| record.handle == handle)
    }

    fn find_record_mut(&mut self, handle: RecordHandle) -> SdpResult<&mut ServiceRecord> {
        self.records
            .iter_mut()
            .find(|record| record.handle == handle)
            .ok_or(SdpError::RecordNotFound(handle))
    }

    /// Add or replace an attribute, keeping the record sorted by id
    pub fn add_attribute(
        &mut self,
        handle: RecordHandle,
        id: AttributeId,
        attr_type: AttributeType,
        value: &[u8],
    ) -> SdpResult<()> {
        let limits = self.limits.clone();
        let record = self.find_record_mut(handle)?;

        if !(attr_type == AttributeType::Text && limits.truncate_oversized_text) {
            attr_type.validate_len(value.len())?;
        }

        let existing = record.attributes.iter().find(|desc| desc.id == id).copied();
        if existing.is_none() && record.attributes.len() >= limits.max_attributes_per_record {
            return Err(SdpError::AttributeCapacityExceeded);
        }

        let reclaimed = existing.map_or(0, |desc| desc.len);
        let available = (limits.max_pad_len + reclaimed)
            .saturating_sub(record.pad.len())
            .min(limits.max_attribute_len);

        let value = if value.len() <= available {
            value
        } else if attr_type == AttributeType::Text && limits.truncate_oversized_text {
            warn!(
                "Truncating text attribute 0x{:04X} of record 0x{:08X} from {} to {} bytes",
                id,
                handle,
                value.len(),
                available
            );
            &value[..available]
        } else {
            return Err(SdpError::ValueTooLarge(value.len()));
        };

        if existing.is_some() {
            record.remove_attribute(id);
        }
        record.insert_attribute(id, attr_type, value);
        Ok(())
    }

    /// Remove an attribute and compact the record's pad
    pub fn delete_attribute(&mut self, handle: RecordHandle, id: AttributeId) -> SdpResult<()> {
        let record = self.find_record_mut(handle)?;
        record
            .remove_attribute(id)
            .map(|_| ())
            .ok_or(SdpError::AttributeNotFound(id))
    }

    /// Copy of an attribute's type and value
    pub fn read_attribute(
        &self,
        handle: RecordHandle,
        id: AttributeId,
    ) -> SdpResult<(AttributeType, Vec<u8>)> {
        let record = self.find_record(handle).ok_or(SdpError::RecordNotFound(handle))?;
        let attr = record.attribute(id).ok_or(SdpError::AttributeNotFound(id))?;
        Ok((attr.attr_type, attr.value.to_vec()))
    }

    /// Next record after `cursor` that contains every UUID in `uuids`.
    ///
    /// Records are kept in ascending handle order, so the scan resumes at the
    /// first handle above the cursor even when the cursor record itself has
    /// since been deleted.
    pub fn search_by_uuid_set(
        &self,
        cursor: Option<RecordHandle>,
        uuids: &[Uuid],
    ) -> Option<&ServiceRecord> {
        self.records
            .iter()
            .filter(|record| cursor.map_or(true, |after| record.handle > after))
            .find(|record| record.matches_uuids(uuids, self.limits.max_search_depth))
    }
}

/// Record database shared between the administrative API and connection dispatch.
///
/// Readers (query dispatch) and writers (administration) are mutually
/// exclusive, so no search ever sees a half-mutated record.
#[derive(Debug, Clone, Default)]
pub struct SharedDatabase {
    inner: Arc<RwLock<ServiceDatabase>>,
}

impl SharedDatabase {
    pub fn new(database: ServiceDatabase) -> Self {
        Self {
            inner: Arc::new(RwLock::new(database)),
        }
    }

    pub fn read(&self) -> SdpResult<RwLockReadGuard<'_, ServiceDatabase>> {
        self.inner.read().map_err(|_| SdpError::NoResources)
    }

    pub fn write(&self) -> SdpResult<RwLockWriteGuard<'_, ServiceDatabase>> {
        self.inner.write().map_err(|_| SdpError::NoResources)
    }
}
