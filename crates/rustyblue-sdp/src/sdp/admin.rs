//! Record construction helpers
//!
//! Each helper pre-encodes one well-known attribute shape and stores it with
//! [`ServiceDatabase::add_attribute`].
use super::codec::element_value_bytes;
use super::constants::*;
use super::database::ServiceDatabase;
use super::types::{AttributeId, AttributeType, DataElement, RecordHandle};
use crate::error::{SdpError, SdpResult};
use crate::uuid::Uuid;
use log::debug;

/// One layer of a protocol stack, e.g. L2CAP with its PSM or RFCOMM with its channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolElement {
    pub protocol_uuid: u16,
    pub params: Vec<u16>,
}

impl ProtocolElement {
    pub fn new(protocol_uuid: u16, params: &[u16]) -> Self {
        Self {
            protocol_uuid,
            params: params.to_vec(),
        }
    }

    fn to_element(&self) -> SdpResult<DataElement> {
        if self.params.len() > SDP_MAX_PROTOCOL_PARAMS {
            return Err(SdpError::InvalidAttributeValue(format!(
                "protocol 0x{:04X} has {} parameters",
                self.protocol_uuid,
                self.params.len()
            )));
        }

        let mut items = vec![DataElement::Uuid(Uuid::from_u16(self.protocol_uuid))];
        for &param in &self.params {
            // RFCOMM server channels are a single byte
            if self.protocol_uuid == UUID_PROTOCOL_RFCOMM {
                let channel = u8::try_from(param).map_err(|_| {
                    SdpError::InvalidAttributeValue(format!("RFCOMM channel {}", param))
                })?;
                items.push(DataElement::Unsigned8(channel));
            } else {
                items.push(DataElement::Unsigned16(param));
            }
        }
        Ok(DataElement::Sequence(items))
    }
}

fn protocol_list(elements: &[ProtocolElement]) -> SdpResult<DataElement> {
    let items = elements
        .iter()
        .map(ProtocolElement::to_element)
        .collect::<SdpResult<Vec<_>>>()?;
    Ok(DataElement::Sequence(items))
}

/// Device Identification record contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiRecord {
    pub vendor_id: u16,
    pub vendor_id_source: u16,
    pub product_id: u16,
    pub version: u16,
    pub primary_record: bool,
    pub client_executable_url: Option<String>,
    pub service_description: Option<String>,
    pub documentation_url: Option<String>,
}

impl ServiceDatabase {
    /// Store `element` under `id`
    pub fn add_element(
        &mut self,
        handle: RecordHandle,
        id: AttributeId,
        element: &DataElement,
    ) -> SdpResult<()> {
        let value = element_value_bytes(element)?;
        self.add_attribute(handle, id, element.attribute_type(), &value)
    }

    /// Store a data element sequence built from `items`
    pub fn add_sequence(
        &mut self,
        handle: RecordHandle,
        id: AttributeId,
        items: &[DataElement],
    ) -> SdpResult<()> {
        self.add_element(handle, id, &DataElement::Sequence(items.to_vec()))
    }

    /// Store a sequence of UUIDs, each in its shortest form
    pub fn add_uuid_sequence(
        &mut self,
        handle: RecordHandle,
        id: AttributeId,
        uuids: &[Uuid],
    ) -> SdpResult<()> {
        let items: Vec<DataElement> = uuids.iter().map(|uuid| DataElement::Uuid(*uuid)).collect();
        self.add_sequence(handle, id, &items)
    }

    pub fn add_service_class_id_list(
        &mut self,
        handle: RecordHandle,
        service_classes: &[Uuid],
    ) -> SdpResult<()> {
        self.add_uuid_sequence(handle, ATTR_ID_SERVICE_CLASS_ID_LIST, service_classes)
    }

    pub fn add_protocol_descriptor_list(
        &mut self,
        handle: RecordHandle,
        elements: &[ProtocolElement],
    ) -> SdpResult<()> {
        let list = protocol_list(elements)?;
        self.add_element(handle, ATTR_ID_PROTOCOL_DESC_LIST, &list)
    }

    /// Store additional protocol stacks, each encoded like a protocol descriptor list
    pub fn add_additional_protocol_lists(
        &mut self,
        handle: RecordHandle,
        lists: &[Vec<ProtocolElement>],
    ) -> SdpResult<()> {
        let items = lists
            .iter()
            .map(|list| protocol_list(list))
            .collect::<SdpResult<Vec<_>>>()?;
        self.add_sequence(handle, ATTR_ID_ADDITION_PROTO_DESC_LISTS, &items)
    }

    pub fn add_profile_descriptor_list(
        &mut self,
        handle: RecordHandle,
        profile: Uuid,
        version: u16,
    ) -> SdpResult<()> {
        let descriptor = DataElement::Sequence(vec![
            DataElement::Uuid(profile),
            DataElement::Unsigned16(version),
        ]);
        self.add_sequence(handle, ATTR_ID_BT_PROFILE_DESC_LIST, &[descriptor])
    }

    pub fn add_language_base_attr_id_list(
        &mut self,
        handle: RecordHandle,
        language: u16,
        char_encoding: u16,
        base_id: u16,
    ) -> SdpResult<()> {
        self.add_sequence(
            handle,
            ATTR_ID_LANGUAGE_BASE_ATTR_ID_LIST,
            &[
                DataElement::Unsigned16(language),
                DataElement::Unsigned16(char_encoding),
                DataElement::Unsigned16(base_id),
            ],
        )
    }

    pub fn add_service_name(&mut self, handle: RecordHandle, name: &str) -> SdpResult<()> {
        self.add_attribute(handle, ATTR_ID_SERVICE_NAME, AttributeType::Text, name.as_bytes())
    }

    /// Create or update the local Device Identification record.
    ///
    /// A primary record replaces the current primary one in place, keeping its
    /// handle. A failed update of a freshly created record removes it again.
    pub fn set_local_di_record(&mut self, info: &DiRecord) -> SdpResult<RecordHandle> {
        let (handle, created) = match self.primary_device_id_handle {
            Some(handle) if info.primary_record => (handle, false),
            _ => (self.create_record()?, true),
        };

        if let Err(e) = self.fill_di_record(handle, info) {
            if created {
                self.delete_record(handle)?;
            }
            return Err(e);
        }

        if info.primary_record {
            self.primary_device_id_handle = Some(handle);
        }
        debug!(
            "Device Identification record 0x{:08X} (vendor 0x{:04X}, product 0x{:04X}, primary {})",
            handle, info.vendor_id, info.product_id, info.primary_record
        );
        Ok(handle)
    }

    fn fill_di_record(&mut self, handle: RecordHandle, info: &DiRecord) -> SdpResult<()> {
        self.add_service_class_id_list(handle, &[Uuid::from_u16(UUID_SERVCLASS_PNP_INFORMATION)])?;
        self.add_uuid_sequence(
            handle,
            ATTR_ID_BROWSE_GROUP_LIST,
            &[Uuid::from_u16(UUID_SERVCLASS_PUBLIC_BROWSE_GROUP)],
        )?;

        let fields = [
            (ATTR_ID_SPECIFICATION_ID, DI_SPECIFICATION_VERSION),
            (ATTR_ID_VENDOR_ID, info.vendor_id),
            (ATTR_ID_PRODUCT_ID, info.product_id),
            (ATTR_ID_PRODUCT_VERSION, info.version),
            (ATTR_ID_VENDOR_ID_SOURCE, info.vendor_id_source),
        ];
        for (id, value) in fields {
            self.add_element(handle, id, &DataElement::Unsigned16(value))?;
        }
        self.add_element(handle, ATTR_ID_PRIMARY_RECORD, &DataElement::Boolean(info.primary_record))?;

        if let Some(url) = &info.client_executable_url {
            self.add_element(handle, ATTR_ID_CLIENT_EXE_URL, &DataElement::url(url))?;
        }
        if let Some(description) = &info.service_description {
            self.add_element(handle, ATTR_ID_SERVICE_DESCRIPTION, &DataElement::text(description))?;
        }
        if let Some(url) = &info.documentation_url {
            self.add_element(handle, ATTR_ID_DOCUMENTATION_URL, &DataElement::url(url))?;
        }
        Ok(())
    }
}
