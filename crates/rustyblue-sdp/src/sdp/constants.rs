//! SDP constants

/// SDP PSM on L2CAP
pub const SDP_PSM: u16 = 0x0001;

// PDU IDs
pub const SDP_PDU_ERROR_RESPONSE: u8 = 0x01;
pub const SDP_PDU_SERVICE_SEARCH_REQUEST: u8 = 0x02;
pub const SDP_PDU_SERVICE_SEARCH_RESPONSE: u8 = 0x03;
pub const SDP_PDU_SERVICE_ATTRIBUTE_REQUEST: u8 = 0x04;
pub const SDP_PDU_SERVICE_ATTRIBUTE_RESPONSE: u8 = 0x05;
pub const SDP_PDU_SERVICE_SEARCH_ATTRIBUTE_REQUEST: u8 = 0x06;
pub const SDP_PDU_SERVICE_SEARCH_ATTRIBUTE_RESPONSE: u8 = 0x07;

/// PDU header: id (1) + transaction id (2) + parameter length (2)
pub const SDP_PDU_HEADER_SIZE: usize = 5;

/// Longest continuation token a peer may send or receive
pub const SDP_MAX_CONTINUATION_LEN: usize = 16;

/// Length of the continuation tokens this server issues
pub const SDP_CONTINUATION_TOKEN_LEN: usize = 2;

/// Overhead of an attribute response around the attribute list:
/// header (5) + byte count (2) + continuation length (1) + token (2)
pub const SDP_MAX_ATTR_RSPHDR_LEN: usize = 10;

/// Overhead of a service search response around the handle list:
/// header (5) + total count (2) + current count (2) + continuation length (1) + token (2)
pub const SDP_MAX_SEARCH_RSPHDR_LEN: usize = 12;

/// First handle assigned to a service record
pub const SDP_FIRST_RECORD_HANDLE: u32 = 0x0001_0000;

/// Handle value that designates every record in `delete_record`
pub const SDP_ALL_RECORDS: u32 = 0;

// Data element descriptor type codes (upper five bits)
pub const DE_TYPE_NIL: u8 = 0;
pub const DE_TYPE_UINT: u8 = 1;
pub const DE_TYPE_INT: u8 = 2;
pub const DE_TYPE_UUID: u8 = 3;
pub const DE_TYPE_TEXT: u8 = 4;
pub const DE_TYPE_BOOL: u8 = 5;
pub const DE_TYPE_SEQUENCE: u8 = 6;
pub const DE_TYPE_ALTERNATIVE: u8 = 7;
pub const DE_TYPE_URL: u8 = 8;

// Data element size classes (lower three bits)
pub const DE_SIZE_1: u8 = 0;
pub const DE_SIZE_2: u8 = 1;
pub const DE_SIZE_4: u8 = 2;
pub const DE_SIZE_8: u8 = 3;
pub const DE_SIZE_16: u8 = 4;
pub const DE_SIZE_IN_NEXT_BYTE: u8 = 5;
pub const DE_SIZE_IN_NEXT_WORD: u8 = 6;
pub const DE_SIZE_IN_NEXT_LONG: u8 = 7;

pub const DE_SIZE_MASK: u8 = 0x07;
pub const DE_TYPE_SHIFT: u8 = 3;

// Universal attribute IDs
pub const ATTR_ID_SERVICE_RECORD_HANDLE: u16 = 0x0000;
pub const ATTR_ID_SERVICE_CLASS_ID_LIST: u16 = 0x0001;
pub const ATTR_ID_SERVICE_RECORD_STATE: u16 = 0x0002;
pub const ATTR_ID_SERVICE_ID: u16 = 0x0003;
pub const ATTR_ID_PROTOCOL_DESC_LIST: u16 = 0x0004;
pub const ATTR_ID_BROWSE_GROUP_LIST: u16 = 0x0005;
pub const ATTR_ID_LANGUAGE_BASE_ATTR_ID_LIST: u16 = 0x0006;
pub const ATTR_ID_SERVICE_INFO_TIME_TO_LIVE: u16 = 0x0007;
pub const ATTR_ID_SERVICE_AVAILABILITY: u16 = 0x0008;
pub const ATTR_ID_BT_PROFILE_DESC_LIST: u16 = 0x0009;
pub const ATTR_ID_DOCUMENTATION_URL: u16 = 0x000A;
pub const ATTR_ID_CLIENT_EXE_URL: u16 = 0x000B;
pub const ATTR_ID_ICON_URL: u16 = 0x000C;
pub const ATTR_ID_ADDITION_PROTO_DESC_LISTS: u16 = 0x000D;
pub const ATTR_ID_SERVICE_NAME: u16 = 0x0100;
pub const ATTR_ID_SERVICE_DESCRIPTION: u16 = 0x0101;
pub const ATTR_ID_PROVIDER_NAME: u16 = 0x0102;

// Device Identification attribute IDs
pub const ATTR_ID_SPECIFICATION_ID: u16 = 0x0200;
pub const ATTR_ID_VENDOR_ID: u16 = 0x0201;
pub const ATTR_ID_PRODUCT_ID: u16 = 0x0202;
pub const ATTR_ID_PRODUCT_VERSION: u16 = 0x0203;
pub const ATTR_ID_PRIMARY_RECORD: u16 = 0x0204;
pub const ATTR_ID_VENDOR_ID_SOURCE: u16 = 0x0205;

// Well-known UUIDs used by the record helpers
pub const UUID_PROTOCOL_SDP: u16 = 0x0001;
pub const UUID_PROTOCOL_RFCOMM: u16 = 0x0003;
pub const UUID_PROTOCOL_L2CAP: u16 = 0x0100;
pub const UUID_SERVCLASS_SDP_SERVER: u16 = 0x1000;
pub const UUID_SERVCLASS_PUBLIC_BROWSE_GROUP: u16 = 0x1002;
pub const UUID_SERVCLASS_PNP_INFORMATION: u16 = 0x1200;

/// Language base attribute ID for the primary language
pub const LANGUAGE_BASE_ID: u16 = 0x0100;

/// Device Identification specification version implemented
pub const DI_SPECIFICATION_VERSION: u16 = 0x0103;

/// Parameters carried by one protocol descriptor list element
pub const SDP_MAX_PROTOCOL_PARAMS: usize = 2;
