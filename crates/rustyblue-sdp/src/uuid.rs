use rand::RngCore;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::ParseIntError;
use std::str::FromStr;

/// Represents a Bluetooth UUID as used by SDP.
///
/// SDP carries UUIDs on the wire as 2, 4 or 16 big-endian bytes. A 16-bit or
/// 32-bit UUID is shorthand for a 128-bit UUID built on the Bluetooth base
/// UUID, so every value is stored here in its 128-bit form (little-endian).
/// Equality between UUIDs received in different widths is therefore always
/// base-UUID-normalized.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// The base UUID "00000000-0000-1000-8000-00805F9B34FB" (little-endian representation).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value is inserted.
const BASE_OFFSET: usize = 12;

impl Uuid {
    /// Creates a new 128-bit UUID directly from 16 bytes (little-endian).
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a new 128-bit UUID directly from 16 bytes (big-endian).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid32 as u8;
        bytes[BASE_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[BASE_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[BASE_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes }
    }

    /// Tries to create a UUID from its SDP wire form.
    ///
    /// Accepts slices of length 2, 4 or 16 in big-endian order.
    /// Returns `None` if the slice length is invalid.
    pub fn try_from_slice_be(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_be_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_be_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_be(bytes))
            }
            _ => None,
        }
    }

    /// Generates a random (Version 4) UUID, e.g. for a vendor-specific service class.
    pub fn new_random_v4() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        // Standard big-endian layout: xxxxxxxx-xxxx-4xxx-axxx-xxxxxxxxxxxx
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;

        Uuid::from_bytes_be(bytes)
    }

    /// Returns the underlying 16 bytes in little-endian order.
    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Returns the underlying 16 bytes in big-endian order.
    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    /// Checks if the UUID is derived from the standard Bluetooth base UUID.
    fn is_sig_assigned(&self) -> bool {
        self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// Tries to represent the UUID as a 16-bit value.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned()
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// Tries to represent the UUID as a 32-bit value.
    pub fn as_u32(&self) -> Option<u32> {
        if self.is_sig_assigned() {
            Some(u32::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
                self.bytes[BASE_OFFSET + 2],
                self.bytes[BASE_OFFSET + 3],
            ]))
        } else {
            None
        }
    }

    /// Length of the shortest wire form that keeps the UUID's identity.
    pub fn encoded_len(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else if self.as_u32().is_some() {
            4
        } else {
            16
        }
    }

    /// Shortest big-endian wire form (2, 4 or 16 bytes).
    pub fn to_be_vec(&self) -> Vec<u8> {
        if let Some(short) = self.as_u16() {
            short.to_be_bytes().to_vec()
        } else if let Some(medium) = self.as_u32() {
            medium.to_be_bytes().to_vec()
        } else {
            self.as_bytes_be().to_vec()
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in big-endian (wire) order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::from_bytes_be(bytes)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl PartialEq<Uuid> for u16 {
    fn eq(&self, other: &Uuid) -> bool {
        other.as_u16() == Some(*self)
    }
}

impl PartialEq<u32> for Uuid {
    fn eq(&self, other: &u32) -> bool {
        self.as_u32() == Some(*other)
    }
}

impl PartialEq<Uuid> for u32 {
    fn eq(&self, other: &Uuid) -> bool {
        other.as_u32() == Some(*self)
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(f, "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(u16_val) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", u16_val)
        } else if let Some(u32_val) = self.as_u32() {
            write!(f, "Uuid(0x{:08X})", u32_val)
        } else {
            fmt::Display::fmt(self, f)
        }
    }
}

#[derive(Debug)]
pub enum UuidParseError {
    InvalidLength,
    InvalidFormat,
    HexError(hex::FromHexError),
}

impl From<hex::FromHexError> for UuidParseError {
    fn from(err: hex::FromHexError) -> Self {
        UuidParseError::HexError(err)
    }
}

impl From<ParseIntError> for UuidParseError {
    fn from(_: ParseIntError) -> Self {
        UuidParseError::InvalidFormat
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .trim_start_matches("0x")
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect();

        match cleaned.len() {
            4 => Ok(Uuid::from_u16(u16::from_str_radix(&cleaned, 16)?)),
            8 => Ok(Uuid::from_u32(u32::from_str_radix(&cleaned, 16)?)),
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_uuid_normalization() {
        let full: Uuid = "00001101-0000-1000-8000-00805f9b34fb".parse().unwrap();
        let short = Uuid::try_from_slice_be(&[0x11, 0x01]).unwrap();
        assert_eq!(full, short);
        assert_eq!(full, 0x1101u16);
        assert_eq!(full.encoded_len(), 2);
    }

    #[test]
    fn test_wire_widths() {
        let from32 = Uuid::try_from_slice_be(&[0x00, 0x00, 0x11, 0x01]).unwrap();
        assert_eq!(from32, Uuid::from_u16(0x1101));
        assert_eq!(from32.to_be_vec(), vec![0x11, 0x01]);

        let wide = Uuid::from_u32(0x0001_1101);
        assert_eq!(wide.encoded_len(), 4);
        assert_eq!(wide.to_be_vec(), vec![0x00, 0x01, 0x11, 0x01]);

        let random = Uuid::new_random_v4();
        assert_eq!(random.encoded_len(), 16);
        assert_eq!(Uuid::try_from_slice_be(&random.to_be_vec()), Some(random));

        assert!(Uuid::try_from_slice_be(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_parse_short_forms() {
        assert_eq!("0x110A".parse::<Uuid>().unwrap(), Uuid::from_u16(0x110A));
        assert_eq!("0001110A".parse::<Uuid>().unwrap(), Uuid::from_u32(0x0001_110A));
        assert!("12345".parse::<Uuid>().is_err());
    }
}
