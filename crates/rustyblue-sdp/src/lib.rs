//! RustyBlue SDP - Bluetooth Service Discovery Protocol engine
//!
//! This library keeps a local database of service records, answers remote
//! service discovery requests against it, and discovers the records of
//! remote devices. It runs over any connection-oriented PDU transport that
//! implements [`sdp::SdpTransport`].

pub mod address;
pub mod error;
pub mod sdp;
pub mod uuid;

// Re-export common types for convenience
pub use address::BdAddr;
pub use error::{SdpError, SdpErrorCode, SdpResult, SdpStatus};
pub use sdp::{
    DataElement, DiRecord, DiscoveryDatabase, DiscoveryMode, SdpConfig, SdpManager, SdpServer,
    SdpTransport, ServiceDatabase, ServiceRecord, SharedDatabase,
};
pub use uuid::Uuid;
