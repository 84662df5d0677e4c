//! SDP (Service Discovery Protocol) implementation
//!
//! This module provides the service record database and query engine that
//! answer remote discovery requests, and the discovery engine that queries
//! a remote device and collects its records.

pub mod admin;
pub mod client;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod database;
pub mod discovery_db;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use admin::{DiRecord, ProtocolElement};
pub use client::{DiscoveryCallback, DiscoveryMode, DiscoverySession};
pub use database::{DatabaseLimits, ServiceDatabase, ServiceRecord, SharedDatabase};
pub use discovery_db::{DiscoveredAttribute, DiscoveredValue, DiscoveryDatabase};
pub use manager::SdpManager;
pub use server::SdpServer;
pub use transport::{ConnectionId, DisconnectReason, SdpTransport};
pub use types::*;

/// SDP engine configuration
#[derive(Debug, Clone)]
pub struct SdpConfig {
    /// Receive MTU proposed on every channel
    pub local_mtu: u16,
    /// Simultaneous client and server connections
    pub max_connections: usize,
    /// Idle time before a connection is torn down; also bounds each discovery round
    pub inactivity_timeout: Duration,
    /// UUIDs accepted in one search pattern
    pub max_uuid_filters: usize,
    /// Attribute ranges accepted in one attribute ID list
    pub max_attr_filters: usize,
    /// Records collected by one discovery
    pub max_disc_server_records: usize,
    /// Largest reassembled attribute list a discovery accepts, 4096 bytes by
    /// default. A longer list ends the discovery with `SdpStatus::InvalidPdu`;
    /// raise this to fetch records with large attributes.
    pub max_list_byte_count: usize,
    /// Nesting bound when materializing discovered attributes
    pub max_nesting_depth: usize,
    /// Handles returned by one service search
    pub max_service_search_records: usize,
}

impl Default for SdpConfig {
    fn default() -> Self {
        Self {
            local_mtu: 672,
            max_connections: 4,
            inactivity_timeout: Duration::from_secs(30),
            max_uuid_filters: 3,
            max_attr_filters: 15,
            max_disc_server_records: 21,
            max_list_byte_count: 4096,
            max_nesting_depth: codec::DEFAULT_MAX_NESTING_DEPTH,
            max_service_search_records: 30,
        }
    }
}
