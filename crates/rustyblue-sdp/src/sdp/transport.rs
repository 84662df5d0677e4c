//! Transport collaborator interface
//!
//! The engine never frames or segments below one complete PDU; an
//! implementation of [`SdpTransport`] carries whole PDUs over a
//! connection-oriented channel (an L2CAP channel on PSM 0x0001 in practice)
//! and reports channel events back through [`super::SdpManager`].
use crate::address::BdAddr;
use crate::error::{SdpResult, SdpStatus};

/// Transport-assigned connection identifier
pub type ConnectionId = u16;

/// Why a connection went down or is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Orderly release after the exchange finished
    Normal,
    /// The peer could not be reached
    ConnectionFailed,
    /// The peer refused the channel
    ConnectionRejected,
    /// Authentication or authorization failed
    SecurityFailure,
    /// Channel configuration failed
    ConfigFailed,
    /// No activity within the allowed time
    Timeout,
    /// A protocol-state error ended the exchange
    ProtocolError,
    /// The local owner cancelled the exchange
    Cancelled,
    /// No room for another connection
    NoResources,
}

impl DisconnectReason {
    /// Completion status reported when a discovery ends for this reason
    pub fn status(&self) -> SdpStatus {
        match self {
            DisconnectReason::Normal => SdpStatus::Success,
            DisconnectReason::ConnectionFailed => SdpStatus::ConnectionFailed,
            DisconnectReason::ConnectionRejected => SdpStatus::ConnectionRejected,
            DisconnectReason::SecurityFailure => SdpStatus::SecurityError,
            DisconnectReason::ConfigFailed => SdpStatus::ConfigFailed,
            DisconnectReason::Timeout => SdpStatus::Timeout,
            DisconnectReason::ProtocolError => SdpStatus::GenericError,
            DisconnectReason::Cancelled => SdpStatus::Cancelled,
            DisconnectReason::NoResources => SdpStatus::NoResources,
        }
    }
}

/// Connection-oriented PDU transport
pub trait SdpTransport {
    /// Start an outgoing connection; `on_connected` or `on_disconnected` follows
    fn connect(&mut self, addr: BdAddr) -> SdpResult<ConnectionId>;

    /// Propose a receive MTU.
    ///
    /// Returns the negotiated MTU when it is known immediately, or `None` when
    /// it will be reported later through `on_configured`.
    fn configure_mtu(&mut self, id: ConnectionId, proposed: u16) -> SdpResult<Option<u16>>;

    /// Hand one complete PDU to the transport without blocking
    fn send_pdu(&mut self, id: ConnectionId, pdu: &[u8]) -> SdpResult<()>;

    fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) -> SdpResult<()>;
}
