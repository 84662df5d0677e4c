//! SDP manager
//!
//! Single entry point for transport events. Owns the connection table, routes
//! inbound PDUs to the query engine or the owning discovery session, and
//! releases connections on completion, error, cancellation or timeout.
use super::client::{DiscoveryCallback, DiscoveryMode, DiscoverySession, DiscoveryStep};
use super::connection::{ConnectionControlBlock, ConnectionRole, ConnectionState, ConnectionTable};
use super::database::SharedDatabase;
use super::discovery_db::DiscoveryDatabase;
use super::protocol::SdpRequest;
use super::server::{SdpServer, ServerReply, ServerSession};
use super::transport::{ConnectionId, DisconnectReason, SdpTransport};
use super::SdpConfig;
use crate::address::BdAddr;
use crate::error::{SdpError, SdpResult, SdpStatus};
use log::{debug, info, trace, warn};
use std::time::Instant;

enum Inbound {
    Reply(ServerReply),
    Step(SdpResult<DiscoveryStep>),
}

/// SDP engine bound to one transport
pub struct SdpManager<T: SdpTransport> {
    transport: T,
    config: SdpConfig,
    server: SdpServer,
    connections: ConnectionTable,
}

impl<T: SdpTransport> SdpManager<T> {
    pub fn new(transport: T, database: SharedDatabase, config: SdpConfig) -> Self {
        Self {
            transport,
            server: SdpServer::new(database, config.clone()),
            connections: ConnectionTable::new(config.max_connections),
            config,
        }
    }

    pub fn config(&self) -> &SdpConfig {
        &self.config
    }

    pub fn database(&self) -> &SharedDatabase {
        self.server.database()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Connect to `peer` and discover the records matching the database's filters.
    ///
    /// On success `callback` runs exactly once when the discovery ends; on
    /// error nothing was started and the callback is dropped unused.
    pub fn start_discovery(
        &mut self,
        peer: BdAddr,
        mode: DiscoveryMode,
        database: DiscoveryDatabase,
        callback: DiscoveryCallback,
    ) -> SdpResult<ConnectionId> {
        if self.connections.is_full() {
            warn!("No free SDP connection for discovery of {}", peer);
            return Err(SdpError::NoResources);
        }
        let session = DiscoverySession::new(peer, mode, database, callback, &self.config)?;
        let id = self.transport.connect(peer)?;

        let mut ccb = ConnectionControlBlock::new(
            id,
            peer,
            self.config.local_mtu,
            ConnectionRole::Client(session),
        );
        ccb.start_timer(Instant::now(), self.config.inactivity_timeout);
        if let Err(e) = self.connections.insert(ccb) {
            self.disconnect_transport(id, DisconnectReason::NoResources);
            return Err(e);
        }

        info!("Discovery of {} started on connection {}", peer, id);
        Ok(id)
    }

    /// Cancel a discovery. Cancelling a finished or unknown discovery does nothing.
    pub fn cancel_discovery(&mut self, id: ConnectionId) {
        match self.connections.find(id) {
            Some(ccb) if ccb.is_client() => {
                debug!("Cancelling discovery on connection {}", id);
                self.release(id, SdpStatus::Cancelled, Some(DisconnectReason::Cancelled));
            }
            _ => debug!("Cancel for connection {} ignored", id),
        }
    }

    /// Outgoing connection established
    pub fn on_connected(&mut self, id: ConnectionId) -> SdpResult<()> {
        let ccb = self
            .connections
            .find_mut(id)
            .ok_or(SdpError::ConnectionNotFound(id))?;
        if ccb.state != ConnectionState::Connecting {
            return Err(SdpError::InvalidState);
        }
        ccb.state = ConnectionState::Configuring;
        self.configure(id);
        Ok(())
    }

    /// A peer opened a channel to the local server
    pub fn on_incoming_connection(&mut self, id: ConnectionId, peer: BdAddr) -> SdpResult<()> {
        let session = ServerSession::new(self.config.local_mtu);
        let mut ccb =
            ConnectionControlBlock::new(id, peer, self.config.local_mtu, ConnectionRole::Server(session));
        ccb.start_timer(Instant::now(), self.config.inactivity_timeout);

        if let Err(e) = self.connections.insert(ccb) {
            warn!("Rejecting SDP connection {} from {}: {}", id, peer, e);
            self.disconnect_transport(id, DisconnectReason::NoResources);
            return Err(e);
        }
        self.configure(id);
        Ok(())
    }

    /// MTU negotiation finished (or was renegotiated)
    pub fn on_configured(&mut self, id: ConnectionId, mtu: u16) -> SdpResult<()> {
        let ccb = self
            .connections
            .find_mut(id)
            .ok_or(SdpError::ConnectionNotFound(id))?;
        let state = ccb.state;
        match state {
            ConnectionState::Configuring => self.channel_open(id, mtu),
            ConnectionState::Open => {
                debug!("Connection {} MTU now {}", id, mtu);
                ccb.set_mtu(mtu);
            }
            _ => return Err(SdpError::InvalidState),
        }
        Ok(())
    }

    /// One complete PDU arrived
    pub fn on_data_received(&mut self, id: ConnectionId, data: &[u8]) -> SdpResult<()> {
        let timeout = self.config.inactivity_timeout;
        let ccb = self
            .connections
            .find_mut(id)
            .ok_or(SdpError::ConnectionNotFound(id))?;
        if ccb.state != ConnectionState::Open {
            warn!("Dropping PDU on connection {} in state {:?}", id, ccb.state);
            return Err(SdpError::InvalidState);
        }

        let inbound = match &mut ccb.role {
            ConnectionRole::Server(session) => Inbound::Reply(self.server.handle_pdu(session, data)),
            ConnectionRole::Client(session) => {
                trace!("SDP client rx: {}", hex::encode(data));
                Inbound::Step(session.on_response(data))
            }
        };

        match inbound {
            Inbound::Reply(reply) => {
                ccb.start_timer(Instant::now(), timeout);
                let bytes = reply.packet.serialize();
                trace!("SDP server tx: {}", hex::encode(&bytes));
                if let Err(e) = self.transport.send_pdu(id, &bytes) {
                    warn!("Failed to send SDP response on connection {}: {}", id, e);
                }
                if reply.disconnect {
                    self.release(id, SdpStatus::GenericError, Some(DisconnectReason::ProtocolError));
                }
            }
            Inbound::Step(step) => {
                ccb.stop_timer();
                self.drive(id, step);
            }
        }
        Ok(())
    }

    /// The channel went down
    pub fn on_disconnected(&mut self, id: ConnectionId, reason: DisconnectReason) {
        if self.connections.find(id).is_none() {
            return;
        }
        // An orderly close before the exchange finished is still a failed discovery
        let status = match reason {
            DisconnectReason::Normal => SdpStatus::ConnectionFailed,
            other => other.status(),
        };
        debug!("Connection {} closed: {:?}", id, reason);
        self.release(id, status, None);
    }

    /// The connection's timer fired
    pub fn on_timer_expired(&mut self, id: ConnectionId) {
        if self.connections.find(id).is_none() {
            return;
        }
        warn!("SDP connection {} timed out", id);
        self.release(id, SdpStatus::Timeout, Some(DisconnectReason::Timeout));
    }

    /// Fire every timer that has expired at `now`
    pub fn check_timeouts(&mut self, now: Instant) {
        for id in self.connections.expired(now) {
            self.on_timer_expired(id);
        }
    }

    fn configure(&mut self, id: ConnectionId) {
        match self.transport.configure_mtu(id, self.config.local_mtu) {
            Ok(Some(mtu)) => self.channel_open(id, mtu),
            Ok(None) => debug!("Connection {} waiting for MTU negotiation", id),
            Err(e) => {
                warn!("MTU configuration failed on connection {}: {}", id, e);
                self.release(id, SdpStatus::ConfigFailed, Some(DisconnectReason::ConfigFailed));
            }
        }
    }

    fn channel_open(&mut self, id: ConnectionId, mtu: u16) {
        let timeout = self.config.inactivity_timeout;
        let Some(ccb) = self.connections.find_mut(id) else {
            return;
        };
        ccb.set_mtu(mtu);
        ccb.state = ConnectionState::Open;
        ccb.start_timer(Instant::now(), timeout);
        debug!("Connection {} to {} open, MTU {}", id, ccb.peer, mtu);

        if let ConnectionRole::Client(session) = &mut ccb.role {
            let step = session.start(mtu).map(DiscoveryStep::Send);
            self.drive(id, step);
        }
    }

    fn drive(&mut self, id: ConnectionId, step: SdpResult<DiscoveryStep>) {
        match step {
            Ok(DiscoveryStep::Send(request)) => {
                if let Err(e) = self.send_request(id, &request) {
                    warn!("Failed to send SDP request on connection {}: {}", id, e);
                    self.release(id, SdpStatus::from(&e), Some(DisconnectReason::ProtocolError));
                }
            }
            Ok(DiscoveryStep::Finished(status)) => {
                self.release(id, status, Some(DisconnectReason::Normal));
            }
            Err(e) => {
                warn!("Discovery on connection {} failed: {}", id, e);
                self.release(id, SdpStatus::from(&e), Some(DisconnectReason::ProtocolError));
            }
        }
    }

    fn send_request(&mut self, id: ConnectionId, request: &SdpRequest) -> SdpResult<()> {
        let ccb = self
            .connections
            .find_mut(id)
            .ok_or(SdpError::ConnectionNotFound(id))?;
        let transaction_id = ccb.next_transaction_id();
        let ConnectionRole::Client(session) = &mut ccb.role else {
            return Err(SdpError::InvalidState);
        };
        let bytes = session.issue(request, transaction_id)?;
        ccb.start_timer(Instant::now(), self.config.inactivity_timeout);

        trace!("SDP client tx: {}", hex::encode(&bytes));
        self.transport.send_pdu(id, &bytes)
    }

    fn disconnect_transport(&mut self, id: ConnectionId, reason: DisconnectReason) {
        if let Err(e) = self.transport.disconnect(id, reason) {
            warn!("Transport disconnect of {} failed: {}", id, e);
        }
    }

    /// Drop the connection, tell the transport when `reason` is given, and
    /// complete a discovery session with `status`.
    fn release(&mut self, id: ConnectionId, status: SdpStatus, reason: Option<DisconnectReason>) {
        let Some(mut ccb) = self.connections.remove(id) else {
            return;
        };
        if let Some(reason) = reason {
            self.disconnect_transport(id, reason);
        }
        if let ConnectionRole::Client(session) = &mut ccb.role {
            session.complete(status);
        }
        debug!("Released SDP connection {}", id);
    }
}
