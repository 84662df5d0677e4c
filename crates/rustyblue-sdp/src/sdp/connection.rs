//! Connection control blocks
use super::client::DiscoverySession;
use super::server::ServerSession;
use super::transport::ConnectionId;
use crate::address::BdAddr;
use crate::error::{SdpError, SdpResult};
use log::debug;
use std::time::{Duration, Instant};

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outgoing connect in progress
    Connecting,
    /// Waiting for MTU negotiation
    Configuring,
    /// Ready to carry PDUs
    Open,
}

/// Which engine drives the connection, with that engine's state
#[derive(Debug)]
pub enum ConnectionRole {
    Server(ServerSession),
    Client(DiscoverySession),
}

/// State of one SDP connection
#[derive(Debug)]
pub struct ConnectionControlBlock {
    pub id: ConnectionId,
    pub peer: BdAddr,
    pub state: ConnectionState,
    pub mtu: u16,
    pub role: ConnectionRole,
    transaction_id: u16,
    deadline: Option<Instant>,
}

impl ConnectionControlBlock {
    pub fn new(id: ConnectionId, peer: BdAddr, mtu: u16, role: ConnectionRole) -> Self {
        let state = match role {
            ConnectionRole::Client(_) => ConnectionState::Connecting,
            ConnectionRole::Server(_) => ConnectionState::Configuring,
        };
        Self {
            id,
            peer,
            state,
            mtu,
            role,
            transaction_id: 0,
            deadline: None,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, ConnectionRole::Client(_))
    }

    /// Transaction ID for the next outgoing request
    pub fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Arm the connection's single timer, replacing any earlier deadline
    pub fn start_timer(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    pub fn stop_timer(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timer_expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }

    /// Record the negotiated MTU; the server side follows it for fragment sizing
    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu;
        if let ConnectionRole::Server(session) = &mut self.role {
            session.set_mtu(mtu);
        }
    }
}

/// Bounded set of active connections
#[derive(Debug)]
pub struct ConnectionTable {
    max_connections: usize,
    connections: Vec<ConnectionControlBlock>,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connections: Vec::with_capacity(max_connections),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn insert(&mut self, ccb: ConnectionControlBlock) -> SdpResult<()> {
        if self.is_full() {
            return Err(SdpError::NoResources);
        }
        if self.find(ccb.id).is_some() {
            return Err(SdpError::InvalidState);
        }
        debug!("Allocated SDP connection {} to {}", ccb.id, ccb.peer);
        self.connections.push(ccb);
        Ok(())
    }

    pub fn find(&self, id: ConnectionId) -> Option<&ConnectionControlBlock> {
        self.connections.iter().find(|ccb| ccb.id == id)
    }

    pub fn find_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionControlBlock> {
        self.connections.iter_mut().find(|ccb| ccb.id == id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionControlBlock> {
        let index = self.connections.iter().position(|ccb| ccb.id == id)?;
        Some(self.connections.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionControlBlock> {
        self.connections.iter()
    }

    /// Connections whose timer has expired at `now`
    pub fn expired(&self, now: Instant) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|ccb| ccb.timer_expired(now))
            .map(|ccb| ccb.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_ccb(id: ConnectionId) -> ConnectionControlBlock {
        ConnectionControlBlock::new(id, BdAddr::default(), 48, ConnectionRole::Server(ServerSession::new(48)))
    }

    #[test]
    fn test_table_is_bounded() {
        let mut table = ConnectionTable::new(2);
        table.insert(server_ccb(0x40)).unwrap();
        assert!(matches!(table.insert(server_ccb(0x40)), Err(SdpError::InvalidState)));
        table.insert(server_ccb(0x41)).unwrap();
        assert!(matches!(table.insert(server_ccb(0x42)), Err(SdpError::NoResources)));

        assert_eq!(table.remove(0x40).unwrap().id, 0x40);
        assert!(table.find(0x40).is_none());
        table.insert(server_ccb(0x42)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_timer() {
        let mut ccb = server_ccb(0x40);
        let now = Instant::now();
        assert!(!ccb.timer_expired(now));

        ccb.start_timer(now, Duration::from_secs(30));
        assert!(!ccb.timer_expired(now + Duration::from_secs(29)));
        assert!(ccb.timer_expired(now + Duration::from_secs(30)));

        ccb.stop_timer();
        assert!(!ccb.timer_expired(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_mtu_follows_into_server_session() {
        let mut ccb = server_ccb(0x40);
        ccb.set_mtu(672);
        match &ccb.role {
            ConnectionRole::Server(session) => assert_eq!(session.mtu(), 672),
            ConnectionRole::Client(_) => unreachable!(),
        }
    }

    #[test]
    fn test_transaction_ids_advance() {
        let mut ccb = server_ccb(0x40);
        assert_eq!(ccb.next_transaction_id(), 1);
        assert_eq!(ccb.next_transaction_id(), 2);
    }
}
