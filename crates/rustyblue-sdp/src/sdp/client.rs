//! SDP discovery engine
//!
//! A [`DiscoverySession`] drives the request sequence of one discovery against
//! a remote server and fills a [`DiscoveryDatabase`] from the reassembled
//! answers. It never touches the transport itself: each step returns the
//! next request for the owner to send, or the final status.
use super::codec::{read_element_header, read_raw_element, enter_sequence};
use super::constants::*;
use super::discovery_db::DiscoveryDatabase;
use super::protocol::{
    AttributeListResponse, ContinuationToken, SdpPacket, SdpRequest, SdpResponse,
    ServiceAttributeRequest, ServiceSearchAttributeRequest, ServiceSearchRequest,
    ServiceSearchResponse, MIN_ATTRIBUTE_BYTE_COUNT,
};
use super::types::{AttributeType, RecordHandle, SdpPdu};
use super::SdpConfig;
use crate::address::BdAddr;
use crate::error::{SdpError, SdpResult, SdpStatus};
use log::{debug, error, info, warn};
use std::fmt;

/// How records are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Service search for handles, then one attribute exchange per handle
    TwoPhase,
    /// A single service search attribute exchange
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    Connecting,
    ServiceSearch,
    ServiceAttribute { index: usize },
    SearchAttribute,
    Complete,
}

/// Completion handler, invoked exactly once per session
pub type DiscoveryCallback = Box<dyn FnOnce(SdpStatus, DiscoveryDatabase) + Send>;

/// What the owner of a session does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStep {
    Send(SdpRequest),
    Finished(SdpStatus),
}

/// Client half of one connection
pub struct DiscoverySession {
    peer: BdAddr,
    mode: DiscoveryMode,
    phase: DiscoveryPhase,
    database: Option<DiscoveryDatabase>,
    callback: Option<DiscoveryCallback>,
    handles: Vec<RecordHandle>,
    accumulator: Vec<u8>,
    outstanding: Option<(u16, SdpPdu)>,
    max_records: usize,
    max_list_byte_count: usize,
    max_byte_count: u16,
}

impl fmt::Debug for DiscoverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("peer", &self.peer)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .field("handles", &self.handles)
            .field("accumulated", &self.accumulator.len())
            .field("outstanding", &self.outstanding)
            .field("callback_pending", &self.callback.is_some())
            .finish()
    }
}

/// The accumulated stream must be exactly one sequence
fn check_top_level_length(stream: &[u8]) -> SdpResult<()> {
    match read_element_header(stream, 0, stream.len()) {
        Ok(header)
            if header.attr_type == AttributeType::Sequence && header.total_len() == stream.len() =>
        {
            Ok(())
        }
        Ok(header) => {
            warn!(
                "Reassembled {:?} declares {} bytes but {} were received",
                header.attr_type,
                header.total_len(),
                stream.len()
            );
            Err(SdpError::InvalidContinuationState)
        }
        Err(SdpError::MalformedPdu(msg)) => {
            warn!("Reassembled attribute stream is incomplete: {}", msg);
            Err(SdpError::InvalidContinuationState)
        }
        Err(e) => Err(e),
    }
}

impl DiscoverySession {
    pub fn new(
        peer: BdAddr,
        mode: DiscoveryMode,
        database: DiscoveryDatabase,
        callback: DiscoveryCallback,
        config: &SdpConfig,
    ) -> SdpResult<Self> {
        if database.uuid_filters().len() > config.max_uuid_filters {
            return Err(SdpError::TooManyFilters(database.uuid_filters().len()));
        }
        if database.attr_filters().len() > config.max_attr_filters {
            return Err(SdpError::TooManyFilters(database.attr_filters().len()));
        }

        Ok(Self {
            peer,
            mode,
            phase: DiscoveryPhase::Connecting,
            database: Some(database.with_max_depth(config.max_nesting_depth)),
            callback: Some(callback),
            handles: Vec::new(),
            accumulator: Vec::new(),
            outstanding: None,
            max_records: config.max_disc_server_records,
            max_list_byte_count: config.max_list_byte_count,
            max_byte_count: MIN_ATTRIBUTE_BYTE_COUNT,
        })
    }

    pub fn peer(&self) -> BdAddr {
        self.peer
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == DiscoveryPhase::Complete
    }

    /// Handles collected by the service search phase
    pub fn handles(&self) -> &[RecordHandle] {
        &self.handles
    }

    fn database(&self) -> SdpResult<&DiscoveryDatabase> {
        self.database.as_ref().ok_or(SdpError::InvalidState)
    }

    fn database_mut(&mut self) -> SdpResult<&mut DiscoveryDatabase> {
        self.database.as_mut().ok_or(SdpError::InvalidState)
    }

    /// Begin discovery on an open channel with the given MTU
    pub fn start(&mut self, mtu: u16) -> SdpResult<SdpRequest> {
        if self.phase != DiscoveryPhase::Connecting {
            return Err(SdpError::InvalidState);
        }
        self.max_byte_count = mtu
            .saturating_sub(SDP_MAX_ATTR_RSPHDR_LEN as u16)
            .max(MIN_ATTRIBUTE_BYTE_COUNT);

        debug!("Starting {:?} discovery of {} (MTU {})", self.mode, self.peer, mtu);
        match self.mode {
            DiscoveryMode::TwoPhase => {
                self.phase = DiscoveryPhase::ServiceSearch;
                self.search_request(ContinuationToken::none())
            }
            DiscoveryMode::Combined => {
                self.phase = DiscoveryPhase::SearchAttribute;
                self.search_attribute_request(ContinuationToken::none())
            }
        }
    }

    /// Serialize `request` and remember it as the outstanding one
    pub fn issue(&mut self, request: &SdpRequest, transaction_id: u16) -> SdpResult<Vec<u8>> {
        let packet = request.to_packet(transaction_id)?;
        let expected = request
            .pdu_id()
            .response_kind()
            .ok_or(SdpError::InvalidState)?;
        self.outstanding = Some((transaction_id, expected));
        Ok(packet.serialize())
    }

    fn search_request(&self, continuation: ContinuationToken) -> SdpResult<SdpRequest> {
        Ok(SdpRequest::ServiceSearch(ServiceSearchRequest {
            uuids: self.database()?.uuid_filters().to_vec(),
            max_records: u16::try_from(self.max_records).unwrap_or(u16::MAX),
            continuation,
        }))
    }

    fn attribute_request(
        &self,
        handle: RecordHandle,
        continuation: ContinuationToken,
    ) -> SdpResult<SdpRequest> {
        Ok(SdpRequest::ServiceAttribute(ServiceAttributeRequest {
            handle,
            max_byte_count: self.max_byte_count,
            ranges: self.database()?.attr_filters().to_vec(),
            continuation,
        }))
    }

    fn search_attribute_request(&self, continuation: ContinuationToken) -> SdpResult<SdpRequest> {
        let database = self.database()?;
        Ok(SdpRequest::ServiceSearchAttribute(ServiceSearchAttributeRequest {
            uuids: database.uuid_filters().to_vec(),
            max_byte_count: self.max_byte_count,
            ranges: database.attr_filters().to_vec(),
            continuation,
        }))
    }

    /// Consume one response PDU
    pub fn on_response(&mut self, data: &[u8]) -> SdpResult<DiscoveryStep> {
        let packet = SdpPacket::deserialize(data)?;
        let (transaction_id, expected) = self
            .outstanding
            .take()
            .ok_or_else(|| SdpError::UnexpectedResponse("no request outstanding".into()))?;

        if packet.transaction_id != transaction_id {
            return Err(SdpError::UnexpectedResponse(format!(
                "transaction ID {} while waiting for {}",
                packet.transaction_id, transaction_id
            )));
        }

        let response = SdpResponse::parse(&packet)?;
        if let SdpResponse::Error(err) = &response {
            warn!("Peer {} answered with error {:?}", self.peer, err.code);
            return Err(SdpError::Protocol(err.code));
        }
        if packet.pdu_id != expected {
            return Err(SdpError::UnexpectedResponse(format!(
                "{:?} while waiting for {:?}",
                packet.pdu_id, expected
            )));
        }

        match (self.phase, response) {
            (DiscoveryPhase::ServiceSearch, SdpResponse::ServiceSearch(rsp)) => {
                self.on_service_search(rsp)
            }
            (DiscoveryPhase::ServiceAttribute { index }, SdpResponse::ServiceAttribute(rsp)) => {
                self.on_service_attribute(index, rsp)
            }
            (DiscoveryPhase::SearchAttribute, SdpResponse::ServiceSearchAttribute(rsp)) => {
                self.on_search_attribute(rsp)
            }
            _ => Err(SdpError::InvalidState),
        }
    }

    fn on_service_search(&mut self, rsp: ServiceSearchResponse) -> SdpResult<DiscoveryStep> {
        let room = self.max_records - self.handles.len();
        if rsp.handles.len() > room {
            debug!("Ignoring {} handles beyond the record cap", rsp.handles.len() - room);
        }
        self.handles.extend(rsp.handles.into_iter().take(room));

        if !rsp.continuation.is_empty() && self.handles.len() < self.max_records {
            return Ok(DiscoveryStep::Send(self.search_request(rsp.continuation)?));
        }

        debug!("Service search found {} records on {}", self.handles.len(), self.peer);
        match self.handles.first() {
            Some(&handle) => {
                self.phase = DiscoveryPhase::ServiceAttribute { index: 0 };
                Ok(DiscoveryStep::Send(
                    self.attribute_request(handle, ContinuationToken::none())?,
                ))
            }
            None => Ok(DiscoveryStep::Finished(SdpStatus::NoRecordsMatch)),
        }
    }

    fn accumulate(&mut self, bytes: &[u8]) -> SdpResult<()> {
        let total = self.accumulator.len() + bytes.len();
        if total > self.max_list_byte_count {
            warn!(
                "Attribute list from {} exceeds {} bytes",
                self.peer, self.max_list_byte_count
            );
            return Err(SdpError::InvalidPduSize {
                declared: total,
                actual: self.max_list_byte_count,
            });
        }
        self.accumulator.extend_from_slice(bytes);
        Ok(())
    }

    fn on_service_attribute(
        &mut self,
        index: usize,
        rsp: AttributeListResponse,
    ) -> SdpResult<DiscoveryStep> {
        let handle = *self.handles.get(index).ok_or(SdpError::InvalidState)?;
        self.accumulate(&rsp.attribute_bytes)?;

        if !rsp.continuation.is_empty() {
            return Ok(DiscoveryStep::Send(self.attribute_request(handle, rsp.continuation)?));
        }

        let stream = std::mem::take(&mut self.accumulator);
        check_top_level_length(&stream)?;
        let peer = self.peer;
        let database = self.database_mut()?;
        database.capture_raw(&stream);
        database.add_record_from_attribute_list(peer, &stream)?;

        match self.handles.get(index + 1) {
            Some(&next) => {
                self.phase = DiscoveryPhase::ServiceAttribute { index: index + 1 };
                Ok(DiscoveryStep::Send(
                    self.attribute_request(next, ContinuationToken::none())?,
                ))
            }
            None => Ok(DiscoveryStep::Finished(SdpStatus::Success)),
        }
    }

    fn on_search_attribute(&mut self, rsp: AttributeListResponse) -> SdpResult<DiscoveryStep> {
        self.accumulate(&rsp.attribute_bytes)?;

        if !rsp.continuation.is_empty() {
            return Ok(DiscoveryStep::Send(
                self.search_attribute_request(rsp.continuation)?,
            ));
        }

        let stream = std::mem::take(&mut self.accumulator);
        check_top_level_length(&stream)?;
        let peer = self.peer;
        let max_records = self.max_records;
        let database = self.database_mut()?;
        database.capture_raw(&stream);

        let mut pos = 0;
        let end = enter_sequence(&stream, &mut pos, stream.len())?;
        let mut found = 0;
        while pos < end {
            let raw = read_raw_element(&stream, pos, end)?;
            if found < max_records {
                database.add_record_from_attribute_list(peer, &stream[pos..raw.next])?;
                found += 1;
            }
            pos = raw.next;
        }

        debug!("Service search attribute found {} records on {}", found, peer);
        if found == 0 {
            Ok(DiscoveryStep::Finished(SdpStatus::NoRecordsMatch))
        } else {
            Ok(DiscoveryStep::Finished(SdpStatus::Success))
        }
    }

    /// End the session, invoking the completion callback if it has not run yet.
    ///
    /// Returns whether the callback ran.
    pub fn complete(&mut self, status: SdpStatus) -> bool {
        self.phase = DiscoveryPhase::Complete;
        self.outstanding = None;
        self.accumulator.clear();

        match (self.callback.take(), self.database.take()) {
            (Some(callback), Some(database)) => {
                match status {
                    SdpStatus::Success | SdpStatus::NoRecordsMatch => info!(
                        "Discovery of {} finished: {:?}, {} records",
                        self.peer,
                        status,
                        database.record_count()
                    ),
                    _ => error!("Discovery of {} failed: {:?}", self.peer, status),
                }
                callback(status, database);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::database::SharedDatabase;
    use crate::sdp::server::{SdpServer, ServerSession};
    use crate::sdp::types::AttributeRange;
    use crate::error::SdpErrorCode;
    use crate::uuid::Uuid;
    use std::sync::{Arc, Mutex};

    const SERIAL_PORT: u16 = 0x1101;
    const PEER: BdAddr = BdAddr {
        bytes: [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13],
    };

    type Outcome = Arc<Mutex<Vec<(SdpStatus, DiscoveryDatabase)>>>;

    fn session(mode: DiscoveryMode, outcome: &Outcome) -> DiscoverySession {
        let database = DiscoveryDatabase::new(4096, &[Uuid::from_u16(SERIAL_PORT)], &[]).unwrap();
        let sink = outcome.clone();
        DiscoverySession::new(
            PEER,
            mode,
            database,
            Box::new(move |status, db| sink.lock().unwrap().push((status, db))),
            &SdpConfig::default(),
        )
        .unwrap()
    }

    fn server(services: &[u16]) -> SdpServer {
        let database = SharedDatabase::default();
        {
            let mut db = database.write().unwrap();
            for &uuid in services {
                let handle = db.create_record().unwrap();
                db.add_service_class_id_list(handle, &[Uuid::from_u16(uuid)]).unwrap();
                db.add_service_name(handle, &"serial port service ".repeat(4)).unwrap();
            }
        }
        SdpServer::new(database, SdpConfig::default())
    }

    /// Run a session against `server` until it finishes, counting round trips
    fn run(server: &SdpServer, session: &mut DiscoverySession, mtu: u16) -> (SdpStatus, usize) {
        let mut server_session = ServerSession::new(mtu);
        let mut request = session.start(mtu).unwrap();
        let mut tid = 0u16;
        let mut rounds = 0;
        loop {
            tid += 1;
            rounds += 1;
            let bytes = session.issue(&request, tid).unwrap();
            let reply = server.handle_pdu(&mut server_session, &bytes);
            let step = session
                .on_response(&reply.packet.serialize())
                .unwrap_or_else(|e| DiscoveryStep::Finished(SdpStatus::from(&e)));
            match step {
                DiscoveryStep::Send(next) => request = next,
                DiscoveryStep::Finished(status) => {
                    session.complete(status);
                    return (status, rounds);
                }
            }
        }
    }

    #[test]
    fn test_two_phase_discovery() {
        let outcome = Outcome::default();
        let server = server(&[SERIAL_PORT, 0x110A, SERIAL_PORT]);
        let mut session = session(DiscoveryMode::TwoPhase, &outcome);

        // Small MTU forces attribute continuations
        let (status, rounds) = run(&server, &mut session, 48);
        assert_eq!(status, SdpStatus::Success);
        assert!(rounds > 3);
        assert_eq!(session.handles().len(), 2);

        let results = outcome.lock().unwrap();
        assert_eq!(results.len(), 1);
        let db = &results[0].1;
        assert_eq!(db.record_count(), 2);
        for (index, record) in db.records() {
            assert_eq!(record.peer, PEER);
            assert!(db.find_attribute_in_record(index, ATTR_ID_SERVICE_NAME).is_some());
        }
        assert_eq!(db.find_service_in_db(&Uuid::from_u16(SERIAL_PORT), None), Some(0));
    }

    #[test]
    fn test_combined_discovery() {
        let outcome = Outcome::default();
        let server = server(&[SERIAL_PORT, SERIAL_PORT]);
        let mut session = session(DiscoveryMode::Combined, &outcome);

        let (status, _) = run(&server, &mut session, 64);
        assert_eq!(status, SdpStatus::Success);
        assert_eq!(outcome.lock().unwrap()[0].1.record_count(), 2);
    }

    #[test]
    fn test_no_records_match() {
        for mode in [DiscoveryMode::TwoPhase, DiscoveryMode::Combined] {
            let outcome = Outcome::default();
            let server = server(&[0x110A]);
            let mut session = session(mode, &outcome);
            let (status, rounds) = run(&server, &mut session, 672);
            assert_eq!(status, SdpStatus::NoRecordsMatch);
            assert_eq!(rounds, 1);
            assert!(outcome.lock().unwrap()[0].1.is_empty());
        }
    }

    #[test]
    fn test_response_checks() {
        let outcome = Outcome::default();
        let mut session = session(DiscoveryMode::TwoPhase, &outcome);
        let request = session.start(672).unwrap();
        session.issue(&request, 7).unwrap();

        // Wrong transaction ID
        let response = SdpResponse::ServiceSearch(ServiceSearchResponse {
            total_count: 0,
            handles: vec![],
            continuation: ContinuationToken::none(),
        });
        let bytes = response.to_packet(8).unwrap().serialize();
        let err = session.on_response(&bytes).unwrap_err();
        assert_eq!(SdpStatus::from(&err), SdpStatus::GenericError);

        // Wrong response kind
        session.issue(&request, 9).unwrap();
        let response = SdpResponse::ServiceAttribute(AttributeListResponse {
            attribute_bytes: vec![0x35, 0x00],
            continuation: ContinuationToken::none(),
        });
        let err = session
            .on_response(&response.to_packet(9).unwrap().serialize())
            .unwrap_err();
        assert!(matches!(err, SdpError::UnexpectedResponse(_)));

        // Peer error maps to its status
        session.issue(&request, 10).unwrap();
        let bytes = [0x01, 0x00, 0x0A, 0x00, 0x02, 0x00, 0x03];
        let err = session.on_response(&bytes).unwrap_err();
        assert!(matches!(err, SdpError::Protocol(SdpErrorCode::InvalidRequestSyntax)));
        assert_eq!(SdpStatus::from(&err), SdpStatus::InvalidRequestSyntax);
    }

    #[test]
    fn test_top_level_length_mismatch() {
        let outcome = Outcome::default();
        let mut session = session(DiscoveryMode::Combined, &outcome);
        let request = session.start(672).unwrap();
        session.issue(&request, 1).unwrap();

        // Declares 10 bytes of content but carries 2
        let response = SdpResponse::ServiceSearchAttribute(AttributeListResponse {
            attribute_bytes: vec![0x35, 0x0A, 0x35, 0x00],
            continuation: ContinuationToken::none(),
        });
        let err = session
            .on_response(&response.to_packet(1).unwrap().serialize())
            .unwrap_err();
        assert!(matches!(err, SdpError::InvalidContinuationState));
    }

    #[test]
    fn test_accumulator_is_bounded() {
        let outcome = Outcome::default();
        let database = DiscoveryDatabase::new(4096, &[Uuid::from_u16(SERIAL_PORT)], &[]).unwrap();
        let sink = outcome.clone();
        let config = SdpConfig {
            max_list_byte_count: 16,
            ..Default::default()
        };
        let mut session = DiscoverySession::new(
            PEER,
            DiscoveryMode::Combined,
            database,
            Box::new(move |status, db| sink.lock().unwrap().push((status, db))),
            &config,
        )
        .unwrap();

        let request = session.start(672).unwrap();
        session.issue(&request, 1).unwrap();
        let response = SdpResponse::ServiceSearchAttribute(AttributeListResponse {
            attribute_bytes: vec![0u8; 17],
            continuation: ContinuationToken::from_offset(17),
        });
        let err = session
            .on_response(&response.to_packet(1).unwrap().serialize())
            .unwrap_err();
        assert!(matches!(err, SdpError::InvalidPduSize { .. }));
    }

    #[test]
    fn test_filter_bounds() {
        let too_many: Vec<_> = (0..4).map(Uuid::from_u16).collect();
        let database = DiscoveryDatabase::new(64, &too_many, &[AttributeRange::all()]).unwrap();
        assert!(matches!(
            DiscoverySession::new(
                PEER,
                DiscoveryMode::TwoPhase,
                database,
                Box::new(|_, _| {}),
                &SdpConfig::default()
            ),
            Err(SdpError::TooManyFilters(4))
        ));
    }

    #[test]
    fn test_complete_runs_callback_once() {
        let outcome = Outcome::default();
        let mut session = session(DiscoveryMode::TwoPhase, &outcome);
        assert!(session.complete(SdpStatus::Cancelled));
        assert!(!session.complete(SdpStatus::Cancelled));
        assert!(session.is_complete());

        let results = outcome.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, SdpStatus::Cancelled);
    }
}
