//! Tests for the SDP engine driven through a mock transport

#[cfg(test)]
mod tests {
    use super::super::connection::ConnectionState;
    use super::super::constants::*;
    use super::super::protocol::*;
    use super::super::*;
    use crate::address::BdAddr;
    use crate::error::{SdpError, SdpErrorCode, SdpResult, SdpStatus};
    use crate::uuid::Uuid;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    const SERIAL_PORT: u16 = 0x1101;
    const CLIENT_CID: ConnectionId = 0x0040;
    const SERVER_CID: ConnectionId = 0x0041;
    const LOCAL: BdAddr = BdAddr {
        bytes: [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13],
    };
    const REMOTE: BdAddr = BdAddr {
        bytes: [0x00, 0x1B, 0xDC, 0x07, 0x32, 0x8C],
    };

    // Mock transport that records everything the engine hands it
    struct MockTransport {
        next_id: ConnectionId,
        mtu: Option<u16>,
        sent: Vec<(ConnectionId, Vec<u8>)>,
        disconnects: Vec<(ConnectionId, DisconnectReason)>,
    }

    impl MockTransport {
        fn new(first_id: ConnectionId, mtu: Option<u16>) -> Self {
            Self {
                next_id: first_id,
                mtu,
                sent: Vec::new(),
                disconnects: Vec::new(),
            }
        }

        fn take_sent(&mut self) -> Vec<Vec<u8>> {
            self.sent.drain(..).map(|(_, pdu)| pdu).collect()
        }
    }

    impl SdpTransport for MockTransport {
        fn connect(&mut self, _addr: BdAddr) -> SdpResult<ConnectionId> {
            let id = self.next_id;
            self.next_id += 1;
            Ok(id)
        }

        fn configure_mtu(&mut self, _id: ConnectionId, _proposed: u16) -> SdpResult<Option<u16>> {
            Ok(self.mtu)
        }

        fn send_pdu(&mut self, id: ConnectionId, pdu: &[u8]) -> SdpResult<()> {
            self.sent.push((id, pdu.to_vec()));
            Ok(())
        }

        fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) -> SdpResult<()> {
            self.disconnects.push((id, reason));
            Ok(())
        }
    }

    type Outcome = Arc<Mutex<Vec<(SdpStatus, DiscoveryDatabase)>>>;

    fn recorder(outcome: &Outcome) -> DiscoveryCallback {
        let sink = outcome.clone();
        Box::new(move |status, db| sink.lock().unwrap().push((status, db)))
    }

    fn discovery_db() -> DiscoveryDatabase {
        DiscoveryDatabase::new(8192, &[Uuid::from_u16(SERIAL_PORT)], &[]).unwrap()
    }

    /// Database holding one serial port record whose name is `name_len` bytes
    fn database_with_name(name_len: usize) -> (SharedDatabase, RecordHandle, Vec<u8>) {
        let limits = DatabaseLimits {
            max_pad_len: 8192,
            max_attribute_len: 8192,
            ..DatabaseLimits::default()
        };
        let name = vec![b'n'; name_len];
        let mut db = ServiceDatabase::new(limits);
        let handle = db.create_record().unwrap();
        db.add_service_class_id_list(handle, &[Uuid::from_u16(SERIAL_PORT)])
            .unwrap();
        db.add_attribute(handle, ATTR_ID_SERVICE_NAME, AttributeType::Text, &name)
            .unwrap();
        (SharedDatabase::new(db), handle, name)
    }

    fn services_database(services: &[u16]) -> SharedDatabase {
        let database = SharedDatabase::default();
        {
            let mut db = database.write().unwrap();
            for &uuid in services {
                let handle = db.create_record().unwrap();
                db.add_service_class_id_list(handle, &[Uuid::from_u16(uuid)])
                    .unwrap();
                db.add_service_name(handle, "Serial Port over loopback").unwrap();
            }
        }
        database
    }

    fn server_manager(database: SharedDatabase, mtu: u16) -> SdpManager<MockTransport> {
        let mut manager = SdpManager::new(
            MockTransport::new(0, Some(mtu)),
            database,
            SdpConfig::default(),
        );
        manager.on_incoming_connection(SERVER_CID, REMOTE).unwrap();
        manager
    }

    fn client_manager(mtu: Option<u16>) -> SdpManager<MockTransport> {
        client_manager_with(mtu, SdpConfig::default())
    }

    fn client_manager_with(mtu: Option<u16>, config: SdpConfig) -> SdpManager<MockTransport> {
        SdpManager::new(
            MockTransport::new(CLIENT_CID, mtu),
            SharedDatabase::default(),
            config,
        )
    }

    /// Send one request to the server side and decode the single reply
    fn exchange(manager: &mut SdpManager<MockTransport>, request: &SdpRequest, tid: u16) -> SdpResponse {
        let bytes = request.to_packet(tid).unwrap().serialize();
        manager.on_data_received(SERVER_CID, &bytes).unwrap();
        let mut sent = manager.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        let packet = SdpPacket::deserialize(&sent.remove(0)).unwrap();
        assert_eq!(packet.transaction_id, tid);
        SdpResponse::parse(&packet).unwrap()
    }

    fn name_request(handle: RecordHandle, max_byte_count: u16, continuation: ContinuationToken) -> SdpRequest {
        SdpRequest::ServiceAttribute(ServiceAttributeRequest {
            handle,
            max_byte_count,
            ranges: vec![AttributeRange::single(ATTR_ID_SERVICE_NAME)],
            continuation,
        })
    }

    /// Collect every fragment of a service attribute answer
    fn fetch_name(manager: &mut SdpManager<MockTransport>, handle: RecordHandle, budget: u16) -> Vec<Vec<u8>> {
        let mut continuation = ContinuationToken::none();
        let mut fragments = Vec::new();
        for tid in 1..=16 {
            match exchange(manager, &name_request(handle, budget, continuation), tid) {
                SdpResponse::ServiceAttribute(rsp) => {
                    fragments.push(rsp.attribute_bytes);
                    if rsp.continuation.is_empty() {
                        return fragments;
                    }
                    continuation = rsp.continuation;
                }
                other => panic!("unexpected response {:?}", other),
            }
        }
        panic!("answer never completed");
    }

    #[test]
    fn test_attribute_answer_fragments_to_budget() {
        let (database, handle, name) = database_with_name(4991);
        let mut server = server_manager(database, 1024);

        let fragments = fetch_name(&mut server, handle, 1000);
        assert_eq!(fragments.len(), 5);
        assert!(fragments.iter().all(|fragment| fragment.len() == 1000));

        // Sequence header, attribute ID, text header, then the value
        let answer = fragments.concat();
        assert_eq!(
            &answer[..9],
            &[0x36, 0x13, 0x85, 0x09, 0x01, 0x00, 0x26, 0x13, 0x7F]
        );
        assert_eq!(&answer[9..], &name[..]);
        assert!(server.connections().find(SERVER_CID).is_some());
    }

    #[test]
    fn test_large_attribute_splits_in_two() {
        let (database, handle, name) = database_with_name(1500);
        let mut server = server_manager(database, 1024);

        let fragments = fetch_name(&mut server, handle, 1000);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].len(), 1000);
        assert_eq!(fragments[1].len(), 509);
        assert_eq!(&fragments.concat()[9..], &name[..]);
    }

    #[test]
    fn test_search_attribute_no_progress_after_delete() {
        let (database, handle, _) = database_with_name(200);
        let mut server = server_manager(database.clone(), 48);

        let request = |continuation| {
            SdpRequest::ServiceSearchAttribute(ServiceSearchAttributeRequest {
                uuids: vec![Uuid::from_u16(SERIAL_PORT)],
                max_byte_count: 0xFFFF,
                ranges: vec![AttributeRange::all()],
                continuation,
            })
        };

        let continuation = match exchange(&mut server, &request(ContinuationToken::none()), 1) {
            SdpResponse::ServiceSearchAttribute(rsp) => {
                assert_eq!(rsp.attribute_bytes.len(), 38);
                rsp.continuation
            }
            other => panic!("unexpected response {:?}", other),
        };
        assert!(!continuation.is_empty());

        database.write().unwrap().delete_record(handle).unwrap();

        match exchange(&mut server, &request(continuation), 2) {
            SdpResponse::Error(rsp) => assert_eq!(rsp.code, SdpErrorCode::InvalidContinuationState),
            other => panic!("unexpected response {:?}", other),
        }
        assert_eq!(
            server.transport().disconnects,
            vec![(SERVER_CID, DisconnectReason::ProtocolError)]
        );
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_stale_continuation_releases_connection() {
        let (database, handle, _) = database_with_name(10);
        let mut server = server_manager(database, 672);

        let request = name_request(handle, 100, ContinuationToken::from_offset(5));
        match exchange(&mut server, &request, 3) {
            SdpResponse::Error(rsp) => assert_eq!(rsp.code, SdpErrorCode::InvalidContinuationState),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_bad_syntax_keeps_connection() {
        let (database, _, _) = database_with_name(10);
        let mut server = server_manager(database, 672);

        // Service search request with an empty UUID pattern
        let bytes = [0x02, 0x00, 0x05, 0x00, 0x05, 0x35, 0x00, 0x00, 0x10, 0x00];
        server.on_data_received(SERVER_CID, &bytes).unwrap();
        let sent = server.transport_mut().take_sent();
        let packet = SdpPacket::deserialize(&sent[0]).unwrap();
        assert_eq!(packet.pdu_id, SdpPdu::ErrorResponse);
        assert_eq!(packet.transaction_id, 5);
        assert!(server.connections().find(SERVER_CID).is_some());
        assert!(server.transport().disconnects.is_empty());
    }

    struct Loopback {
        client: SdpManager<MockTransport>,
        server: SdpManager<MockTransport>,
    }

    impl Loopback {
        fn new(services: &[u16], mtu: u16) -> Self {
            Self::with(services_database(services), mtu, SdpConfig::default())
        }

        fn with(database: SharedDatabase, mtu: u16, client_config: SdpConfig) -> Self {
            Self {
                client: client_manager_with(Some(mtu), client_config),
                server: server_manager(database, mtu),
            }
        }

        /// Shuttle PDUs between the two managers until the client goes quiet.
        /// Returns the number of requests carried.
        fn pump(&mut self) -> usize {
            let mut requests = 0;
            loop {
                let outgoing = self.client.transport_mut().take_sent();
                if outgoing.is_empty() {
                    return requests;
                }
                for pdu in outgoing {
                    requests += 1;
                    self.server.on_data_received(SERVER_CID, &pdu).unwrap();
                }
                for pdu in self.server.transport_mut().take_sent() {
                    self.client.on_data_received(CLIENT_CID, &pdu).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_two_phase_discovery_over_loopback() {
        let mut link = Loopback::new(&[SERIAL_PORT, 0x110A, SERIAL_PORT], 48);
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap();
        assert_eq!(id, CLIENT_CID);
        link.client.on_connected(id).unwrap();

        let requests = link.pump();
        assert!(requests > 3);

        let results = outcome.lock().unwrap();
        assert_eq!(results.len(), 1);
        let (status, db) = &results[0];
        assert_eq!(*status, SdpStatus::Success);
        assert_eq!(db.record_count(), 2);
        for (index, record) in db.records() {
            assert_eq!(record.peer, LOCAL);
            let name = db.find_attribute_in_record(index, ATTR_ID_SERVICE_NAME).unwrap();
            assert_eq!(name.as_text(), Some(&b"Serial Port over loopback"[..]));
        }

        assert!(link.client.connections().is_empty());
        assert_eq!(
            link.client.transport().disconnects,
            vec![(CLIENT_CID, DisconnectReason::Normal)]
        );
        // The server keeps its side open until the peer hangs up
        assert!(link.server.connections().find(SERVER_CID).is_some());
    }

    #[test]
    fn test_combined_discovery_over_loopback() {
        let mut link = Loopback::new(&[SERIAL_PORT, SERIAL_PORT], 64);
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::Combined, discovery_db(), recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();
        link.pump();

        let results = outcome.lock().unwrap();
        assert_eq!(results[0].0, SdpStatus::Success);
        assert_eq!(results[0].1.record_count(), 2);
        assert_eq!(
            results[0].1.find_service_in_db(&Uuid::from_u16(SERIAL_PORT), None),
            Some(0)
        );
    }

    #[test]
    fn test_discovery_without_matches() {
        let mut link = Loopback::new(&[0x110A], 672);
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();
        assert_eq!(link.pump(), 1);

        let results = outcome.lock().unwrap();
        assert_eq!(results[0].0, SdpStatus::NoRecordsMatch);
        assert!(results[0].1.is_empty());
    }

    fn name_only_db() -> DiscoveryDatabase {
        DiscoveryDatabase::new(
            8192,
            &[Uuid::from_u16(SERIAL_PORT)],
            &[AttributeRange::single(ATTR_ID_SERVICE_NAME)],
        )
        .unwrap()
        .with_raw_capture(8192)
    }

    #[test]
    fn test_client_reassembles_large_answer() {
        let (database, _, name) = database_with_name(4991);
        let config = SdpConfig {
            max_list_byte_count: 8192,
            ..SdpConfig::default()
        };
        let mut link = Loopback::with(database, 1024, config);
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::TwoPhase, name_only_db(), recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();

        // One search, then five attribute rounds of at most 1014 bytes
        assert_eq!(link.pump(), 6);

        let results = outcome.lock().unwrap();
        let (status, db) = &results[0];
        assert_eq!(*status, SdpStatus::Success);

        let raw = db.raw_data().unwrap();
        assert_eq!(raw.len(), 5000);
        assert_eq!(&raw[..9], &[0x36, 0x13, 0x85, 0x09, 0x01, 0x00, 0x26, 0x13, 0x7F]);
        assert_eq!(&raw[9..], &name[..]);

        let attr = db.find_attribute_in_record(0, ATTR_ID_SERVICE_NAME).unwrap();
        assert_eq!(attr.as_text(), Some(&name[..]));
    }

    #[test]
    fn test_default_list_limit_rejects_large_answer() {
        let (database, _, _) = database_with_name(4991);
        let mut link = Loopback::with(database, 1024, SdpConfig::default());
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::TwoPhase, name_only_db(), recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();
        link.pump();

        let results = outcome.lock().unwrap();
        assert_eq!(results[0].0, SdpStatus::InvalidPdu);
        assert!(results[0].1.is_empty());
        assert_eq!(
            link.client.transport().disconnects,
            vec![(CLIENT_CID, DisconnectReason::ProtocolError)]
        );
    }

    #[test]
    fn test_discovery_database_full() {
        let mut link = Loopback::new(&[SERIAL_PORT, SERIAL_PORT], 672);
        let outcome = Outcome::default();

        // Too small for even one record
        let filter = DiscoveryDatabase::new(40, &[Uuid::from_u16(SERIAL_PORT)], &[]).unwrap();
        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::Combined, filter, recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();
        link.pump();

        let results = outcome.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, SdpStatus::DatabaseFull);
        assert!(results[0].1.is_empty());
        assert_eq!(results[0].1.memory_used(), 0);
        assert_eq!(
            link.client.transport().disconnects,
            vec![(CLIENT_CID, DisconnectReason::ProtocolError)]
        );
    }

    #[test]
    fn test_cancel_after_completion() {
        let mut link = Loopback::new(&[SERIAL_PORT], 672);
        let outcome = Outcome::default();

        let id = link
            .client
            .start_discovery(LOCAL, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap();
        link.client.on_connected(id).unwrap();
        link.pump();
        assert_eq!(outcome.lock().unwrap()[0].0, SdpStatus::Success);

        link.client.cancel_discovery(id);
        link.client.on_disconnected(id, DisconnectReason::Normal);

        assert_eq!(outcome.lock().unwrap().len(), 1);
        assert_eq!(
            link.client.transport().disconnects,
            vec![(CLIENT_CID, DisconnectReason::Normal)]
        );
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut client = client_manager(Some(672));
        let outcome = Outcome::default();

        let id = client
            .start_discovery(REMOTE, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap();
        client.on_connected(id).unwrap();
        assert_eq!(client.transport_mut().take_sent().len(), 1);

        client.cancel_discovery(id);
        client.cancel_discovery(id);
        client.on_disconnected(id, DisconnectReason::Normal);

        let results = outcome.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, SdpStatus::Cancelled);
        assert_eq!(
            client.transport().disconnects,
            vec![(id, DisconnectReason::Cancelled)]
        );
        assert!(client.connections().is_empty());
    }

    #[test]
    fn test_deferred_configuration() {
        let mut client = client_manager(None);
        let outcome = Outcome::default();

        let id = client
            .start_discovery(REMOTE, DiscoveryMode::Combined, discovery_db(), recorder(&outcome))
            .unwrap();
        client.on_connected(id).unwrap();
        assert!(client.transport().sent.is_empty());

        client.on_configured(id, 48).unwrap();
        let sent = client.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], SdpPdu::ServiceSearchAttributeRequest as u8);

        let ccb = client.connections().find(id).unwrap();
        assert_eq!(ccb.mtu, 48);
        assert!(outcome.lock().unwrap().is_empty());
    }

    #[test]
    fn test_connection_state_progression() {
        let mut client = client_manager(None);
        let id = client
            .start_discovery(REMOTE, DiscoveryMode::Combined, discovery_db(), recorder(&Outcome::default()))
            .unwrap();
        assert_eq!(client.connections().find(id).unwrap().state, ConnectionState::Connecting);
        assert!(matches!(client.on_configured(id, 48), Err(SdpError::InvalidState)));

        client.on_connected(id).unwrap();
        assert_eq!(client.connections().find(id).unwrap().state, ConnectionState::Configuring);
        assert!(matches!(client.on_connected(id), Err(SdpError::InvalidState)));

        client.on_configured(id, 48).unwrap();
        assert_eq!(client.connections().find(id).unwrap().state, ConnectionState::Open);

        // Teardown removes the block
        client.cancel_discovery(id);
        assert!(client.connections().find(id).is_none());
    }

    #[test]
    fn test_client_round_timeout() {
        let mut client = client_manager(Some(672));
        let outcome = Outcome::default();

        let id = client
            .start_discovery(REMOTE, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap();
        client.on_connected(id).unwrap();

        client.check_timeouts(Instant::now());
        assert!(outcome.lock().unwrap().is_empty());

        client.check_timeouts(Instant::now() + Duration::from_secs(31));
        assert_eq!(outcome.lock().unwrap()[0].0, SdpStatus::Timeout);
        assert_eq!(
            client.transport().disconnects,
            vec![(id, DisconnectReason::Timeout)]
        );
    }

    #[test]
    fn test_server_inactivity_timeout() {
        let mut server = server_manager(services_database(&[SERIAL_PORT]), 672);
        server.check_timeouts(Instant::now() + Duration::from_secs(31));

        assert!(server.connections().is_empty());
        assert_eq!(
            server.transport().disconnects,
            vec![(SERVER_CID, DisconnectReason::Timeout)]
        );
    }

    #[test]
    fn test_peer_disconnect_reports_reason() {
        for (reason, expected) in [
            (DisconnectReason::Normal, SdpStatus::ConnectionFailed),
            (DisconnectReason::SecurityFailure, SdpStatus::SecurityError),
            (DisconnectReason::ConnectionRejected, SdpStatus::ConnectionRejected),
        ] {
            let mut client = client_manager(Some(672));
            let outcome = Outcome::default();
            let id = client
                .start_discovery(REMOTE, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
                .unwrap();

            client.on_disconnected(id, reason);
            assert_eq!(outcome.lock().unwrap()[0].0, expected);
            assert!(client.transport().disconnects.is_empty());
        }
    }

    #[test]
    fn test_connection_limit() {
        let config = SdpConfig {
            max_connections: 1,
            ..SdpConfig::default()
        };
        let mut manager = SdpManager::new(
            MockTransport::new(CLIENT_CID, Some(672)),
            services_database(&[SERIAL_PORT]),
            config,
        );
        manager.on_incoming_connection(SERVER_CID, REMOTE).unwrap();

        let err = manager.on_incoming_connection(0x0042, REMOTE).unwrap_err();
        assert!(matches!(err, SdpError::NoResources));
        assert_eq!(
            manager.transport().disconnects,
            vec![(0x0042, DisconnectReason::NoResources)]
        );

        let outcome = Outcome::default();
        let err = manager
            .start_discovery(REMOTE, DiscoveryMode::TwoPhase, discovery_db(), recorder(&outcome))
            .unwrap_err();
        assert!(matches!(err, SdpError::NoResources));
        assert!(outcome.lock().unwrap().is_empty());
    }

    #[test]
    fn test_events_for_unknown_connection() {
        let mut client = client_manager(Some(672));
        assert!(matches!(
            client.on_data_received(0x0099, &[0x03, 0x00, 0x01, 0x00, 0x00]),
            Err(SdpError::ConnectionNotFound(0x0099))
        ));
        assert!(matches!(
            client.on_connected(0x0099),
            Err(SdpError::ConnectionNotFound(0x0099))
        ));
        client.on_disconnected(0x0099, DisconnectReason::Normal);
        client.cancel_discovery(0x0099);
        assert!(client.transport().disconnects.is_empty());
    }
}
