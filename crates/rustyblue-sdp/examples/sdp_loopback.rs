use rustyblue_sdp::sdp::constants::*;
use rustyblue_sdp::sdp::{
    ConnectionId, DisconnectReason, DiscoveryDatabase, DiscoveryMode, ProtocolElement, SdpConfig,
    SdpManager, SdpTransport, SharedDatabase,
};
use rustyblue_sdp::{BdAddr, SdpResult, SdpStatus, Uuid};
use std::error::Error;
use std::sync::mpsc;

// Queues PDUs in memory so two managers can talk to each other
struct QueueTransport {
    next_id: ConnectionId,
    mtu: u16,
    outbox: Vec<Vec<u8>>,
}

impl QueueTransport {
    fn new(first_id: ConnectionId, mtu: u16) -> Self {
        Self {
            next_id: first_id,
            mtu,
            outbox: Vec::new(),
        }
    }
}

impl SdpTransport for QueueTransport {
    fn connect(&mut self, _addr: BdAddr) -> SdpResult<ConnectionId> {
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn configure_mtu(&mut self, _id: ConnectionId, _proposed: u16) -> SdpResult<Option<u16>> {
        Ok(Some(self.mtu))
    }

    fn send_pdu(&mut self, _id: ConnectionId, pdu: &[u8]) -> SdpResult<()> {
        self.outbox.push(pdu.to_vec());
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) -> SdpResult<()> {
        println!("Connection {} released: {:?}", id, reason);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let server_addr: BdAddr = "00:1A:7D:DA:71:13".parse()?;
    let client_addr: BdAddr = "00:1B:DC:07:32:8C".parse()?;
    let spp = Uuid::from_u16(0x1101);

    // Publish a Serial Port record on the "server" side
    let database = SharedDatabase::default();
    {
        let mut db = database.write()?;
        let handle = db.create_record()?;
        db.add_service_class_id_list(handle, &[spp])?;
        db.add_protocol_descriptor_list(
            handle,
            &[
                ProtocolElement::new(UUID_PROTOCOL_L2CAP, &[]),
                ProtocolElement::new(UUID_PROTOCOL_RFCOMM, &[3]),
            ],
        )?;
        db.add_profile_descriptor_list(handle, spp, 0x0102)?;
        db.add_service_name(handle, "Loopback Serial Port")?;
        println!("Published record 0x{:08X}", handle);
    }

    // Small MTU so the answers need continuation
    let mtu = 48;
    let mut server = SdpManager::new(QueueTransport::new(0x0041, mtu), database, SdpConfig::default());
    let mut client = SdpManager::new(
        QueueTransport::new(0x0040, mtu),
        SharedDatabase::default(),
        SdpConfig::default(),
    );

    let (tx, rx) = mpsc::channel();
    let filter = DiscoveryDatabase::new(4096, &[spp], &[])?;
    let client_cid = client.start_discovery(
        server_addr,
        DiscoveryMode::TwoPhase,
        filter,
        Box::new(move |status, db| {
            let _ = tx.send((status, db));
        }),
    )?;
    server.on_incoming_connection(0x0041, client_addr)?;
    client.on_connected(client_cid)?;

    let mut requests = 0;
    loop {
        let outgoing = std::mem::take(&mut client.transport_mut().outbox);
        if outgoing.is_empty() {
            break;
        }
        for pdu in outgoing {
            requests += 1;
            server.on_data_received(0x0041, &pdu)?;
        }
        for pdu in std::mem::take(&mut server.transport_mut().outbox) {
            client.on_data_received(client_cid, &pdu)?;
        }
    }
    println!("Discovery used {} requests", requests);

    let (status, db) = rx.recv()?;
    println!("Discovery finished: {:?}", status);
    if status != SdpStatus::Success {
        return Ok(());
    }

    let mut cursor = None;
    while let Some(record) = db.find_service_in_db(&spp, cursor) {
        if let Some(name) = db.find_attribute_in_record(record, ATTR_ID_SERVICE_NAME) {
            println!("Service: {}", String::from_utf8_lossy(name.as_text().unwrap_or_default()));
        }
        if let Some(rfcomm) = db.find_protocol_list_elem_in_record(record, UUID_PROTOCOL_RFCOMM) {
            println!("  RFCOMM channel: {:?}", rfcomm.params);
        }
        if let Some(version) = db.find_profile_version_in_record(record, &spp) {
            println!("  Profile version: 0x{:04X}", version);
        }
        cursor = Some(record);
    }

    Ok(())
}
