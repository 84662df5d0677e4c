//! SDP query engine
//!
//! Answers the three request kinds against the shared record database. Each
//! answer is a byte stream whose total length is fixed by the first round;
//! later rounds re-read the database and resume from the position kept in
//! the connection's [`ContinuationState`].
use super::codec::{encode_raw_attribute_entry, raw_attribute_entry_len, write_element_header};
use super::constants::*;
use super::database::{ServiceDatabase, ServiceRecord, SharedDatabase};
use super::protocol::{
    AttributeListResponse, ContinuationToken, RequestLimits, SdpPacket, SdpRequest,
    SdpResponse, ServiceAttributeRequest, ServiceSearchAttributeRequest, ServiceSearchRequest,
    ServiceSearchResponse,
};
use super::types::{ranges_contain, AttributeRange, AttributeType, RecordHandle, SdpPdu};
use super::SdpConfig;
use crate::error::{SdpError, SdpErrorCode, SdpResult};
use crate::uuid::Uuid;
use log::{debug, trace, warn};

/// Position inside a piecewise byte stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    /// Piece 0 is the sequence header, piece `n` the `n - 1`th matching attribute
    pub piece: usize,
    /// Bytes of that piece already delivered
    pub offset: usize,
}

/// Where a service search attribute answer resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAttributePosition {
    /// Inside the outer sequence header
    ListHeader { offset: usize },
    /// Between records; the next one is the first match after `after`
    NextRecord { after: Option<RecordHandle> },
    /// Inside one record's attribute sequence
    Record {
        handle: RecordHandle,
        position: StreamPosition,
    },
}

/// Partial answer outstanding on one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContinuationState {
    #[default]
    Idle,
    ServiceSearch {
        cursor: Option<RecordHandle>,
        sent: usize,
        total: usize,
    },
    ServiceAttribute {
        handle: RecordHandle,
        ranges: Vec<AttributeRange>,
        position: StreamPosition,
        delivered: usize,
        total: usize,
    },
    ServiceSearchAttribute {
        list_header: Vec<u8>,
        position: SearchAttributePosition,
        delivered: usize,
        total: usize,
    },
}

/// Server half of one connection
#[derive(Debug, Clone)]
pub struct ServerSession {
    mtu: u16,
    continuation: ContinuationState,
}

impl ServerSession {
    pub fn new(mtu: u16) -> Self {
        Self {
            mtu,
            continuation: ContinuationState::Idle,
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu;
    }

    pub fn continuation(&self) -> &ContinuationState {
        &self.continuation
    }

    pub fn is_idle(&self) -> bool {
        self.continuation == ContinuationState::Idle
    }
}

/// Outcome of handling one request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub packet: SdpPacket,
    /// Release the connection once the reply is sent
    pub disconnect: bool,
}

/// Serializes the matching attributes of one record as
/// `[sequence header, entry, entry, ...]`.
fn record_pieces(record: &ServiceRecord, ranges: &[AttributeRange]) -> SdpResult<Vec<Vec<u8>>> {
    let mut entries = Vec::new();
    for attr in record.attributes().filter(|attr| ranges_contain(ranges, attr.id)) {
        let mut entry = Vec::with_capacity(raw_attribute_entry_len(attr.attr_type, attr.value.len()));
        encode_raw_attribute_entry(&mut entry, attr.id, attr.attr_type, attr.value)?;
        entries.push(entry);
    }

    let body_len = entries.iter().map(Vec::len).sum();
    let mut header = Vec::with_capacity(5);
    write_element_header(&mut header, AttributeType::Sequence, body_len)?;

    let mut pieces = Vec::with_capacity(entries.len() + 1);
    pieces.push(header);
    pieces.extend(entries);
    Ok(pieces)
}

fn pieces_len(pieces: &[Vec<u8>]) -> usize {
    pieces.iter().map(Vec::len).sum()
}

/// Copy bytes from `pieces`, starting at `position`, until `out` holds `limit`
/// bytes. Returns true once every piece has been consumed.
fn fill_from_pieces(
    pieces: &[Vec<u8>],
    position: &mut StreamPosition,
    limit: usize,
    out: &mut Vec<u8>,
) -> bool {
    while let Some(piece) = pieces.get(position.piece) {
        if out.len() >= limit {
            return false;
        }
        let start = position.offset.min(piece.len());
        let take = (piece.len() - start).min(limit - out.len());
        out.extend_from_slice(&piece[start..start + take]);

        if start + take == piece.len() {
            position.piece += 1;
            position.offset = 0;
        } else {
            position.offset = start + take;
            return false;
        }
    }
    true
}

fn expect_offset(token: &ContinuationToken, expected: usize) -> SdpResult<()> {
    let offset = token.offset()? as usize;
    if offset != expected {
        warn!(
            "Continuation offset {} does not match expected {}",
            offset, expected
        );
        return Err(SdpError::InvalidContinuationState);
    }
    Ok(())
}

fn token_for(delivered: usize) -> SdpResult<ContinuationToken> {
    let offset = u16::try_from(delivered).map_err(|_| SdpError::NoResources)?;
    Ok(ContinuationToken::from_offset(offset))
}

/// Bare error response carrying only `code`
pub(crate) fn error_packet(transaction_id: u16, code: SdpErrorCode) -> SdpPacket {
    SdpPacket::new(
        SdpPdu::ErrorResponse,
        transaction_id,
        u16::from(code).to_be_bytes().to_vec(),
    )
}

/// Query engine shared by all server connections
pub struct SdpServer {
    database: SharedDatabase,
    config: SdpConfig,
}

impl SdpServer {
    pub fn new(database: SharedDatabase, config: SdpConfig) -> Self {
        Self { database, config }
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.database
    }

    fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_uuids: self.config.max_uuid_filters,
            max_ranges: self.config.max_attr_filters,
        }
    }

    /// Handle one inbound PDU and build the reply.
    ///
    /// Every failure is turned into an error response and resets the
    /// session's continuation state.
    pub fn handle_pdu(&self, session: &mut ServerSession, data: &[u8]) -> ServerReply {
        trace!("SDP server rx: {}", hex::encode(data));

        match self.process(session, data) {
            Ok(packet) => ServerReply {
                packet,
                disconnect: false,
            },
            Err(e) => {
                session.continuation = ContinuationState::Idle;
                let code = e.to_error_code();
                warn!("SDP request failed: {} (replying {:?})", e, code);

                let transaction_id = SdpPacket::peek_transaction_id(data).unwrap_or(0);
                ServerReply {
                    packet: error_packet(transaction_id, code),
                    disconnect: e.is_protocol_state_error(),
                }
            }
        }
    }

    fn process(&self, session: &mut ServerSession, data: &[u8]) -> SdpResult<SdpPacket> {
        let packet = SdpPacket::deserialize(data)?;
        let request = SdpRequest::parse(&packet, &self.request_limits())?;

        if request.continuation().is_empty() && !session.is_idle() {
            debug!("New {:?} abandons the outstanding answer", request.pdu_id());
            session.continuation = ContinuationState::Idle;
        }

        let database = self.database.read()?;
        let response = match &request {
            SdpRequest::ServiceSearch(req) => self.service_search(&database, session, req)?,
            SdpRequest::ServiceAttribute(req) => self.service_attribute(&database, session, req)?,
            SdpRequest::ServiceSearchAttribute(req) => {
                self.service_search_attribute(&database, session, req)?
            }
        };

        response.to_packet(packet.transaction_id)
    }

    fn attribute_budget(&self, session: &ServerSession, max_byte_count: u16) -> SdpResult<usize> {
        let room = (session.mtu as usize).saturating_sub(SDP_MAX_ATTR_RSPHDR_LEN);
        let budget = room.min(max_byte_count as usize);
        if budget == 0 {
            return Err(SdpError::NoResources);
        }
        Ok(budget)
    }

    fn service_search(
        &self,
        database: &ServiceDatabase,
        session: &mut ServerSession,
        req: &ServiceSearchRequest,
    ) -> SdpResult<SdpResponse> {
        let per_pdu = (session.mtu as usize).saturating_sub(SDP_MAX_SEARCH_RSPHDR_LEN) / 4;
        if per_pdu == 0 {
            return Err(SdpError::NoResources);
        }

        let (mut cursor, sent, total) = if req.continuation.is_empty() {
            let max_records = (req.max_records as usize).min(self.config.max_service_search_records);
            let mut total = 0;
            let mut cursor = None;
            while total < max_records {
                match database.search_by_uuid_set(cursor, &req.uuids) {
                    Some(record) => {
                        cursor = Some(record.handle());
                        total += 1;
                    }
                    None => break,
                }
            }
            (None, 0, total)
        } else {
            match session.continuation {
                ContinuationState::ServiceSearch {
                    cursor,
                    sent,
                    total,
                } => {
                    expect_offset(&req.continuation, sent)?;
                    (cursor, sent, total)
                }
                _ => return Err(SdpError::InvalidContinuationState),
            }
        };

        let count = per_pdu.min(total - sent);
        let mut handles = Vec::with_capacity(count);
        while handles.len() < count {
            match database.search_by_uuid_set(cursor, &req.uuids) {
                Some(record) => {
                    cursor = Some(record.handle());
                    handles.push(record.handle());
                }
                None => break,
            }
        }

        if handles.is_empty() && sent < total {
            warn!("Service search continuation made no progress ({} of {} sent)", sent, total);
            return Err(SdpError::InvalidContinuationState);
        }

        let sent = sent + handles.len();
        let continuation = if sent < total {
            session.continuation = ContinuationState::ServiceSearch {
                cursor,
                sent,
                total,
            };
            token_for(sent)?
        } else {
            session.continuation = ContinuationState::Idle;
            ContinuationToken::none()
        };
        debug!("Service search: {} handles, {} of {} sent", handles.len(), sent, total);

        Ok(SdpResponse::ServiceSearch(ServiceSearchResponse {
            total_count: total as u16,
            handles,
            continuation,
        }))
    }

    fn service_attribute(
        &self,
        database: &ServiceDatabase,
        session: &mut ServerSession,
        req: &ServiceAttributeRequest,
    ) -> SdpResult<SdpResponse> {
        let budget = self.attribute_budget(session, req.max_byte_count)?;
        let record = database
            .find_record(req.handle)
            .ok_or(SdpError::InvalidServiceRecordHandle(req.handle))?;
        let pieces = record_pieces(record, &req.ranges)?;

        let (mut position, delivered, total) = if req.continuation.is_empty() {
            (StreamPosition::default(), 0, pieces_len(&pieces))
        } else {
            match &session.continuation {
                ContinuationState::ServiceAttribute {
                    handle,
                    ranges,
                    position,
                    delivered,
                    total,
                } if *handle == req.handle && *ranges == req.ranges => {
                    expect_offset(&req.continuation, *delivered)?;
                    (*position, *delivered, *total)
                }
                _ => return Err(SdpError::InvalidContinuationState),
            }
        };
        if total > u16::MAX as usize {
            return Err(SdpError::NoResources);
        }

        let limit = budget.min(total - delivered);
        let mut out = Vec::with_capacity(limit);
        fill_from_pieces(&pieces, &mut position, limit, &mut out);

        if out.is_empty() && delivered < total {
            warn!(
                "Attribute continuation for 0x{:08X} made no progress ({} of {} delivered)",
                req.handle, delivered, total
            );
            return Err(SdpError::InvalidContinuationState);
        }

        let delivered = delivered + out.len();
        let continuation = if delivered < total {
            session.continuation = ContinuationState::ServiceAttribute {
                handle: req.handle,
                ranges: req.ranges.clone(),
                position,
                delivered,
                total,
            };
            token_for(delivered)?
        } else {
            session.continuation = ContinuationState::Idle;
            ContinuationToken::none()
        };
        debug!(
            "Service attribute 0x{:08X}: {} bytes, {} of {} delivered",
            req.handle,
            out.len(),
            delivered,
            total
        );

        Ok(SdpResponse::ServiceAttribute(AttributeListResponse {
            attribute_bytes: out,
            continuation,
        }))
    }

    fn service_search_attribute(
        &self,
        database: &ServiceDatabase,
        session: &mut ServerSession,
        req: &ServiceSearchAttributeRequest,
    ) -> SdpResult<SdpResponse> {
        let budget = self.attribute_budget(session, req.max_byte_count)?;

        let (list_header, mut position, delivered, total) = if req.continuation.is_empty() {
            let body_len = matching_records_len(database, &req.uuids, &req.ranges)?;
            let mut list_header = Vec::with_capacity(5);
            write_element_header(&mut list_header, AttributeType::Sequence, body_len)?;
            let total = list_header.len() + body_len;
            (
                list_header,
                SearchAttributePosition::ListHeader { offset: 0 },
                0,
                total,
            )
        } else {
            match &session.continuation {
                ContinuationState::ServiceSearchAttribute {
                    list_header,
                    position,
                    delivered,
                    total,
                } => {
                    expect_offset(&req.continuation, *delivered)?;
                    (list_header.clone(), *position, *delivered, *total)
                }
                _ => return Err(SdpError::InvalidContinuationState),
            }
        };
        if total > u16::MAX as usize {
            return Err(SdpError::NoResources);
        }

        let limit = budget.min(total - delivered);
        let mut out = Vec::with_capacity(limit);
        while out.len() < limit {
            match position {
                SearchAttributePosition::ListHeader { offset } => {
                    let mut stream = StreamPosition { piece: 0, offset };
                    position = if fill_from_pieces(
                        std::slice::from_ref(&list_header),
                        &mut stream,
                        limit,
                        &mut out,
                    ) {
                        SearchAttributePosition::NextRecord { after: None }
                    } else {
                        SearchAttributePosition::ListHeader {
                            offset: stream.offset,
                        }
                    };
                }
                SearchAttributePosition::NextRecord { after } => {
                    match database.search_by_uuid_set(after, &req.uuids) {
                        Some(record) => {
                            position = SearchAttributePosition::Record {
                                handle: record.handle(),
                                position: StreamPosition::default(),
                            }
                        }
                        None => break,
                    }
                }
                SearchAttributePosition::Record {
                    handle,
                    position: mut stream,
                } => {
                    // A record deleted mid-answer leaves its remaining bytes unavailable
                    let Some(record) = database.find_record(handle) else {
                        break;
                    };
                    let pieces = record_pieces(record, &req.ranges)?;
                    position = if fill_from_pieces(&pieces, &mut stream, limit, &mut out) {
                        SearchAttributePosition::NextRecord {
                            after: Some(handle),
                        }
                    } else {
                        SearchAttributePosition::Record {
                            handle,
                            position: stream,
                        }
                    };
                }
            }
        }

        if out.is_empty() && delivered < total {
            warn!(
                "Search attribute continuation made no progress ({} of {} delivered)",
                delivered, total
            );
            return Err(SdpError::InvalidContinuationState);
        }

        let delivered = delivered + out.len();
        let continuation = if delivered < total {
            session.continuation = ContinuationState::ServiceSearchAttribute {
                list_header,
                position,
                delivered,
                total,
            };
            token_for(delivered)?
        } else {
            session.continuation = ContinuationState::Idle;
            ContinuationToken::none()
        };
        debug!(
            "Service search attribute: {} bytes, {} of {} delivered",
            out.len(),
            delivered,
            total
        );

        Ok(SdpResponse::ServiceSearchAttribute(AttributeListResponse {
            attribute_bytes: out,
            continuation,
        }))
    }
}

/// Combined length of the per-record attribute sequences of every match
fn matching_records_len(
    database: &ServiceDatabase,
    uuids: &[Uuid],
    ranges: &[AttributeRange],
) -> SdpResult<usize> {
    let mut len = 0;
    let mut cursor = None;
    while let Some(record) = database.search_by_uuid_set(cursor, uuids) {
        cursor = Some(record.handle());
        len += pieces_len(&record_pieces(record, ranges)?);
    }
    Ok(len)
}
