//! # M-Bus Session State Machine
//!
//! The master side of the request/response protocol as a pure state machine:
//! it emits the byte sequences to transmit and consumes
//! [`TransportResult`] values supplied by the transport driver. It never
//! performs I/O and owns no timers; suspension happens only at the transport
//! boundary.
//!
//! One machine instance serves one bus. At most one exchange is outstanding
//! at any time (the bus is half-duplex, single-master); starting a second
//! exchange while one is in flight is rejected. Per-address link state — the
//! frame count bit, the NKE flag and the consecutive-retry counter — lives in
//! [`SessionState`] entries keyed by primary address, created on first
//! contact.

use crate::constants::*;
use crate::error::{MBusError, SessionError};
use crate::mbus::address::{build_selection_frame, PrimaryAddress, SecondaryMask};
use crate::mbus::frame::{pack_frame, MBusFrame, MBusFrameType};
use crate::payload::record::{decode_user_data, DataRecord, VariableDataHeader};
use std::collections::HashMap;
use std::time::Duration;

/// Tunable parameters of the session machine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transmission attempts per exchange (initial send plus retries).
    pub max_retries: u8,
    /// Response window the driver should await per attempt.
    pub response_timeout: Duration,
    /// Address treated with broadcast (no reply) semantics.
    pub broadcast_address: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_retries: MBUS_MAX_RETRIES_DEFAULT,
            response_timeout: Duration::from_millis(500),
            broadcast_address: MBUS_ADDRESS_BROADCAST,
        }
    }
}

/// Per-address link state. Created on first contact, reset by SND_NKE.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionState {
    /// Frame count bit to use for the next confirmed request.
    pub fcb: bool,
    /// Whether the link has been initialized with SND_NKE (or an accepted
    /// selection, for the network layer).
    pub nke_done: bool,
    /// Consecutive failed attempts of the outstanding exchange.
    retries: u8,
}

/// States of the outstanding exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    NkeSent,
    AwaitingAck,
    RequestSent,
    AwaitingResponse,
    Error,
}

/// What the transport reported back for the last transmission.
#[derive(Debug)]
pub enum TransportResult {
    /// A complete, well-framed reply.
    Frame(MBusFrame),
    /// The response window elapsed without a frame.
    Timeout,
    /// Bytes arrived but did not frame or checksum correctly. Retried
    /// exactly like a timeout; the distinction only matters to the
    /// secondary-scan collision logic.
    Garbled(crate::error::FramingError),
}

/// The next thing the driver must do.
#[derive(Debug)]
pub enum SessionAction {
    /// Transmit these bytes and come back with a [`TransportResult`].
    Send(Vec<u8>),
    /// Transmit these bytes; no reply is expected and the exchange is done.
    SendOnly(Vec<u8>),
    /// The exchange finished successfully.
    Complete(PollResponse),
}

/// The collected result of one logical poll (one or more response frames).
#[derive(Debug, Default)]
pub struct PollResponse {
    pub header: Option<VariableDataHeader>,
    pub records: Vec<DataRecord>,
    pub manufacturer_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeKind {
    /// SND_NKE, expects an acknowledgment.
    Nke,
    /// SND_NKE if needed, then REQ_UD2 until the record chain ends.
    Poll,
    /// SND_UD slave selection, expects an acknowledgment.
    Select,
}

#[derive(Debug)]
struct Exchange {
    address: u8,
    kind: ExchangeKind,
    state: ExchangeState,
    /// Exact bytes of the last transmission, for identical retransmits.
    last_sent: Vec<u8>,
    response: PollResponse,
    /// Number of "more records follow" continuations so far.
    chain_len: usize,
}

/// The master-side session state machine of one bus.
pub struct SessionMachine {
    config: SessionConfig,
    sessions: HashMap<u8, SessionState>,
    exchange: Option<Exchange>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        SessionMachine {
            config,
            sessions: HashMap::new(),
            exchange: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// State of the outstanding exchange, `Idle` when none is in flight.
    pub fn state(&self) -> ExchangeState {
        self.exchange
            .as_ref()
            .map(|e| e.state)
            .unwrap_or(ExchangeState::Idle)
    }

    /// Link state of an address, if it has been contacted.
    pub fn session(&self, address: u8) -> Option<&SessionState> {
        self.sessions.get(&address)
    }

    fn ensure_idle(&self) -> Result<(), MBusError> {
        if self.exchange.is_some() {
            return Err(MBusError::InvalidState(
                "an exchange is already in flight on this bus".into(),
            ));
        }
        Ok(())
    }

    /// Starts a link reset (SND_NKE) exchange.
    ///
    /// A broadcast reset is fire-and-forget: no reply is expected and the
    /// link state of every address is cleared.
    pub fn start_nke(&mut self, address: PrimaryAddress) -> Result<SessionAction, MBusError> {
        self.ensure_idle()?;
        let addr = address.value();
        let bytes = pack_frame(&MBusFrame::new_short(MBUS_CONTROL_MASK_SND_NKE, addr))?;
        if addr == self.config.broadcast_address {
            self.sessions.clear();
            return Ok(SessionAction::SendOnly(bytes));
        }
        self.exchange = Some(Exchange {
            address: addr,
            kind: ExchangeKind::Nke,
            state: ExchangeState::NkeSent,
            last_sent: bytes.clone(),
            response: PollResponse::default(),
            chain_len: 0,
        });
        Ok(SessionAction::Send(bytes))
    }

    /// Starts a user-data poll. When the address has not been initialized
    /// yet, the exchange opens with SND_NKE and continues into REQ_UD2 after
    /// the acknowledgment.
    pub fn start_poll(&mut self, address: PrimaryAddress) -> Result<SessionAction, MBusError> {
        self.ensure_idle()?;
        let addr = address.value();
        if addr == self.config.broadcast_address {
            return Err(MBusError::InvalidAddress(
                "user data cannot be requested from the broadcast address".into(),
            ));
        }
        let initialized = self.sessions.get(&addr).map(|s| s.nke_done).unwrap_or(false);
        if initialized {
            return self.start_request(addr);
        }
        let bytes = pack_frame(&MBusFrame::new_short(MBUS_CONTROL_MASK_SND_NKE, addr))?;
        self.exchange = Some(Exchange {
            address: addr,
            kind: ExchangeKind::Poll,
            state: ExchangeState::NkeSent,
            last_sent: bytes.clone(),
            response: PollResponse::default(),
            chain_len: 0,
        });
        Ok(SessionAction::Send(bytes))
    }

    /// Starts a REQ_UD2 exchange without the NKE preamble. Used at the
    /// network layer after a secondary selection, where a reset would drop
    /// the selection.
    pub fn start_request(&mut self, address: u8) -> Result<SessionAction, MBusError> {
        self.ensure_idle()?;
        let bytes = self.request_bytes(address)?;
        self.exchange = Some(Exchange {
            address,
            kind: ExchangeKind::Poll,
            state: ExchangeState::RequestSent,
            last_sent: bytes.clone(),
            response: PollResponse::default(),
            chain_len: 0,
        });
        Ok(SessionAction::Send(bytes))
    }

    /// Starts a secondary-address selection (SND_UD to the network layer).
    pub fn start_select(&mut self, mask: &SecondaryMask) -> Result<SessionAction, MBusError> {
        self.ensure_idle()?;
        let fcb = self
            .sessions
            .entry(MBUS_ADDRESS_NETWORK_LAYER)
            .or_default()
            .fcb;
        let bytes = pack_frame(&build_selection_frame(mask, fcb))?;
        self.exchange = Some(Exchange {
            address: MBUS_ADDRESS_NETWORK_LAYER,
            kind: ExchangeKind::Select,
            state: ExchangeState::AwaitingAck,
            last_sent: bytes.clone(),
            response: PollResponse::default(),
            chain_len: 0,
        });
        Ok(SessionAction::Send(bytes))
    }

    /// Notes that the driver handed the request to the transport, moving
    /// `RequestSent` into the response window.
    pub fn frame_dispatched(&mut self) {
        if let Some(ex) = self.exchange.as_mut() {
            if ex.state == ExchangeState::RequestSent {
                ex.state = ExchangeState::AwaitingResponse;
            }
        }
    }

    /// Abandons the outstanding exchange from any non-terminal state.
    ///
    /// The cancelled request was not completed, so the frame count bit is
    /// preserved and the next attempt repeats it; only the retry counter and
    /// the outstanding-exchange marker are discarded.
    pub fn cancel(&mut self) {
        if let Some(ex) = self.exchange.take() {
            if let Some(session) = self.sessions.get_mut(&ex.address) {
                session.retries = 0;
            }
        }
    }

    /// Feeds the transport's verdict on the last transmission.
    pub fn handle_transport(&mut self, result: TransportResult) -> Result<SessionAction, MBusError> {
        match result {
            TransportResult::Timeout | TransportResult::Garbled(_) => self.handle_failed_attempt(),
            TransportResult::Frame(frame) => self.handle_frame(frame),
        }
    }

    /// REQ_UD2 bytes for an address, carrying its current frame count bit.
    fn request_bytes(&mut self, address: u8) -> Result<Vec<u8>, MBusError> {
        let fcb = self.sessions.entry(address).or_default().fcb;
        let mut control = MBUS_CONTROL_MASK_REQ_UD2;
        if fcb {
            control |= ControlFlags::FCB.bits();
        }
        pack_frame(&MBusFrame::new_short(control, address))
    }

    /// A timeout or garbled reply: count the attempt and either retransmit
    /// the identical frame or give up.
    fn handle_failed_attempt(&mut self) -> Result<SessionAction, MBusError> {
        let Some(mut ex) = self.exchange.take() else {
            return Err(MBusError::InvalidState(
                "transport result without an outstanding exchange".into(),
            ));
        };
        let session = self.sessions.entry(ex.address).or_default();
        session.retries += 1;
        if session.retries < self.config.max_retries {
            // Retransmit byte-identical, FCB included.
            let resend = ex.last_sent.clone();
            if ex.state == ExchangeState::AwaitingResponse {
                ex.state = ExchangeState::RequestSent;
            }
            self.exchange = Some(ex);
            return Ok(SessionAction::Send(resend));
        }
        let attempts = session.retries;
        session.retries = 0;
        Err(MBusError::Session(SessionError::NoResponse {
            address: ex.address,
            attempts,
        }))
    }

    fn handle_frame(&mut self, frame: MBusFrame) -> Result<SessionAction, MBusError> {
        let Some(mut ex) = self.exchange.take() else {
            return Err(MBusError::InvalidState(
                "transport result without an outstanding exchange".into(),
            ));
        };
        match ex.state {
            ExchangeState::NkeSent | ExchangeState::AwaitingAck => {
                if frame.frame_type != MBusFrameType::Ack {
                    self.exchange = Some(ex);
                    return self.handle_failed_attempt();
                }
                let session = self.sessions.entry(ex.address).or_default();
                session.retries = 0;
                session.nke_done = true;
                if ex.state == ExchangeState::NkeSent {
                    // Link reset: the next request starts with FCB 0.
                    session.fcb = false;
                } else {
                    // The selection was a confirmed SND_UD; toggle for the
                    // next request to the network layer.
                    session.fcb = !session.fcb;
                }
                match ex.kind {
                    ExchangeKind::Nke | ExchangeKind::Select => {
                        Ok(SessionAction::Complete(ex.response))
                    }
                    ExchangeKind::Poll => {
                        let bytes = self.request_bytes(ex.address)?;
                        ex.state = ExchangeState::RequestSent;
                        ex.last_sent = bytes.clone();
                        self.exchange = Some(ex);
                        Ok(SessionAction::Send(bytes))
                    }
                }
            }
            ExchangeState::RequestSent | ExchangeState::AwaitingResponse => {
                if !matches!(
                    frame.frame_type,
                    MBusFrameType::Long | MBusFrameType::Control
                ) {
                    self.exchange = Some(ex);
                    return self.handle_failed_attempt();
                }
                let decoded = match decode_user_data(frame.control_information, &frame.data) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        // The frame passed checksum but its payload cannot be
                        // delimited; retrying would replay the same bytes.
                        if let Some(session) = self.sessions.get_mut(&ex.address) {
                            session.retries = 0;
                        }
                        return Err(MBusError::Decode(e));
                    }
                };
                let session = self.sessions.entry(ex.address).or_default();
                session.retries = 0;
                // The request was answered; the next one alternates the FCB.
                session.fcb = !session.fcb;
                if ex.response.header.is_none() {
                    ex.response.header = decoded.header;
                }
                ex.response.records.extend(decoded.records);
                if decoded.manufacturer_data.is_some() {
                    ex.response.manufacturer_data = decoded.manufacturer_data;
                }
                if decoded.more_records_follow {
                    ex.chain_len += 1;
                    if ex.chain_len >= MBUS_RESPONSE_CHAIN_MAX {
                        return Err(MBusError::Session(SessionError::ResponseChainTooLong(
                            MBUS_RESPONSE_CHAIN_MAX,
                        )));
                    }
                    let bytes = self.request_bytes(ex.address)?;
                    ex.state = ExchangeState::RequestSent;
                    ex.last_sent = bytes.clone();
                    self.exchange = Some(ex);
                    return Ok(SessionAction::Send(bytes));
                }
                Ok(SessionAction::Complete(ex.response))
            }
            ExchangeState::Idle | ExchangeState::Error => Err(MBusError::InvalidState(
                "frame received outside of an exchange".into(),
            )),
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbus::frame::parse_frame;
    use crate::payload::data_encoding::encode_bcd;

    fn addr(value: u8) -> PrimaryAddress {
        PrimaryAddress::new(value).unwrap()
    }

    fn sent_bytes(action: SessionAction) -> Vec<u8> {
        match action {
            SessionAction::Send(bytes) => bytes,
            other => panic!("expected Send, got {other:?}"),
        }
    }

    /// A CI 0x72 response frame: 12-byte fixed header plus record bytes.
    fn response_frame(address: u8, records: &[u8]) -> MBusFrame {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_bcd(12345678, 4));
        data.extend_from_slice(&0x0442u16.to_le_bytes());
        data.push(0x01); // version
        data.push(0x07); // medium: water
        data.push(0x2A); // access number
        data.push(0x00); // status
        data.extend_from_slice(&[0x00, 0x00]); // signature
        data.extend_from_slice(records);
        MBusFrame::new_long(
            MBUS_CONTROL_MASK_RSP_UD,
            address,
            MBUS_CONTROL_INFO_RESP_VARIABLE,
            data,
        )
    }

    fn complete_records(action: SessionAction) -> PollResponse {
        match action {
            SessionAction::Complete(response) => response,
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn test_poll_opens_with_nke_then_requests() {
        let mut machine = SessionMachine::new();
        let nke = sent_bytes(machine.start_poll(addr(5)).unwrap());
        let frame = parse_frame(&nke).unwrap();
        assert_eq!(frame.control, MBUS_CONTROL_MASK_SND_NKE);
        assert_eq!(frame.address, 5);
        assert_eq!(machine.state(), ExchangeState::NkeSent);

        let req = sent_bytes(
            machine
                .handle_transport(TransportResult::Frame(MBusFrame::ack()))
                .unwrap(),
        );
        let frame = parse_frame(&req).unwrap();
        assert_eq!(frame.control, MBUS_CONTROL_MASK_REQ_UD2);
        assert_eq!(machine.state(), ExchangeState::RequestSent);
        machine.frame_dispatched();
        assert_eq!(machine.state(), ExchangeState::AwaitingResponse);
    }

    #[test]
    fn test_fcb_alternates_from_zero_across_polls() {
        let mut machine = SessionMachine::new();
        let mut fcb_bits = Vec::new();
        // Initialize the link once.
        let _ = machine.start_poll(addr(9)).unwrap();
        for round in 0..4 {
            let action = if round == 0 {
                machine
                    .handle_transport(TransportResult::Frame(MBusFrame::ack()))
                    .unwrap()
            } else {
                machine.start_poll(addr(9)).unwrap()
            };
            let req = parse_frame(&sent_bytes(action)).unwrap();
            fcb_bits.push(req.control & ControlFlags::FCB.bits() != 0);
            machine.frame_dispatched();
            let response = response_frame(9, &[0x01, 0x13, 0x2A]);
            let done = machine
                .handle_transport(TransportResult::Frame(response))
                .unwrap();
            assert_eq!(complete_records(done).records.len(), 1);
        }
        assert_eq!(fcb_bits, vec![false, true, false, true]);
    }

    #[test]
    fn test_retransmit_is_byte_identical() {
        let mut machine = SessionMachine::new();
        let original = sent_bytes(machine.start_poll(addr(7)).unwrap());
        let resent = sent_bytes(machine.handle_transport(TransportResult::Timeout).unwrap());
        assert_eq!(original, resent);
        let resent = sent_bytes(machine.handle_transport(TransportResult::Timeout).unwrap());
        assert_eq!(original, resent);
    }

    #[test]
    fn test_retries_exhausted_reports_no_response() {
        let mut machine = SessionMachine::new();
        let _ = machine.start_poll(addr(7)).unwrap();
        let _ = machine.handle_transport(TransportResult::Timeout).unwrap();
        let _ = machine.handle_transport(TransportResult::Timeout).unwrap();
        let err = machine
            .handle_transport(TransportResult::Timeout)
            .unwrap_err();
        assert!(matches!(
            err,
            MBusError::Session(SessionError::NoResponse {
                address: 7,
                attempts: 3
            })
        ));
        assert_eq!(machine.state(), ExchangeState::Idle);
    }

    #[test]
    fn test_garbled_reply_counts_like_timeout() {
        let mut machine = SessionMachine::new();
        let original = sent_bytes(machine.start_poll(addr(7)).unwrap());
        let garbled = TransportResult::Garbled(crate::error::FramingError::BadStart(0x42));
        let resent = sent_bytes(machine.handle_transport(garbled).unwrap());
        assert_eq!(original, resent);
    }

    #[test]
    fn test_cancel_preserves_fcb() {
        let mut machine = SessionMachine::new();
        // Complete one poll so the FCB is toggled to 1.
        let _ = machine.start_poll(addr(3)).unwrap();
        let _ = machine
            .handle_transport(TransportResult::Frame(MBusFrame::ack()))
            .unwrap();
        let _ = machine
            .handle_transport(TransportResult::Frame(response_frame(3, &[0x01, 0x13, 0x01])))
            .unwrap();
        let fcb_before = machine.session(3).unwrap().fcb;

        // Cancel mid-exchange; the next request must reuse the same FCB.
        let interrupted = sent_bytes(machine.start_poll(addr(3)).unwrap());
        machine.cancel();
        assert_eq!(machine.state(), ExchangeState::Idle);
        assert_eq!(machine.session(3).unwrap().fcb, fcb_before);
        let retried = sent_bytes(machine.start_poll(addr(3)).unwrap());
        assert_eq!(interrupted, retried);
    }

    #[test]
    fn test_single_flight_guard() {
        let mut machine = SessionMachine::new();
        let _ = machine.start_poll(addr(1)).unwrap();
        assert!(matches!(
            machine.start_poll(addr(2)),
            Err(MBusError::InvalidState(_))
        ));
    }

    #[test]
    fn test_more_records_chain_concatenates() {
        let mut machine = SessionMachine::new();
        let _ = machine.start_poll(addr(4)).unwrap();
        let _ = machine
            .handle_transport(TransportResult::Frame(MBusFrame::ack()))
            .unwrap();

        // First frame ends in the 0x1F sentinel: the machine must issue
        // exactly one follow-up request with the FCB toggled.
        let first = response_frame(4, &[0x01, 0x13, 0x01, 0x1F]);
        let follow_up = machine
            .handle_transport(TransportResult::Frame(first))
            .unwrap();
        let req = parse_frame(&sent_bytes(follow_up)).unwrap();
        assert_ne!(req.control & ControlFlags::FCB.bits(), 0);

        let second = response_frame(4, &[0x01, 0x13, 0x02]);
        let done = machine
            .handle_transport(TransportResult::Frame(second))
            .unwrap();
        let response = complete_records(done);
        assert_eq!(response.records.len(), 2);
    }

    #[test]
    fn test_broadcast_nke_is_fire_and_forget() {
        let mut machine = SessionMachine::new();
        let action = machine.start_nke(addr(MBUS_ADDRESS_BROADCAST)).unwrap();
        assert!(matches!(action, SessionAction::SendOnly(_)));
        assert_eq!(machine.state(), ExchangeState::Idle);
    }

    #[test]
    fn test_broadcast_poll_is_rejected() {
        let mut machine = SessionMachine::new();
        assert!(matches!(
            machine.start_poll(addr(MBUS_ADDRESS_BROADCAST)),
            Err(MBusError::InvalidAddress(_))
        ));
    }
}
