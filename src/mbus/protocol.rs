//! # M-Bus Master Driver
//!
//! [`MBusMaster`] couples the pure session state machine with a transport:
//! it transmits the bytes the machine emits, awaits the response window, and
//! feeds the outcome back until the exchange completes. One driver instance
//! serves one bus and serializes its exchanges; independent buses run
//! independent instances.

use crate::constants::*;
use crate::error::{MBusError, SessionError};
use crate::logging::{log_debug, log_warn};
use crate::mbus::address::{
    build_selection_frame, ProbeOutcome, ScanQueue, ScanStep, SecondaryAddress, SecondaryMask,
};
use crate::mbus::frame::{pack_frame, parse_frame, MBusFrameType};
use crate::mbus::session::{
    PollResponse, SessionAction, SessionConfig, SessionMachine, TransportResult,
};
use crate::mbus::transport::MBusTransport;
use crate::payload::record::DataRecord;

/// The master side of one M-Bus.
pub struct MBusMaster<T: MBusTransport> {
    transport: T,
    machine: SessionMachine,
}

impl<T: MBusTransport> MBusMaster<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        MBusMaster {
            transport,
            machine: SessionMachine::with_config(config),
        }
    }

    /// The session state machine, for inspection.
    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// The underlying transport, for inspection.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a link reset. Point-to-point resets await the acknowledgment;
    /// a broadcast reset is fire-and-forget.
    pub async fn send_nke(&mut self, address: u8) -> Result<(), MBusError> {
        let address = crate::mbus::address::PrimaryAddress::new(address)?;
        let action = self.machine.start_nke(address)?;
        self.run(action).await.map(|_| ())
    }

    /// Polls a primary address for its data records, following "more records
    /// follow" chains transparently.
    pub async fn poll_primary(&mut self, address: u8) -> Result<Vec<DataRecord>, MBusError> {
        let address = crate::mbus::address::PrimaryAddress::new(address)?;
        let action = self.machine.start_poll(address)?;
        Ok(self.run(action).await?.records)
    }

    /// Selects a slave by secondary-address mask and polls it via the
    /// network layer.
    pub async fn poll_secondary(
        &mut self,
        mask: &SecondaryMask,
    ) -> Result<Vec<DataRecord>, MBusError> {
        let select = self.machine.start_select(mask)?;
        match self.run(select).await {
            Ok(_) => {}
            Err(MBusError::Session(SessionError::NoResponse { .. })) => {
                return Err(SessionError::NoDeviceFound.into());
            }
            Err(e) => return Err(e),
        }
        let request = self.machine.start_request(MBUS_ADDRESS_NETWORK_LAYER)?;
        Ok(self.run(request).await?.records)
    }

    /// Starts a lazy secondary-address scan. Each `next` call yields one
    /// discovered device id; re-create the scanner to restart the search.
    pub fn scan_secondary(&mut self) -> SecondaryScanner<'_, T> {
        SecondaryScanner {
            master: self,
            queue: ScanQueue::new(),
        }
    }

    /// Drives one exchange to completion.
    async fn run(&mut self, mut action: SessionAction) -> Result<PollResponse, MBusError> {
        loop {
            match action {
                SessionAction::Send(bytes) => {
                    log_debug(&format!("tx {}", hex::encode(&bytes)));
                    self.transport.send_bytes(&bytes).await?;
                    self.machine.frame_dispatched();
                    let timeout = self.machine.config().response_timeout;
                    let result = match self.transport.recv_bytes(timeout).await? {
                        None => TransportResult::Timeout,
                        Some(raw) => {
                            log_debug(&format!("rx {}", hex::encode(&raw)));
                            match parse_frame(&raw) {
                                Ok(frame) => TransportResult::Frame(frame),
                                Err(e) => {
                                    log_warn(&format!("discarding garbled reply: {e}"));
                                    TransportResult::Garbled(e)
                                }
                            }
                        }
                    };
                    action = self.machine.handle_transport(result)?;
                }
                SessionAction::SendOnly(bytes) => {
                    log_debug(&format!("tx {}", hex::encode(&bytes)));
                    self.transport.send_bytes(&bytes).await?;
                    return Ok(PollResponse::default());
                }
                SessionAction::Complete(response) => return Ok(response),
            }
        }
    }

    /// One selection probe for the wildcard scan, outside the retry policy:
    /// here a timeout is information (no device matches), not a failure, and
    /// garbled bytes signal a collision.
    async fn probe_selection(&mut self, mask: &SecondaryMask) -> Result<ProbeOutcome, MBusError> {
        let bytes = pack_frame(&build_selection_frame(mask, false))?;
        self.transport.send_bytes(&bytes).await?;
        let timeout = self.machine.config().response_timeout;
        match self.transport.recv_bytes(timeout).await? {
            None => Ok(ProbeOutcome::Nothing),
            Some(raw) => match parse_frame(&raw) {
                Ok(frame) if frame.frame_type == MBusFrameType::Ack => Ok(ProbeOutcome::Ack),
                Ok(_) => Ok(ProbeOutcome::Garbled),
                Err(_) => Ok(ProbeOutcome::Garbled),
            },
        }
    }
}

/// Lazy iterator over the devices discovered by a secondary-address scan.
pub struct SecondaryScanner<'a, T: MBusTransport> {
    master: &'a mut MBusMaster<T>,
    queue: ScanQueue,
}

impl<T: MBusTransport> SecondaryScanner<'_, T> {
    /// The next discovered device id, or `None` once the search space is
    /// exhausted.
    pub async fn next(&mut self) -> Result<Option<SecondaryAddress>, MBusError> {
        while let Some(mask) = self.queue.next_probe() {
            let outcome = self.master.probe_selection(&mask).await?;
            match self.queue.report(outcome) {
                Ok(ScanStep::Continue) => {}
                Ok(ScanStep::Selected(_)) => {
                    // Exactly one slave acknowledged the mask and is now
                    // selected; read its identification from the header.
                    let request = self
                        .master
                        .machine
                        .start_request(MBUS_ADDRESS_NETWORK_LAYER)?;
                    let response = self.master.run(request).await?;
                    match response.header {
                        Some(header) => return Ok(Some(header.secondary)),
                        None => {
                            log_warn("selected slave answered without a fixed data header");
                        }
                    }
                }
                Err(e) => {
                    log_warn(&format!("secondary scan aborted a branch: {e}"));
                    return Err(e.into());
                }
            }
        }
        Ok(None)
    }
}
