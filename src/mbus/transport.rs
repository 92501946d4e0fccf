//! # Transport Abstraction
//!
//! The core never opens or configures a physical link; it talks to a
//! [`MBusTransport`] that moves raw bytes and owns the link timing. The
//! serial adapter in [`crate::mbus::serial`] is the production
//! implementation; this module also provides an in-memory [`MockBus`] that
//! simulates slaves for tests.

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::address::{SecondaryAddress, SecondaryMask};
use crate::mbus::frame::{pack_frame, parse_frame, MBusFrame, MBusFrameType};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

/// A byte transport to one physical M-Bus.
///
/// `recv_bytes` returns one complete frame's worth of bytes (the transport
/// owns inter-character timing and frame boundary detection), or `None` when
/// the response window elapses.
#[async_trait]
pub trait MBusTransport: Send {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), MBusError>;
    async fn recv_bytes(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, MBusError>;
}

/// A scripted transport: replies are queued ahead of time and handed out in
/// order, one per transmission. An exhausted queue reads as a timeout.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Everything the master transmitted, frame by frame.
    pub sent: Vec<Vec<u8>>,
    replies: VecDeque<Option<Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues raw bytes to be returned for an upcoming transmission.
    pub fn queue_reply(&mut self, bytes: Vec<u8>) {
        self.replies.push_back(Some(bytes));
    }

    /// Queues a response timeout.
    pub fn queue_timeout(&mut self) {
        self.replies.push_back(None);
    }

    /// Queues a frame, packed.
    pub fn queue_frame(&mut self, frame: &MBusFrame) {
        let bytes = pack_frame(frame).expect("mock frames are well-formed");
        self.queue_reply(bytes);
    }
}

#[async_trait]
impl MBusTransport for MockTransport {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        self.sent.push(bytes.to_vec());
        Ok(())
    }

    async fn recv_bytes(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, MBusError> {
        Ok(self.replies.pop_front().flatten())
    }
}

/// One simulated slave on a [`MockBus`].
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub primary: u8,
    pub secondary: SecondaryAddress,
    /// Raw record bytes this slave returns after the fixed data header.
    pub records: Vec<u8>,
    access_number: u8,
    selected: bool,
}

impl MockDevice {
    pub fn new(primary: u8, secondary: SecondaryAddress, records: Vec<u8>) -> Self {
        MockDevice {
            primary,
            secondary,
            records,
            access_number: 0,
            selected: false,
        }
    }

    fn response_frame(&mut self) -> MBusFrame {
        self.access_number = self.access_number.wrapping_add(1);
        let mut data = Vec::new();
        data.extend_from_slice(&self.secondary.to_wire());
        data.push(self.access_number);
        data.push(0x00); // status
        data.extend_from_slice(&[0x00, 0x00]); // signature
        data.extend_from_slice(&self.records);
        MBusFrame::new_long(
            MBUS_CONTROL_MASK_RSP_UD,
            self.primary,
            MBUS_CONTROL_INFO_RESP_VARIABLE,
            data,
        )
    }
}

/// A bus of simulated slaves that answer like real M-Bus devices: primary
/// and secondary addressing, selection with wildcard masks, and collision
/// garble when more than one slave answers at once.
#[derive(Debug, Default)]
pub struct MockBus {
    devices: Vec<MockDevice>,
    pub sent: Vec<Vec<u8>>,
    reply: Option<Vec<u8>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: MockDevice) {
        self.devices.push(device);
    }

    /// Two overlapping replies on a shared wire do not frame correctly.
    fn collision_bytes() -> Vec<u8> {
        vec![0xE5, 0xE5]
    }

    fn on_frame(&mut self, frame: &MBusFrame) -> Option<Vec<u8>> {
        match frame.frame_type {
            MBusFrameType::Short if frame.control == MBUS_CONTROL_MASK_SND_NKE => {
                // A link reset drops any selection at the network layer.
                if frame.address == MBUS_ADDRESS_NETWORK_LAYER {
                    for device in &mut self.devices {
                        device.selected = false;
                    }
                }
                if frame.address == MBUS_ADDRESS_BROADCAST {
                    return None;
                }
                let known = self.devices.iter().any(|d| d.primary == frame.address);
                known.then(|| vec![MBUS_FRAME_ACK])
            }
            MBusFrameType::Short
                if frame.control & !ControlFlags::FCB.bits() == MBUS_CONTROL_MASK_REQ_UD2 =>
            {
                let address = frame.address;
                let responders: Vec<usize> = self
                    .devices
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| {
                        d.primary == address
                            || (address == MBUS_ADDRESS_NETWORK_LAYER && d.selected)
                    })
                    .map(|(i, _)| i)
                    .collect();
                match responders.as_slice() {
                    [] => None,
                    [index] => {
                        let response = self.devices[*index].response_frame();
                        Some(pack_frame(&response).expect("mock response frames are well-formed"))
                    }
                    _ => Some(Self::collision_bytes()),
                }
            }
            MBusFrameType::Long
                if frame.address == MBUS_ADDRESS_NETWORK_LAYER
                    && frame.control_information == MBUS_CONTROL_INFO_SELECT_SLAVE
                    && frame.data.len() == 8 =>
            {
                let mut wire = [0u8; 8];
                wire.copy_from_slice(&frame.data);
                let mask = SecondaryMask::from_wire(wire);
                let mut matched = 0usize;
                for device in &mut self.devices {
                    device.selected = mask.matches(&device.secondary);
                    if device.selected {
                        matched += 1;
                    }
                }
                match matched {
                    0 => None,
                    1 => Some(vec![MBUS_FRAME_ACK]),
                    _ => Some(Self::collision_bytes()),
                }
            }
            _ => None,
        }
    }
}

#[async_trait]
impl MBusTransport for MockBus {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        self.sent.push(bytes.to_vec());
        self.reply = match parse_frame(bytes) {
            Ok(frame) => self.on_frame(&frame),
            Err(_) => None,
        };
        Ok(())
    }

    async fn recv_bytes(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, MBusError> {
        Ok(self.reply.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MBUS_CONTROL_MASK_SND_NKE;

    fn device(primary: u8, ident: u32) -> MockDevice {
        MockDevice::new(
            primary,
            SecondaryAddress {
                ident,
                manufacturer: 0x0442,
                version: 0x01,
                medium: 0x07,
            },
            vec![0x01, 0x2B, 0x07],
        )
    }

    #[test]
    fn test_mock_bus_acks_nke_for_known_address() {
        tokio_test::block_on(async {
            let mut bus = MockBus::new();
            bus.add_device(device(5, 0x12345678));
            let nke = pack_frame(&MBusFrame::new_short(MBUS_CONTROL_MASK_SND_NKE, 5)).unwrap();
            bus.send_bytes(&nke).await.unwrap();
            let reply = bus.recv_bytes(Duration::from_millis(1)).await.unwrap();
            assert_eq!(reply, Some(vec![MBUS_FRAME_ACK]));
        });
    }

    #[test]
    fn test_mock_bus_collides_on_shared_selection() {
        tokio_test::block_on(async {
            let mut bus = MockBus::new();
            bus.add_device(device(1, 0x11110000));
            bus.add_device(device(2, 0x11110001));
            let mask = SecondaryMask::from_hex("1111000FFFFFFFFF").unwrap();
            let select = pack_frame(&crate::mbus::address::build_selection_frame(&mask, false))
                .unwrap();
            bus.send_bytes(&select).await.unwrap();
            let reply = bus.recv_bytes(Duration::from_millis(1)).await.unwrap().unwrap();
            assert!(parse_frame(&reply).is_err(), "overlapping replies must garble");
        });
    }
}
