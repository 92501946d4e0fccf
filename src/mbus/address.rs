//! # M-Bus Addressing
//!
//! Primary (single-byte) and secondary (8-byte identification) addressing,
//! including the wildcard mask used for slave selection and the
//! collision-resolution search behind the secondary scan.
//!
//! The wildcard search is driven by an explicit stack of partial masks
//! ([`ScanQueue`]) instead of recursion, so the collision-resolution depth
//! stays bounded and inspectable.

use crate::constants::*;
use crate::error::{MBusError, SessionError};
use crate::mbus::frame::MBusFrame;
use crate::payload::data_encoding::decode_manufacturer;
use serde::Serialize;
use std::fmt;

/// Number of decimal digits in the identification number of a secondary
/// address, and the number of positions the wildcard search walks.
pub const SECONDARY_ID_DIGITS: usize = 8;

/// A validated primary address.
///
/// Assignable slave addresses are 1–250; 253 is the network layer used for
/// secondary selection, 254 the broadcast address (no reply expected), 255
/// the address of unconfigured slaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimaryAddress(u8);

impl PrimaryAddress {
    /// The network-layer address targeted after secondary selection.
    pub const NETWORK_LAYER: PrimaryAddress = PrimaryAddress(MBUS_ADDRESS_NETWORK_LAYER);

    pub fn new(value: u8) -> Result<Self, MBusError> {
        match value {
            MBUS_ADDRESS_SLAVE_MIN..=MBUS_ADDRESS_SLAVE_MAX
            | MBUS_ADDRESS_NETWORK_LAYER
            | MBUS_ADDRESS_BROADCAST
            | MBUS_ADDRESS_UNCONFIGURED => Ok(PrimaryAddress(value)),
            other => Err(MBusError::InvalidAddress(format!(
                "0x{other:02X} is not an assignable primary address"
            ))),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// True for the broadcast address, where slaves do not reply.
    pub fn is_broadcast(self) -> bool {
        self.0 == MBUS_ADDRESS_BROADCAST
    }
}

impl fmt::Display for PrimaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An 8-byte secondary address: identification number (BCD), manufacturer,
/// version and medium, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SecondaryAddress {
    /// Identification number, BCD digits kept in their nibble positions
    /// (display as hex to read the decimal id).
    pub ident: u32,
    pub manufacturer: u16,
    pub version: u8,
    pub medium: u8,
}

impl SecondaryAddress {
    /// Parses the 8-byte little-endian wire layout.
    pub fn from_wire(bytes: [u8; 8]) -> Self {
        SecondaryAddress {
            ident: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            manufacturer: u16::from_le_bytes([bytes[4], bytes[5]]),
            version: bytes[6],
            medium: bytes[7],
        }
    }

    /// Packs into the 8-byte little-endian wire layout.
    pub fn to_wire(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.ident.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.manufacturer.to_le_bytes());
        bytes[6] = self.version;
        bytes[7] = self.medium;
        bytes
    }
}

impl fmt::Display for SecondaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}.{}.{:02X}.{:02X}",
            self.ident,
            decode_manufacturer(self.manufacturer),
            self.version,
            self.medium
        )
    }
}

/// A 16-nibble selection mask over a secondary address. Each nibble is a
/// fixed hex digit or the wildcard 0xF.
///
/// Nibble order follows the printed form: eight identification digits (most
/// significant first), four manufacturer digits, two version digits, two
/// medium digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryMask {
    nibbles: [u8; 16],
}

impl SecondaryMask {
    /// The all-wildcard mask every slave matches.
    pub fn wildcard() -> Self {
        SecondaryMask { nibbles: [0xF; 16] }
    }

    /// Parses a 16-character hex string; `F` nibbles are wildcards.
    pub fn from_hex(mask: &str) -> Result<Self, MBusError> {
        let cleaned: String = mask.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() != 16 {
            return Err(MBusError::InvalidAddress(format!(
                "secondary mask needs 16 hex digits, got {}",
                cleaned.len()
            )));
        }
        let mut nibbles = [0u8; 16];
        for (i, c) in cleaned.chars().enumerate() {
            nibbles[i] = c
                .to_digit(16)
                .ok_or_else(|| {
                    MBusError::InvalidAddress(format!("invalid hex digit {c:?} in secondary mask"))
                })? as u8;
        }
        Ok(SecondaryMask { nibbles })
    }

    /// Returns a copy with one identification digit fixed.
    pub fn with_id_digit(&self, position: usize, digit: u8) -> Self {
        debug_assert!(position < SECONDARY_ID_DIGITS && digit <= 9);
        let mut mask = *self;
        mask.nibbles[position] = digit;
        mask
    }

    /// Unpacks the 8-byte wire layout of a selection frame into a mask.
    pub fn from_wire(wire: [u8; 8]) -> Self {
        let mut nibbles = [0u8; 16];
        nibbles[0] = wire[3] >> 4;
        nibbles[1] = wire[3] & 0x0F;
        nibbles[2] = wire[2] >> 4;
        nibbles[3] = wire[2] & 0x0F;
        nibbles[4] = wire[1] >> 4;
        nibbles[5] = wire[1] & 0x0F;
        nibbles[6] = wire[0] >> 4;
        nibbles[7] = wire[0] & 0x0F;
        nibbles[8] = wire[5] >> 4;
        nibbles[9] = wire[5] & 0x0F;
        nibbles[10] = wire[4] >> 4;
        nibbles[11] = wire[4] & 0x0F;
        nibbles[12] = wire[6] >> 4;
        nibbles[13] = wire[6] & 0x0F;
        nibbles[14] = wire[7] >> 4;
        nibbles[15] = wire[7] & 0x0F;
        SecondaryMask { nibbles }
    }

    /// Packs the mask into the 8-byte wire layout of a selection frame.
    pub fn to_wire(&self) -> [u8; 8] {
        let n = &self.nibbles;
        let mut bytes = [0u8; 8];
        // Identification digits, BCD little-endian.
        bytes[0] = (n[6] << 4) | n[7];
        bytes[1] = (n[4] << 4) | n[5];
        bytes[2] = (n[2] << 4) | n[3];
        bytes[3] = (n[0] << 4) | n[1];
        // Manufacturer, little-endian 16-bit value.
        let manufacturer =
            ((n[8] as u16) << 12) | ((n[9] as u16) << 8) | ((n[10] as u16) << 4) | n[11] as u16;
        bytes[4..6].copy_from_slice(&manufacturer.to_le_bytes());
        bytes[6] = (n[12] << 4) | n[13];
        bytes[7] = (n[14] << 4) | n[15];
        bytes
    }

    /// True when every non-wildcard nibble of the mask equals the
    /// corresponding nibble of `address`.
    pub fn matches(&self, address: &SecondaryAddress) -> bool {
        let mask_wire = self.to_wire();
        let addr_wire = address.to_wire();
        for (m, a) in mask_wire.iter().zip(addr_wire.iter()) {
            let high_ok = (m >> 4) == 0xF || (m >> 4) == (a >> 4);
            let low_ok = (m & 0x0F) == 0xF || (m & 0x0F) == (a & 0x0F);
            if !high_ok || !low_ok {
                return false;
            }
        }
        true
    }
}

impl From<&SecondaryAddress> for SecondaryMask {
    fn from(address: &SecondaryAddress) -> Self {
        SecondaryMask::from_wire(address.to_wire())
    }
}

impl fmt::Display for SecondaryMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.nibbles {
            write!(f, "{nibble:X}")?;
        }
        Ok(())
    }
}

/// Builds the SND_UD selection frame targeting the network layer.
pub fn build_selection_frame(mask: &SecondaryMask, fcb: bool) -> MBusFrame {
    let mut control = MBUS_CONTROL_MASK_SND_UD;
    if fcb {
        control |= ControlFlags::FCB.bits();
    }
    MBusFrame::new_long(
        control,
        MBUS_ADDRESS_NETWORK_LAYER,
        MBUS_CONTROL_INFO_SELECT_SLAVE,
        mask.to_wire().to_vec(),
    )
}

/// The bus reaction to a selection probe, as classified by the transport
/// driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No slave answered within the response window.
    Nothing,
    /// A coherent single acknowledgment: exactly one slave is selected.
    Ack,
    /// Garbled or unexpected bytes: several slaves answered at once.
    Garbled,
}

/// One step of the wildcard scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// Nothing found here; ask for the next probe.
    Continue,
    /// Exactly one slave matched the mask and is now selected; read its
    /// identification.
    Selected(SecondaryMask),
}

/// Explicit-stack driver of the secondary-address wildcard search.
///
/// The search walks the eight identification digits from most to least
/// significant. For each frontier mask it probes the digits 0–9; a collision
/// pushes the narrowed mask onto the stack for the next digit position.
#[derive(Debug)]
pub struct ScanQueue {
    stack: Vec<ScanNode>,
    cursor: Option<Cursor>,
}

#[derive(Debug, Clone)]
struct ScanNode {
    mask: SecondaryMask,
    position: usize,
}

#[derive(Debug)]
struct Cursor {
    node: ScanNode,
    digit: u8,
}

impl ScanQueue {
    pub fn new() -> Self {
        ScanQueue {
            stack: vec![ScanNode {
                mask: SecondaryMask::wildcard(),
                position: 0,
            }],
            cursor: None,
        }
    }

    /// The next mask to probe, or `None` when the search space is exhausted.
    pub fn next_probe(&mut self) -> Option<SecondaryMask> {
        let cursor = match self.cursor.take() {
            Some(c) if c.digit < 9 => Cursor {
                digit: c.digit + 1,
                node: c.node,
            },
            _ => Cursor {
                node: self.stack.pop()?,
                digit: 0,
            },
        };
        let mask = cursor.node.mask.with_id_digit(cursor.node.position, cursor.digit);
        self.cursor = Some(cursor);
        Some(mask)
    }

    /// Feeds the outcome of the probe handed out by [`Self::next_probe`].
    ///
    /// A collision with all identification digits already fixed cannot be
    /// narrowed further and fails with [`SessionError::AmbiguousAddress`];
    /// the rest of the search space stays intact and the scan may continue.
    pub fn report(&mut self, outcome: ProbeOutcome) -> Result<ScanStep, SessionError> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Ok(ScanStep::Continue);
        };
        let probed = cursor.node.mask.with_id_digit(cursor.node.position, cursor.digit);
        match outcome {
            ProbeOutcome::Nothing => Ok(ScanStep::Continue),
            ProbeOutcome::Ack => Ok(ScanStep::Selected(probed)),
            ProbeOutcome::Garbled => {
                if cursor.node.position + 1 < SECONDARY_ID_DIGITS {
                    self.stack.push(ScanNode {
                        mask: probed,
                        position: cursor.node.position + 1,
                    });
                    Ok(ScanStep::Continue)
                } else {
                    Err(SessionError::AmbiguousAddress)
                }
            }
        }
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new()
    }
}
