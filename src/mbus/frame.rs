//! # M-Bus Frame Codec
//!
//! Encodes and decodes the four EN 13757-3 frame formats: the
//! single-character acknowledgment (0xE5), the short frame (0x10), and the
//! control and long frames (0x68, with a duplicated length field).
//!
//! Decoding is all-or-nothing: the input either yields a fully validated
//! [`MBusFrame`] or a [`FramingError`] naming the first check that failed.
//! The checks run in a fixed order: start byte, length fields, total byte
//! count, checksum, stop byte.

use crate::constants::*;
use crate::error::{FramingError, MBusError};
use crate::mbus::checksum;

/// A decoded M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

/// The four M-Bus frame formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MBusFrameType {
    Ack,
    Short,
    Control,
    Long,
}

impl MBusFrame {
    /// Builds a single-character acknowledgment frame.
    pub fn ack() -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Ack,
            control: 0,
            address: 0,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        }
    }

    /// Builds a short frame with its checksum filled in.
    pub fn new_short(control: u8, address: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Short,
            control,
            address,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    /// Builds a control frame with its checksum filled in.
    pub fn new_control(control: u8, address: u8, control_information: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Control,
            control,
            address,
            control_information,
            data: Vec::new(),
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    /// Builds a long frame with its checksum filled in.
    pub fn new_long(control: u8, address: u8, control_information: u8, data: Vec<u8>) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Long,
            control,
            address,
            control_information,
            data,
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    /// Computes the checksum over the fields the frame format covers.
    pub fn compute_checksum(&self) -> u8 {
        match self.frame_type {
            MBusFrameType::Ack => 0,
            MBusFrameType::Short => checksum::compute(&[self.control, self.address]),
            MBusFrameType::Control | MBusFrameType::Long => {
                let head = checksum::compute(&[
                    self.control,
                    self.address,
                    self.control_information,
                ]);
                head.wrapping_add(checksum::compute(&self.data))
            }
        }
    }
}

/// Packs an M-Bus frame into its wire representation.
///
/// The checksum is computed from the frame fields, not taken from the
/// `checksum` member. Fails with [`MBusError::InvalidFrame`] when the payload
/// exceeds the 252-byte long-frame limit or a control frame carries data.
pub fn pack_frame(frame: &MBusFrame) -> Result<Vec<u8>, MBusError> {
    let mut out = Vec::with_capacity(frame.data.len() + 9);
    match frame.frame_type {
        MBusFrameType::Ack => {
            out.push(MBUS_FRAME_ACK);
        }
        MBusFrameType::Short => {
            out.push(MBUS_FRAME_SHORT_START);
            out.push(frame.control);
            out.push(frame.address);
            out.push(frame.compute_checksum());
            out.push(MBUS_FRAME_STOP);
        }
        MBusFrameType::Control => {
            if !frame.data.is_empty() {
                return Err(MBusError::InvalidFrame(
                    "control frame must not carry user data".into(),
                ));
            }
            pack_control_or_long(&mut out, frame);
        }
        MBusFrameType::Long => {
            if frame.data.len() > MBUS_FRAME_DATA_MAX {
                return Err(MBusError::InvalidFrame(format!(
                    "payload of {} bytes exceeds the long-frame limit of {}",
                    frame.data.len(),
                    MBUS_FRAME_DATA_MAX
                )));
            }
            pack_control_or_long(&mut out, frame);
        }
    }
    Ok(out)
}

/// Packs a control or long frame: 0x68 L L 0x68 C A CI [data] checksum 0x16.
fn pack_control_or_long(out: &mut Vec<u8>, frame: &MBusFrame) {
    let length = frame.data.len() as u8 + 3;
    out.push(MBUS_FRAME_LONG_START);
    out.push(length);
    out.push(length);
    out.push(MBUS_FRAME_LONG_START);
    out.push(frame.control);
    out.push(frame.address);
    out.push(frame.control_information);
    out.extend_from_slice(&frame.data);
    out.push(frame.compute_checksum());
    out.push(MBUS_FRAME_STOP);
}

/// Parses one complete M-Bus frame from `input`.
///
/// `input` must hold exactly one frame; surplus bytes are a
/// [`FramingError::LengthMismatch`], missing bytes a
/// [`FramingError::Truncated`].
pub fn parse_frame(input: &[u8]) -> Result<MBusFrame, FramingError> {
    let first = *input.first().ok_or(FramingError::Truncated { needed: 1, have: 0 })?;
    match first {
        MBUS_FRAME_ACK => parse_ack(input),
        MBUS_FRAME_SHORT_START => parse_short(input),
        MBUS_FRAME_LONG_START => parse_control_or_long(input),
        other => Err(FramingError::BadStart(other)),
    }
}

fn parse_ack(input: &[u8]) -> Result<MBusFrame, FramingError> {
    if input.len() != 1 {
        return Err(FramingError::LengthMismatch {
            expected: 1,
            actual: input.len(),
        });
    }
    Ok(MBusFrame::ack())
}

fn parse_short(input: &[u8]) -> Result<MBusFrame, FramingError> {
    if input.len() < 5 {
        return Err(FramingError::Truncated {
            needed: 5,
            have: input.len(),
        });
    }
    if input.len() > 5 {
        return Err(FramingError::LengthMismatch {
            expected: 5,
            actual: input.len(),
        });
    }
    let claimed = input[3];
    let computed = checksum::compute(&input[1..3]);
    if claimed != computed {
        return Err(FramingError::ChecksumMismatch { claimed, computed });
    }
    if input[4] != MBUS_FRAME_STOP {
        return Err(FramingError::BadStop(input[4]));
    }
    Ok(MBusFrame {
        frame_type: MBusFrameType::Short,
        control: input[1],
        address: input[2],
        control_information: 0,
        data: Vec::new(),
        checksum: claimed,
    })
}

fn parse_control_or_long(input: &[u8]) -> Result<MBusFrame, FramingError> {
    if input.len() < 4 {
        return Err(FramingError::Truncated {
            needed: 4,
            have: input.len(),
        });
    }
    let length1 = input[1];
    let length2 = input[2];
    if length1 != length2 {
        return Err(FramingError::LengthMismatch {
            expected: length1 as usize,
            actual: length2 as usize,
        });
    }
    if input[3] != MBUS_FRAME_LONG_START {
        return Err(FramingError::BadStart(input[3]));
    }
    let length = length1 as usize;
    if length < 3 {
        // The length field covers at least C, A and CI.
        return Err(FramingError::LengthMismatch {
            expected: 3,
            actual: length,
        });
    }
    let total = length + 6;
    if input.len() < total {
        return Err(FramingError::Truncated {
            needed: total,
            have: input.len(),
        });
    }
    if input.len() > total {
        return Err(FramingError::LengthMismatch {
            expected: total,
            actual: input.len(),
        });
    }
    let claimed = input[4 + length];
    let computed = checksum::compute(&input[4..4 + length]);
    if claimed != computed {
        return Err(FramingError::ChecksumMismatch { claimed, computed });
    }
    let stop = input[5 + length];
    if stop != MBUS_FRAME_STOP {
        return Err(FramingError::BadStop(stop));
    }
    Ok(MBusFrame {
        frame_type: if length == 3 {
            MBusFrameType::Control
        } else {
            MBusFrameType::Long
        },
        control: input[4],
        address: input[5],
        control_information: input[6],
        data: input[7..4 + length].to_vec(),
        checksum: claimed,
    })
}

/// Verifies the stored checksum of a frame against its fields.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), MBusError> {
    let computed = frame.compute_checksum();
    if frame.checksum != computed {
        return Err(MBusError::Framing(FramingError::ChecksumMismatch {
            claimed: frame.checksum,
            computed,
        }));
    }
    Ok(())
}
