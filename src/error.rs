//! # M-Bus Error Handling
//!
//! This module defines the error taxonomy of the crate: framing errors raised
//! by the frame codec, decode errors raised by the data record decoder,
//! session errors raised by the request/response state machine, and the
//! top-level [`MBusError`] that wraps them all.

use serde::Serialize;
use thiserror::Error;

/// A malformed byte sequence rejected by the frame codec.
///
/// The variants identify which validation step failed, in the order the codec
/// applies them: start byte, length fields, total byte count, checksum, stop
/// byte.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The first byte (or the repeated 0x68 of a long frame) is not a
    /// recognized start byte.
    #[error("bad start byte 0x{0:02X}")]
    BadStart(u8),

    /// The duplicated length fields disagree, or the buffer length does not
    /// match the length field plus frame overhead.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The checksum byte does not equal the modulo-256 sum of the covered
    /// fields.
    #[error("checksum mismatch: claimed 0x{claimed:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { claimed: u8, computed: u8 },

    /// The final byte is not the 0x16 stop character.
    #[error("bad stop byte 0x{0:02X}")]
    BadStop(u8),

    /// The buffer ends before the frame does.
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
}

/// A failure while decoding the data records of a user-data response.
///
/// Most variants are recoverable per record: the record is kept with its raw
/// bytes and the error attached. [`DecodeError::TruncatedRecord`] and the
/// chain-length variants make the record boundary unknowable and abort the
/// remainder of the frame.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DecodeError {
    /// The VIF code is reserved or not in the lookup tables.
    #[error("unknown VIF 0x{0:02X}")]
    UnknownVif(u8),

    /// A VIFE extension code is reserved or not in the lookup tables.
    #[error("unknown VIFE 0x{0:02X}")]
    UnknownVife(u8),

    /// A record declares more value bytes than the frame carries.
    #[error("truncated record: need {needed} bytes, have {have}")]
    TruncatedRecord { needed: usize, have: usize },

    /// A BCD value contains a nibble above 9.
    #[error("invalid BCD digits in {0:02X?}")]
    InvalidBcd(Vec<u8>),

    /// The DIFE chain exceeds the 10-extension limit.
    #[error("DIF extension chain exceeds {0} bytes")]
    DifChainTooLong(usize),

    /// The VIFE chain exceeds the 10-extension limit.
    #[error("VIF extension chain exceeds {0} bytes")]
    VifChainTooLong(usize),

    /// A time-point value does not form a valid date or date-time.
    #[error("invalid time point {0:02X?}")]
    InvalidTimePoint(Vec<u8>),

    /// A variable-length field uses a reserved length byte, so the value
    /// length cannot be determined.
    #[error("reserved LVAR length byte 0x{0:02X}")]
    ReservedLvar(u8),
}

/// A failed request/response exchange, surfaced once the retry policy of the
/// session state machine is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The slave did not produce a valid reply within the attempt limit.
    #[error("no response from address {address} after {attempts} attempts")]
    NoResponse { address: u8, attempts: u8 },

    /// No device matched a secondary-address selection mask.
    #[error("no device matched the selection mask")]
    NoDeviceFound,

    /// A wildcard-search collision survived the full digit space. This should
    /// not happen with conforming devices and is logged as a protocol
    /// violation.
    #[error("secondary-address collision unresolved after exhausting the digit space")]
    AmbiguousAddress,

    /// The slave kept signalling "more records follow" past the chain cap.
    #[error("response chain exceeded the limit of {0} frames")]
    ResponseChainTooLong(usize),
}

/// Top-level error type of the crate.
#[derive(Debug, Error)]
pub enum MBusError {
    /// A malformed frame, from the frame codec.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A payload decode failure, from the data record decoder.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A failed exchange, from the session state machine.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The caller attempted to encode a frame with out-of-range fields.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The caller supplied an address outside the ranges the protocol
    /// assigns.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The state machine was driven out of order (e.g. a transport result
    /// without an outstanding exchange).
    #[error("protocol misuse: {0}")]
    InvalidState(String),

    /// An error from the serial transport adapter.
    #[error("serial port error: {0}")]
    SerialPort(String),
}
