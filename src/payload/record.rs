//! # M-Bus Data Record Decoder
//!
//! Walks the variable-data payload of a user-data response and produces one
//! [`DataRecord`] per DIB/VIB chain. Record-level failures (unknown VIF,
//! invalid BCD, bad time point) are isolated: the record is kept with its raw
//! value bytes and the error attached. Only errors that make the record
//! boundary unknowable — truncation, oversized extension chains, reserved
//! LVAR codes — abort the remainder of the frame.

use crate::constants::*;
use crate::error::DecodeError;
use crate::mbus::address::SecondaryAddress;
use crate::payload::data_encoding::{
    decode_bcd, decode_date_cp16, decode_datetime_cp32, decode_datetime_cp48, decode_int,
    decode_real, decode_string,
};
use crate::payload::vif::resolve_vib;
use chrono::{NaiveDate, NaiveDateTime};
use nom::error::ErrorKind;
use nom::number::complete::be_u8;
use nom::IResult;
use serde::Serialize;

/// The function field of a data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordFunction {
    Instantaneous,
    Maximum,
    Minimum,
    ValueDuringError,
}

/// A decoded record value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecordValue {
    /// The record carries no data (or is a readout selection).
    None,
    /// Little-endian two's-complement integer.
    Integer(i64),
    /// Packed BCD, sign applied for negative LVAR variants.
    Bcd(i64),
    /// 32-bit IEEE real, widened.
    Real(f64),
    /// LSB-first character string.
    String(String),
    /// Raw bytes: binary LVAR data or an undecodable value.
    Bytes(Vec<u8>),
    /// Type G date.
    Date(NaiveDate),
    /// Type F or Type I date and time.
    DateTime(NaiveDateTime),
}

/// One decoded telemetry value with its addressing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRecord {
    pub storage_number: u64,
    pub tariff: u32,
    pub sub_unit: u16,
    pub function: RecordFunction,
    pub unit: String,
    /// Decimal multiplier from the VIF table; apply to numeric values.
    pub exponent: f64,
    pub quantity: String,
    pub value: RecordValue,
    /// Non-fatal decode problem of this record, if any.
    pub error: Option<DecodeError>,
}

impl DataRecord {
    /// The numeric value scaled by the VIF multiplier, when the value is
    /// numeric.
    pub fn scaled_value(&self) -> Option<f64> {
        match self.value {
            RecordValue::Integer(v) => Some(v as f64 * self.exponent),
            RecordValue::Bcd(v) => Some(v as f64 * self.exponent),
            RecordValue::Real(v) => Some(v * self.exponent),
            _ => None,
        }
    }
}

/// The fixed data header opening a CI 0x72 variable-data response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDataHeader {
    pub secondary: SecondaryAddress,
    pub access_number: u8,
    pub status: u8,
    pub signature: u16,
}

/// Everything decoded from one user-data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Present when the CI selected a response format with a fixed header.
    pub header: Option<VariableDataHeader>,
    pub records: Vec<DataRecord>,
    /// Set when a DIF 0x1F sentinel asked for a follow-up request.
    pub more_records_follow: bool,
    /// Raw bytes following a DIF 0x0F marker.
    pub manufacturer_data: Option<Vec<u8>>,
}

/// Decodes the user data of a long or control frame.
///
/// The CI selects whether a fixed header precedes the records (0x72 long
/// header, 0x7A short header); any other CI is handed to the record walk
/// unchanged.
pub fn decode_user_data(ci: u8, payload: &[u8]) -> Result<DecodedPayload, DecodeError> {
    let (header, rest) = match ci {
        MBUS_CONTROL_INFO_RESP_VARIABLE => {
            if payload.len() < MBUS_VARIABLE_HEADER_LENGTH {
                return Err(DecodeError::TruncatedRecord {
                    needed: MBUS_VARIABLE_HEADER_LENGTH,
                    have: payload.len(),
                });
            }
            let mut id = [0u8; 8];
            id.copy_from_slice(&payload[0..8]);
            let secondary = SecondaryAddress::from_wire(id);
            let header = VariableDataHeader {
                secondary,
                access_number: payload[8],
                status: payload[9],
                signature: u16::from_le_bytes([payload[10], payload[11]]),
            };
            (Some(header), &payload[MBUS_VARIABLE_HEADER_LENGTH..])
        }
        MBUS_CONTROL_INFO_RESP_VARIABLE_SHORT => {
            if payload.len() < MBUS_SHORT_HEADER_LENGTH {
                return Err(DecodeError::TruncatedRecord {
                    needed: MBUS_SHORT_HEADER_LENGTH,
                    have: payload.len(),
                });
            }
            (None, &payload[MBUS_SHORT_HEADER_LENGTH..])
        }
        _ => (None, payload),
    };
    let mut decoded = decode_records(rest)?;
    decoded.header = header;
    Ok(decoded)
}

/// Decodes a raw data-record byte stream (no header).
pub fn decode_records(payload: &[u8]) -> Result<DecodedPayload, DecodeError> {
    let mut records = Vec::new();
    let mut more_records_follow = false;
    let mut manufacturer_data = None;
    let mut input = payload;

    while let Some(&dif) = input.first() {
        match dif {
            MBUS_DIB_DIF_IDLE_FILLER => {
                input = &input[1..];
            }
            MBUS_DIB_DIF_MANUFACTURER_SPECIFIC => {
                manufacturer_data = Some(input[1..].to_vec());
                break;
            }
            MBUS_DIB_DIF_MORE_RECORDS_FOLLOW => {
                more_records_follow = true;
                break;
            }
            _ => {
                let (rest, record) = parse_record(input)?;
                records.push(record);
                input = rest;
            }
        }
    }

    Ok(DecodedPayload {
        header: None,
        records,
        more_records_follow,
        manufacturer_data,
    })
}

/// Base length and encoding selected by the low four DIF bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFieldCode {
    NoData,
    Int8,
    Int16,
    Int24,
    Int32,
    Real32,
    Int48,
    Int64,
    SelectionForReadout,
    Bcd2,
    Bcd4,
    Bcd6,
    Bcd8,
    VarLen,
    Bcd12,
    SpecialFunction,
}

impl DataFieldCode {
    fn from_dif(dif: u8) -> Self {
        match dif & MBUS_DATA_RECORD_DIF_MASK_DATA {
            0x0 => DataFieldCode::NoData,
            0x1 => DataFieldCode::Int8,
            0x2 => DataFieldCode::Int16,
            0x3 => DataFieldCode::Int24,
            0x4 => DataFieldCode::Int32,
            0x5 => DataFieldCode::Real32,
            0x6 => DataFieldCode::Int48,
            0x7 => DataFieldCode::Int64,
            0x8 => DataFieldCode::SelectionForReadout,
            0x9 => DataFieldCode::Bcd2,
            0xA => DataFieldCode::Bcd4,
            0xB => DataFieldCode::Bcd6,
            0xC => DataFieldCode::Bcd8,
            0xD => DataFieldCode::VarLen,
            0xE => DataFieldCode::Bcd12,
            _ => DataFieldCode::SpecialFunction,
        }
    }

    /// Value length in bytes, `None` for variable-length fields.
    fn fixed_length(self) -> Option<usize> {
        match self {
            DataFieldCode::NoData | DataFieldCode::SelectionForReadout => Some(0),
            DataFieldCode::Int8 | DataFieldCode::Bcd2 => Some(1),
            DataFieldCode::Int16 | DataFieldCode::Bcd4 => Some(2),
            DataFieldCode::Int24 | DataFieldCode::Bcd6 => Some(3),
            DataFieldCode::Int32 | DataFieldCode::Real32 | DataFieldCode::Bcd8 => Some(4),
            DataFieldCode::Int48 | DataFieldCode::Bcd12 => Some(6),
            DataFieldCode::Int64 => Some(8),
            DataFieldCode::VarLen | DataFieldCode::SpecialFunction => None,
        }
    }
}

/// How the bytes of a variable-length value are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LvarKind {
    Text,
    BcdPositive,
    BcdNegative,
    Binary,
}

/// Parses a DIF or VIF extension chain: the head byte has already been read,
/// extensions follow while the previous byte's top bit is set.
fn parse_extensions(input: &[u8], head: u8) -> IResult<&[u8], Vec<u8>> {
    let mut extensions = Vec::new();
    let mut rest = input;
    let mut more = head & MBUS_DIB_EXTENSION_BIT != 0;
    while more {
        if extensions.len() == MBUS_DIB_MAX_EXTENSIONS {
            return Err(nom::Err::Error(nom::error::Error::new(
                rest,
                ErrorKind::TooLarge,
            )));
        }
        let (r, byte) = be_u8(rest)?;
        rest = r;
        extensions.push(byte);
        more = byte & MBUS_DIB_EXTENSION_BIT != 0;
    }
    Ok((rest, extensions))
}

/// Maps a nom chain-parse failure onto the decoder error taxonomy.
fn chain_error(err: nom::Err<nom::error::Error<&[u8]>>, too_long: DecodeError) -> DecodeError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) if e.code == ErrorKind::TooLarge => too_long,
        _ => DecodeError::TruncatedRecord { needed: 1, have: 0 },
    }
}

fn take_value<'a>(input: &'a [u8], needed: usize) -> Result<(&'a [u8], &'a [u8]), DecodeError> {
    if input.len() < needed {
        return Err(DecodeError::TruncatedRecord {
            needed,
            have: input.len(),
        });
    }
    Ok((&input[needed..], &input[..needed]))
}

/// Parses one record starting at a plain DIF byte.
fn parse_record(input: &[u8]) -> Result<(&[u8], DataRecord), DecodeError> {
    let dif = input[0];
    let (rest, difes) = parse_extensions(&input[1..], dif)
        .map_err(|e| chain_error(e, DecodeError::DifChainTooLong(MBUS_DIB_MAX_EXTENSIONS)))?;

    let mut storage_number = ((dif & MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO) >> 6) as u64;
    let mut tariff: u32 = 0;
    let mut sub_unit: u16 = 0;
    for (i, dife) in difes.iter().enumerate() {
        storage_number |= ((dife & MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO) as u64) << (1 + 4 * i);
        tariff |= (((dife & MBUS_DATA_RECORD_DIFE_MASK_TARIFF) >> 4) as u32) << (2 * i);
        sub_unit |= (((dife & MBUS_DATA_RECORD_DIFE_MASK_DEVICE) >> 6) as u16) << i;
    }

    let function = match (dif & MBUS_DATA_RECORD_DIF_MASK_FUNCTION) >> 4 {
        0b00 => RecordFunction::Instantaneous,
        0b01 => RecordFunction::Maximum,
        0b10 => RecordFunction::Minimum,
        _ => RecordFunction::ValueDuringError,
    };
    let code = DataFieldCode::from_dif(dif);

    // A special-function DIF that is not one of the global markers consumes
    // the rest of the frame as opaque data.
    if code == DataFieldCode::SpecialFunction {
        let record = DataRecord {
            storage_number,
            tariff,
            sub_unit,
            function,
            unit: String::new(),
            exponent: 1.0,
            quantity: "Manufacturer specific".to_string(),
            value: RecordValue::Bytes(rest.to_vec()),
            error: None,
        };
        return Ok((&rest[rest.len()..], record));
    }

    // VIF byte, optional plaintext unit, VIFE chain.
    let (rest, vif) = take_value(rest, 1).map(|(r, b)| (r, b[0]))?;
    let (rest, plaintext) = if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_VIF_PLAINTEXT {
        let (rest, len_byte) = take_value(rest, 1).map(|(r, b)| (r, b[0]))?;
        let (rest, text) = take_value(rest, len_byte as usize)?;
        (rest, Some(decode_string(text)))
    } else {
        (rest, None)
    };
    let (rest, vifes) = parse_extensions(rest, vif)
        .map_err(|e| chain_error(e, DecodeError::VifChainTooLong(MBUS_DIB_MAX_EXTENSIONS)))?;

    let resolved = resolve_vib(vif, &vifes, plaintext.as_deref());

    // Value length, resolving the LVAR length byte when present.
    let (rest, value_bytes, lvar) = match code.fixed_length() {
        Some(len) => {
            let (rest, bytes) = take_value(rest, len)?;
            (rest, bytes, None)
        }
        None => {
            let (rest, lvar_byte) = take_value(rest, 1).map(|(r, b)| (r, b[0]))?;
            let (len, kind) = match lvar_byte {
                0x00..=0xBF => (lvar_byte as usize, LvarKind::Text),
                0xC0..=0xCF => ((lvar_byte - 0xC0) as usize, LvarKind::BcdPositive),
                0xD0..=0xDF => ((lvar_byte - 0xD0) as usize, LvarKind::BcdNegative),
                0xE0..=0xEF => ((lvar_byte - 0xE0) as usize, LvarKind::Binary),
                0xF0..=0xF4 => ((lvar_byte - 0xF0) as usize * 4, LvarKind::Binary),
                _ => return Err(DecodeError::ReservedLvar(lvar_byte)),
            };
            let (rest, bytes) = take_value(rest, len)?;
            (rest, bytes, Some(kind))
        }
    };

    // An unresolvable VIF leaves the value opaque; everything else decodes
    // per the data field code, with the time-point VIFs overriding the
    // integer interpretation.
    let opaque = matches!(resolved.error, Some(DecodeError::UnknownVif(_)));
    let (value, value_error) = if opaque {
        (RecordValue::Bytes(value_bytes.to_vec()), None)
    } else {
        decode_value(code, lvar, vif, value_bytes)
    };

    let record = DataRecord {
        storage_number,
        tariff,
        sub_unit,
        function,
        unit: resolved.unit,
        exponent: resolved.exponent,
        quantity: resolved.quantity,
        value,
        error: resolved.error.or(value_error),
    };
    Ok((rest, record))
}

/// Decodes value bytes according to the data field code, returning the value
/// and an optional per-record error.
fn decode_value(
    code: DataFieldCode,
    lvar: Option<LvarKind>,
    vif: u8,
    bytes: &[u8],
) -> (RecordValue, Option<DecodeError>) {
    // Time points ride on integer-coded fields.
    match vif & MBUS_DIB_VIF_WITHOUT_EXTENSION {
        0x6C => {
            return match decode_date_cp16(bytes) {
                Ok(date) => (RecordValue::Date(date), None),
                Err(e) => (RecordValue::Bytes(bytes.to_vec()), Some(e)),
            };
        }
        0x6D => {
            let decoded = if bytes.len() == 6 {
                decode_datetime_cp48(bytes)
            } else {
                decode_datetime_cp32(bytes)
            };
            return match decoded {
                Ok(dt) => (RecordValue::DateTime(dt), None),
                Err(e) => (RecordValue::Bytes(bytes.to_vec()), Some(e)),
            };
        }
        _ => {}
    }

    match code {
        DataFieldCode::NoData | DataFieldCode::SelectionForReadout => (RecordValue::None, None),
        DataFieldCode::Int8
        | DataFieldCode::Int16
        | DataFieldCode::Int24
        | DataFieldCode::Int32
        | DataFieldCode::Int48
        | DataFieldCode::Int64 => (RecordValue::Integer(decode_int(bytes)), None),
        DataFieldCode::Real32 => match <[u8; 4]>::try_from(bytes) {
            Ok(array) => (RecordValue::Real(decode_real(&array) as f64), None),
            Err(_) => (
                RecordValue::Bytes(bytes.to_vec()),
                Some(DecodeError::TruncatedRecord {
                    needed: 4,
                    have: bytes.len(),
                }),
            ),
        },
        DataFieldCode::Bcd2 | DataFieldCode::Bcd4 | DataFieldCode::Bcd6 | DataFieldCode::Bcd8
        | DataFieldCode::Bcd12 => match decode_bcd(bytes) {
            Ok(v) => (RecordValue::Bcd(v as i64), None),
            Err(e) => (RecordValue::Bytes(bytes.to_vec()), Some(e)),
        },
        DataFieldCode::VarLen => match lvar {
            Some(LvarKind::Text) => (RecordValue::String(decode_string(bytes)), None),
            Some(LvarKind::BcdPositive) => match decode_bcd(bytes) {
                Ok(v) => (RecordValue::Bcd(v as i64), None),
                Err(e) => (RecordValue::Bytes(bytes.to_vec()), Some(e)),
            },
            Some(LvarKind::BcdNegative) => match decode_bcd(bytes) {
                Ok(v) => (RecordValue::Bcd(-(v as i64)), None),
                Err(e) => (RecordValue::Bytes(bytes.to_vec()), Some(e)),
            },
            Some(LvarKind::Binary) | None => (RecordValue::Bytes(bytes.to_vec()), None),
        },
        DataFieldCode::SpecialFunction => unreachable!("handled before value decoding"),
    }
}
