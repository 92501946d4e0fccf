//! # M-Bus Data Encodings
//!
//! Decoders for the value encodings of EN 13757-3 data records: little-endian
//! two's-complement integers (Type B), packed BCD (Type A), 32-bit reals
//! (Type H), LSB-first character strings, and the CP16/CP32/CP48 time points
//! (Types G, F and I).

use crate::error::DecodeError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Decodes a little-endian two's-complement integer of 1 to 8 bytes.
pub fn decode_int(input: &[u8]) -> i64 {
    if input.is_empty() {
        return 0;
    }
    let mut value: u64 = 0;
    for (i, byte) in input.iter().enumerate() {
        value |= (*byte as u64) << (8 * i);
    }
    let bits = input.len() * 8;
    if bits < 64 && (value >> (bits - 1)) & 1 == 1 {
        // Sign-extend the most significant transmitted bit.
        value |= !0u64 << bits;
    }
    value as i64
}

/// Decodes packed BCD, least significant byte first, two digits per byte.
///
/// Fails with [`DecodeError::InvalidBcd`] when a nibble is above 9 or the
/// digit count exceeds what an unsigned 64-bit value can carry.
pub fn decode_bcd(input: &[u8]) -> Result<u64, DecodeError> {
    let mut value: u128 = 0;
    let mut multiplier: u128 = 1;
    for byte in input {
        let low = byte & 0x0F;
        let high = byte >> 4;
        if low > 9 || high > 9 {
            return Err(DecodeError::InvalidBcd(input.to_vec()));
        }
        value += low as u128 * multiplier;
        multiplier *= 10;
        value += high as u128 * multiplier;
        multiplier *= 10;
    }
    u64::try_from(value).map_err(|_| DecodeError::InvalidBcd(input.to_vec()))
}

/// Encodes a value as packed BCD over `width` bytes, least significant byte
/// first. Digits beyond the field width are dropped.
pub fn encode_bcd(mut value: u64, width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width);
    for _ in 0..width {
        let low = (value % 10) as u8;
        value /= 10;
        let high = (value % 10) as u8;
        value /= 10;
        out.push((high << 4) | low);
    }
    out
}

/// Decodes a little-endian IEEE 754 single-precision real.
pub fn decode_real(input: &[u8; 4]) -> f32 {
    f32::from_le_bytes(*input)
}

/// Decodes an LSB-first character string.
///
/// M-Bus transmits strings with the last character first, so the bytes are
/// reversed before interpretation.
pub fn decode_string(input: &[u8]) -> String {
    let reversed: Vec<u8> = input.iter().rev().copied().collect();
    String::from_utf8_lossy(&reversed).into_owned()
}

/// Extracts the 7-bit year from the two bytes that carry its halves.
///
/// `lsp` holds the three least significant year bits in bits 7..5, `msp` the
/// four most significant in bits 7..4. Years below 81 fall in the 2000s.
fn year_from(lsp: u8, msp: u8) -> i32 {
    let year = (((msp & 0xF0) | ((lsp & 0xE0) >> 4)) >> 1) as i32;
    if year < 81 {
        2000 + year
    } else {
        1900 + year
    }
}

/// Decodes a Type G (CP16) date: day/year-LSB byte, month/year-MSB byte.
pub fn decode_date_cp16(input: &[u8]) -> Result<NaiveDate, DecodeError> {
    if input.len() != 2 {
        return Err(DecodeError::InvalidTimePoint(input.to_vec()));
    }
    let day = (input[0] & 0x1F) as u32;
    let month = (input[1] & 0x0F) as u32;
    let year = year_from(input[0], input[1]);
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DecodeError::InvalidTimePoint(input.to_vec()))
}

/// Decodes a Type F (CP32) date and time: minute, hour, day/year-LSB,
/// month/year-MSB. Bit 7 of the minute byte flags an invalid time point.
pub fn decode_datetime_cp32(input: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    if input.len() != 4 || input[0] & 0x80 != 0 {
        return Err(DecodeError::InvalidTimePoint(input.to_vec()));
    }
    let minute = (input[0] & 0x3F) as u32;
    let hour = (input[1] & 0x1F) as u32;
    let day = (input[2] & 0x1F) as u32;
    let month = (input[3] & 0x0F) as u32;
    let year = year_from(input[2], input[3]);
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DecodeError::InvalidTimePoint(input.to_vec()))?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| DecodeError::InvalidTimePoint(input.to_vec()))?;
    Ok(NaiveDateTime::new(date, time))
}

/// Decodes a Type I (CP48) date and time: second, minute, hour,
/// day/year-LSB, month/year-MSB, and a trailing status byte. Bit 6 of the
/// second byte flags an invalid time point.
pub fn decode_datetime_cp48(input: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    if input.len() != 6 || input[0] & 0x40 != 0 {
        return Err(DecodeError::InvalidTimePoint(input.to_vec()));
    }
    let second = (input[0] & 0x3F) as u32;
    let minute = (input[1] & 0x3F) as u32;
    let hour = (input[2] & 0x1F) as u32;
    let day = (input[3] & 0x1F) as u32;
    let month = (input[4] & 0x0F) as u32;
    let year = year_from(input[3], input[4]);
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DecodeError::InvalidTimePoint(input.to_vec()))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| DecodeError::InvalidTimePoint(input.to_vec()))?;
    Ok(NaiveDateTime::new(date, time))
}

/// Decodes the 2-byte manufacturer id into its three-letter code.
pub fn decode_manufacturer(id: u16) -> String {
    let mut id = id as u32;
    let mut code = String::with_capacity(3);
    code.push(char::from_u32((id / (32 * 32)) + 64).unwrap_or('?'));
    id %= 32 * 32;
    code.push(char::from_u32((id / 32) + 64).unwrap_or('?'));
    id %= 32;
    code.push(char::from_u32(id + 64).unwrap_or('?'));
    code
}

/// Encodes a three-letter manufacturer code into its 2-byte id.
pub fn encode_manufacturer(code: &str) -> Option<u16> {
    let bytes = code.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let id = ((bytes[0] - 64) as u16) * 32 * 32
        + ((bytes[1] - 64) as u16) * 32
        + (bytes[2] - 64) as u16;
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_int_little_endian() {
        assert_eq!(decode_int(&[0xE8, 0x03, 0x00, 0x00]), 1000);
        assert_eq!(decode_int(&[0x2A]), 42);
    }

    #[test]
    fn test_decode_int_sign_extension() {
        assert_eq!(decode_int(&[0xFF]), -1);
        assert_eq!(decode_int(&[0xFE, 0xFF]), -2);
        assert_eq!(decode_int(&[0x00, 0x00, 0x80]), -(1 << 23));
    }

    #[test]
    fn test_decode_bcd_low_to_high_nibbles() {
        // 12345678 over four bytes, least significant pair first.
        assert_eq!(decode_bcd(&[0x78, 0x56, 0x34, 0x12]).unwrap(), 12345678);
    }

    #[test]
    fn test_decode_bcd_rejects_hex_nibbles() {
        assert!(matches!(
            decode_bcd(&[0x1A]),
            Err(DecodeError::InvalidBcd(_))
        ));
    }

    #[test]
    fn test_bcd_round_trip() {
        let bytes = encode_bcd(87654321, 4);
        assert_eq!(bytes, vec![0x21, 0x43, 0x65, 0x87]);
        assert_eq!(decode_bcd(&bytes).unwrap(), 87654321);
    }

    #[test]
    fn test_decode_real_little_endian() {
        let bytes = 12.5f32.to_le_bytes();
        assert_eq!(decode_real(&bytes), 12.5);
    }

    #[test]
    fn test_decode_string_reverses_transmit_order() {
        assert_eq!(decode_string(b"321DIC"), "CID123");
    }

    #[test]
    fn test_decode_date_cp16() {
        // 2013-10-23: day 23, month 10, year 13 -> lsp bits 0b101, msp 0b0001.
        let date = decode_date_cp16(&[0xB7, 0x1A]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2013, 10, 23).unwrap());
    }

    #[test]
    fn test_decode_datetime_cp32_invalid_flag() {
        assert!(decode_datetime_cp32(&[0x80, 0x00, 0x01, 0x01]).is_err());
    }

    #[test]
    fn test_decode_datetime_cp32() {
        // 2008-05-31 23:50.
        let dt = decode_datetime_cp32(&[0x32, 0x17, 0x1F, 0x15]).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2008, 5, 31).unwrap());
        assert_eq!(dt.time(), NaiveTime::from_hms_opt(23, 50, 0).unwrap());
    }

    #[test]
    fn test_manufacturer_round_trip() {
        let id = encode_manufacturer("KAM").unwrap();
        assert_eq!(decode_manufacturer(id), "KAM");
        assert!(encode_manufacturer("ka").is_none());
    }
}
