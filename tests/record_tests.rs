//! Integration tests for the data record decoder: DIB/VIB chains, value
//! encodings, per-record error isolation, and truncation robustness.

use chrono::NaiveDate;
use mbus_master::payload::record::RecordFunction;
use mbus_master::{decode_records, decode_user_data, DecodeError, RecordValue};
use proptest::prelude::*;

#[test]
fn test_volume_record_worked_example() {
    // DIF 0x04: 32-bit integer, instantaneous, no storage. VIF 0x13: volume
    // in 10^-3 m^3. Value 0x000003E8 = 1000 -> 1.000 m^3.
    let payload = [0x04, 0x13, 0xE8, 0x03, 0x00, 0x00];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records.len(), 1);
    let record = &decoded.records[0];
    assert_eq!(record.value, RecordValue::Integer(1000));
    assert_eq!(record.unit, "m^3");
    assert_eq!(record.exponent, 1e-3);
    assert_eq!(record.quantity, "Volume");
    assert_eq!(record.function, RecordFunction::Instantaneous);
    assert_eq!(record.storage_number, 0);
    assert_eq!(record.scaled_value(), Some(1.0));
}

#[test]
fn test_multiple_records_in_sequence() {
    let payload = [
        0x04, 0x13, 0xE8, 0x03, 0x00, 0x00, // volume, int32
        0x02, 0x5B, 0x15, 0x00, // flow temperature, int16, 21 degrees
        0x01, 0x2B, 0x07, // power, int8
    ];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records.len(), 3);
    assert_eq!(decoded.records[1].value, RecordValue::Integer(21));
    assert_eq!(decoded.records[1].quantity, "Flow temperature");
    assert_eq!(decoded.records[2].value, RecordValue::Integer(7));
}

#[test]
fn test_bcd_record() {
    // DIF 0x0C: 8-digit BCD. VIF 0x03: energy in Wh.
    let payload = [0x0C, 0x03, 0x78, 0x56, 0x34, 0x12];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records[0].value, RecordValue::Bcd(12345678));
    assert_eq!(decoded.records[0].unit, "Wh");
}

#[test]
fn test_bcd_with_hex_nibble_is_isolated() {
    // A BCD field carrying 0xAB keeps the raw bytes and flags the record,
    // and the following record still decodes.
    let payload = [0x0A, 0x03, 0xAB, 0x12, 0x01, 0x2B, 0x07];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records.len(), 2);
    let bad = &decoded.records[0];
    assert_eq!(bad.value, RecordValue::Bytes(vec![0xAB, 0x12]));
    assert!(matches!(bad.error, Some(DecodeError::InvalidBcd(_))));
    assert_eq!(decoded.records[1].value, RecordValue::Integer(7));
}

#[test]
fn test_real32_record() {
    let mut payload = vec![0x05, 0x5B];
    payload.extend_from_slice(&21.5f32.to_le_bytes());
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records[0].value, RecordValue::Real(21.5));
}

#[test]
fn test_idle_filler_is_skipped() {
    let payload = [0x2F, 0x2F, 0x01, 0x2B, 0x07, 0x2F];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records.len(), 1);
}

#[test]
fn test_more_records_follow_sentinel() {
    let payload = [0x04, 0x13, 0xE8, 0x03, 0x00, 0x00, 0x1F];
    let decoded = decode_records(&payload).unwrap();
    assert!(decoded.more_records_follow);
    assert_eq!(decoded.records.len(), 1);
}

#[test]
fn test_manufacturer_specific_tail() {
    let payload = [0x01, 0x2B, 0x07, 0x0F, 0x01, 0x02, 0x03];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.manufacturer_data, Some(vec![0x01, 0x02, 0x03]));
    assert_eq!(decoded.records.len(), 1);
}

#[test]
fn test_unknown_vif_keeps_raw_value() {
    // VIF 0x6F is reserved; the record survives with opaque bytes and the
    // next record is unaffected.
    let payload = [0x02, 0x6F, 0xAA, 0xBB, 0x01, 0x2B, 0x07];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records.len(), 2);
    let unknown = &decoded.records[0];
    assert_eq!(unknown.value, RecordValue::Bytes(vec![0xAA, 0xBB]));
    assert_eq!(unknown.error, Some(DecodeError::UnknownVif(0x6F)));
    assert_eq!(decoded.records[1].error, None);
}

#[test]
fn test_lvar_string_record() {
    // DIF 0x0D: variable length. VIF 0x78: fabrication number. LVAR 0x03
    // text, transmitted LSB first.
    let payload = [0x0D, 0x78, 0x03, b'C', b'B', b'A'];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(
        decoded.records[0].value,
        RecordValue::String("ABC".to_string())
    );
}

#[test]
fn test_lvar_negative_bcd() {
    // LVAR 0xD2: negative BCD of 4 digits.
    let payload = [0x0D, 0x03, 0xD2, 0x34, 0x12];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records[0].value, RecordValue::Bcd(-1234));
}

#[test]
fn test_lvar_binary() {
    let payload = [0x0D, 0x03, 0xE2, 0xDE, 0xAD];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(
        decoded.records[0].value,
        RecordValue::Bytes(vec![0xDE, 0xAD])
    );
}

#[test]
fn test_lvar_reserved_length_byte_aborts() {
    let payload = [0x0D, 0x13, 0xFF, 0x00];
    assert!(matches!(
        decode_records(&payload),
        Err(DecodeError::ReservedLvar(0xFF))
    ));
}

#[test]
fn test_date_record() {
    // DIF 0x02 + VIF 0x6C: type G date 2013-10-23.
    let payload = [0x02, 0x6C, 0xB7, 0x1A];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(
        decoded.records[0].value,
        RecordValue::Date(NaiveDate::from_ymd_opt(2013, 10, 23).unwrap())
    );
}

#[test]
fn test_datetime_record() {
    // DIF 0x04 + VIF 0x6D: type F date and time.
    let payload = [0x04, 0x6D, 0x32, 0x17, 0x1F, 0x15];
    let decoded = decode_records(&payload).unwrap();
    match &decoded.records[0].value {
        RecordValue::DateTime(dt) => {
            assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2008, 5, 31).unwrap());
        }
        other => panic!("expected a date-time value, got {other:?}"),
    }
}

#[test]
fn test_invalid_datetime_is_isolated() {
    // Invalid flag set in the minute byte.
    let payload = [0x04, 0x6D, 0x80, 0x00, 0x01, 0x01, 0x01, 0x2B, 0x07];
    let decoded = decode_records(&payload).unwrap();
    assert!(matches!(
        decoded.records[0].error,
        Some(DecodeError::InvalidTimePoint(_))
    ));
    assert_eq!(decoded.records[1].value, RecordValue::Integer(7));
}

#[test]
fn test_plaintext_unit() {
    // VIF 0x7C with a 3-byte ASCII unit ("gal" transmitted reversed).
    let payload = [0x01, 0x7C, 0x03, b'l', b'a', b'g', 0x2A];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records[0].unit, "gal");
    assert_eq!(decoded.records[0].value, RecordValue::Integer(42));
}

#[test]
fn test_storage_number_from_dif_and_dife() {
    // DIF 0x84 0x0A: storage LSB clear, one DIFE with storage bits 0b1010.
    let payload = [0x84, 0x0A, 0x13, 0xE8, 0x03, 0x00, 0x00];
    let decoded = decode_records(&payload).unwrap();
    assert_eq!(decoded.records[0].storage_number, 0b1010 << 1);
}

#[test]
fn test_dife_chain_too_long_aborts() {
    let mut payload = vec![0x84u8];
    payload.extend(std::iter::repeat(0x80).take(11));
    payload.extend_from_slice(&[0x13, 0x00, 0x00, 0x00, 0x00]);
    assert!(matches!(
        decode_records(&payload),
        Err(DecodeError::DifChainTooLong(10))
    ));
}

#[test]
fn test_truncated_record_aborts_remainder() {
    let payload = [0x04, 0x13, 0xE8, 0x03];
    assert!(matches!(
        decode_records(&payload),
        Err(DecodeError::TruncatedRecord { .. })
    ));
}

#[test]
fn test_variable_header_extraction() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0x78, 0x56, 0x34, 0x12]); // ident BCD
    payload.extend_from_slice(&[0x42, 0x04]); // manufacturer
    payload.push(0x01); // version
    payload.push(0x07); // medium
    payload.push(0x2A); // access number
    payload.push(0x00); // status
    payload.extend_from_slice(&[0x00, 0x00]); // signature
    payload.extend_from_slice(&[0x04, 0x13, 0xE8, 0x03, 0x00, 0x00]);

    let decoded = decode_user_data(0x72, &payload).unwrap();
    let header = decoded.header.unwrap();
    assert_eq!(header.secondary.ident, 0x12345678);
    assert_eq!(header.secondary.manufacturer, 0x0442);
    assert_eq!(header.secondary.medium, 0x07);
    assert_eq!(header.access_number, 0x2A);
    assert_eq!(decoded.records.len(), 1);
}

#[test]
fn test_unknown_ci_payload_is_record_stream() {
    let decoded = decode_user_data(0x76, &[0x01, 0x2B, 0x07]).unwrap();
    assert!(decoded.header.is_none());
    assert_eq!(decoded.records.len(), 1);
}

proptest! {
    /// Truncating a valid payload at any byte boundary either decodes a
    /// shorter record sequence or reports a truncation; it never panics.
    #[test]
    fn prop_truncation_robustness(cut in 0usize..=21) {
        let payload = [
            0x04, 0x13, 0xE8, 0x03, 0x00, 0x00,
            0x84, 0x0A, 0x13, 0x01, 0x00, 0x00, 0x00,
            0x02, 0x5B, 0x15, 0x00,
            0x0D, 0x78, 0x02, b'B', b'A',
        ];
        let cut = cut.min(payload.len());
        match decode_records(&payload[..cut]) {
            Ok(decoded) => prop_assert!(decoded.records.len() <= 4),
            Err(e) => {
                let is_truncated = matches!(e, DecodeError::TruncatedRecord { .. });
                prop_assert!(is_truncated);
            }
        }
    }

    /// Arbitrary bytes never panic the decoder.
    #[test]
    fn prop_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode_records(&data);
    }
}
