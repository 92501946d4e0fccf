//! The payload module contains the components responsible for decoding the
//! data records carried by user-data responses.

pub mod data_encoding;
pub mod record;
pub mod vif;
pub mod vif_maps;

pub use record::{decode_records, decode_user_data, DataRecord, DecodedPayload, RecordValue};
pub use vif::{resolve_vib, VifInfo};
