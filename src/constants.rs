//! M-Bus Protocol Constants
//!
//! This module defines constants used in the M-Bus master implementation,
//! based on the EN 13757-3 standard.

use bitflags::bitflags;

// ----------------------------------------------------------------------------
// Frame delimiters and limits
// ----------------------------------------------------------------------------

/// Single-character acknowledgment frame.
pub const MBUS_FRAME_ACK: u8 = 0xE5;

/// Start byte of a short frame.
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Start byte of a control or long frame (appears twice).
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte terminating every multi-byte frame.
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Maximum user-data payload of a long frame. The length field covers
/// C + A + CI + payload and must fit in one byte (255 - 3).
pub const MBUS_FRAME_DATA_MAX: usize = 252;

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

/// Lowest assignable primary slave address.
pub const MBUS_ADDRESS_SLAVE_MIN: u8 = 1;

/// Highest assignable primary slave address.
pub const MBUS_ADDRESS_SLAVE_MAX: u8 = 250;

/// Network layer address used for secondary (8-byte id) selection.
pub const MBUS_ADDRESS_NETWORK_LAYER: u8 = 0xFD;

/// Broadcast address; slaves act on the frame but send no reply.
pub const MBUS_ADDRESS_BROADCAST: u8 = 0xFE;

/// Address of slaves that have not been configured yet.
pub const MBUS_ADDRESS_UNCONFIGURED: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Control field (full bytes for the common master commands)
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_SND_UD: u8 = 0x53; // includes DIR M2S + FCV
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S + FCV
pub const MBUS_CONTROL_MASK_REQ_UD1: u8 = 0x5A; // includes DIR M2S + FCV
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

bitflags! {
    /// Individual bits of the control field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u8 {
        /// Frame count bit, alternates per confirmed request.
        const FCB = 0x20;
        /// Frame count valid; when clear the FCB is ignored by the slave.
        const FCV = 0x10;
        /// Master-to-slave direction.
        const DIR_M2S = 0x40;
    }
}

// ----------------------------------------------------------------------------
// Control information (CI) codes
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_DATA_SEND: u8 = 0x51;
pub const MBUS_CONTROL_INFO_SELECT_SLAVE: u8 = 0x52;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;
pub const MBUS_CONTROL_INFO_RESP_FIXED: u8 = 0x73;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE_SHORT: u8 = 0x7A;

/// Byte length of the fixed data header opening a CI 0x72 response.
pub const MBUS_VARIABLE_HEADER_LENGTH: usize = 12;

/// Byte length of the short header opening a CI 0x7A response.
pub const MBUS_SHORT_HEADER_LENGTH: usize = 4;

// ----------------------------------------------------------------------------
// Data information block (DIF / DIFE)
// ----------------------------------------------------------------------------

/// DIF mask for the data field (length/encoding code).
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// DIF mask for the function field.
pub const MBUS_DATA_RECORD_DIF_MASK_FUNCTION: u8 = 0x30;

/// DIF mask for the storage number LSB.
pub const MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO: u8 = 0x40;

/// DIFE mask for the storage number bits.
pub const MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO: u8 = 0x0F;

/// DIFE mask for the tariff bits.
pub const MBUS_DATA_RECORD_DIFE_MASK_TARIFF: u8 = 0x30;

/// DIFE mask for the device (sub-unit) bit.
pub const MBUS_DATA_RECORD_DIFE_MASK_DEVICE: u8 = 0x40;

/// DIF idle filler, skipped between records.
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// DIF announcing manufacturer-specific data up to the end of the frame.
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// DIF announcing that more records follow in a subsequent frame.
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// Extension bit of DIF/DIFE and VIF/VIFE bytes.
pub const MBUS_DIB_EXTENSION_BIT: u8 = 0x80;

/// Maximum number of DIFE (or VIFE) extension bytes in one chain.
pub const MBUS_DIB_MAX_EXTENSIONS: usize = 10;

// ----------------------------------------------------------------------------
// Value information block (VIF / VIFE)
// ----------------------------------------------------------------------------

/// VIF code bits without the extension bit.
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

/// First VIF byte selecting the FB extension table.
pub const MBUS_VIF_EXTENSION_FB: u8 = 0xFB;

/// First VIF byte selecting the FD extension table.
pub const MBUS_VIF_EXTENSION_FD: u8 = 0xFD;

/// VIF code announcing a plaintext (ASCII) unit string.
pub const MBUS_VIF_PLAINTEXT: u8 = 0x7C;

/// Maximum length of a plaintext unit string.
pub const MBUS_VIF_PLAINTEXT_MAX: usize = 16;

// ----------------------------------------------------------------------------
// Session defaults
// ----------------------------------------------------------------------------

/// Default number of attempts per exchange (initial send + retries).
pub const MBUS_MAX_RETRIES_DEFAULT: u8 = 3;

/// Hard cap on "more records follow" continuation frames in one poll.
pub const MBUS_RESPONSE_CHAIN_MAX: usize = 16;
