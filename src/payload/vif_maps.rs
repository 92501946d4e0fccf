//! VIF/VIFE Lookup Tables
//!
//! Unit and multiplier resolution for the Value Information Fields of
//! EN 13757-3: the primary table (VIF 0x00–0x7A), the FD and FB extension
//! tables, and the combinable VIFE modifiers.
//!
//! Most primary codes encode their decimal exponent in the low bits, so the
//! primary table is computed from the code instead of spelled out row by row.
//! The FD table is irregular and kept as a constant list.

use crate::payload::vif::VifInfo;
use once_cell::sync::Lazy;
use std::collections::HashMap;

fn pow10(exp: i32) -> f64 {
    10f64.powi(exp)
}

/// Time units selected by the low two bits of duration VIFs.
fn duration_unit(code: u8) -> &'static str {
    match code & 0x03 {
        0 => "s",
        1 => "min",
        2 => "h",
        _ => "days",
    }
}

/// Looks up a primary VIF code (extension bit ignored).
///
/// Returns `None` for reserved codes and for the codes that the caller must
/// treat structurally (plaintext 0x7C, extension selectors, manufacturer
/// specific).
pub fn lookup_primary_vif(code: u8) -> Option<VifInfo> {
    let vif = code & 0x7F;
    let n3 = (vif & 0x07) as i32;
    let n2 = (vif & 0x03) as i32;
    let info = |unit: &'static str, exponent: f64, quantity: &'static str| VifInfo {
        vif: vif as u16,
        unit,
        exponent,
        quantity,
    };
    let entry = match vif {
        0x00..=0x07 => info("Wh", pow10(n3 - 3), "Energy"),
        0x08..=0x0F => info("J", pow10(n3), "Energy"),
        0x10..=0x17 => info("m^3", pow10(n3 - 6), "Volume"),
        0x18..=0x1F => info("kg", pow10(n3 - 3), "Mass"),
        0x20..=0x23 => info(duration_unit(vif), 1.0, "On time"),
        0x24..=0x27 => info(duration_unit(vif), 1.0, "Operating time"),
        0x28..=0x2F => info("W", pow10(n3 - 3), "Power"),
        0x30..=0x37 => info("J/h", pow10(n3), "Power"),
        0x38..=0x3F => info("m^3/h", pow10(n3 - 6), "Volume flow"),
        0x40..=0x47 => info("m^3/min", pow10(n3 - 7), "Volume flow"),
        0x48..=0x4F => info("m^3/s", pow10(n3 - 9), "Volume flow"),
        0x50..=0x57 => info("kg/h", pow10(n3 - 3), "Mass flow"),
        0x58..=0x5B => info("°C", pow10(n2 - 3), "Flow temperature"),
        0x5C..=0x5F => info("°C", pow10(n2 - 3), "Return temperature"),
        0x60..=0x63 => info("K", pow10(n2 - 3), "Temperature difference"),
        0x64..=0x67 => info("°C", pow10(n2 - 3), "External temperature"),
        0x68..=0x6B => info("bar", pow10(n2 - 3), "Pressure"),
        0x6C => info("", 1.0, "Time point (date)"),
        0x6D => info("", 1.0, "Time point (date & time)"),
        0x6E => info("HCA units", 1.0, "Heat cost allocation"),
        0x70..=0x73 => info(duration_unit(vif), 1.0, "Averaging duration"),
        0x74..=0x77 => info(duration_unit(vif), 1.0, "Actuality duration"),
        0x78 => info("", 1.0, "Fabrication number"),
        0x79 => info("", 1.0, "Enhanced identification"),
        0x7A => info("", 1.0, "Bus address"),
        // 0x6F reserved; 0x7B-0x7F are structural and resolved by the caller.
        _ => return None,
    };
    Some(entry)
}

/// FD extension codes (first VIF byte 0xFD) without a computable pattern.
pub const VIFE_FD_CODES: &[(u8, &str, f64, &str)] = &[
    (0x08, "", 1.0, "Access number"),
    (0x09, "", 1.0, "Medium"),
    (0x0A, "", 1.0, "Manufacturer"),
    (0x0B, "", 1.0, "Parameter set identification"),
    (0x0C, "", 1.0, "Model / version"),
    (0x0D, "", 1.0, "Hardware version"),
    (0x0E, "", 1.0, "Firmware version"),
    (0x0F, "", 1.0, "Software version"),
    (0x10, "", 1.0, "Customer location"),
    (0x11, "", 1.0, "Customer"),
    (0x17, "", 1.0, "Error flags"),
    (0x18, "", 1.0, "Error mask"),
    (0x1A, "", 1.0, "Digital output"),
    (0x1B, "", 1.0, "Digital input"),
    (0x1C, "Bd", 1.0, "Baud rate"),
    (0x1D, "bit times", 1.0, "Response delay"),
    (0x1E, "", 1.0, "Retry"),
    (0x20, "", 1.0, "First storage number"),
    (0x21, "", 1.0, "Last storage number"),
    (0x22, "", 1.0, "Size of storage block"),
    (0x60, "", 1.0, "Reset counter"),
    (0x61, "", 1.0, "Cumulation counter"),
    (0x62, "", 1.0, "Control signal"),
    (0x63, "", 1.0, "Day of week"),
    (0x64, "", 1.0, "Week number"),
    (0x65, "", 1.0, "Time point of day change"),
    (0x66, "", 1.0, "State of parameter activation"),
    (0x67, "", 1.0, "Special supplier information"),
    (0x70, "", 1.0, "Date and time of battery change"),
];

static VIFE_FD_MAP: Lazy<HashMap<u8, VifInfo>> = Lazy::new(|| {
    VIFE_FD_CODES
        .iter()
        .map(|(code, unit, exponent, quantity)| {
            (
                *code,
                VifInfo {
                    vif: 0x100 + *code as u16,
                    unit,
                    exponent: *exponent,
                    quantity,
                },
            )
        })
        .collect()
});

/// Looks up an FD-extension code (extension bit ignored).
pub fn lookup_vife_fd(code: u8) -> Option<VifInfo> {
    let code = code & 0x7F;
    let n4 = (code & 0x0F) as i32;
    match code {
        // Credit / debit of 10^(nn-3) currency units.
        0x00..=0x03 => Some(VifInfo {
            vif: 0x100 + code as u16,
            unit: "currency units",
            exponent: pow10((code & 0x03) as i32 - 3),
            quantity: "Credit",
        }),
        0x04..=0x07 => Some(VifInfo {
            vif: 0x100 + code as u16,
            unit: "currency units",
            exponent: pow10((code & 0x03) as i32 - 3),
            quantity: "Debit",
        }),
        0x40..=0x4F => Some(VifInfo {
            vif: 0x100 + code as u16,
            unit: "V",
            exponent: pow10(n4 - 9),
            quantity: "Voltage",
        }),
        0x50..=0x5F => Some(VifInfo {
            vif: 0x100 + code as u16,
            unit: "A",
            exponent: pow10(n4 - 12),
            quantity: "Current",
        }),
        _ => VIFE_FD_MAP.get(&code).cloned(),
    }
}

/// Looks up an FB-extension code (extension bit ignored). The FB table is
/// fully regular, so every entry is computed.
pub fn lookup_vife_fb(code: u8) -> Option<VifInfo> {
    let code = code & 0x7F;
    let n1 = (code & 0x01) as i32;
    let entry = |unit: &'static str, exponent: f64, quantity: &'static str| VifInfo {
        vif: 0x200 + code as u16,
        unit,
        exponent,
        quantity,
    };
    match code {
        0x00..=0x01 => Some(entry("MWh", pow10(n1 - 1), "Energy")),
        0x08..=0x09 => Some(entry("GJ", pow10(n1 - 1), "Energy")),
        0x10..=0x11 => Some(entry("m^3", pow10(n1 + 2), "Volume")),
        0x18..=0x19 => Some(entry("t", pow10(n1 + 2), "Mass")),
        0x58..=0x5B => Some(entry("°F", pow10((code & 0x03) as i32 - 3), "Flow temperature")),
        0x60..=0x63 => Some(entry(
            "°F",
            pow10((code & 0x03) as i32 - 3),
            "Temperature difference",
        )),
        _ => None,
    }
}

/// Looks up a combinable VIFE modifier that follows a primary VIF.
///
/// Returns the multiplicative correction factor, or `None` for codes the
/// crate does not interpret (the record is then tagged with an
/// `UnknownVife`).
pub fn lookup_combinable_vife(code: u8) -> Option<f64> {
    let code = code & 0x7F;
    match code {
        // Multiplicative correction factor 10^(nnn-6).
        0x70..=0x77 => Some(pow10((code & 0x07) as i32 - 6)),
        _ => None,
    }
}
