//! Value Information Block resolution.
//!
//! A VIB is the VIF byte plus its VIFE extension chain. This module turns a
//! raw chain into a unit, a decimal multiplier and a quantity, consulting the
//! primary table or the FB/FD extension tables and applying combinable
//! modifiers. Unknown codes are non-fatal: resolution reports the first
//! offending code and the record decoder keeps the value as opaque bytes.

use crate::constants::{MBUS_VIF_EXTENSION_FB, MBUS_VIF_EXTENSION_FD};
use crate::error::DecodeError;
use crate::payload::vif_maps::{
    lookup_combinable_vife, lookup_primary_vif, lookup_vife_fb, lookup_vife_fd,
};

/// One resolved VIF table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VifInfo {
    /// Table-qualified code: primary 0x00–0x7F, FD 0x100+, FB 0x200+.
    pub vif: u16,
    pub unit: &'static str,
    pub exponent: f64,
    pub quantity: &'static str,
}

/// The outcome of resolving a VIB chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVib {
    pub unit: String,
    pub exponent: f64,
    pub quantity: String,
    /// First unresolved code in the chain, if any. The value is then left
    /// opaque by the record decoder.
    pub error: Option<DecodeError>,
}

impl ResolvedVib {
    fn unknown(error: DecodeError) -> Self {
        ResolvedVib {
            unit: String::new(),
            exponent: 1.0,
            quantity: String::new(),
            error: Some(error),
        }
    }

    fn from_info(info: &VifInfo) -> Self {
        ResolvedVib {
            unit: info.unit.to_string(),
            exponent: info.exponent,
            quantity: info.quantity.to_string(),
            error: None,
        }
    }
}

/// Resolves a VIB chain into unit, multiplier and quantity.
///
/// `vif` is the first VIF byte as transmitted (extension bit included),
/// `vifes` the extension bytes that followed it, and `plaintext` the ASCII
/// unit when `vif` announced one (0x7C).
pub fn resolve_vib(vif: u8, vifes: &[u8], plaintext: Option<&str>) -> ResolvedVib {
    if let Some(unit) = plaintext {
        let mut resolved = ResolvedVib {
            unit: unit.to_string(),
            exponent: 1.0,
            quantity: "Plain text unit".to_string(),
            error: None,
        };
        apply_combinable(&mut resolved, vifes);
        return resolved;
    }

    match vif {
        MBUS_VIF_EXTENSION_FD => {
            let Some((first, rest)) = vifes.split_first() else {
                return ResolvedVib::unknown(DecodeError::UnknownVif(vif));
            };
            let mut resolved = match lookup_vife_fd(*first) {
                Some(info) => ResolvedVib::from_info(&info),
                None => ResolvedVib::unknown(DecodeError::UnknownVife(*first)),
            };
            apply_combinable(&mut resolved, rest);
            resolved
        }
        MBUS_VIF_EXTENSION_FB => {
            let Some((first, rest)) = vifes.split_first() else {
                return ResolvedVib::unknown(DecodeError::UnknownVif(vif));
            };
            let mut resolved = match lookup_vife_fb(*first) {
                Some(info) => ResolvedVib::from_info(&info),
                None => ResolvedVib::unknown(DecodeError::UnknownVife(*first)),
            };
            apply_combinable(&mut resolved, rest);
            resolved
        }
        _ => match vif & 0x7F {
            // Wildcard "any VIF" used in readout selections.
            0x7E => ResolvedVib {
                unit: String::new(),
                exponent: 1.0,
                quantity: "Any VIF".to_string(),
                error: None,
            },
            0x7F => ResolvedVib {
                unit: String::new(),
                exponent: 1.0,
                quantity: "Manufacturer specific".to_string(),
                error: None,
            },
            code => {
                let mut resolved = match lookup_primary_vif(code) {
                    Some(info) => ResolvedVib::from_info(&info),
                    None => ResolvedVib::unknown(DecodeError::UnknownVif(code)),
                };
                apply_combinable(&mut resolved, vifes);
                resolved
            }
        },
    }
}

/// Applies combinable VIFE modifiers to an already resolved entry. The first
/// unrecognized modifier is recorded; resolution continues past it so later
/// correction factors still apply.
fn apply_combinable(resolved: &mut ResolvedVib, vifes: &[u8]) {
    for vife in vifes {
        match lookup_combinable_vife(*vife) {
            Some(factor) => resolved.exponent *= factor,
            None => {
                if resolved.error.is_none() {
                    resolved.error = Some(DecodeError::UnknownVife(*vife & 0x7F));
                }
            }
        }
    }
}
