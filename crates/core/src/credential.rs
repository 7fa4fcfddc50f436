//! Credential normalization per variant.
//!
//! A credential is compared only in its normalized form, both when it is
//! stored at creation and when it is presented at the gate.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::GateError;
use crate::variant::Variant;

/// Minimum length of a delivery code typed at the gate.
pub const MIN_DELIVERY_CODE_LEN: usize = 3;

pub const DELIVERY_CODE_PREFIX: &str = "DLV-";
pub const VISITOR_QR_PREFIX: &str = "VIS-";

/// Normalize a raw credential for `variant`.
pub fn normalize(variant: Variant, raw: &str) -> Result<String, GateError> {
    let trimmed = raw.trim();
    match variant {
        Variant::Delivery => {
            if trimmed.is_empty() {
                return Err(GateError::validation(
                    "credential",
                    "please enter a delivery code",
                ));
            }
            if trimmed.chars().count() < MIN_DELIVERY_CODE_LEN {
                return Err(GateError::validation(
                    "credential",
                    format!(
                        "delivery code must be at least {} characters",
                        MIN_DELIVERY_CODE_LEN
                    ),
                ));
            }
            Ok(trimmed.to_uppercase())
        }
        Variant::Visitor => {
            if trimmed.is_empty() {
                return Err(GateError::validation("credential", "please enter a QR code"));
            }
            Ok(trimmed.to_string())
        }
        Variant::Staff => {
            if trimmed.is_empty() {
                return Err(GateError::validation(
                    "credential",
                    "permanent ID is required",
                ));
            }
            Ok(trimmed.to_uppercase())
        }
        Variant::Vehicle => normalize_plate(trimmed),
        Variant::Emergency => Err(GateError::validation(
            "credential",
            "emergency alerts are addressed by id, not by credential",
        )),
    }
}

/// Uppercase a plate, drop spaces and hyphens, and check its shape:
/// two letters, 1-2 digits, 0-2 letters, 1-4 digits (`MH12AB1234`).
pub fn normalize_plate(raw: &str) -> Result<String, GateError> {
    let plate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if plate.is_empty() {
        return Err(GateError::validation(
            "vehicle_no",
            "vehicle number is required",
        ));
    }
    if !is_plate(&plate) {
        return Err(GateError::validation(
            "vehicle_no",
            format!(
                "invalid vehicle number format '{}' (e.g., MH12AB1234)",
                plate
            ),
        ));
    }
    Ok(plate)
}

fn plate_regex() -> &'static Regex {
    static PLATE_RE: OnceLock<Regex> = OnceLock::new();
    PLATE_RE.get_or_init(|| {
        Regex::new(r"^[A-Z]{2}[0-9]{1,2}[A-Z]{0,2}[0-9]{1,4}$")
            .expect("plate regex should compile")
    })
}

fn is_plate(plate: &str) -> bool {
    plate_regex().is_match(plate)
}
