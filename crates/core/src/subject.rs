//! Descriptive fields carried by each tracked entity.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::GateError;
use crate::variant::Variant;

pub const VEHICLE_TYPES: &[&str] = &["car", "bike", "scooter", "truck", "other"];

pub const ALERT_TYPES: &[&str] = &[
    "Fire",
    "Medical",
    "Security Threat",
    "Suspicious Person",
    "Unauthorized Entry",
    "Other",
];

fn default_purpose() -> String {
    "Guest".to_string()
}

fn default_staff_role() -> String {
    "staff".to_string()
}

fn default_vehicle_type() -> String {
    "car".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySubject {
    pub delivery_person_name: String,
    pub phone: String,
    pub delivery_company: String,
    pub apartment: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expected_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitorSubject {
    pub name: String,
    pub phone: String,
    pub flat_no: String,
    #[serde(default = "default_purpose")]
    pub purpose: String,
    /// Opaque reference to a captured photo; the image itself lives elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaffSubject {
    pub name: String,
    #[serde(default = "default_staff_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_no: Option<String>,
}

/// Resident vehicles name their flat; guest vehicles name the visitor instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleSubject {
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencySubject {
    pub alert_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    pub location: String,
    pub description: String,
    /// Written by status transitions, never by the reporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubjectInfo {
    Delivery(DeliverySubject),
    Visitor(VisitorSubject),
    Staff(StaffSubject),
    Vehicle(VehicleSubject),
    Emergency(EmergencySubject),
}

fn parse_as<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, GateError> {
    serde_json::from_value(value).map_err(|e| GateError::validation("subject", e.to_string()))
}

fn required(field: &str, value: &str, message: &str) -> Result<(), GateError> {
    if value.trim().is_empty() {
        return Err(GateError::validation(field, message));
    }
    Ok(())
}

fn is_ten_digits(phone: &str) -> bool {
    phone.len() == 10 && phone.bytes().all(|b| b.is_ascii_digit())
}

fn is_indian_mobile(phone: &str) -> bool {
    phone
        .strip_prefix("+91")
        .map(is_ten_digits)
        .unwrap_or(false)
}

fn trim_opt(value: &mut Option<String>) {
    if let Some(v) = value {
        let t = v.trim();
        if t.is_empty() {
            *value = None;
        } else if t.len() != v.len() {
            *v = t.to_string();
        }
    }
}

fn trim_in_place(value: &mut String) {
    let t = value.trim();
    if t.len() != value.len() {
        *value = t.to_string();
    }
}

impl SubjectInfo {
    /// Decode and validate the subject of a new `variant` entity.
    pub fn parse(variant: Variant, value: serde_json::Value) -> Result<SubjectInfo, GateError> {
        let mut subject = match variant {
            Variant::Delivery => SubjectInfo::Delivery(parse_as(value)?),
            Variant::Visitor => SubjectInfo::Visitor(parse_as(value)?),
            Variant::Staff => SubjectInfo::Staff(parse_as(value)?),
            Variant::Vehicle => SubjectInfo::Vehicle(parse_as(value)?),
            Variant::Emergency => SubjectInfo::Emergency(parse_as(value)?),
        };
        subject.normalize();
        subject.validate()?;
        Ok(subject)
    }

    /// Apply a shallow JSON merge patch and re-validate the result.
    ///
    /// A `null` member removes an optional field.
    pub fn patched(&self, patch: &serde_json::Value) -> Result<SubjectInfo, GateError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| GateError::validation("subject", "patch must be a JSON object"))?;
        let mut merged = self.to_value();
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in patch {
                if key == "action_taken" {
                    return Err(GateError::validation(
                        "action_taken",
                        "set by status transitions only",
                    ));
                }
                if value.is_null() {
                    target.remove(key);
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        SubjectInfo::parse(self.variant(), merged)
    }

    pub fn variant(&self) -> Variant {
        match self {
            SubjectInfo::Delivery(_) => Variant::Delivery,
            SubjectInfo::Visitor(_) => Variant::Visitor,
            SubjectInfo::Staff(_) => Variant::Staff,
            SubjectInfo::Vehicle(_) => Variant::Vehicle,
            SubjectInfo::Emergency(_) => Variant::Emergency,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// The flat this entity belongs to, when the subject names one.
    pub fn linked_flat(&self) -> Option<&str> {
        match self {
            SubjectInfo::Delivery(d) => Some(d.apartment.as_str()),
            SubjectInfo::Visitor(v) => Some(v.flat_no.as_str()),
            SubjectInfo::Staff(s) => s.flat_no.as_deref(),
            SubjectInfo::Vehicle(v) => v.flat_no.as_deref(),
            SubjectInfo::Emergency(_) => None,
        }
    }

    /// Human name used by list search.
    pub fn display_name(&self) -> &str {
        match self {
            SubjectInfo::Delivery(d) => &d.delivery_person_name,
            SubjectInfo::Visitor(v) => &v.name,
            SubjectInfo::Staff(s) => &s.name,
            SubjectInfo::Vehicle(v) => v.visitor_name.as_deref().unwrap_or(&v.vehicle_type),
            SubjectInfo::Emergency(e) => e.custom_title.as_deref().unwrap_or(&e.alert_type),
        }
    }

    pub fn expected_at(&self) -> Option<OffsetDateTime> {
        match self {
            SubjectInfo::Delivery(d) => d.expected_time,
            _ => None,
        }
    }

    /// Record the resolution text of an emergency alert. No-op otherwise.
    pub fn set_action_taken(&mut self, text: &str) {
        if let SubjectInfo::Emergency(e) = self {
            e.action_taken = Some(text.to_string());
        }
    }

    fn normalize(&mut self) {
        match self {
            SubjectInfo::Delivery(d) => {
                trim_in_place(&mut d.delivery_person_name);
                trim_in_place(&mut d.phone);
                trim_in_place(&mut d.delivery_company);
                d.apartment = d.apartment.trim().to_uppercase();
            }
            SubjectInfo::Visitor(v) => {
                trim_in_place(&mut v.name);
                trim_in_place(&mut v.phone);
                v.flat_no = v.flat_no.trim().to_uppercase();
                trim_in_place(&mut v.purpose);
                if v.purpose.is_empty() {
                    v.purpose = default_purpose();
                }
                trim_opt(&mut v.image_ref);
            }
            SubjectInfo::Staff(s) => {
                trim_in_place(&mut s.name);
                s.role = s.role.trim().to_lowercase();
                trim_opt(&mut s.other_role);
                trim_opt(&mut s.flat_no);
                if let Some(flat) = &mut s.flat_no {
                    *flat = flat.to_uppercase();
                }
            }
            SubjectInfo::Vehicle(v) => {
                v.vehicle_type = v.vehicle_type.trim().to_lowercase();
                trim_opt(&mut v.flat_no);
                if let Some(flat) = &mut v.flat_no {
                    *flat = flat.to_uppercase();
                }
                trim_opt(&mut v.visitor_name);
                trim_opt(&mut v.visitor_phone);
            }
            SubjectInfo::Emergency(e) => {
                trim_in_place(&mut e.alert_type);
                trim_opt(&mut e.custom_title);
                trim_in_place(&mut e.location);
                trim_in_place(&mut e.description);
            }
        }
    }

    pub fn validate(&self) -> Result<(), GateError> {
        match self {
            SubjectInfo::Delivery(d) => {
                required(
                    "delivery_person_name",
                    &d.delivery_person_name,
                    "delivery person name is required",
                )?;
                if !is_indian_mobile(&d.phone) {
                    return Err(GateError::validation(
                        "phone",
                        "phone number must be +91 followed by 10 digits",
                    ));
                }
                required(
                    "delivery_company",
                    &d.delivery_company,
                    "delivery company is required",
                )?;
                required("apartment", &d.apartment, "apartment number is required")
            }
            SubjectInfo::Visitor(v) => {
                if v.name.chars().count() < 2 {
                    return Err(GateError::validation(
                        "name",
                        "name must be at least 2 characters",
                    ));
                }
                if !is_ten_digits(&v.phone) {
                    return Err(GateError::validation(
                        "phone",
                        "please enter a valid 10-digit phone number",
                    ));
                }
                required("flat_no", &v.flat_no, "please enter a flat number")
            }
            SubjectInfo::Staff(s) => {
                required("name", &s.name, "name is required")?;
                if s.role.is_empty() {
                    return Err(GateError::validation("role", "role is required"));
                }
                if s.role == "other" && s.other_role.is_none() {
                    return Err(GateError::validation(
                        "other_role",
                        "please specify the role",
                    ));
                }
                Ok(())
            }
            SubjectInfo::Vehicle(v) => {
                if !VEHICLE_TYPES.contains(&v.vehicle_type.as_str()) {
                    return Err(GateError::validation(
                        "vehicle_type",
                        format!(
                            "'{}' is not one of {}",
                            v.vehicle_type,
                            VEHICLE_TYPES.join(", ")
                        ),
                    ));
                }
                let guest = v.visitor_name.is_some() || v.visitor_phone.is_some();
                match (&v.flat_no, guest) {
                    (Some(_), true) => Err(GateError::validation(
                        "flat_no",
                        "a vehicle belongs to a flat or to a guest, not both",
                    )),
                    (None, false) => Err(GateError::validation(
                        "flat_no",
                        "a vehicle needs an owning flat or guest visitor details",
                    )),
                    (None, true) => {
                        if v.visitor_name.is_none() {
                            return Err(GateError::validation(
                                "visitor_name",
                                "guest vehicles need the visitor's name",
                            ));
                        }
                        match v.visitor_phone.as_deref() {
                            Some(p) if is_ten_digits(p) => Ok(()),
                            _ => Err(GateError::validation(
                                "visitor_phone",
                                "please enter a valid 10-digit phone number",
                            )),
                        }
                    }
                    (Some(_), false) => Ok(()),
                }
            }
            SubjectInfo::Emergency(e) => {
                if !ALERT_TYPES.contains(&e.alert_type.as_str()) {
                    return Err(GateError::validation(
                        "alert_type",
                        format!("'{}' is not a known alert type", e.alert_type),
                    ));
                }
                if e.description.is_empty() || e.location.is_empty() {
                    return Err(GateError::validation(
                        "description",
                        "description and location are required",
                    ));
                }
                if e.alert_type == "Other" && e.custom_title.is_none() {
                    return Err(GateError::validation(
                        "custom_title",
                        "custom title is required for \"Other\" type",
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery() -> serde_json::Value {
        json!({
            "delivery_person_name": " Ravi ",
            "phone": "+919876543210",
            "delivery_company": "Swiggy",
            "apartment": "a-101",
            "expected_time": "2026-10-16T10:00:00Z"
        })
    }

    #[test]
    fn delivery_is_trimmed_and_flat_uppercased() {
        let s = SubjectInfo::parse(Variant::Delivery, delivery()).unwrap();
        let SubjectInfo::Delivery(d) = &s else {
            panic!("wrong variant")
        };
        assert_eq!(d.delivery_person_name, "Ravi");
        assert_eq!(d.apartment, "A-101");
        assert!(s.expected_at().is_some());
        assert_eq!(s.linked_flat(), Some("A-101"));
    }

    #[test]
    fn delivery_phone_needs_country_code() {
        let mut v = delivery();
        v["phone"] = json!("9876543210");
        let err = SubjectInfo::parse(Variant::Delivery, v).unwrap_err();
        assert!(matches!(err, GateError::Validation { ref field, .. } if field == "phone"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut v = delivery();
        v["colour"] = json!("red");
        assert!(SubjectInfo::parse(Variant::Delivery, v).is_err());
    }

    #[test]
    fn visitor_purpose_defaults_to_guest() {
        let s = SubjectInfo::parse(
            Variant::Visitor,
            json!({"name": "Asha", "phone": "9876543210", "flat_no": "b-2", "purpose": "  "}),
        )
        .unwrap();
        let SubjectInfo::Visitor(v) = s else {
            panic!("wrong variant")
        };
        assert_eq!(v.purpose, "Guest");
        assert_eq!(v.flat_no, "B-2");
    }

    #[test]
    fn staff_other_role_needs_description() {
        let err = SubjectInfo::parse(Variant::Staff, json!({"name": "Meena", "role": "other"}))
            .unwrap_err();
        assert!(err.to_string().contains("specify the role"));
        assert!(SubjectInfo::parse(
            Variant::Staff,
            json!({"name": "Meena", "role": "other", "other_role": "tutor"})
        )
        .is_ok());
    }

    #[test]
    fn vehicle_ownership_is_exclusive() {
        assert!(SubjectInfo::parse(Variant::Vehicle, json!({"flat_no": "A-101"})).is_ok());
        assert!(SubjectInfo::parse(
            Variant::Vehicle,
            json!({"visitor_name": "Kiran", "visitor_phone": "9123456780"})
        )
        .is_ok());
        assert!(SubjectInfo::parse(Variant::Vehicle, json!({})).is_err());
        assert!(SubjectInfo::parse(
            Variant::Vehicle,
            json!({"flat_no": "A-101", "visitor_name": "Kiran", "visitor_phone": "9123456780"})
        )
        .is_err());
    }

    #[test]
    fn emergency_other_needs_title() {
        let base = json!({"alert_type": "Other", "location": "A-101", "description": "water leak"});
        assert!(SubjectInfo::parse(Variant::Emergency, base.clone()).is_err());
        let mut titled = base;
        titled["custom_title"] = json!("Flooding");
        let s = SubjectInfo::parse(Variant::Emergency, titled).unwrap();
        assert_eq!(s.display_name(), "Flooding");
    }

    #[test]
    fn patch_merges_and_revalidates() {
        let s = SubjectInfo::parse(Variant::Delivery, delivery()).unwrap();
        let patched = s.patched(&json!({"delivery_company": "Zepto"})).unwrap();
        let SubjectInfo::Delivery(d) = &patched else {
            panic!("wrong variant")
        };
        assert_eq!(d.delivery_company, "Zepto");
        assert!(s.patched(&json!({"phone": "123"})).is_err());
        assert!(s.patched(&json!({"expected_time": null})).unwrap().expected_at().is_none());
    }

    #[test]
    fn action_taken_cannot_be_patched() {
        let s = SubjectInfo::parse(
            Variant::Emergency,
            json!({"alert_type": "Fire", "location": "Tower B", "description": "smoke"}),
        )
        .unwrap();
        assert!(s.patched(&json!({"action_taken": "done"})).is_err());
    }
}
