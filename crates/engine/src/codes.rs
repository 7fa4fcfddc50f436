//! Generated credentials for kinds that do not bring their own.

use gatehouse_core::credential::{DELIVERY_CODE_PREFIX, VISITOR_QR_PREFIX};
use gatehouse_core::Variant;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const DELIVERY_CODE_LEN: usize = 6;
const VISITOR_QR_LEN: usize = 10;

fn random_chars(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A fresh credential for `variant`, already in normalized form.
///
/// `None` for staff and vehicles, whose credential is the permanent ID or
/// plate supplied at registration, and for emergency alerts.
pub fn generate(variant: Variant) -> Option<String> {
    match variant {
        Variant::Delivery => Some(format!(
            "{DELIVERY_CODE_PREFIX}{}",
            random_chars(DELIVERY_CODE_LEN)
        )),
        Variant::Visitor => Some(format!("{VISITOR_QR_PREFIX}{}", random_chars(VISITOR_QR_LEN))),
        Variant::Staff | Variant::Vehicle | Variant::Emergency => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::credential::normalize;

    #[test]
    fn generated_codes_are_normalized() {
        for variant in [Variant::Delivery, Variant::Visitor] {
            let code = generate(variant).unwrap();
            assert_eq!(normalize(variant, &code).unwrap(), code);
        }
        let d = generate(Variant::Delivery).unwrap();
        assert_eq!(d.len(), DELIVERY_CODE_PREFIX.len() + DELIVERY_CODE_LEN);
        assert!(generate(Variant::Staff).is_none());
    }
}
