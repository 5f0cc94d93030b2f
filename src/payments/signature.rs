//! Provider signature schemes.
//!
//! Both providers sign by concatenating a fixed, ordered list of fields with a
//! shared secret and hashing the result with SHA-256 (lowercase hex).
//!
//! - Fawry (scheme A) signs outbound charge requests and inbound notifications.
//! - Paymob (scheme B) signs the processed-transaction callback.
//!
//! Verification never errors: malformed or missing input simply fails to match.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 over the in-order concatenation of `parts`, as lowercase hex.
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of an expected digest against a supplied one.
///
/// The supplied hex is compared case-insensitively. A length mismatch fails
/// immediately (digest length is not secret).
pub fn digest_matches(expected_hex: &str, supplied: &str) -> bool {
    let supplied = supplied.trim().to_ascii_lowercase();
    let expected = expected_hex.as_bytes();
    let supplied = supplied.as_bytes();

    if expected.len() != supplied.len() {
        return false;
    }

    expected.ct_eq(supplied).into()
}

// ============ Scheme A (Fawry) ============

/// Signature for an outbound Fawry charge request.
///
/// `merchantCode || merchantRefNum || amount(2dp) || securityKey`
pub fn fawry_charge_signature(
    merchant_code: &str,
    merchant_ref_num: &str,
    amount: &str,
    security_key: &str,
) -> String {
    sha256_hex(&[merchant_code, merchant_ref_num, amount, security_key])
}

/// Signature Fawry attaches to a server notification.
///
/// `merchantCode || fawryRefNumber || amount(2dp) || orderStatus || securityKey`
pub fn fawry_callback_signature(
    merchant_code: &str,
    reference_number: &str,
    amount: &str,
    order_status: &str,
    security_key: &str,
) -> String {
    sha256_hex(&[merchant_code, reference_number, amount, order_status, security_key])
}

pub fn verify_fawry_callback(
    merchant_code: &str,
    reference_number: &str,
    amount: &str,
    order_status: &str,
    security_key: &str,
    supplied: &str,
) -> bool {
    let expected = fawry_callback_signature(
        merchant_code,
        reference_number,
        amount,
        order_status,
        security_key,
    );
    digest_matches(&expected, supplied)
}

// ============ Scheme B (Paymob) ============

/// Fields of a Paymob transaction callback that enter the digest, in order.
#[derive(Debug, Clone, Copy)]
pub struct PaymobSignedFields<'a> {
    pub amount_cents: &'a str,
    pub currency: &'a str,
    pub success: &'a str,
    pub order_id: &'a str,
    pub merchant_order_id: &'a str,
}

/// `amountCents || currency || success || orderId || merchantOrderId || secret`
pub fn paymob_callback_signature(fields: &PaymobSignedFields<'_>, secret: &str) -> String {
    sha256_hex(&[
        fields.amount_cents,
        fields.currency,
        fields.success,
        fields.order_id,
        fields.merchant_order_id,
        secret,
    ])
}

pub fn verify_paymob_callback(fields: &PaymobSignedFields<'_>, secret: &str, supplied: &str) -> bool {
    digest_matches(&paymob_callback_signature(fields, secret), supplied)
}
