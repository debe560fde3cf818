//! Gateway strategies: signature verification and payload normalization.
//!
//! Each gateway names the same four logical fields differently. The
//! [`FieldMap`] table below lists where each one lives in the JSON body.

use std::str::FromStr;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatewayKind {
    /// Flat JSON body signed with HMAC-SHA256; no hosted checkout
    #[default]
    Generic,
    Stripe,
    Paymob,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Generic => "generic",
            GatewayKind::Stripe => "stripe",
            GatewayKind::Paymob => "paymob",
        }
    }

    /// Whether the gateway exposes a hosted-checkout session API.
    pub fn supports_sessions(&self) -> bool {
        !matches!(self, GatewayKind::Generic)
    }

    /// Parses the optional webhook path segment.
    pub fn from_path(segment: &str) -> Result<Self, ServiceError> {
        GatewayKind::from_str(&segment.to_ascii_lowercase())
            .map_err(|_| ServiceError::BadRequest(format!("Unknown gateway '{}'", segment)))
    }

    fn field_map(&self) -> &'static FieldMap {
        match self {
            GatewayKind::Generic => &GENERIC_FIELDS,
            GatewayKind::Stripe => &STRIPE_FIELDS,
            GatewayKind::Paymob => &PAYMOB_FIELDS,
        }
    }

    /// Verifies the callback signature against the raw body.
    pub fn verify_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        secret: &str,
        tolerance_secs: u64,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        match self {
            GatewayKind::Generic => {
                let header = header_value(headers, &["x-signature", "signature"])?;
                let provided = header.strip_prefix("sha256=").unwrap_or(header);
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|_| SignatureError::InvalidSecret)?;
                mac.update(body);
                mac.verify_slice(&decode_hex(provided)?)
                    .map_err(|_| SignatureError::Mismatch)
            }
            GatewayKind::Stripe => {
                let header = header_value(headers, &["stripe-signature"])?;
                let (timestamp, candidates) = parse_stripe_header(header)?;
                if (now_unix - timestamp).unsigned_abs() > tolerance_secs {
                    return Err(SignatureError::Expired);
                }

                let signed = || -> Result<HmacSha256, SignatureError> {
                    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                        .map_err(|_| SignatureError::InvalidSecret)?;
                    mac.update(timestamp.to_string().as_bytes());
                    mac.update(b".");
                    mac.update(body);
                    Ok(mac)
                };

                // Any v1 entry may match during secret rotation
                for candidate in candidates {
                    let Ok(raw) = decode_hex(candidate) else {
                        continue;
                    };
                    if signed()?.verify_slice(&raw).is_ok() {
                        return Ok(());
                    }
                }
                Err(SignatureError::Mismatch)
            }
            GatewayKind::Paymob => {
                let header = header_value(headers, &["x-paymob-signature", "hmac"])?;
                let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
                    .map_err(|_| SignatureError::InvalidSecret)?;
                mac.update(body);
                mac.verify_slice(&decode_hex(header)?)
                    .map_err(|_| SignatureError::Mismatch)
            }
        }
    }

    /// Extracts {invoice id, transaction id, amount, status} from a callback body.
    pub fn normalize(&self, body: &Value) -> Result<NormalizedCallback, ServiceError> {
        let fields = self.field_map();

        let invoice_raw = first_string(body, fields.invoice_id)
            .ok_or_else(|| missing("invoice id"))?;
        let invoice_id = Uuid::parse_str(invoice_raw.trim())
            .map_err(|_| ServiceError::BadRequest(format!("Invalid invoice id '{}'", invoice_raw)))?;

        let transaction_id = first_string(body, fields.transaction_id)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing("transaction id"))?;

        let amount_value = first_value(body, fields.amount).ok_or_else(|| missing("amount"))?;
        let mut amount = decimal_from_value(amount_value)
            .ok_or_else(|| ServiceError::BadRequest("Invalid amount".to_string()))?;
        if fields.minor_units {
            amount /= Decimal::ONE_HUNDRED;
        }
        if amount.is_sign_negative() {
            return Err(ServiceError::BadRequest("Amount cannot be negative".to_string()));
        }

        let status = (fields.status)(body).ok_or_else(|| missing("status"))?;
        let currency = first_string(body, fields.currency).map(|c| c.to_ascii_uppercase());

        Ok(NormalizedCallback {
            invoice_id,
            transaction_id,
            amount,
            status,
            currency,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
    #[error("webhook secret unusable")]
    InvalidSecret,
}

impl From<SignatureError> for ServiceError {
    fn from(err: SignatureError) -> Self {
        ServiceError::Unauthorized(format!("Invalid webhook signature: {}", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallbackStatus {
    Paid,
    Failed,
    Pending,
}

impl CallbackStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" | "success" | "succeeded" | "completed" | "captured" => Some(Self::Paid),
            "failed" | "failure" | "declined" | "canceled" | "cancelled" | "expired" => {
                Some(Self::Failed)
            }
            "pending" | "processing" | "unpaid" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Gateway-independent view of a callback
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCallback {
    pub invoice_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub status: CallbackStatus,
    pub currency: Option<String>,
}

struct FieldMap {
    invoice_id: &'static [&'static str],
    transaction_id: &'static [&'static str],
    amount: &'static [&'static str],
    currency: &'static [&'static str],
    minor_units: bool,
    status: fn(&Value) -> Option<CallbackStatus>,
}

static GENERIC_FIELDS: FieldMap = FieldMap {
    invoice_id: &["/invoiceId", "/invoice_id"],
    transaction_id: &["/transactionId", "/transaction_id"],
    amount: &["/amount"],
    currency: &["/currency"],
    minor_units: false,
    status: generic_status,
};

static STRIPE_FIELDS: FieldMap = FieldMap {
    invoice_id: &[
        "/data/object/metadata/invoice_id",
        "/data/object/client_reference_id",
    ],
    transaction_id: &["/data/object/payment_intent", "/data/object/id"],
    amount: &[
        "/data/object/amount_total",
        "/data/object/amount_received",
        "/data/object/amount",
    ],
    currency: &["/data/object/currency"],
    minor_units: true,
    status: stripe_status,
};

static PAYMOB_FIELDS: FieldMap = FieldMap {
    invoice_id: &["/obj/order/merchant_order_id", "/obj/merchant_order_id"],
    transaction_id: &["/obj/id"],
    amount: &["/obj/amount_cents"],
    currency: &["/obj/currency"],
    minor_units: true,
    status: paymob_status,
};

fn generic_status(body: &Value) -> Option<CallbackStatus> {
    body.get("status")
        .and_then(Value::as_str)
        .and_then(CallbackStatus::parse)
}

fn stripe_status(body: &Value) -> Option<CallbackStatus> {
    let event_type = body.get("type").and_then(Value::as_str)?;
    let payment_status = body
        .pointer("/data/object/payment_status")
        .and_then(Value::as_str);

    if event_type.ends_with("failed") || event_type.ends_with("expired") {
        return Some(CallbackStatus::Failed);
    }
    if event_type.ends_with("succeeded") || event_type.ends_with("completed") {
        return match payment_status {
            None | Some("paid") | Some("no_payment_required") => Some(CallbackStatus::Paid),
            Some(_) => Some(CallbackStatus::Pending),
        };
    }
    Some(CallbackStatus::Pending)
}

fn paymob_status(body: &Value) -> Option<CallbackStatus> {
    let obj = body.get("obj")?;
    if obj.get("pending").and_then(Value::as_bool).unwrap_or(false) {
        return Some(CallbackStatus::Pending);
    }
    match obj.get("success").and_then(Value::as_bool) {
        Some(true) => Some(CallbackStatus::Paid),
        Some(false) => Some(CallbackStatus::Failed),
        None => None,
    }
}

fn missing(field: &str) -> ServiceError {
    ServiceError::BadRequest(format!("Callback is missing {}", field))
}

fn first_value<'a>(body: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers
        .iter()
        .filter_map(|p| body.pointer(p))
        .find(|v| !v.is_null())
}

fn first_string(body: &Value, pointers: &[&str]) -> Option<String> {
    first_value(body, pointers).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                // keep the literal digits rather than going through f64
                Decimal::from_str(&n.to_string())
                    .ok()
                    .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok()))
            }
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn header_value<'a>(headers: &'a HeaderMap, names: &[&str]) -> Result<&'a str, SignatureError> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .ok_or(SignatureError::Missing)?
        .to_str()
        .map(str::trim)
        .map_err(|_| SignatureError::Malformed)
}

fn decode_hex(value: &str) -> Result<Vec<u8>, SignatureError> {
    hex::decode(value.trim()).map_err(|_| SignatureError::Malformed)
}

fn parse_stripe_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    match timestamp {
        Some(t) if !signatures.is_empty() => Ok((t, signatures)),
        _ => Err(SignatureError::Malformed),
    }
}

/// Produces signatures in each gateway's format, for tests and local tooling.
pub mod signing {
    use super::*;

    pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn hmac_sha512_hex(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn stripe_header(
        secret: &str,
        timestamp: i64,
        payload: &[u8],
    ) -> Result<String, SignatureError> {
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        Ok(format!("t={},v1={}", timestamp, hmac_sha256_hex(secret, &signed)?))
    }
}
