//! Wire shapes of the LndHub API and the checks every answer goes through.
//!
//! Numeric fields may arrive either as JSON numbers or as numeric strings;
//! [`num_or_str`] normalizes both.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::wallet::WalletError;

/// `{error, code, message}` as returned by a hub rejecting a call
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedAccount {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct Balance {
    #[serde(rename = "BTC")]
    pub btc: BtcBalance,
}

#[derive(Debug, Deserialize)]
pub struct BtcBalance {
    #[serde(rename = "AvailableBalance")]
    pub available_balance: f64,
}

/// Entry of `gettxs`: either a paid Lightning invoice or an on-chain receive
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTx {
    Lightning(LightningPayment),
    Onchain(OnchainEntry),
}

#[derive(Debug, Deserialize)]
pub struct LightningPayment {
    #[serde(deserialize_with = "num_or_str")]
    pub timestamp: i64,
    pub value: f64,
    pub fee: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub memo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnchainEntry {
    #[serde(deserialize_with = "num_or_str")]
    pub time: i64,
    /// In BTC
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
}

/// Entry of `getpending`
#[derive(Debug, Deserialize)]
pub struct PendingTx {
    #[serde(deserialize_with = "num_or_str")]
    pub time: i64,
    /// In BTC
    pub amount: f64,
    pub category: String,
    pub confirmations: u32,
}

/// Entry of `getuserinvoices`
#[derive(Debug, Deserialize)]
pub struct UserInvoice {
    #[serde(deserialize_with = "num_or_str")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ispaid: Option<bool>,
    pub amt: f64,
    pub payment_request: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "num_or_str")]
    pub expire_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct BtcAddress {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedInvoice {
    pub payment_request: String,
}

/// Answer of `decodeinvoice`
#[derive(Debug, Deserialize)]
pub struct DecodedInvoice {
    #[serde(deserialize_with = "num_or_str")]
    pub num_satoshis: i64,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "num_or_str")]
    pub expiry: i64,
    #[serde(deserialize_with = "num_or_str")]
    pub timestamp: i64,
}

/// `payinvoice` has no fixed answer shape beyond being an object
pub type PaidInvoice = Map<String, Value>;

/// Accepts `12`, `12.0` or `"12"`
pub fn num_or_str<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .ok_or_else(|| D::Error::custom(format!("not a number: {:?}", s)))
        }
        other => Err(D::Error::custom(format!("expected number or string, got {}", other))),
    }
}

/// Turn a hub error answer into `ServerError`, pass anything else through
pub fn check_api_error(value: Value) -> Result<Value, WalletError> {
    if let Ok(err) = ErrorResponse::deserialize(&value) {
        debug!("Api response matches server error: \"{}\"", err.message);
        return Err(WalletError::server(err.code, err.message));
    }
    Ok(value)
}

/// Validate a success answer against its schema
pub fn parse<T: DeserializeOwned>(value: Value) -> Result<T, WalletError> {
    serde_json::from_value(value).map_err(|e| WalletError::answer_invalid(e.to_string()))
}

/// Validate a list answer, dropping entries that match no known shape
pub fn parse_items<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, WalletError> {
    let Value::Array(items) = value else {
        return Err(WalletError::answer_invalid("expected a list"));
    };
    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Discarding unrecognized entry: {}", e);
                None
            }
        })
        .collect();
    if parsed.len() != total {
        debug!("Kept {} of {} entries", parsed.len(), total);
    }
    Ok(parsed)
}
