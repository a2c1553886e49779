use serde::{Deserialize, Serialize};
use std::fmt;

const LIGHTNING_PREFIX: &str = "lightning:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReqType {
    Ln,
    Btc,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid payment request ({req_type:?}): {req}")]
pub struct PayReqError {
    pub req_type: ReqType,
    pub req: String,
}

/// A Lightning invoice, on-chain address or other payable string.
///
/// Only the prefix is validated here; the hub performs real validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPaymentRequest")]
pub struct PaymentRequest {
    #[serde(rename = "str")]
    value: String,
    #[serde(rename = "type")]
    req_type: ReqType,
}

#[derive(Deserialize)]
struct RawPaymentRequest {
    str: String,
    #[serde(rename = "type")]
    req_type: ReqType,
}

impl TryFrom<RawPaymentRequest> for PaymentRequest {
    type Error = PayReqError;

    fn try_from(raw: RawPaymentRequest) -> Result<Self, Self::Error> {
        Self::new(&raw.str, raw.req_type)
    }
}

impl PaymentRequest {
    pub fn new(req: &str, req_type: ReqType) -> Result<Self, PayReqError> {
        Ok(Self {
            value: Self::normalize(req, req_type)?,
            req_type,
        })
    }

    pub fn ln(req: &str) -> Result<Self, PayReqError> {
        Self::new(req, ReqType::Ln)
    }

    pub fn btc(req: &str) -> Result<Self, PayReqError> {
        Self::new(req, ReqType::Btc)
    }

    fn normalize(req: &str, req_type: ReqType) -> Result<String, PayReqError> {
        if req_type != ReqType::Ln {
            return Ok(req.to_string());
        }
        let stripped = req.strip_prefix(LIGHTNING_PREFIX).unwrap_or(req);
        if !stripped.starts_with("ln") {
            return Err(PayReqError {
                req_type,
                req: stripped.to_string(),
            });
        }
        Ok(stripped.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn req_type(&self) -> ReqType {
        self.req_type
    }
}

impl AsRef<PaymentRequest> for PaymentRequest {
    fn as_ref(&self) -> &PaymentRequest {
        self
    }
}

impl fmt::Display for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
