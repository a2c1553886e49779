use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::PaymentRequest;
use crate::currency::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Onchain,
    Offchain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Receive,
    Send,
}

/// On-chain transaction. `conf_count` stays empty while pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnchainTx {
    pub occured: bool,
    pub direction: Option<Direction>,
    pub amount: Amount,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_count: Option<u32>,
}

/// Lightning invoice that was paid, with its fees known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledInvoice {
    pub direction: Option<Direction>,
    pub amount: Amount,
    pub fees: Amount,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_req: Option<PaymentRequest>,
}

impl SettledInvoice {
    pub fn total_with_fees(&self) -> Amount {
        self.amount.add(self.fees)
    }
}

/// Lightning invoice waiting to be paid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpaidInvoice {
    pub direction: Option<Direction>,
    pub amount: Amount,
    pub time: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub pay_req: PaymentRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UnpaidInvoice {
    pub fn is_payable(&self) -> bool {
        self.is_payable_at(Utc::now())
    }

    pub fn is_payable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }
}

impl AsRef<PaymentRequest> for UnpaidInvoice {
    fn as_ref(&self) -> &PaymentRequest {
        &self.pay_req
    }
}

/// Every transaction shape the wallet knows about. The `kind` tag is what
/// restores the variant when a cached list is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tx {
    Onchain(OnchainTx),
    SettledInvoice(SettledInvoice),
    UnpaidInvoice(UnpaidInvoice),
}

impl Tx {
    pub fn tx_type(&self) -> TxType {
        match self {
            Tx::Onchain(_) => TxType::Onchain,
            Tx::SettledInvoice(_) | Tx::UnpaidInvoice(_) => TxType::Offchain,
        }
    }

    pub fn occured(&self) -> bool {
        match self {
            Tx::Onchain(tx) => tx.occured,
            Tx::SettledInvoice(_) => true,
            Tx::UnpaidInvoice(_) => false,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Tx::Onchain(tx) => tx.direction,
            Tx::SettledInvoice(inv) => inv.direction,
            Tx::UnpaidInvoice(inv) => inv.direction,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            Tx::Onchain(tx) => tx.amount,
            Tx::SettledInvoice(inv) => inv.amount,
            Tx::UnpaidInvoice(inv) => inv.amount,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Tx::Onchain(tx) => tx.time,
            Tx::SettledInvoice(inv) => inv.time,
            Tx::UnpaidInvoice(inv) => inv.time,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Tx::Onchain(_) => None,
            Tx::SettledInvoice(inv) => inv.description.as_deref(),
            Tx::UnpaidInvoice(inv) => inv.description.as_deref(),
        }
    }

    /// True for a settled invoice carrying exactly this payment request
    pub fn settles(&self, req: &PaymentRequest) -> bool {
        match self {
            Tx::SettledInvoice(inv) => inv
                .pay_req
                .as_ref()
                .is_some_and(|own| own.as_str() == req.as_str()),
            _ => false,
        }
    }
}
