use chrono::{DateTime, Utc};
use tracing::debug;

use crate::currency::Amount;
use crate::hub::schemas::{PendingTx, RawTx, UserInvoice};
use crate::payment::{Direction, OnchainTx, PaymentRequest, SettledInvoice, Tx, UnpaidInvoice};

const SATS_PER_BTC: f64 = 100_000_000.0;

/// Transactions and unpaid invoices, each sorted newest first
#[derive(Debug, Default)]
pub(super) struct History {
    pub txs: Vec<Tx>,
    pub unpaid: Vec<UnpaidInvoice>,
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}

pub(super) fn build_history(
    pending: Vec<PendingTx>,
    raw_txs: Vec<RawTx>,
    invoices: Vec<UserInvoice>,
) -> History {
    let mut history = History::default();

    for tx in pending {
        let Some(time) = from_unix(tx.time) else {
            continue;
        };
        history.txs.push(Tx::Onchain(OnchainTx {
            occured: false,
            direction: Some(Direction::Receive),
            amount: Amount::from_sat(tx.amount * SATS_PER_BTC),
            time,
            conf_count: (tx.confirmations > 0).then_some(tx.confirmations),
        }));
    }
    debug!("Pending transactions parsed");

    for tx in raw_txs {
        match tx {
            RawTx::Onchain(tx) if tx.category == "receive" && tx.kind == "bitcoind_tx" => {
                let Some(time) = from_unix(tx.time) else {
                    continue;
                };
                history.txs.push(Tx::Onchain(OnchainTx {
                    occured: true,
                    direction: Some(Direction::Receive),
                    amount: Amount::from_sat(tx.amount * SATS_PER_BTC),
                    time,
                    conf_count: None,
                }));
            }
            RawTx::Lightning(payment) if payment.kind == "paid_invoice" => {
                let Some(time) = from_unix(payment.timestamp) else {
                    continue;
                };
                // LndHub counts the fee twice in `value`; keep its numbers so totals match
                history.txs.push(Tx::SettledInvoice(SettledInvoice {
                    direction: Some(Direction::Send),
                    amount: Amount::from_sat(payment.value - payment.fee * 2.0),
                    fees: Amount::from_sat(payment.fee * 2.0),
                    time,
                    description: non_empty(payment.memo),
                    pay_req: None,
                }));
            }
            _ => {}
        }
    }
    debug!("Settled transactions parsed");

    for inv in invoices {
        if inv.kind != "user_invoice" {
            continue;
        }
        let Some(time) = from_unix(inv.timestamp) else {
            continue;
        };
        if inv.ispaid == Some(true) {
            history.txs.push(Tx::SettledInvoice(SettledInvoice {
                direction: Some(Direction::Receive),
                amount: Amount::from_sat(inv.amt),
                fees: Amount::ZERO,
                time,
                description: non_empty(inv.description),
                pay_req: PaymentRequest::ln(&inv.payment_request).ok(),
            }));
            continue;
        }

        let pay_req = match PaymentRequest::ln(&inv.payment_request) {
            Ok(req) => req,
            Err(e) => {
                debug!("Discarding unpaid invoice: {}", e);
                continue;
            }
        };
        let Some(expires) = from_unix(inv.timestamp.saturating_add(inv.expire_time)) else {
            continue;
        };
        history.unpaid.push(UnpaidInvoice {
            direction: Some(Direction::Receive),
            amount: Amount::from_sat(inv.amt),
            time,
            expires,
            pay_req,
            description: non_empty(inv.description),
        });
    }
    debug!("User invoices parsed");

    history.txs.sort_by(|a, b| b.time().cmp(&a.time()));
    history.unpaid.sort_by(|a, b| b.time.cmp(&a.time));
    history
}
