mod request;
mod tx;

pub use request::{PayReqError, PaymentRequest, ReqType};
pub use tx::{Direction, OnchainTx, SettledInvoice, Tx, TxType, UnpaidInvoice};
