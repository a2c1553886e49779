//! Invoices published under a public id, bound to the wallet that receives
//! the payment.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::currency::Amount;
use crate::db::{models::MappedInvoiceRecord, queries};
use crate::hub::HubTransport;
use crate::payment::UnpaidInvoice;
use crate::wallet::{Wallet, WalletError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GetInfoError {
    NotFound,
    Unpayable,
    NoBoundDestWallet,
    AlreadyChecked,
}

impl std::fmt::Display for GetInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            GetInfoError::NotFound => "invoice not found",
            GetInfoError::Unpayable => "invoice is not payable",
            GetInfoError::NoBoundDestWallet => "no destination wallet bound",
            GetInfoError::AlreadyChecked => "invoice was already checked",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MappedInvoiceError {
    #[error("Failed to create invoice: {source}")]
    CreateFailed { source: WalletError },

    #[error("Failed to pay invoice {public_id}: {source}")]
    PaymentFailed {
        public_id: String,
        source: WalletError,
    },

    #[error("Failed to get info of invoice {public_id}: {kind}")]
    GetInfoFailed {
        public_id: String,
        kind: GetInfoError,
    },

    #[error("Failed to check invoice {public_id} on its destination: {source}")]
    CheckFailed {
        public_id: String,
        source: WalletError,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl MappedInvoiceError {
    fn info(public_id: &str, kind: GetInfoError) -> Self {
        MappedInvoiceError::GetInfoFailed {
            public_id: public_id.to_string(),
            kind,
        }
    }

    /// The info failure kind, if this is one
    pub fn info_kind(&self) -> Option<GetInfoError> {
        match self {
            MappedInvoiceError::GetInfoFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MappedInvoiceError {
    fn from(e: sqlx::Error) -> Self {
        MappedInvoiceError::Storage {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for MappedInvoiceError {
    fn from(e: serde_json::Error) -> Self {
        MappedInvoiceError::Storage {
            message: e.to_string(),
        }
    }
}

/// What the destination check stored for an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DestCheck {
    pub checked: bool,
    pub confirmed: bool,
}

fn generate_public_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub struct MappedUnpaidInvoice {
    public_id: String,
    pool: Pool<Sqlite>,
    hub: Arc<dyn HubTransport>,
    invoice: Option<UnpaidInvoice>,
    is_paid: Option<bool>,
}

impl MappedUnpaidInvoice {
    pub fn new(public_id: impl Into<String>, pool: Pool<Sqlite>, hub: Arc<dyn HubTransport>) -> Self {
        Self {
            public_id: public_id.into(),
            pool,
            hub,
            invoice: None,
            is_paid: None,
        }
    }

    /// Publish `invoice` under `public_id`. An existing id is never overwritten.
    pub async fn map(
        pool: &Pool<Sqlite>,
        hub: &Arc<dyn HubTransport>,
        public_id: &str,
        invoice: &UnpaidInvoice,
        dest_wallet_id: Option<&str>,
    ) -> Result<Self, MappedInvoiceError> {
        debug!("Mapping invoice to public id {}", public_id);
        let json = serde_json::to_string(invoice)?;
        queries::insert_mapped_invoice(pool, public_id, &json, dest_wallet_id).await?;

        let mut mapped = Self::new(public_id, pool.clone(), hub.clone());
        mapped.invoice = Some(invoice.clone());
        Ok(mapped)
    }

    /// Create an invoice on `wallet` and publish it under a fresh public id,
    /// bound to that wallet
    pub async fn create_invoice(
        wallet: &mut Wallet,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<Self, MappedInvoiceError> {
        info!("Creating mapped invoice on wallet {}", wallet.id());
        let invoice = wallet
            .create_invoice(amount, description)
            .await
            .map_err(|source| MappedInvoiceError::CreateFailed { source })?;

        let public_id = generate_public_id();
        let pool = wallet.pool().clone();
        let hub = wallet.hub().clone();
        Self::map(&pool, &hub, &public_id, &invoice, Some(wallet.id())).await
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    async fn record(&self) -> Result<MappedInvoiceRecord, MappedInvoiceError> {
        queries::get_mapped_invoice(&self.pool, &self.public_id)
            .await?
            .ok_or_else(|| MappedInvoiceError::info(&self.public_id, GetInfoError::NotFound))
    }

    /// The invoice, as long as it can still be paid
    pub async fn check_invoice(&mut self) -> Result<UnpaidInvoice, MappedInvoiceError> {
        debug!("Checking mapped invoice {}", self.public_id);
        let rec = self.record().await?;
        let invoice: UnpaidInvoice = serde_json::from_str(&rec.invoice)?;
        if rec.confirmed_on_dest || !invoice.is_payable() {
            return Err(MappedInvoiceError::info(&self.public_id, GetInfoError::Unpayable));
        }

        self.invoice = Some(invoice.clone());
        Ok(invoice)
    }

    /// Ask the destination wallet whether the invoice was received. Runs at
    /// most once per invoice; every later call fails with `AlreadyChecked`.
    pub async fn check_if_paid(&mut self) -> Result<bool, MappedInvoiceError> {
        info!("Checking payment of mapped invoice {}", self.public_id);
        let rec = self.record().await?;
        let Some(dest) = rec.dest_wallet_id else {
            return Err(MappedInvoiceError::info(&self.public_id, GetInfoError::NoBoundDestWallet));
        };
        if rec.checked_on_dest {
            return Err(MappedInvoiceError::info(&self.public_id, GetInfoError::AlreadyChecked));
        }
        let invoice: UnpaidInvoice = serde_json::from_str(&rec.invoice)?;

        if !queries::claim_mapped_invoice_check(&self.pool, &self.public_id).await? {
            return Err(MappedInvoiceError::info(&self.public_id, GetInfoError::AlreadyChecked));
        }

        let mut wallet = Wallet::new(dest, self.pool.clone(), self.hub.clone());
        let outcome = wallet.check_receival(&invoice).await;

        // Stored even when the check failed, so the outcome is frozen
        let confirmed = matches!(outcome, Ok(true));
        self.store_confirmed(confirmed).await?;

        let paid = outcome.map_err(|source| {
            warn!("Receival check for {} failed: {}", self.public_id, source);
            MappedInvoiceError::CheckFailed {
                public_id: self.public_id.clone(),
                source,
            }
        })?;
        debug!("Mapped invoice {} paid: {}", self.public_id, paid);

        self.invoice = Some(invoice);
        self.is_paid = Some(paid);
        Ok(paid)
    }

    /// The check is already claimed at this point, so a lost write would
    /// freeze the wrong outcome. Tried twice before giving up.
    async fn store_confirmed(&self, confirmed: bool) -> Result<(), MappedInvoiceError> {
        let first = queries::set_mapped_invoice_confirmed(&self.pool, &self.public_id, confirmed).await;
        let Err(e) = first else {
            return Ok(());
        };
        debug!("Retrying confirmation write for {}: {}", self.public_id, e);
        if let Err(e) = queries::set_mapped_invoice_confirmed(&self.pool, &self.public_id, confirmed).await {
            warn!(
                "Lost destination check outcome of {} (paid={}): {}",
                self.public_id, confirmed, e
            );
            return Err(MappedInvoiceError::Storage {
                message: format!("outcome paid={} not stored: {}", confirmed, e),
            });
        }
        Ok(())
    }

    /// Pay the invoice from `wallet`
    pub async fn pay(&mut self, wallet: &mut Wallet, amount_sat: u64) -> Result<(), MappedInvoiceError> {
        let invoice = self.invoice().await?;
        info!("Paying mapped invoice {} from wallet {}", self.public_id, wallet.id());
        wallet
            .pay_invoice(&invoice, amount_sat)
            .await
            .map_err(|source| MappedInvoiceError::PaymentFailed {
                public_id: self.public_id.clone(),
                source,
            })
    }

    pub async fn invoice(&mut self) -> Result<UnpaidInvoice, MappedInvoiceError> {
        match &self.invoice {
            Some(invoice) => Ok(invoice.clone()),
            None => self.check_invoice().await,
        }
    }

    pub async fn is_paid(&mut self) -> Result<bool, MappedInvoiceError> {
        match self.is_paid {
            Some(paid) => Ok(paid),
            None => self.check_if_paid().await,
        }
    }

    pub async fn dest_check(&self) -> Result<DestCheck, MappedInvoiceError> {
        let rec = self.record().await?;
        Ok(DestCheck {
            checked: rec.checked_on_dest,
            confirmed: rec.confirmed_on_dest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::hub::mock::{MockHub, bad_auth};
    use crate::hub::HubRequest;
    use crate::payment::{Direction, PaymentRequest};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};

    fn unpaid(pay_req: &str, expires_in: Duration) -> UnpaidInvoice {
        let now = Utc::now();
        UnpaidInvoice {
            direction: Some(Direction::Receive),
            amount: Amount::from_sat(1500.0),
            time: now,
            expires: now + expires_in,
            pay_req: PaymentRequest::ln(pay_req).unwrap(),
            description: Some("tea".to_string()),
        }
    }

    /// Destination hub that has received `lnbc1paid` and nothing else
    fn dest_hub(req: &HubRequest) -> Result<Value, WalletError> {
        Ok(match req.path.as_str() {
            "getuserinvoices" => json!([
                {"timestamp": 1700000000, "type": "user_invoice", "ispaid": true, "amt": 1500,
                 "payment_request": "lnbc1paid", "description": "", "expire_time": 3600},
            ]),
            "addinvoice" => json!({"payment_request": "lnbc1fresh"}),
            "decodeinvoice" => json!({
                "num_satoshis": 1500, "description": "tea", "expiry": 3600,
                "timestamp": Utc::now().timestamp()
            }),
            "payinvoice" => json!({"error": true, "code": 2, "message": "not enough balance"}),
            _ => bad_auth(),
        })
    }

    async fn dest_wallet(pool: &Pool<Sqlite>) {
        queries::insert_wallet(pool, "dest", "https://hub", "l", "p").await.unwrap();
        queries::update_session_backup(pool, "dest", "a", "r").await.unwrap();
    }

    #[tokio::test]
    async fn test_map_does_not_overwrite() {
        let pool = test_pool().await;
        let hub: Arc<dyn HubTransport> = MockHub::new(dest_hub);
        let first = unpaid("lnbc1first", Duration::hours(1));

        MappedUnpaidInvoice::map(&pool, &hub, "pub1", &first, None).await.unwrap();
        let second = unpaid("lnbc1second", Duration::hours(1));
        let err = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &second, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MappedInvoiceError::Storage { .. }));

        let mut mapped = MappedUnpaidInvoice::new("pub1", pool.clone(), hub);
        assert_eq!(mapped.check_invoice().await.unwrap().pay_req.as_str(), "lnbc1first");
    }

    #[tokio::test]
    async fn test_check_invoice_failures() {
        let pool = test_pool().await;
        let hub: Arc<dyn HubTransport> = MockHub::new(dest_hub);

        let mut missing = MappedUnpaidInvoice::new("nope", pool.clone(), hub.clone());
        let err = missing.check_invoice().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::NotFound));

        let expired = unpaid("lnbc1old", Duration::seconds(-10));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "old", &expired, None)
            .await
            .unwrap();
        let err = mapped.check_invoice().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::Unpayable));
    }

    #[tokio::test]
    async fn test_check_without_dest_wallet() {
        let pool = test_pool().await;
        let mock = MockHub::new(dest_hub);
        let hub: Arc<dyn HubTransport> = mock.clone();
        let invoice = unpaid("lnbc1paid", Duration::hours(1));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, None)
            .await
            .unwrap();

        let err = mapped.check_if_paid().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::NoBoundDestWallet));
        assert_eq!(mock.total(), 0);
    }

    #[tokio::test]
    async fn test_check_runs_once() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        let mock = MockHub::new(dest_hub);
        let hub: Arc<dyn HubTransport> = mock.clone();
        let invoice = unpaid("lnbc1paid", Duration::hours(1));
        MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, Some("dest"))
            .await
            .unwrap();

        let mut mapped = MappedUnpaidInvoice::new("pub1", pool.clone(), hub.clone());
        assert!(mapped.check_if_paid().await.unwrap());
        assert!(mapped.is_paid().await.unwrap());

        let mut again = MappedUnpaidInvoice::new("pub1", pool.clone(), hub);
        let err = again.check_if_paid().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::AlreadyChecked));
        assert_eq!(mock.count("getuserinvoices"), 1);

        let state = again.dest_check().await.unwrap();
        assert_eq!(state, DestCheck { checked: true, confirmed: true });

        // A confirmed invoice is no longer offered for payment
        let err = again.check_invoice().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::Unpayable));
    }

    #[tokio::test]
    async fn test_unpaid_outcome_is_frozen() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        let hub: Arc<dyn HubTransport> = MockHub::new(dest_hub);
        let invoice = unpaid("lnbc1unpaid", Duration::hours(1));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, Some("dest"))
            .await
            .unwrap();

        assert!(!mapped.check_if_paid().await.unwrap());
        let err = mapped.check_if_paid().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::AlreadyChecked));
        assert_eq!(
            mapped.dest_check().await.unwrap(),
            DestCheck { checked: true, confirmed: false }
        );
    }

    #[tokio::test]
    async fn test_failed_check_still_marks_invoice() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        let hub: Arc<dyn HubTransport> =
            MockHub::new(|_| Err(WalletError::no_connection("hub unreachable")));
        let invoice = unpaid("lnbc1paid", Duration::hours(1));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, Some("dest"))
            .await
            .unwrap();

        let err = mapped.check_if_paid().await.unwrap_err();
        assert!(matches!(err, MappedInvoiceError::CheckFailed { .. }));
        assert_eq!(
            mapped.dest_check().await.unwrap(),
            DestCheck { checked: true, confirmed: false }
        );

        let err = mapped.check_if_paid().await.unwrap_err();
        assert_eq!(err.info_kind(), Some(GetInfoError::AlreadyChecked));
    }

    #[tokio::test]
    async fn test_unstored_outcome_is_reported() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        sqlx::query(
            "CREATE TRIGGER reject_confirm BEFORE UPDATE OF confirmed_on_dest ON mapped_invoices
             BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        let mock = MockHub::new(dest_hub);
        let hub: Arc<dyn HubTransport> = mock.clone();
        let invoice = unpaid("lnbc1paid", Duration::hours(1));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, Some("dest"))
            .await
            .unwrap();

        let err = mapped.check_if_paid().await.unwrap_err();
        match err {
            MappedInvoiceError::Storage { message } => assert!(message.contains("paid=true")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(mock.count("getuserinvoices"), 1);
        assert_eq!(
            mapped.dest_check().await.unwrap(),
            DestCheck { checked: true, confirmed: false }
        );
    }

    #[tokio::test]
    async fn test_create_binds_to_wallet() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        let hub: Arc<dyn HubTransport> = MockHub::new(dest_hub);
        let mut wallet = Wallet::new("dest", pool.clone(), hub.clone());

        let created = MappedUnpaidInvoice::create_invoice(&mut wallet, Amount::from_sat(1500.0), Some("tea"))
            .await
            .unwrap();
        assert_eq!(created.public_id().len(), 32);

        let rec = queries::get_mapped_invoice(&pool, created.public_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.dest_wallet_id.as_deref(), Some("dest"));

        let mut reopened = MappedUnpaidInvoice::new(created.public_id(), pool.clone(), hub);
        let invoice = reopened.invoice().await.unwrap();
        assert_eq!(invoice.pay_req.as_str(), "lnbc1fresh");
        assert_eq!(invoice.amount.sat(), 1500);
    }

    #[tokio::test]
    async fn test_wallet_errors_are_relabeled() {
        let pool = test_pool().await;
        dest_wallet(&pool).await;
        queries::insert_wallet(&pool, "payer", "https://hub", "l", "p").await.unwrap();
        queries::update_session_backup(&pool, "payer", "a", "r").await.unwrap();

        let failing: Arc<dyn HubTransport> =
            MockHub::new(|_| Err(WalletError::no_connection("down")));
        let mut wallet = Wallet::new("dest", pool.clone(), failing);
        let err = MappedUnpaidInvoice::create_invoice(&mut wallet, Amount::from_sat(10.0), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MappedInvoiceError::CreateFailed { source: WalletError::NoConnection { .. } }
        ));

        let hub: Arc<dyn HubTransport> = MockHub::new(dest_hub);
        let invoice = unpaid("lnbc1open", Duration::hours(1));
        let mut mapped = MappedUnpaidInvoice::map(&pool, &hub, "pub1", &invoice, Some("dest"))
            .await
            .unwrap();
        let mut payer = Wallet::new("payer", pool.clone(), hub);
        let err = mapped.pay(&mut payer, 0).await.unwrap_err();
        match err {
            MappedInvoiceError::PaymentFailed { public_id, source } => {
                assert_eq!(public_id, "pub1");
                assert_eq!(source.server_key(), Some(crate::wallet::ServerErrorKey::LowBalance));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_serializes_with_kind() {
        let err = MappedInvoiceError::info("pub1", GetInfoError::AlreadyChecked);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "getInfoFailed");
        assert_eq!(value["kind"], "alreadyChecked");
        assert_eq!(value["public_id"], "pub1");
    }
}
