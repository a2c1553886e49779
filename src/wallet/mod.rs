//! Client for one account on a remote LndHub-compatible hub.
//!
//! A [`Wallet`] owns the account's session tokens and a snapshot of its
//! balance and history. Callers that keep wallets across interactions take
//! the snapshot out with [`Wallet::cache`] and hand it back with
//! [`Wallet::restore`] or [`Wallet::apply_cache`].

mod error;
mod history;

pub use error::{ServerErrorKey, WalletError, WalletErrorKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::currency::Amount;
use crate::db::{models::WalletRecord, queries};
use crate::hub::schemas::{
    self, AuthTokens, Balance, BtcAddress, CreatedAccount, CreatedInvoice, DecodedInvoice,
    PaidInvoice, PendingTx, RawTx, UserInvoice,
};
use crate::hub::{self, HubRequest, HubTransport};
use crate::payment::{PaymentRequest, Tx, UnpaidInvoice};

const MAX_NAME_LEN: usize = 15;

/// Tokens for talking to a hub on behalf of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    pub hub_url: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Snapshot of what has been loaded from the hub. A `None` field has not
/// been loaded yet, which is different from a loaded empty value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txs: Option<Vec<Tx>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpaid_invoices: Option<Vec<UnpaidInvoice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    Balance,
    Txs,
    UnpaidInvoices,
    BtcAddr,
    LastUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBehavior {
    /// The next load clears balance and history before storing its result
    FlushOnMiss,
    Normal,
}

/// Stored account data. Holds credentials, so it is never cached in a snapshot.
#[derive(Clone)]
pub struct WalletMeta {
    pub id: String,
    pub hub_url: String,
    pub login: String,
    pub password: String,
    pub name: Option<String>,
    pub sort_priority: i64,
    pub session_backup: Option<(String, String)>,
}

impl std::fmt::Debug for WalletMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletMeta")
            .field("id", &self.id)
            .field("hub_url", &self.hub_url)
            .field("name", &self.name)
            .field("sort_priority", &self.sort_priority)
            .finish_non_exhaustive()
    }
}

impl WalletMeta {
    pub fn backup(&self) -> String {
        backup_string(&self.login, &self.password, &self.hub_url)
    }
}

impl From<WalletRecord> for WalletMeta {
    fn from(rec: WalletRecord) -> Self {
        let session_backup = match (rec.access_token, rec.refresh_token) {
            (Some(access), Some(refresh)) => Some((access, refresh)),
            _ => None,
        };
        Self {
            id: rec.id,
            hub_url: rec.hub_url,
            login: rec.login,
            password: rec.password,
            name: rec.name,
            sort_priority: rec.sort_priority,
            session_backup,
        }
    }
}

/// Partial update for [`Wallet::edit`]
#[derive(Debug, Clone, Default)]
pub struct WalletProfile {
    pub name: Option<String>,
    pub sort_priority: Option<i64>,
}

/// A freshly stored wallet and its `lndhub://` backup string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWallet {
    pub id: String,
    pub backup: String,
}

/// How a request is authorized. On an auth rejection the wallet walks
/// [`AuthStrategy::ESCALATION`] in order and never goes past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    AccessToken,
    RefreshToken,
    Credentials,
}

impl AuthStrategy {
    pub const ESCALATION: [AuthStrategy; 3] = [
        AuthStrategy::AccessToken,
        AuthStrategy::RefreshToken,
        AuthStrategy::Credentials,
    ];
}

fn backup_string(login: &str, password: &str, hub_url: &str) -> String {
    format!("lndhub://{}:{}@{}", login, password, hub_url)
}

fn validate_hub_url(hub_url: &str) -> Result<(), WalletError> {
    let url = Url::parse(hub_url).map_err(|_| WalletError::invalid_request("Invalid url"))?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(WalletError::invalid_request("Invalid url"));
    }
    Ok(())
}

fn generate_wallet_id() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

async fn authed_get(
    hub: &Arc<dyn HubTransport>,
    session: &WalletSession,
    path: &str,
) -> Result<Value, WalletError> {
    let req = HubRequest::get(&session.hub_url, path).bearer(&session.access_token);
    hub::call(hub, req).await
}

pub struct Wallet {
    id: String,
    pool: Pool<Sqlite>,
    hub: Arc<dyn HubTransport>,
    meta: Option<WalletMeta>,
    session: Option<WalletSession>,
    cache: WalletCache,
    flush_on_next_load: bool,
}

impl Wallet {
    pub fn new(id: impl Into<String>, pool: Pool<Sqlite>, hub: Arc<dyn HubTransport>) -> Self {
        Self {
            id: id.into(),
            pool,
            hub,
            meta: None,
            session: None,
            cache: WalletCache::default(),
            flush_on_next_load: false,
        }
    }

    /// Rebuild a wallet from a session and snapshot kept by the caller
    pub fn restore(
        id: impl Into<String>,
        pool: Pool<Sqlite>,
        hub: Arc<dyn HubTransport>,
        session: Option<WalletSession>,
        cache: WalletCache,
    ) -> Self {
        let mut wallet = Self::new(id, pool, hub);
        wallet.session = session;
        wallet.cache = cache;
        wallet
    }

    /// Open a new account on `hub_url` and store its credentials
    pub async fn create(
        pool: &Pool<Sqlite>,
        hub: &Arc<dyn HubTransport>,
        hub_url: &str,
    ) -> Result<NewWallet, WalletError> {
        info!("Wallet: creating new account on {}", hub_url);
        validate_hub_url(hub_url)?;

        let answer = hub::call(hub, HubRequest::post(hub_url, "create")).await?;
        let account: CreatedAccount = schemas::parse(answer)?;
        debug!("Api call succeeded, storing new wallet");

        let id = generate_wallet_id();
        queries::insert_wallet(pool, &id, hub_url, &account.login, &account.password).await?;
        debug!("Done! Id={}", id);

        Ok(NewWallet {
            backup: backup_string(&account.login, &account.password, hub_url),
            id,
        })
    }

    /// Store existing credentials and prove they work with one credential
    /// login. The record is removed again when the hub refuses access.
    pub async fn import(
        pool: &Pool<Sqlite>,
        hub: &Arc<dyn HubTransport>,
        hub_url: &str,
        login: &str,
        password: &str,
    ) -> Result<NewWallet, WalletError> {
        info!("Wallet: importing account on {}", hub_url);
        validate_hub_url(hub_url)?;

        let id = generate_wallet_id();
        queries::insert_wallet(pool, &id, hub_url, login, password).await?;
        debug!("Saved, checking if it is accessible");

        let mut wallet = Wallet::new(id.clone(), pool.clone(), hub.clone());
        if let Err(err) = wallet.authorize(AuthStrategy::Credentials).await {
            info!("Wallet: import of {} failed, no access: {}", id, err);
            if let Err(e) = queries::delete_wallet(pool, &id).await {
                warn!("Failed to remove inaccessible wallet {}: {}", id, e);
            }
            return Err(err);
        }
        debug!("Import successful. Id={}", id);

        Ok(NewWallet {
            backup: backup_string(login, password, hub_url),
            id,
        })
    }

    pub async fn edit(&mut self, profile: WalletProfile) -> Result<(), WalletError> {
        info!("Wallet: editing {}", self.id);
        if let Some(name) = &profile.name {
            if name.chars().count() > MAX_NAME_LEN {
                return Err(WalletError::invalid_request("Name too long"));
            }
        }
        let updated = queries::update_wallet_profile(
            &self.pool,
            &self.id,
            profile.name.as_deref(),
            profile.sort_priority,
        )
        .await?;
        if !updated {
            return Err(WalletError::invalid_request("No wallet found"));
        }
        self.meta = None;
        debug!("Wallet data updated");
        Ok(())
    }

    /// Remove the stored record. Remote credentials stay valid.
    pub async fn delete(self) -> Result<(), WalletError> {
        info!("Wallet: deleting {}", self.id);
        queries::delete_wallet(&self.pool, &self.id).await?;
        debug!("Wallet deleted");
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) fn hub(&self) -> &Arc<dyn HubTransport> {
        &self.hub
    }

    /// Stored account data, always read fresh from the database
    pub async fn meta(&mut self) -> Result<WalletMeta, WalletError> {
        debug!("Wallet: loading meta for {}", self.id);
        let record = queries::get_wallet(&self.pool, &self.id)
            .await?
            .ok_or_else(|| WalletError::invalid_request("No wallet found"))?;
        let meta = WalletMeta::from(record);
        self.meta = Some(meta.clone());
        Ok(meta)
    }

    async fn known_meta(&mut self) -> Result<WalletMeta, WalletError> {
        match &self.meta {
            Some(meta) => Ok(meta.clone()),
            None => self.meta().await,
        }
    }

    pub async fn backup(&mut self) -> Result<String, WalletError> {
        Ok(self.known_meta().await?.backup())
    }

    /// Current session: the one in memory, else the stored backup, else a
    /// fresh credential login
    pub async fn session(&mut self) -> Result<WalletSession, WalletError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        debug!("Wallet: no session, loading meta");
        let meta = self.known_meta().await?;
        match meta.session_backup {
            Some((access_token, refresh_token)) => {
                debug!("Restoring session from backup");
                self.session = Some(WalletSession {
                    hub_url: meta.hub_url,
                    access_token,
                    refresh_token,
                });
            }
            None => self.authorize(AuthStrategy::Credentials).await?,
        }
        self.session
            .clone()
            .ok_or_else(|| WalletError::unknown("Session unavailable"))
    }

    async fn authorize(&mut self, strategy: AuthStrategy) -> Result<(), WalletError> {
        let meta = self.known_meta().await?;
        let req = match strategy {
            AuthStrategy::AccessToken => return Ok(()),
            AuthStrategy::RefreshToken => {
                let Some(refresh_token) = self.session.as_ref().map(|s| s.refresh_token.clone())
                else {
                    // Nothing to refresh with, the hub would say the same
                    return Err(WalletError::server(1, "No refresh token"));
                };
                HubRequest::post(&meta.hub_url, "auth")
                    .query("type", "refresh_token")
                    .json(json!({ "refresh_token": refresh_token }))
            }
            AuthStrategy::Credentials => HubRequest::post(&meta.hub_url, "auth")
                .query("type", "auth")
                .json(json!({ "login": meta.login, "password": meta.password })),
        };
        info!("Authorizing {}, method={:?}", self.id, strategy);

        let tokens: AuthTokens = schemas::parse(hub::call(&self.hub, req).await?)?;
        if let Err(e) = queries::update_session_backup(
            &self.pool,
            &self.id,
            &tokens.access_token,
            &tokens.refresh_token,
        )
        .await
        {
            warn!("Failed to back up session of {}: {}", self.id, e);
        }
        self.session = Some(WalletSession {
            hub_url: meta.hub_url,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        });
        debug!("Successfully authorized, updated session and backup");
        Ok(())
    }

    /// Run `op` with the current session, escalating through
    /// [`AuthStrategy::ESCALATION`] while the hub answers with bad auth
    async fn with_auth<T, F, Fut>(&mut self, op: F) -> Result<T, WalletError>
    where
        F: Fn(WalletSession) -> Fut,
        Fut: Future<Output = Result<T, WalletError>>,
    {
        let last = AuthStrategy::ESCALATION.len() - 1;
        let mut rejection = None;

        for (step, strategy) in AuthStrategy::ESCALATION.into_iter().enumerate() {
            if strategy != AuthStrategy::AccessToken {
                debug!("Wallet: bad auth, escalating to {:?}", strategy);
                match self.authorize(strategy).await {
                    Ok(()) => {}
                    Err(err) if err.is_bad_auth() && step < last => {
                        rejection = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
            let session = self.session().await?;
            match op(session).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_bad_auth() && step < last => rejection = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(rejection.unwrap_or_else(|| WalletError::unknown("Authentication exhausted")))
    }

    async fn auth_get(&mut self, path: &'static str) -> Result<Value, WalletError> {
        let hub = self.hub.clone();
        self.with_auth(move |session| {
            let hub = hub.clone();
            async move { authed_get(&hub, &session, path).await }
        })
        .await
    }

    async fn auth_request(&mut self, req: HubRequest) -> Result<Value, WalletError> {
        let hub = self.hub.clone();
        self.with_auth(move |session| {
            let hub = hub.clone();
            let mut req = req.clone();
            req.hub_url = session.hub_url.clone();
            req = req.bearer(&session.access_token);
            async move { hub::call(&hub, req).await }
        })
        .await
    }

    fn flush_cache_if_needed(&mut self) {
        if self.flush_on_next_load {
            self.flush_cache();
            self.flush_on_next_load = false;
        }
    }

    pub async fn load_btc_addr(&mut self) -> Result<(), WalletError> {
        info!("Wallet: loading btc address for {}", self.id);
        let answer = self.auth_get("getbtc").await?;
        let addresses: Vec<BtcAddress> = schemas::parse(answer)?;
        let address = addresses
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::answer_invalid("No btc address returned"))?;
        // Addresses never change, so last_update stays as is
        self.cache.btc_addr = Some(address.address);
        debug!("Btc address loaded and saved to cache");
        Ok(())
    }

    pub async fn load_balance(&mut self) -> Result<(), WalletError> {
        info!("Wallet: loading balance for {}", self.id);
        self.flush_cache_if_needed();
        let answer = self.auth_get("balance").await?;
        let balance: Balance = schemas::parse(answer)?;
        self.cache.balance = Some(Amount::from_sat(balance.btc.available_balance));
        self.cache.last_update = Some(Utc::now());
        debug!("Balance loaded and saved to cache");
        Ok(())
    }

    /// Fetch pending, settled and invoice lists concurrently and merge them.
    /// Any failing endpoint fails the whole load.
    pub async fn load_txs(&mut self) -> Result<(), WalletError> {
        info!("Wallet: loading all transactions for {}", self.id);
        let hub = self.hub.clone();
        let (pending, raw_txs, invoices) = self
            .with_auth(move |session| {
                let hub = hub.clone();
                async move {
                    tokio::try_join!(
                        authed_get(&hub, &session, "getpending"),
                        authed_get(&hub, &session, "gettxs"),
                        authed_get(&hub, &session, "getuserinvoices"),
                    )
                }
            })
            .await?;
        debug!("Api calls succeeded. Parsing...");

        let history = history::build_history(
            schemas::parse_items::<PendingTx>(pending)?,
            schemas::parse_items::<RawTx>(raw_txs)?,
            schemas::parse_items::<UserInvoice>(invoices)?,
        );

        self.flush_cache_if_needed();
        self.cache.txs = Some(history.txs);
        self.cache.unpaid_invoices = Some(history.unpaid);
        self.cache.last_update = Some(Utc::now());
        debug!("Txs loaded, sorted and saved into cache");
        Ok(())
    }

    pub fn flush_cache(&mut self) -> &mut Self {
        debug!("Wallet: flushing cache for {}", self.id);
        self.cache.balance = None;
        self.cache.txs = None;
        self.cache.unpaid_invoices = None;
        self.cache.last_update = None;
        self
    }

    pub fn cache_behavior_next(&mut self, behavior: CacheBehavior) -> &mut Self {
        debug!("Wallet: cache behavior for next load is {:?}", behavior);
        self.flush_on_next_load = behavior == CacheBehavior::FlushOnMiss;
        self
    }

    /// Create an invoice, then decode it for the full metadata
    pub async fn create_invoice(
        &mut self,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<UnpaidInvoice, WalletError> {
        info!("Wallet: creating invoice (amt={}) for {}", amount.sat(), self.id);
        let mut body = json!({ "amt": amount.sat() });
        if let Some(memo) = description.filter(|d| !d.is_empty()) {
            body["memo"] = json!(memo);
        }
        let answer = self
            .auth_request(HubRequest::post("", "addinvoice").json(body))
            .await?;
        let created: CreatedInvoice = schemas::parse(answer)?;
        let pay_req = PaymentRequest::ln(&created.payment_request)
            .map_err(|e| WalletError::answer_invalid(e.to_string()))?;
        debug!("PayReq created, retrieving full invoice info");

        self.get_invoice_info(&pay_req).await
    }

    /// Decode any payment request, not only those of this wallet
    pub async fn get_invoice_info(
        &mut self,
        pay_req: &PaymentRequest,
    ) -> Result<UnpaidInvoice, WalletError> {
        info!("Wallet: getting invoice info for {}", self.id);
        let answer = self
            .auth_request(HubRequest::get("", "decodeinvoice").query("invoice", pay_req.as_str()))
            .await?;
        let decoded: DecodedInvoice = schemas::parse(answer)?;
        let time = DateTime::from_timestamp(decoded.timestamp, 0)
            .ok_or_else(|| WalletError::answer_invalid("Invalid invoice timestamp"))?;
        let expires = DateTime::from_timestamp(decoded.timestamp.saturating_add(decoded.expiry), 0)
            .ok_or_else(|| WalletError::answer_invalid("Invalid invoice expiry"))?;
        debug!("Retrieved full invoice info");

        Ok(UnpaidInvoice {
            direction: None,
            amount: Amount::from_sat(decoded.num_satoshis as f64),
            time,
            expires,
            pay_req: pay_req.clone(),
            description: Some(decoded.description).filter(|d| !d.is_empty()),
        })
    }

    /// `amount_sat` only matters for invoices without an amount
    pub async fn pay_invoice(
        &mut self,
        invoice: &impl AsRef<PaymentRequest>,
        amount_sat: u64,
    ) -> Result<(), WalletError> {
        info!("Wallet: {} tries to pay provided invoice", self.id);
        let body = json!({ "invoice": invoice.as_ref().as_str(), "amount": amount_sat });
        let answer = self
            .auth_request(HubRequest::post("", "payinvoice").json(body))
            .await?;
        let _: PaidInvoice = schemas::parse(answer)?;
        debug!("Successfully paid an invoice");
        Ok(())
    }

    /// Whether the request shows up as a settled receive. Answers from the
    /// loaded history when there is one, otherwise asks the hub once.
    pub async fn check_receival(
        &mut self,
        invoice: &impl AsRef<PaymentRequest>,
    ) -> Result<bool, WalletError> {
        info!("Wallet: checking receival of invoice for {}", self.id);
        let req = invoice.as_ref();
        if let Some(txs) = &self.cache.txs {
            return Ok(txs.iter().any(|tx| tx.settles(req)));
        }

        debug!("Wallet: retrieving user invoices for {}", self.id);
        let answer = self.auth_get("getuserinvoices").await?;
        let invoices: Vec<UserInvoice> = schemas::parse_items(answer)?;
        Ok(invoices
            .iter()
            .any(|inv| inv.ispaid == Some(true) && inv.payment_request == req.as_str()))
    }

    pub async fn balance(&mut self) -> Result<Amount, WalletError> {
        if self.cache.balance.is_none() {
            self.load_balance().await?;
        }
        self.cache
            .balance
            .ok_or_else(|| WalletError::unknown("Balance missing after load"))
    }

    pub async fn txs(&mut self) -> Result<Vec<Tx>, WalletError> {
        if self.cache.txs.is_none() {
            self.load_txs().await?;
        }
        self.cache
            .txs
            .clone()
            .ok_or_else(|| WalletError::unknown("Transactions missing after load"))
    }

    pub async fn unpaid_invoices(&mut self) -> Result<Vec<UnpaidInvoice>, WalletError> {
        if self.cache.unpaid_invoices.is_none() {
            self.load_txs().await?;
        }
        self.cache
            .unpaid_invoices
            .clone()
            .ok_or_else(|| WalletError::unknown("Invoices missing after load"))
    }

    pub async fn btc_addr(&mut self) -> Result<PaymentRequest, WalletError> {
        if self.cache.btc_addr.is_none() {
            self.load_btc_addr().await?;
        }
        let addr = self
            .cache
            .btc_addr
            .as_deref()
            .ok_or_else(|| WalletError::unknown("Address missing after load"))?;
        PaymentRequest::btc(addr).map_err(|e| WalletError::answer_invalid(e.to_string()))
    }

    /// Snapshot to keep until the next interaction
    pub fn cache(&self) -> WalletCache {
        self.cache.clone()
    }

    pub fn apply_cache(&mut self, cache: WalletCache) -> &mut Self {
        self.cache = cache;
        self
    }

    pub fn last_cache_update(&self) -> Option<DateTime<Utc>> {
        self.cache.last_update
    }

    pub fn has_cached(&self, key: CacheKey) -> bool {
        match key {
            CacheKey::Balance => self.cache.balance.is_some(),
            CacheKey::Txs => self.cache.txs.is_some(),
            CacheKey::UnpaidInvoices => self.cache.unpaid_invoices.is_some(),
            CacheKey::BtcAddr => self.cache.btc_addr.is_some(),
            CacheKey::LastUpdate => self.cache.last_update.is_some(),
        }
    }

    pub fn has_cached_all(&self) -> bool {
        self.has_cached(CacheKey::Balance)
            && self.has_cached(CacheKey::Txs)
            && self.has_cached(CacheKey::UnpaidInvoices)
    }
}
