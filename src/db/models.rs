use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletRecord {
    pub id: String,
    pub hub_url: String,
    pub login: String,
    pub password: String,
    pub name: Option<String>,
    pub sort_priority: i64,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MappedInvoiceRecord {
    pub public_id: String,
    /// JSON encoded `UnpaidInvoice`
    pub invoice: String,
    pub dest_wallet_id: Option<String>,
    pub checked_on_dest: bool,
    pub confirmed_on_dest: bool,
}
