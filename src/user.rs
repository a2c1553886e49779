use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::db::queries;
use crate::wallet::{Wallet, WalletError, WalletSession};

/// What a caller needs to list a wallet without loading it again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWalletEntry {
    pub id: String,
    pub name: Option<String>,
    pub sort_priority: i64,
    pub auth_data: WalletSession,
}

/// An application user and the wallets they may operate on. Never talks
/// to a hub by itself.
pub struct User {
    id: i64,
    pool: Pool<Sqlite>,
}

impl User {
    pub fn new(id: i64, pool: Pool<Sqlite>) -> Self {
        Self { id, pool }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Add the wallet to this user's set. Assigning twice is a no-op.
    pub async fn assign_wallet(&self, wallet: &mut Wallet) -> Result<UserWalletEntry, WalletError> {
        debug!("Assigning wallet {} to user {}", wallet.id(), self.id);
        let meta = wallet.meta().await?;
        queries::add_user_wallet(&self.pool, self.id, wallet.id()).await?;
        debug!("Wallet assigned to user");

        Ok(UserWalletEntry {
            id: wallet.id().to_string(),
            name: meta.name,
            sort_priority: meta.sort_priority,
            auth_data: wallet.session().await?,
        })
    }

    pub async fn owns(&self, wallet: &Wallet) -> Result<bool, WalletError> {
        Ok(queries::user_owns_wallet(&self.pool, self.id, wallet.id()).await?)
    }

    pub async fn detach_wallet(&self, wallet: &Wallet) -> Result<(), WalletError> {
        debug!("Detaching wallet {} from user {}", wallet.id(), self.id);
        queries::remove_user_wallet(&self.pool, self.id, wallet.id()).await?;
        Ok(())
    }

    pub async fn wallet_ids(&self) -> Result<Vec<String>, WalletError> {
        Ok(queries::list_user_wallets(&self.pool, self.id).await?)
    }
}
