use sqlx::{Pool, Sqlite};

use crate::db::models::{MappedInvoiceRecord, WalletRecord};

pub async fn insert_wallet(
    pool: &Pool<Sqlite>,
    id: &str,
    hub_url: &str,
    login: &str,
    password: &str,
) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO wallets (id, hub_url, login, password) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(hub_url)
        .bind(login)
        .bind(password)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn get_wallet(pool: &Pool<Sqlite>, id: &str) -> sqlx::Result<Option<WalletRecord>> {
    sqlx::query_as::<_, WalletRecord>(
        "SELECT id, hub_url, login, password, name, sort_priority, access_token, refresh_token
         FROM wallets WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Partial update; `None` keeps the stored value
pub async fn update_wallet_profile(
    pool: &Pool<Sqlite>,
    id: &str,
    name: Option<&str>,
    sort_priority: Option<i64>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE wallets SET name = COALESCE(?, name), sort_priority = COALESCE(?, sort_priority)
         WHERE id = ?",
    )
    .bind(name)
    .bind(sort_priority)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_session_backup(
    pool: &Pool<Sqlite>,
    id: &str,
    access_token: &str,
    refresh_token: &str,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE wallets SET access_token = ?, refresh_token = ? WHERE id = ?")
        .bind(access_token)
        .bind(refresh_token)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Removes the wallet together with every user's ownership of it
pub async fn delete_wallet(pool: &Pool<Sqlite>, id: &str) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM user_wallets WHERE wallet_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM wallets WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn add_user_wallet(pool: &Pool<Sqlite>, user_id: i64, wallet_id: &str) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO user_wallets (user_id, wallet_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(wallet_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn user_owns_wallet(pool: &Pool<Sqlite>, user_id: i64, wallet_id: &str) -> sqlx::Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_wallets WHERE user_id = ? AND wallet_id = ?",
    )
    .bind(user_id)
    .bind(wallet_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0 > 0)
}

pub async fn remove_user_wallet(pool: &Pool<Sqlite>, user_id: i64, wallet_id: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM user_wallets WHERE user_id = ? AND wallet_id = ?")
        .bind(user_id)
        .bind(wallet_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn list_user_wallets(pool: &Pool<Sqlite>, user_id: i64) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT wallet_id FROM user_wallets WHERE user_id = ? ORDER BY wallet_id")
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|row| row.0).collect())
}

/// Fails on an existing `public_id` instead of overwriting it
pub async fn insert_mapped_invoice(
    pool: &Pool<Sqlite>,
    public_id: &str,
    invoice_json: &str,
    dest_wallet_id: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO mapped_invoices (public_id, invoice, dest_wallet_id) VALUES (?, ?, ?)",
    )
    .bind(public_id)
    .bind(invoice_json)
    .bind(dest_wallet_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_mapped_invoice(
    pool: &Pool<Sqlite>,
    public_id: &str,
) -> sqlx::Result<Option<MappedInvoiceRecord>> {
    sqlx::query_as::<_, MappedInvoiceRecord>(
        "SELECT public_id, invoice, dest_wallet_id, checked_on_dest, confirmed_on_dest
         FROM mapped_invoices WHERE public_id = ?",
    )
    .bind(public_id)
    .fetch_optional(pool)
    .await
}

/// Mark the destination check as performed. Returns false when another
/// caller already did, so at most one check ever runs per invoice.
pub async fn claim_mapped_invoice_check(pool: &Pool<Sqlite>, public_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE mapped_invoices SET checked_on_dest = 1 WHERE public_id = ? AND checked_on_dest = 0",
    )
    .bind(public_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_mapped_invoice_confirmed(
    pool: &Pool<Sqlite>,
    public_id: &str,
    confirmed: bool,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE mapped_invoices SET confirmed_on_dest = ? WHERE public_id = ?")
        .bind(confirmed)
        .bind(public_id)
        .execute(pool)
        .await?;

    Ok(())
}
