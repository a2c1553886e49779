//! LndHub wallet client: custodial Lightning accounts on remote hubs,
//! fiat amount conversion and invoices published under public ids.

pub mod app_state;
pub mod config;
pub mod currency;
pub mod db;
pub mod handlers;
pub mod hub;
pub mod mapped_invoice;
pub mod payment;
pub mod rate_limit;
pub mod user;
pub mod wallet;
