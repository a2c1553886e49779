use sqlx::{Pool, Sqlite};
use std::sync::Arc;

use crate::config::Config;
use crate::currency::{Bias, CurrencyService};
use crate::hub::HubTransport;
use crate::mapped_invoice::MappedUnpaidInvoice;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Sqlite>,
    pub config: Arc<Config>,
    pub hub: Arc<dyn HubTransport>,
    pub currencies: CurrencyService,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn mapped_invoice(&self, public_id: &str) -> MappedUnpaidInvoice {
        MappedUnpaidInvoice::new(public_id, self.pool.clone(), self.hub.clone())
    }

    pub fn bias(&self) -> Bias {
        Bias::new(self.config.fiat_mult)
    }
}
