mod amount;
mod service;

pub use amount::{Amount, Bias, Currency, SAT};
pub use service::{BlockchainInfo, CurrencyError, CurrencyService, RateSource, Rates};
