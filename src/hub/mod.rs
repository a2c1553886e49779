pub mod schemas;
mod transport;

pub use transport::{HubMethod, HubRequest, HubTransport, ReqwestHub};

use serde_json::Value;
use std::sync::Arc;

use crate::wallet::WalletError;

/// Send a request and reject hub error answers
pub async fn call(hub: &Arc<dyn HubTransport>, req: HubRequest) -> Result<Value, WalletError> {
    let value = hub.send(req).await?;
    schemas::check_api_error(value)
}

#[cfg(test)]
pub mod mock;
