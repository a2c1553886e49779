use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use super::{HubRequest, HubTransport};
use crate::wallet::WalletError;

type Handler = Box<dyn Fn(&HubRequest) -> Result<Value, WalletError> + Send + Sync>;

/// Scripted hub recording every request it receives
pub struct MockHub {
    handler: Handler,
    calls: Mutex<Vec<HubRequest>>,
}

impl MockHub {
    pub fn new(
        handler: impl Fn(&HubRequest) -> Result<Value, WalletError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HubRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Paths of all requests, with the `type` query appended for auth calls
    pub fn paths(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|req| match req.query.iter().find(|(k, _)| k == "type") {
                Some((_, kind)) => format!("{}?type={}", req.path, kind),
                None => req.path.clone(),
            })
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|req| req.path == path).count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HubTransport for MockHub {
    async fn send(&self, req: HubRequest) -> Result<Value, WalletError> {
        self.calls.lock().unwrap().push(req.clone());
        (self.handler)(&req)
    }
}

pub fn bad_auth() -> Value {
    json!({"error": true, "code": 1, "message": "bad auth"})
}
