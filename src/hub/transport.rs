use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::wallet::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMethod {
    Get,
    Post,
}

/// One call against a hub's JSON API
#[derive(Debug, Clone, PartialEq)]
pub struct HubRequest {
    pub method: HubMethod,
    pub hub_url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl HubRequest {
    pub fn get(hub_url: &str, path: &str) -> Self {
        Self::new(HubMethod::Get, hub_url, path)
    }

    pub fn post(hub_url: &str, path: &str) -> Self {
        Self::new(HubMethod::Post, hub_url, path)
    }

    fn new(method: HubMethod, hub_url: &str, path: &str) -> Self {
        Self {
            method,
            hub_url: hub_url.to_string(),
            path: path.to_string(),
            query: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.hub_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Send the request and return the decoded JSON body, whatever its shape.
    /// Transport failures surface as `NoConnection`, undecodable bodies as
    /// `AnswerInvalid`.
    async fn send(&self, req: HubRequest) -> Result<Value, WalletError>;
}

/// HTTP implementation backed by reqwest
pub struct ReqwestHub {
    client: reqwest::Client,
}

impl ReqwestHub {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubTransport for ReqwestHub {
    async fn send(&self, req: HubRequest) -> Result<Value, WalletError> {
        debug!("Sending {:?} request to {} on {}", req.method, req.path, req.hub_url);

        let url = req.url();
        let mut builder = match req.method {
            HubMethod::Get => self.client.get(&url),
            HubMethod::Post => self.client.post(&url),
        };
        builder = builder.header(
            reqwest::header::CONTENT_TYPE,
            "application/json; charset=UTF-8",
        );
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(token) = &req.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WalletError::no_connection(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| WalletError::no_connection(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| WalletError::answer_invalid(e.to_string()))
    }
}
