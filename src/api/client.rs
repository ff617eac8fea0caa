use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use serde_json::Value;

use crate::api::Gateway;
use crate::api::models::{GatewayMessage, HistoryQuery, SendReceipt, SendTextRequest};
use crate::error::{DecodeError, GatewayError};
use crate::utils::{digits_only, normalize_url, whatsapp_jid};

/// HTTP client for an Evolution API instance.
#[derive(Clone)]
pub struct EvolutionClient {
    http: HttpClient,
    base_url: String,
    instance: String,
    api_key: String,
}

impl EvolutionClient {
    pub fn new(base_url: &str, instance: &str, api_key: &str) -> Self {
        Self::with_http(HttpClient::new(), base_url, instance, api_key)
    }

    pub fn with_http(http: HttpClient, base_url: &str, instance: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: normalize_url(base_url),
            instance: instance.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, path, self.instance)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.post(self.endpoint(path)).header("apikey", &self.api_key)
    }

    /// Turns a non-2xx response into an error carrying the provider's `message`.
    async fn api_error(resp: reqwest::Response) -> GatewayError {
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        let message = match body.get("message") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("API Error: {}", status),
        };
        GatewayError::Api { status, message }
    }

    /// Accepts `{messages: {records: [..]}}`, `{messages: [..]}` or a bare array.
    fn extract_records(json: Value) -> Vec<Value> {
        let records = match json {
            Value::Array(items) => Some(items),
            Value::Object(mut obj) => match obj.remove("messages") {
                Some(Value::Array(items)) => Some(items),
                Some(Value::Object(mut inner)) => match inner.remove("records") {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        };
        records.unwrap_or_default()
    }
}

#[async_trait]
impl Gateway for EvolutionClient {
    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        let number = digits_only(address);
        let resp = self
            .post("message/sendText")
            .json(&SendTextRequest { number: &number, text })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        let receipt = resp.json::<SendReceipt>().await.unwrap_or_default();
        debug!("gateway accepted message for {} (status {:?})", number, receipt.status);
        Ok(receipt)
    }

    async fn find_messages(&self, address: &str, query: HistoryQuery) -> Result<Vec<GatewayMessage>, GatewayError> {
        let body = serde_json::json!({
            "where": { "key": { "remoteJid": whatsapp_jid(address) } },
            "options": {
                "limit": query.limit,
                "sort": if query.newest_first { "DESC" } else { "ASC" },
            }
        });
        let resp = self.post("chat/findMessages").json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        let text = resp.text().await?;
        let json: Value = serde_json::from_str(&text).map_err(DecodeError::from)?;
        let mut out = Vec::new();
        for raw in Self::extract_records(json) {
            match serde_json::from_value::<GatewayMessage>(raw) {
                Ok(msg) => out.push(msg),
                Err(e) => warn!("skipping gateway record: {}", DecodeError::from(e)),
            }
        }
        if query.newest_first {
            out.reverse();
        }
        Ok(out)
    }
}
