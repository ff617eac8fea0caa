use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DecodeError, StoreError};
use crate::model::{ContactRow, MessageRow, NewMessage};
use crate::storage::{ChangeFilter, Store, Subscription, Table, realtime};
use crate::utils::normalize_url;

/// Hosted realtime database: PostgREST for queries, Phoenix websocket for changes.
#[derive(Clone)]
pub struct SupabaseStore {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_http(HttpClient::new(), base_url, api_key)
    }

    pub fn with_http(http: HttpClient, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: normalize_url(base_url),
            api_key: api_key.to_string(),
        }
    }

    fn rest(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text).map_err(DecodeError::from)?)
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn contacts(&self) -> Result<Vec<ContactRow>, StoreError> {
        let req = self
            .http
            .get(self.rest(Table::Contacts))
            .query(&[("select", "*"), ("order", "last_message_at.desc.nullslast")]);
        Self::read(self.with_auth(req).send().await?).await
    }

    async fn messages(&self, contact_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let req = self.http.get(self.rest(Table::Messages)).query(&[
            ("select", "*".to_string()),
            ("contact_id", format!("eq.{}", contact_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        Self::read(self.with_auth(req).send().await?).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRow, StoreError> {
        let req = self
            .http
            .post(self.rest(Table::Messages))
            .header("Prefer", "return=representation")
            .json(message);
        let mut rows: Vec<MessageRow> = Self::read(self.with_auth(req).send().await?).await?;
        debug!("inserted {} message row(s) for {}", rows.len(), message.contact_id);
        if rows.is_empty() {
            return Err(DecodeError::Malformed("insert returned no row".into()).into());
        }
        Ok(rows.swap_remove(0))
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, StoreError> {
        let url = realtime::realtime_url(&self.base_url, &self.api_key)?;
        realtime::subscribe(url, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn contacts_are_requested_newest_activity_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/contacts"))
            .and(query_param("order", "last_message_at.desc.nullslast"))
            .and(header("apikey", "anon"))
            .and(header("Authorization", "Bearer anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "c1", "name": "Alice", "phone": "5511888", "last_message_at": "2024-05-01T10:00:00+00:00"}
            ])))
            .mount(&server)
            .await;

        let rows = SupabaseStore::new(&server.uri(), "anon").contacts().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn messages_are_filtered_by_contact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/messages"))
            .and(query_param("contact_id", "eq.c1"))
            .and(query_param("order", "created_at.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = SupabaseStore::new(&server.uri(), "anon").messages("c1").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn insert_returns_the_stored_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/messages"))
            .and(header("Prefer", "return=representation"))
            .and(body_partial_json(json!({"contact_id": "c1", "content": "hello", "sender": "me"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                {"id": 77, "contact_id": "c1", "content": "hello", "sender": "me", "created_at": "2024-05-01T10:00:00+00:00"}
            ])))
            .mount(&server)
            .await;

        let message = NewMessage {
            contact_id: "c1".into(),
            content: "hello".into(),
            sender: "me".into(),
            created_at: Utc.timestamp_opt(1_714_557_600, 0).unwrap(),
        };
        let row = SupabaseStore::new(&server.uri(), "anon")
            .insert_message(&message)
            .await
            .unwrap();
        assert_eq!(row.id.map(|id| id.into_string()).as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn error_status_keeps_postgrest_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid API key"})))
            .mount(&server)
            .await;

        let err = SupabaseStore::new(&server.uri(), "bad").contacts().await.unwrap_err();
        match err {
            StoreError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreadable_rows_are_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"not": "a list"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "anon");
        let err = store.contacts().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(DecodeError::Malformed(_))));

        let err = store
            .insert_message(&NewMessage::outbound("c1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
