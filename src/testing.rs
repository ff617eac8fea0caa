use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, mpsc};

use crate::api::Gateway;
use crate::api::models::{GatewayMessage, HistoryQuery, SendReceipt};
use crate::error::{GatewayError, StoreError};
use crate::model::{ContactRow, MessageRow, NewMessage, RawId};
use crate::storage::{ChangeEvent, ChangeFilter, ChangeKind, Store, Subscription, Table};

pub fn contact_row(id: &str, name: Option<&str>, phone: &str, last_message_at: Option<&str>) -> ContactRow {
    ContactRow {
        id: Some(RawId::Text(id.to_string())),
        name: name.map(str::to_string),
        phone: Some(phone.to_string()),
        last_message_content: None,
        last_message_at: last_message_at.map(str::to_string),
    }
}

pub fn message_row(id: i64, contact_id: &str, content: &str, sender: &str, created_at: &str) -> MessageRow {
    MessageRow {
        id: Some(RawId::Int(id)),
        contact_id: Some(RawId::Text(contact_id.to_string())),
        content: Some(content.to_string()),
        sender: Some(sender.to_string()),
        created_at: Some(created_at.to_string()),
    }
}

pub fn message_insert(id: i64, contact_id: &str, content: &str, sender: &str, created_at: &str) -> ChangeEvent {
    ChangeEvent {
        table: Table::Messages,
        kind: ChangeKind::Insert,
        record: json!({
            "id": id,
            "contact_id": contact_id,
            "content": content,
            "sender": sender,
            "created_at": created_at,
        }),
    }
}

pub fn contact_change(kind: ChangeKind, id: &str) -> ChangeEvent {
    ChangeEvent {
        table: Table::Contacts,
        kind,
        record: json!({ "id": id }),
    }
}

pub fn gateway_message(id: &str, from_me: bool, text: &str, secs: i64) -> GatewayMessage {
    serde_json::from_value(json!({
        "key": { "id": id, "fromMe": from_me, "remoteJid": "0@s.whatsapp.net" },
        "message": { "conversation": text },
        "messageTimestamp": secs,
    }))
    .expect("valid gateway fixture")
}

#[derive(Default)]
pub struct FakeStore {
    contacts: Mutex<Vec<ContactRow>>,
    messages: Mutex<Vec<MessageRow>>,
    inserted: Mutex<Vec<NewMessage>>,
    feeds: Mutex<Vec<(ChangeFilter, mpsc::UnboundedSender<ChangeEvent>)>>,
    fail_queries: AtomicBool,
    fail_inserts: AtomicBool,
    fail_subscribe: AtomicBool,
    contact_queries: AtomicUsize,
    history_delay: Mutex<Option<Duration>>,
    next_id: AtomicI64,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            ..Self::default()
        })
    }

    pub fn set_contacts(&self, rows: Vec<ContactRow>) {
        *self.contacts.lock().unwrap() = rows;
    }

    pub fn add_message(&self, row: MessageRow) {
        self.messages.lock().unwrap().push(row);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Message queries wait `delay` before reading the table.
    pub fn delay_history(&self, delay: Duration) {
        *self.history_delay.lock().unwrap() = Some(delay);
    }

    pub fn contact_queries(&self) -> usize {
        self.contact_queries.load(Ordering::SeqCst)
    }

    pub fn inserted(&self) -> Vec<NewMessage> {
        self.inserted.lock().unwrap().clone()
    }

    /// Delivers `event` to every open feed whose filter matches; returns how many got it.
    pub fn push(&self, event: ChangeEvent) -> usize {
        let feeds = self.feeds.lock().unwrap();
        feeds
            .iter()
            .filter(|(filter, tx)| filter.matches(&event) && tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn open_feeds(&self) -> usize {
        self.feeds.lock().unwrap().iter().filter(|(_, tx)| !tx.is_closed()).count()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn contacts(&self) -> Result<Vec<ContactRow>, StoreError> {
        self.contact_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 503, message: "unavailable".into() });
        }
        Ok(self.contacts.lock().unwrap().clone())
    }

    async fn messages(&self, contact_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let delay = *self.history_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 503, message: "unavailable".into() });
        }
        let wanted = RawId::Text(contact_id.to_string());
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.contact_id.as_ref() == Some(&wanted))
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRow, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 500, message: "insert failed".into() });
        }
        self.inserted.lock().unwrap().push(message.clone());
        let row = MessageRow {
            id: Some(RawId::Int(self.next_id.fetch_add(1, Ordering::SeqCst))),
            contact_id: Some(RawId::Text(message.contact_id.clone())),
            content: Some(message.content.clone()),
            sender: Some(message.sender.clone()),
            created_at: Some(message.created_at.to_rfc3339()),
        };
        self.messages.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, StoreError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Realtime("refused".into()));
        }
        let (tx, sub) = Subscription::channel();
        self.feeds.lock().unwrap().push((filter, tx));
        Ok(sub)
    }
}

#[derive(Default)]
pub struct FakeGateway {
    history: Mutex<HashMap<String, Vec<GatewayMessage>>>,
    history_gates: Mutex<HashMap<String, Arc<Notify>>>,
    fail_history: AtomicBool,
    send_error: Mutex<Option<String>>,
    send_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<(String, String)>>,
    history_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_history(&self, address: &str, records: Vec<GatewayMessage>) {
        self.history.lock().unwrap().insert(address.to_string(), records);
    }

    /// History for `address` is held back until the returned handle is notified.
    pub fn gate_history(&self, address: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.history_gates
            .lock()
            .unwrap()
            .insert(address.to_string(), gate.clone());
        gate
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, message: &str) {
        *self.send_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push((address.to_string(), text.to_string()));
        match self.send_error.lock().unwrap().clone() {
            Some(message) => Err(GatewayError::Api { status: 500, message }),
            None => Ok(SendReceipt::default()),
        }
    }

    async fn find_messages(&self, address: &str, _query: HistoryQuery) -> Result<Vec<GatewayMessage>, GatewayError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.history_gates.lock().unwrap().get(address).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(GatewayError::Api { status: 503, message: "history unavailable".into() });
        }
        Ok(self.history.lock().unwrap().get(address).cloned().unwrap_or_default())
    }
}
