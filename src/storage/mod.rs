pub mod realtime;
pub mod sqlite;
pub mod supabase;

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::model::{ContactRow, MessageRow, NewMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Contacts,
    Messages,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Contacts => "contacts",
            Table::Messages => "messages",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contacts" => Some(Table::Contacts),
            "messages" => Some(Table::Messages),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Value,
}

/// How long a released worker may spend saying goodbye before it is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub kinds: Vec<ChangeKind>,
    /// `(column, value)` equality filter on the changed row.
    pub column_eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn contacts() -> Self {
        Self {
            table: Table::Contacts,
            kinds: vec![ChangeKind::Insert, ChangeKind::Update],
            column_eq: None,
        }
    }

    pub fn messages_for(contact_id: &str) -> Self {
        Self {
            table: Table::Messages,
            kinds: vec![ChangeKind::Insert],
            column_eq: Some(("contact_id".to_string(), contact_id.to_string())),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.kinds.contains(&event.kind) {
            return false;
        }
        match &self.column_eq {
            None => true,
            Some((column, expected)) => match event.record.get(column) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Number(n)) => n.to_string() == *expected,
                _ => false,
            },
        }
    }

    /// Row filter in PostgREST syntax, e.g. `contact_id=eq.42`.
    pub fn row_filter(&self) -> Option<String> {
        self.column_eq
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }
}

/// Dropping it closes the feed. A worker with a shutdown signal may finish
/// its goodbye within `SHUTDOWN_GRACE`; any other worker is aborted.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    worker: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>, worker: Option<JoinHandle<()>>) -> Self {
        Self {
            rx,
            worker,
            shutdown: None,
        }
    }

    pub fn with_shutdown(
        rx: mpsc::UnboundedReceiver<ChangeEvent>,
        worker: JoinHandle<()>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            rx,
            worker: Some(worker),
            shutdown: Some(shutdown),
        }
    }

    /// A subscription fed directly through the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        let signalled = self.shutdown.take().is_some_and(|tx| tx.send(()).is_ok());
        match Handle::try_current() {
            Ok(handle) if signalled => {
                handle.spawn(async move {
                    if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
                        debug!("feed worker overran its shutdown, aborting");
                        worker.abort();
                    }
                });
            }
            _ => worker.abort(),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn contacts(&self) -> Result<Vec<ContactRow>, StoreError>;

    async fn messages(&self, contact_id: &str) -> Result<Vec<MessageRow>, StoreError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRow, StoreError>;

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, StoreError>;
}
