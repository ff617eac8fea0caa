use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{broadcast, mpsc};

use crate::error::StoreError;
use crate::model::{ContactRow, MessageRow, NewMessage, RawId};
use crate::storage::{ChangeEvent, ChangeFilter, ChangeKind, Store, Subscription, Table};

const CHANGE_BUFFER: usize = 256;

pub fn default_db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "EvolutionChat")?;
    Some(proj.data_dir().join("chat.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Local store with the same tables as the hosted database. Writes made
/// through it are published on an in-process change feed.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Err(e) = ensure_dir(path) {
            warn!("could not create {}: {}", path.display(), e);
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                name TEXT,
                phone TEXT NOT NULL,
                last_message_content TEXT,
                last_message_at TEXT
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contact_id TEXT NOT NULL,
                content TEXT,
                sender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_by_contact
                ON messages (contact_id, created_at);
            "#,
        )?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut conn)?)
    }

    fn publish(&self, table: Table, kind: ChangeKind, record: serde_json::Value) {
        // No receivers is the common case outside a live conversation.
        let _ = self.changes.send(ChangeEvent { table, kind, record });
    }

    fn contact_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<ContactRow>> {
        conn.query_row(
            "SELECT id, name, phone, last_message_content, last_message_at FROM contacts WHERE id = ?1",
            params![id],
            |row| {
                let last_at: Option<DateTime<Utc>> = row.get(4)?;
                Ok(ContactRow {
                    id: Some(RawId::Text(row.get(0)?)),
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    last_message_content: row.get(3)?,
                    last_message_at: last_at.map(iso),
                })
            },
        )
        .optional()
    }

    /// Inserts or updates a contact and publishes the change.
    pub fn upsert_contact(&self, id: &str, name: Option<&str>, phone: &str) -> Result<(), StoreError> {
        let (existed, row) = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existed = Self::contact_row(&tx, id)?.is_some();
            tx.execute(
                r#"
                INSERT INTO contacts (id, name, phone)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name,
                    phone=excluded.phone
                "#,
                params![id, name, phone],
            )?;
            let row = Self::contact_row(&tx, id)?;
            tx.commit()?;
            Ok((existed, row))
        })?;
        if let Some(row) = row {
            let kind = if existed { ChangeKind::Update } else { ChangeKind::Insert };
            self.publish(Table::Contacts, kind, serde_json::to_value(&row).unwrap_or_default());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn contacts(&self) -> Result<Vec<ContactRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, phone, last_message_content, last_message_at FROM contacts
                 ORDER BY last_message_at DESC NULLS LAST, name ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                let last_at: Option<DateTime<Utc>> = row.get(4)?;
                Ok(ContactRow {
                    id: Some(RawId::Text(row.get(0)?)),
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    last_message_content: row.get(3)?,
                    last_message_at: last_at.map(iso),
                })
            })?;
            rows.collect()
        })
    }

    async fn messages(&self, contact_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, contact_id, content, sender, created_at FROM messages
                 WHERE contact_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![contact_id], |row| {
                let created_at: DateTime<Utc> = row.get(4)?;
                Ok(MessageRow {
                    id: Some(RawId::Int(row.get(0)?)),
                    contact_id: Some(RawId::Text(row.get(1)?)),
                    content: row.get(2)?,
                    sender: row.get(3)?,
                    created_at: Some(iso(created_at)),
                })
            })?;
            rows.collect()
        })
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRow, StoreError> {
        let (row, contact) = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (contact_id, content, sender, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![message.contact_id, message.content, message.sender, message.created_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE contacts SET last_message_content = ?2, last_message_at = ?3 WHERE id = ?1",
                params![message.contact_id, message.content, message.created_at],
            )?;
            let contact = Self::contact_row(&tx, &message.contact_id)?;
            tx.commit()?;
            let row = MessageRow {
                id: Some(RawId::Int(id)),
                contact_id: Some(RawId::Text(message.contact_id.clone())),
                content: Some(message.content.clone()),
                sender: Some(message.sender.clone()),
                created_at: Some(iso(message.created_at)),
            };
            Ok((row, contact))
        })?;
        debug!("stored message {:?} for contact {}", row.id, message.contact_id);
        self.publish(Table::Messages, ChangeKind::Insert, serde_json::to_value(&row).unwrap_or_default());
        if let Some(contact) = contact {
            self.publish(Table::Contacts, ChangeKind::Update, serde_json::to_value(&contact).unwrap_or_default());
        }
        Ok(row)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, StoreError> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        if filter.matches(&event) && tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("change feed lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, Some(worker)))
    }
}
