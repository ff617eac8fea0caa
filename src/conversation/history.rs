use chrono::Duration;
use log::{debug, info, warn};

use crate::api::Gateway;
use crate::api::models::HistoryQuery;
use crate::model::{Contact, DeliveryStatus, Direction, Message, MessageRow};
use crate::storage::{ChangeEvent, ChangeFilter, ChangeKind, Store, Subscription};

/// Gateway timestamps are whole seconds and its clock may trail ours.
const ECHO_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Store,
    Gateway,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub messages: Vec<Message>,
    pub source: HistorySource,
}

impl History {
    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            source: HistorySource::Empty,
        }
    }

    fn from_messages(mut messages: Vec<Message>, source: HistorySource) -> Self {
        // Stable, so equal timestamps keep the order the source gave them.
        messages.sort_by_key(|m| m.timestamp);
        Self { messages, source }
    }
}

/// Reads the stored history, falling back to the gateway when the store has
/// nothing (or could not be queried). Never fails: the worst case is an
/// empty conversation.
pub async fn load_history(store: &dyn Store, gateway: &dyn Gateway, contact: &Contact, query: HistoryQuery) -> History {
    match store.messages(&contact.id).await {
        Ok(rows) if !rows.is_empty() => {
            let messages = rows
                .into_iter()
                .filter_map(|row| match Message::try_from(row) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!("skipping stored message for {}: {}", contact.id, e);
                        None
                    }
                })
                .collect();
            return History::from_messages(messages, HistorySource::Store);
        }
        Ok(_) => debug!("no stored history for {}, asking the gateway", contact.id),
        Err(e) => warn!("history query for {} failed: {}", contact.id, e),
    }

    match gateway.find_messages(&contact.address, query).await {
        Ok(records) if !records.is_empty() => {
            let messages = records
                .into_iter()
                .filter_map(|raw| match Message::try_from(raw) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!("skipping gateway record for {}: {}", contact.address, e);
                        None
                    }
                })
                .collect();
            History::from_messages(messages, HistorySource::Gateway)
        }
        Ok(_) => History::empty(),
        Err(e) => {
            info!("no gateway history for {}: {}", contact.address, e);
            History::empty()
        }
    }
}

/// History first, then the live feed, so no live event predates the first render.
pub async fn load_and_subscribe(
    store: &dyn Store,
    gateway: &dyn Gateway,
    contact: &Contact,
    query: HistoryQuery,
) -> (History, Option<Subscription>) {
    let history = load_history(store, gateway, contact, query).await;
    let subscription = match store.subscribe(ChangeFilter::messages_for(&contact.id)).await {
        Ok(sub) => Some(sub),
        Err(e) => {
            warn!("live updates for {} unavailable: {}", contact.id, e);
            None
        }
    };
    (history, subscription)
}

/// Only inbound inserts with an unseen id are accepted.
pub fn accept_live(current: &[Message], change: &ChangeEvent) -> Option<Message> {
    if change.kind != ChangeKind::Insert {
        return None;
    }
    let message = match MessageRow::from_value(change.record.clone()).and_then(Message::try_from) {
        Ok(message) => message,
        Err(e) => {
            warn!("discarding malformed live message: {}", e);
            return None;
        }
    };
    if message.direction == Direction::Me {
        debug!("ignoring echo of outbound message {}", message.id);
        return None;
    }
    if current.iter().any(|m| m.id == message.id) {
        debug!("ignoring duplicate live message {}", message.id);
        return None;
    }
    Some(message)
}

/// Removes the loaded copy of `entry`, an optimistic message whose delivery
/// finished before the history query ran. The copy is the first outbound row
/// with the same text that is not older than the entry.
pub fn remove_echo(loaded: &mut Vec<Message>, entry: &Message) -> Option<Message> {
    if !entry.id.is_temporary() || entry.status == DeliveryStatus::Error {
        return None;
    }
    let earliest = entry.timestamp - Duration::seconds(ECHO_WINDOW_SECS);
    let pos = loaded
        .iter()
        .position(|m| !m.id.is_temporary() && m.direction == Direction::Me && m.text == entry.text && m.timestamp >= earliest)?;
    let echo = loaded.remove(pos);
    debug!("history already holds {} as {}", entry.id, echo.id);
    Some(echo)
}
