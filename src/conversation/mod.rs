pub mod history;
pub mod outbound;

use std::collections::HashSet;
use std::future::pending;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::Gateway;
use crate::api::models::HistoryQuery;
use crate::model::{Contact, Message, MessageId};
use crate::storage::{ChangeEvent, Store, Subscription};
use crate::utils::run_async_to_owner;

pub use history::{History, HistorySource};
pub use outbound::SendOutcome;

/// Identifies one selection of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub conversation_id: String,
    pub contact_name: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Loading,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ScrollToBottom,
    Alert(String),
}

pub enum ViewEvent {
    HistoryLoaded {
        ticket: Ticket,
        history: History,
        subscription: Option<Subscription>,
    },
    Live {
        ticket: Ticket,
        change: ChangeEvent,
    },
    SendSettled {
        ticket: Ticket,
        temp_id: MessageId,
        outcome: SendOutcome,
    },
    /// The live feed of the selection ended on the store's side.
    FeedClosed { ticket: Ticket },
}

struct ActiveConversation {
    ticket: Ticket,
    contact: Contact,
    state: SyncState,
    messages: Vec<Message>,
    /// Store ids of rows already shown under a temporary id.
    confirmed: HashSet<String>,
    subscription: Option<Subscription>,
    loader: Option<JoinHandle<()>>,
}

pub struct ConversationView {
    store: Arc<dyn Store>,
    gateway: Arc<dyn Gateway>,
    history_query: HistoryQuery,
    active: Option<ActiveConversation>,
    epoch: u64,
    tx: mpsc::UnboundedSender<ViewEvent>,
    rx: mpsc::UnboundedReceiver<ViewEvent>,
    effects: Vec<Effect>,
}

impl ConversationView {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn Gateway>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            gateway,
            history_query: HistoryQuery::default(),
            active: None,
            epoch: 0,
            tx,
            rx,
            effects: Vec::new(),
        }
    }

    pub fn with_history_query(mut self, query: HistoryQuery) -> Self {
        self.history_query = query;
        self
    }

    pub fn contact(&self) -> Option<&Contact> {
        self.active.as_ref().map(|a| &a.contact)
    }

    pub fn state(&self) -> SyncState {
        self.active.as_ref().map_or(SyncState::Idle, |a| a.state)
    }

    pub fn messages(&self) -> &[Message] {
        match &self.active {
            Some(active) => &active.messages,
            None => &[],
        }
    }

    pub fn is_live(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.subscription.is_some())
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Opens `contact`'s conversation, releasing the previous one.
    /// Re-selecting the open conversation does nothing.
    pub fn select(&mut self, contact: Contact) {
        if self.contact().is_some_and(|c| c.id == contact.id) {
            return;
        }
        self.teardown();
        self.epoch += 1;
        let ticket = Ticket {
            conversation_id: contact.id.clone(),
            contact_name: contact.name.clone(),
            epoch: self.epoch,
        };
        info!("opening conversation {} ({})", contact.id, contact.name);

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let query = self.history_query;
        let for_task = contact.clone();
        let for_event = ticket.clone();
        let loader = run_async_to_owner(
            self.tx.clone(),
            async move { history::load_and_subscribe(store.as_ref(), gateway.as_ref(), &for_task, query).await },
            move |(history, subscription)| ViewEvent::HistoryLoaded {
                ticket: for_event,
                history,
                subscription,
            },
        );

        self.active = Some(ActiveConversation {
            ticket,
            contact,
            state: SyncState::Loading,
            messages: Vec::new(),
            confirmed: HashSet::new(),
            subscription: None,
            loader: Some(loader),
        });
    }

    pub fn close(&mut self) {
        self.teardown();
    }

    /// The single exit path out of a conversation: stops the loader and
    /// releases the live feed before the state is dropped.
    fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(loader) = active.loader.take() {
                loader.abort();
            }
            if let Some(subscription) = active.subscription.take() {
                subscription.release();
            }
            debug!("closed conversation {}", active.ticket.conversation_id);
        }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.active.as_ref().is_some_and(|a| &a.ticket == ticket)
    }

    pub async fn next_event(&mut self) -> ViewEvent {
        let ticket = self.active.as_ref().map(|a| a.ticket.clone());
        let feed = self.active.as_mut().and_then(|a| a.subscription.as_mut());
        tokio::select! {
            event = self.rx.recv() => match event {
                Some(event) => event,
                // `self.tx` keeps the channel open for as long as `self` lives.
                None => pending().await,
            },
            change = next_change(feed) => match (change, ticket) {
                (Some(change), Some(ticket)) => ViewEvent::Live { ticket, change },
                (None, Some(ticket)) => ViewEvent::FeedClosed { ticket },
                (_, None) => pending().await,
            },
        }
    }

    /// Applies one event. Events for a selection that is no longer current
    /// are dropped (a failed send still raises its alert).
    pub fn handle(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::HistoryLoaded {
                ticket,
                history,
                subscription,
            } => {
                if !self.is_current(&ticket) {
                    debug!("dropping stale history for {}", ticket.conversation_id);
                    return;
                }
                if let Some(active) = self.active.as_mut() {
                    // Messages sent while loading stay after the history.
                    let pending: Vec<Message> = active
                        .messages
                        .drain(..)
                        .filter(|m| m.id.is_temporary())
                        .collect();
                    debug!(
                        "loaded {} message(s) for {} from {:?}",
                        history.messages.len(),
                        ticket.conversation_id,
                        history.source
                    );
                    let mut loaded = history.messages;
                    loaded.retain(|m| match &m.id {
                        MessageId::Stored(id) => !active.confirmed.contains(id),
                        MessageId::Temporary(_) => true,
                    });
                    for entry in &pending {
                        history::remove_echo(&mut loaded, entry);
                    }
                    active.messages = loaded;
                    active.messages.extend(pending);
                    active.subscription = subscription;
                    active.loader = None;
                    active.state = SyncState::Live;
                    self.effects.push(Effect::ScrollToBottom);
                }
            }
            ViewEvent::Live { ticket, change } => {
                if !self.is_current(&ticket) {
                    return;
                }
                if let Some(active) = self.active.as_mut() {
                    if let Some(message) = history::accept_live(&active.messages, &change) {
                        active.messages.push(message);
                        self.effects.push(Effect::ScrollToBottom);
                    }
                }
            }
            ViewEvent::SendSettled {
                ticket,
                temp_id,
                outcome,
            } => self.settle_send(&ticket, &temp_id, outcome),
            ViewEvent::FeedClosed { ticket } => {
                if !self.is_current(&ticket) {
                    return;
                }
                if let Some(active) = self.active.as_mut() {
                    info!("live updates for {} stopped", ticket.conversation_id);
                    active.subscription = None;
                }
            }
        }
    }

    pub async fn pump(&mut self) {
        let event = self.next_event().await;
        self.handle(event);
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn next_change(feed: Option<&mut Subscription>) -> Option<ChangeEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => pending().await,
    }
}
