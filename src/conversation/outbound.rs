use std::sync::Arc;

use log::{error, info, warn};

use crate::api::Gateway;
use crate::conversation::{ConversationView, Effect, Ticket, ViewEvent};
use crate::model::{DeliveryStatus, Message, MessageId, NewMessage};
use crate::storage::Store;
use crate::utils::run_async_to_owner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The gateway accepted the message. `stored_id` is `None` when the
    /// follow-up store insert failed.
    Delivered { stored_id: Option<String> },
    Failed(String),
}

/// Hands `text` to the gateway and, once accepted, records it in the store.
pub async fn deliver(
    store: Arc<dyn Store>,
    gateway: Arc<dyn Gateway>,
    contact_id: String,
    address: String,
    text: String,
) -> SendOutcome {
    if let Err(e) = gateway.send_text(&address, &text).await {
        error!("gateway send to {} failed: {}", address, e);
        return SendOutcome::Failed(e.to_string());
    }
    match store.insert_message(&NewMessage::outbound(&contact_id, &text)).await {
        Ok(row) => SendOutcome::Delivered {
            stored_id: row.id.map(|id| id.into_string()),
        },
        Err(e) => {
            warn!("message to {} delivered but not stored: {}", address, e);
            SendOutcome::Delivered { stored_id: None }
        }
    }
}

impl ConversationView {
    pub fn send(&mut self, text: &str) -> Option<MessageId> {
        if text.trim().is_empty() {
            return None;
        }
        let active = self.active.as_mut()?;
        let entry = Message::optimistic(text);
        let temp_id = entry.id.clone();
        active.messages.push(entry);
        self.effects.push(Effect::ScrollToBottom);

        let ticket = active.ticket.clone();
        let temp = temp_id.clone();
        info!("sending {} to {}", temp_id, active.contact.address);
        run_async_to_owner(
            self.tx.clone(),
            deliver(
                self.store.clone(),
                self.gateway.clone(),
                active.contact.id.clone(),
                active.contact.address.clone(),
                text.to_string(),
            ),
            move |outcome| ViewEvent::SendSettled {
                ticket,
                temp_id: temp,
                outcome,
            },
        );
        Some(temp_id)
    }

    pub(crate) fn settle_send(&mut self, ticket: &Ticket, temp_id: &MessageId, outcome: SendOutcome) {
        let current = self.is_current(ticket);
        if let SendOutcome::Failed(reason) = &outcome {
            let who = if current {
                String::new()
            } else {
                format!(" to {}", ticket.contact_name)
            };
            self.effects.push(Effect::Alert(format!("Failed to send message{}: {}", who, reason)));
        }
        if !current {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // The entry keeps its temporary id; only the status changes.
        let status = match outcome {
            SendOutcome::Delivered { stored_id } => {
                if let Some(id) = stored_id {
                    let stored = MessageId::Stored(id.clone());
                    active.messages.retain(|m| m.id != stored);
                    active.confirmed.insert(id);
                }
                DeliveryStatus::Sent
            }
            SendOutcome::Failed(_) => DeliveryStatus::Error,
        };
        if let Some(entry) = active.messages.iter_mut().find(|m| &m.id == temp_id) {
            entry.status = status;
        }
    }
}
