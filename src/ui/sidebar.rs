use chrono::Local;

use crate::model::Contact;

/// Numbered contact list; `active` marks the open conversation.
pub fn render_contacts(contacts: &[&Contact], active: Option<&str>, term: &str) -> String {
    if contacts.is_empty() {
        return if term.is_empty() {
            "No contacts yet.".to_string()
        } else {
            "No results found.".to_string()
        };
    }
    let mut out = String::new();
    for (idx, contact) in contacts.iter().enumerate() {
        let marker = if active == Some(contact.id.as_str()) { '>' } else { ' ' };
        let when = contact
            .last_activity
            .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{} {:>2}. {} ({}) {}\n",
            marker,
            idx + 1,
            contact.name,
            contact.address,
            when
        ));
        if let Some(preview) = &contact.last_message {
            out.push_str(&format!("       {}\n", preview));
        }
    }
    out
}
