use chrono::Local;

use crate::model::{Contact, DeliveryStatus, Direction, Message};

pub fn render_message(message: &Message) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    match message.direction {
        Direction::Them => format!("[{}]      {}", time, message.text),
        Direction::Me => {
            let status = match message.status {
                DeliveryStatus::Sending => "…",
                DeliveryStatus::Sent => "✓",
                DeliveryStatus::Error => "✗",
            };
            format!("[{}] you: {} {}", time, message.text, status)
        }
    }
}

/// Header plus the last `tail` messages.
pub fn render_thread(contact: &Contact, messages: &[Message], tail: usize) -> String {
    let mut out = format!("── {} · {} ──\n", contact.name, contact.address);
    let skip = messages.len().saturating_sub(tail);
    if skip > 0 {
        out.push_str(&format!("({} earlier)\n", skip));
    }
    for message in &messages[skip..] {
        out.push_str(&render_message(message));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageId;
    use chrono::Utc;

    fn message(text: &str, direction: Direction, status: DeliveryStatus) -> Message {
        Message {
            id: MessageId::Stored(text.into()),
            text: text.into(),
            direction,
            timestamp: Utc::now(),
            status,
        }
    }

    #[test]
    fn outbound_messages_show_their_status() {
        assert!(render_message(&message("a", Direction::Me, DeliveryStatus::Sending)).ends_with("you: a …"));
        assert!(render_message(&message("b", Direction::Me, DeliveryStatus::Error)).ends_with("you: b ✗"));
        assert!(!render_message(&message("c", Direction::Them, DeliveryStatus::Sent)).contains("you:"));
    }

    #[test]
    fn thread_keeps_only_the_tail() {
        let contact = Contact {
            id: "c1".into(),
            name: "Alice".into(),
            address: "5511888".into(),
            last_message: None,
            last_activity: None,
        };
        let messages: Vec<_> = ["1", "2", "3"]
            .iter()
            .map(|t| message(t, Direction::Them, DeliveryStatus::Sent))
            .collect();
        let text = render_thread(&contact, &messages, 2);
        assert!(text.contains("(1 earlier)"));
        assert_eq!(text.lines().count(), 4);
    }
}
