use std::future::pending;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::model::Contact;
use crate::storage::{ChangeFilter, ChangeKind, Store, Subscription};

pub struct ContactDirectory {
    store: Arc<dyn Store>,
    contacts: Vec<Contact>,
    subscription: Option<Subscription>,
}

impl ContactDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            contacts: Vec::new(),
            subscription: None,
        }
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    /// Replaces the list with the store's current contents. On a failed
    /// query the previous list is kept. Rows that do not decode are skipped.
    pub async fn load(&mut self) {
        let rows = match self.store.contacts().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("contact query failed, keeping {} cached: {}", self.contacts.len(), e);
                return;
            }
        };
        self.contacts = rows
            .into_iter()
            .filter_map(|row| match Contact::try_from(row) {
                Ok(contact) => Some(contact),
                Err(e) => {
                    warn!("skipping contact: {}", e);
                    None
                }
            })
            .collect();
        debug!("directory holds {} contact(s)", self.contacts.len());
    }

    /// Starts listening for inserts and updates on the contact table. Only
    /// the first call subscribes.
    pub async fn watch(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        match self.store.subscribe(ChangeFilter::contacts()).await {
            Ok(sub) => {
                info!("watching contact changes");
                self.subscription = Some(sub);
            }
            Err(e) => warn!("contact updates unavailable: {}", e),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// Resolves when the contact table changed and the list should be
    /// reloaded. Never resolves while not watching.
    pub async fn next_change(&mut self) {
        loop {
            let Some(sub) = self.subscription.as_mut() else {
                return pending().await;
            };
            match sub.next().await {
                Some(event) if matches!(event.kind, ChangeKind::Insert | ChangeKind::Update) => return,
                Some(_) => continue,
                None => {
                    info!("contact feed closed");
                    self.subscription = None;
                }
            }
        }
    }

    pub async fn refresh_on_change(&mut self) {
        self.next_change().await;
        self.load().await;
    }

    pub fn unwatch(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.release();
        }
    }

    pub fn filter(&self, term: &str) -> Vec<&Contact> {
        filter_contacts(&self.contacts, term)
    }
}

impl Drop for ContactDirectory {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Case-insensitive substring match on name or address.
pub fn filter_contacts<'a>(contacts: &'a [Contact], term: &str) -> Vec<&'a Contact> {
    let needle = term.to_lowercase();
    contacts
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&needle) || c.address.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{FakeStore, contact_change, contact_row};

    fn directory(store: &Arc<FakeStore>) -> ContactDirectory {
        ContactDirectory::new(store.clone())
    }

    #[tokio::test]
    async fn load_maps_rows_into_contacts() {
        let store = FakeStore::new();
        store.set_contacts(vec![contact_row("c1", Some("Alice"), "5511888", Some("2024-05-01T10:00:00Z"))]);
        let mut dir = directory(&store);

        dir.load().await;

        assert_eq!(dir.contacts().len(), 1);
        let alice = &dir.contacts()[0];
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.address, "5511888");
        assert!(alice.last_activity.is_some());
        assert_eq!(dir.get("c1").map(|c| c.name.as_str()), Some("Alice"));
    }

    #[tokio::test]
    async fn failed_load_keeps_the_previous_list() {
        let store = FakeStore::new();
        store.set_contacts(vec![contact_row("c1", None, "5511888", None)]);
        let mut dir = directory(&store);
        dir.load().await;

        store.fail_queries(true);
        dir.load().await;

        assert_eq!(dir.contacts().len(), 1);
        assert_eq!(dir.contacts()[0].name, "5511888");
    }

    #[tokio::test]
    async fn changes_trigger_a_full_reload() {
        let store = FakeStore::new();
        let mut dir = directory(&store);
        dir.watch().await;
        dir.watch().await;
        assert_eq!(store.open_feeds(), 1);
        dir.load().await;
        assert!(dir.contacts().is_empty());

        store.set_contacts(vec![contact_row("c2", Some("Bob"), "5511999", None)]);
        store.push(contact_change(ChangeKind::Insert, "c2"));
        tokio::time::timeout(Duration::from_secs(1), dir.refresh_on_change())
            .await
            .unwrap();

        assert_eq!(dir.contacts().len(), 1);
        assert_eq!(store.contact_queries(), 2);
    }

    #[tokio::test]
    async fn unwatch_releases_the_feed() {
        let store = FakeStore::new();
        let mut dir = directory(&store);
        dir.watch().await;
        assert!(dir.is_watching());

        dir.unwatch();

        assert!(!dir.is_watching());
        assert_eq!(store.open_feeds(), 0);
    }

    #[test]
    fn filter_matches_name_or_address_ignoring_case() {
        let contacts: Vec<Contact> = [("c1", "Alice", "5511888"), ("c2", "Bob", "5521777"), ("c3", "ALINE", "5531666")]
            .into_iter()
            .map(|(id, name, address)| Contact {
                id: id.into(),
                name: name.into(),
                address: address.into(),
                last_message: None,
                last_activity: None,
            })
            .collect();

        let names = |term: &str| -> Vec<String> {
            filter_contacts(&contacts, term).iter().map(|c| c.name.clone()).collect()
        };
        assert_eq!(names("al"), ["Alice", "ALINE"]);
        assert_eq!(names("777"), ["Bob"]);
        assert_eq!(names(""), ["Alice", "Bob", "ALINE"]);
        assert!(names("zzz").is_empty());
    }
}
