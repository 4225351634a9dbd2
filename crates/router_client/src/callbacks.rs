//! Callback registry correlating inbound messages with local operations.
//!
//! Every logical operation in flight over the connection is filed under an
//! [`OperationKey`]. A key may hold several entries (two local subscribers to
//! one topic, say). One-shot entries are removed the first time they fire.

use crate::handlers::{ServiceHandler, TopicSubscriber};
use router_core::protocol::Message;
use router_core::RouterError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// The pending `ConnectResponse`.
    Connect,
    /// Local subscribers of a topic.
    Topic,
    /// A request awaiting its response, keyed by local request id.
    Request,
    /// The local handler of a service endpoint.
    Invoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub id: String,
}

impl OperationKey {
    pub fn connect() -> Self {
        Self {
            kind: OperationKind::Connect,
            id: String::new(),
        }
    }

    pub fn topic(topic: &str) -> Self {
        Self {
            kind: OperationKind::Topic,
            id: topic.to_string(),
        }
    }

    pub fn request(request_id: &str) -> Self {
        Self {
            kind: OperationKind::Request,
            id: request_id.to_string(),
        }
    }

    pub fn invoke(endpoint: &str) -> Self {
        Self {
            kind: OperationKind::Invoke,
            id: endpoint.to_string(),
        }
    }
}

pub type ResponseSender = oneshot::Sender<Result<Message, RouterError>>;

pub enum Callback {
    Response(ResponseSender),
    Topic(Arc<dyn TopicSubscriber>),
    Service(Arc<dyn ServiceHandler>),
}

pub struct CallbackEntry {
    pub id: u64,
    pub callback: Callback,
    pub one_shot: bool,
}

#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<OperationKey, Vec<CallbackEntry>>,
}

impl CallbackRegistry {
    /// Appends an entry and returns how many entries the key now holds.
    pub fn add(&mut self, key: OperationKey, entry: CallbackEntry) -> usize {
        let list = self.entries.entry(key).or_default();
        list.push(entry);
        list.len()
    }

    /// Removes one entry by id. Returns the entry and how many remain under its key.
    pub fn remove(&mut self, key: &OperationKey, entry_id: u64) -> Option<(CallbackEntry, usize)> {
        let list = self.entries.get_mut(key)?;
        let position = list.iter().position(|entry| entry.id == entry_id)?;
        let entry = list.remove(position);
        let remaining = list.len();
        if remaining == 0 {
            self.entries.remove(key);
        }
        Some((entry, remaining))
    }

    /// Removes every entry under `key`, returning how many there were.
    pub fn remove_all(&mut self, key: &OperationKey) -> usize {
        self.entries.remove(key).map_or(0, |list| list.len())
    }

    /// Removes and returns the first one-shot entry under `key`.
    pub fn take_one_shot(&mut self, key: &OperationKey) -> Option<CallbackEntry> {
        let list = self.entries.get_mut(key)?;
        let position = list.iter().position(|entry| entry.one_shot)?;
        let entry = list.remove(position);
        if list.is_empty() {
            self.entries.remove(key);
        }
        Some(entry)
    }

    pub fn count(&self, key: &OperationKey) -> usize {
        self.entries.get(key).map_or(0, Vec::len)
    }

    pub fn topic_subscribers(&self, topic: &str) -> Vec<Arc<dyn TopicSubscriber>> {
        self.entries
            .get(&OperationKey::topic(topic))
            .into_iter()
            .flatten()
            .filter_map(|entry| match &entry.callback {
                Callback::Topic(subscriber) => Some(subscriber.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn service(&self, endpoint: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.entries
            .get(&OperationKey::invoke(endpoint))?
            .iter()
            .find_map(|entry| match &entry.callback {
                Callback::Service(handler) => Some(handler.clone()),
                _ => None,
            })
    }

    /// Empties the registry.
    pub fn drain(&mut self) -> Vec<(OperationKey, CallbackEntry)> {
        self.entries
            .drain()
            .flat_map(|(key, list)| list.into_iter().map(move |entry| (key.clone(), entry)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::protocol::TopicMessage;

    fn subscriber() -> Callback {
        Callback::Topic(Arc::new(|_: &TopicMessage| {}))
    }

    fn response() -> (Callback, oneshot::Receiver<Result<Message, RouterError>>) {
        let (tx, rx) = oneshot::channel();
        (Callback::Response(tx), rx)
    }

    #[test]
    fn test_multiple_entries_per_key() {
        let mut registry = CallbackRegistry::default();
        let key = OperationKey::topic("t");

        let first = CallbackEntry { id: 1, callback: subscriber(), one_shot: false };
        let second = CallbackEntry { id: 2, callback: subscriber(), one_shot: false };
        assert_eq!(registry.add(key.clone(), first), 1);
        assert_eq!(registry.add(key.clone(), second), 2);
        assert_eq!(registry.topic_subscribers("t").len(), 2);

        let (_, remaining) = registry.remove(&key, 1).expect("entry 1");
        assert_eq!(remaining, 1);
        assert!(registry.remove(&key, 1).is_none());

        let (_, remaining) = registry.remove(&key, 2).expect("entry 2");
        assert_eq!(remaining, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_one_shot_entries_fire_once() {
        let mut registry = CallbackRegistry::default();
        let key = OperationKey::request("7");
        let (callback, _rx) = response();
        registry.add(key.clone(), CallbackEntry { id: 1, callback, one_shot: true });

        assert!(registry.take_one_shot(&key).is_some());
        assert!(registry.take_one_shot(&key).is_none());
        assert_eq!(registry.count(&key), 0);
    }

    #[test]
    fn test_persistent_entries_are_not_taken_as_one_shot() {
        let mut registry = CallbackRegistry::default();
        let key = OperationKey::topic("t");
        registry.add(key.clone(), CallbackEntry { id: 1, callback: subscriber(), one_shot: false });

        assert!(registry.take_one_shot(&key).is_none());
        assert_eq!(registry.count(&key), 1);
    }

    #[test]
    fn test_keys_are_distinct_per_kind() {
        let mut registry = CallbackRegistry::default();
        let (callback, _rx) = response();
        registry.add(
            OperationKey::request("svc"),
            CallbackEntry {
                id: 1,
                callback,
                one_shot: true,
            },
        );

        assert!(registry.service("svc").is_none());
        assert_eq!(registry.count(&OperationKey::invoke("svc")), 0);
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
