//! In-memory topic registry.
//!
//! Maps topics to listener registrations and derives the desired server-side
//! key set from them. The desired set is recomputed from the registrations
//! on demand; it is never stored separately.
//!
//! Key selection per topic: if any registration for the topic has no
//! options, the bare topic is requested and option-bearing registrations on
//! that topic ride along on it. Otherwise every distinct option key is
//! requested.
//!
//! Dispatch uses exact string matching on the wire key. A registration for
//! `posts/*` only receives events whose topic is literally `posts/*`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::models::{TopicEvent, TopicKey, TopicOptions};

/// Callback invoked for every event delivered on a subscribed topic.
pub type Listener = Arc<dyn Fn(&TopicEvent) + Send + Sync>;

/// Identifies exactly one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Delta between the desired and the acknowledged key sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl TopicDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

struct Registration {
    key: TopicKey,
    listener: Listener,
}

/// Listener registrations keyed by [`ListenerId`], in registration order.
#[derive(Default)]
pub struct TopicRegistry {
    next_id: u64,
    entries: BTreeMap<ListenerId, Registration>,
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("registrations", &self.entries.len())
            .field("desired", &self.desired_keys())
            .finish()
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `topic`.
    pub fn add(&mut self, topic: &str, options: Option<&TopicOptions>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.insert(
            id,
            Registration {
                key: TopicKey::new(topic, options),
                listener,
            },
        );
        id
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Remove every registration for `topic`, with or without options.
    pub fn remove_by_topic(&mut self, topic: &str) -> Vec<ListenerId> {
        self.remove_where(|reg| reg.key.topic() == topic)
    }

    /// Remove every registration whose topic starts with `prefix`.
    pub fn remove_by_prefix(&mut self, prefix: &str) -> Vec<ListenerId> {
        self.remove_where(|reg| reg.key.topic().starts_with(prefix))
    }

    /// Remove the registrations of one specific listener on `topic`.
    /// Listeners are compared by identity, not by behaviour.
    pub fn remove_by_topic_and_listener(&mut self, topic: &str, listener: &Listener) -> Vec<ListenerId> {
        self.remove_where(|reg| reg.key.topic() == topic && same_listener(&reg.listener, listener))
    }

    pub fn clear(&mut self) -> Vec<ListenerId> {
        self.remove_where(|_| true)
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&Registration) -> bool) -> Vec<ListenerId> {
        let doomed: Vec<ListenerId> = self
            .entries
            .iter()
            .filter(|(_, reg)| predicate(reg))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.entries.remove(id);
        }
        doomed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.contains_key(&id)
    }

    fn bare_topics(&self) -> HashSet<&str> {
        self.entries
            .values()
            .filter(|reg| reg.key.is_bare())
            .map(|reg| reg.key.topic())
            .collect()
    }

    /// The key actually requested from the server for a registration.
    fn effective_key(reg: &Registration, bare_topics: &HashSet<&str>) -> TopicKey {
        if bare_topics.contains(reg.key.topic()) {
            reg.key.to_bare()
        } else {
            reg.key.clone()
        }
    }

    /// The key under which registration `id` is served, if it exists.
    pub fn effective_key_of(&self, id: ListenerId) -> Option<String> {
        let reg = self.entries.get(&id)?;
        Some(Self::effective_key(reg, &self.bare_topics()).wire())
    }

    /// Distinct wire keys the server should currently have registered.
    pub fn desired_keys(&self) -> BTreeSet<String> {
        let bare = self.bare_topics();
        self.entries
            .values()
            .map(|reg| Self::effective_key(reg, &bare).wire())
            .collect()
    }

    /// Pure set comparison against what the server acknowledged.
    pub fn diff(&self, acknowledged: &BTreeSet<String>) -> TopicDiff {
        let desired = self.desired_keys();
        TopicDiff {
            to_add: desired.difference(acknowledged).cloned().collect(),
            to_remove: acknowledged.difference(&desired).cloned().collect(),
        }
    }

    /// Distinct topics (without options) with at least one registration.
    pub fn topics(&self) -> Vec<String> {
        let topics: BTreeSet<&str> = self.entries.values().map(|reg| reg.key.topic()).collect();
        topics.into_iter().map(str::to_string).collect()
    }

    /// Snapshot of the listeners served by wire key `wire_topic`.
    ///
    /// The returned list is detached from the registry so callbacks may
    /// subscribe or unsubscribe while it is being iterated.
    pub fn listeners_for(&self, wire_topic: &str) -> Vec<Listener> {
        let bare = self.bare_topics();
        self.entries
            .values()
            .filter(|reg| Self::effective_key(reg, &bare).wire() == wire_topic)
            .map(|reg| reg.listener.clone())
            .collect()
    }
}
