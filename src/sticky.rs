//! Sticky event retention
//!
//! `StickyStore` keeps the latest event per tag in `by_tag` and the same
//! events in insertion order in `order`, which drives replay. Both views
//! always hold the same membership. A retained envelope is attached to its
//! bus; every path that drops an entry detaches it.

use crate::bus::Shared;
use crate::envelope::Envelope;
use crate::types::Tag;
use std::collections::HashMap;
use std::sync::Weak;

#[derive(Default)]
pub(crate) struct StickyStore {
    by_tag: HashMap<Tag, Envelope>,
    order: Vec<Envelope>,
}

impl StickyStore {
    /// Retain `envelope`, replacing any entry with the same tag
    ///
    /// The replaced envelope is detached before the new one is attached
    /// and returned to the caller.
    pub(crate) fn insert(&mut self, envelope: Envelope, owner: Weak<Shared>) -> Option<Envelope> {
        let replaced = self.remove(envelope.tag().as_str());

        envelope.attach(owner);
        self.order.push(envelope.clone());
        self.by_tag.insert(envelope.tag(), envelope);

        replaced
    }

    /// Drop the entry for `tag`
    pub(crate) fn remove(&mut self, tag: &str) -> Option<Envelope> {
        let removed = self.by_tag.remove(tag)?;
        self.order.retain(|e| !e.same_instance(&removed));
        removed.detach();
        Some(removed)
    }

    /// Drop the entry for `envelope`'s tag only if it is that exact instance
    pub(crate) fn remove_instance(&mut self, envelope: &Envelope) -> Option<Envelope> {
        let stored = self.by_tag.get(envelope.tag().as_str())?;
        if !stored.same_instance(envelope) {
            return None;
        }
        self.remove(envelope.tag().as_str())
    }

    /// Drop every entry, detaching each one
    pub(crate) fn clear(&mut self) -> usize {
        for envelope in &self.order {
            envelope.detach();
        }
        let count = self.order.len();
        self.order.clear();
        self.by_tag.clear();
        count
    }

    pub(crate) fn get(&self, tag: &str) -> Option<&Envelope> {
        self.by_tag.get(tag)
    }

    pub(crate) fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Retained events in replay order
    pub(crate) fn ordered(&self) -> &[Envelope] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
