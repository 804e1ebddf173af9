//! Posted events and the consumption protocol
//!
//! Every event handed to the bus is wrapped once in an [`Envelope`]. The
//! envelope is shared: the producer that posted it, the sticky store that
//! retains it and every subscriber that receives it hold clones of the
//! same instance.
//!
//! While the event is retained as sticky, its envelope carries a
//! non-owning back-link to the bus. The link is what lets an event answer
//! "am I still retained?" ([`Envelope::is_consumed`]) and consume itself
//! ([`Envelope::consume`]). The bus sets the link when the event is
//! stored and clears it when the entry is removed, overwritten or consumed.

use crate::bus::Shared;
use crate::types::{lock, now_millis, BusEvent, EventFamily, Tag};
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A posted event, shared between producer, sticky store and subscribers
#[derive(Clone)]
pub struct Envelope {
    inner: Arc<EnvelopeInner>,
}

struct EnvelopeInner {
    id: String,
    tag: Tag,
    type_id: TypeId,
    families: &'static [EventFamily],
    timestamp: u64,
    event: Arc<dyn BusEvent>,
    any: Arc<dyn Any + Send + Sync>,
    owner: Mutex<Option<Weak<Shared>>>,
    claimed: AtomicBool,
}

impl Envelope {
    /// Wrap an event, capturing its tag and type identity
    pub fn new<E: BusEvent>(event: E) -> Self {
        let event = Arc::new(event);
        let families = event.families();
        Self {
            inner: Arc::new(EnvelopeInner {
                id: format!("evt-{}", uuid::Uuid::new_v4()),
                tag: Tag::of::<E>(),
                type_id: TypeId::of::<E>(),
                families,
                timestamp: now_millis(),
                event: event.clone(),
                any: event,
                owner: Mutex::new(None),
                claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Unique envelope identifier (evt-<uuid>)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Tag of the wrapped event's concrete type
    pub fn tag(&self) -> Tag {
        self.inner.tag
    }

    /// `TypeId` of the wrapped event's concrete type
    pub fn event_type_id(&self) -> TypeId {
        self.inner.type_id
    }

    /// Families declared by the wrapped event
    pub fn families(&self) -> &'static [EventFamily] {
        self.inner.families
    }

    /// Unix timestamp in milliseconds when the envelope was created
    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    /// The wrapped event
    pub fn event(&self) -> &dyn BusEvent {
        self.inner.event.as_ref()
    }

    /// Whether the wrapped event is a `T`
    pub fn is<T: BusEvent>(&self) -> bool {
        self.inner.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped event as a `T`
    pub fn downcast_ref<T: BusEvent>(&self) -> Option<&T> {
        self.inner.any.downcast_ref::<T>()
    }

    /// Typed view of this envelope, if the wrapped event is a `T`
    pub fn downcast<T: BusEvent>(&self) -> Option<Delivery<T>> {
        let event = Arc::clone(&self.inner.any).downcast::<T>().ok()?;
        Some(Delivery {
            event,
            envelope: self.clone(),
        })
    }

    /// Whether the wrapped event carries a payload
    pub fn has_payload(&self) -> bool {
        self.inner.event.payload().is_some()
    }

    /// Borrow the payload as a `D`
    ///
    /// Returns `None` when there is no payload or it is not a `D`.
    pub fn payload_as<D: Any>(&self) -> Option<&D> {
        self.inner.event.payload()?.downcast_ref::<D>()
    }

    /// Whether `other` is this exact envelope (not merely an equal event)
    pub fn same_instance(&self, other: &Envelope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this event is no longer retained by a bus
    ///
    /// An event that was only ever posted transiently is always consumed.
    pub fn is_consumed(&self) -> bool {
        match self.owner() {
            Some(bus) => !bus.holds(self.tag().as_str()),
            None => true,
        }
    }

    /// Remove this event from sticky retention
    ///
    /// Idempotent: consuming an already consumed event does nothing.
    pub fn consume(&self) {
        if self.is_consumed() {
            return;
        }
        if let Some(bus) = self.owner() {
            bus.release(self);
        }
    }

    /// Run `action` and then consume, unless the event is already consumed
    ///
    /// `action` runs at most once per envelope, even when several
    /// subscribers race to consume the same sticky event.
    pub fn consume_with<F>(&self, action: F)
    where
        F: FnOnce(&Envelope),
    {
        if self.claim() {
            action(self);
            self.consume();
        }
    }

    pub(crate) fn attach(&self, bus: Weak<Shared>) {
        *lock(&self.inner.owner) = Some(bus);
        self.inner.claimed.store(false, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        *lock(&self.inner.owner) = None;
    }

    pub(crate) fn is_attached(&self) -> bool {
        lock(&self.inner.owner).is_some()
    }

    /// The live bus currently retaining this envelope
    pub(crate) fn owner(&self) -> Option<Arc<Shared>> {
        lock(&self.inner.owner).as_ref().and_then(Weak::upgrade)
    }

    fn claim(&self) -> bool {
        !self.is_consumed() && !self.inner.claimed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.tag)
            .field("event", &self.inner.event)
            .finish()
    }
}

/// Typed view of an [`Envelope`], handed to `register::<T>` callbacks
///
/// Dereferences to the event itself; the consumption protocol is
/// forwarded to the underlying envelope.
pub struct Delivery<T: BusEvent> {
    event: Arc<T>,
    envelope: Envelope,
}

impl<T: BusEvent> Delivery<T> {
    /// The shared event
    pub fn event(&self) -> &Arc<T> {
        &self.event
    }

    /// The untyped envelope
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Consume the view, keeping the envelope
    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// Tag of `T`
    pub fn tag(&self) -> Tag {
        self.envelope.tag()
    }

    /// Payload borrowed as a `D`
    pub fn payload_as<D: Any>(&self) -> Option<&D> {
        self.envelope.payload_as::<D>()
    }

    /// See [`Envelope::is_consumed`]
    pub fn is_consumed(&self) -> bool {
        self.envelope.is_consumed()
    }

    /// See [`Envelope::consume`]
    pub fn consume(&self) {
        self.envelope.consume();
    }

    /// See [`Envelope::consume_with`]
    pub fn consume_with<F>(&self, action: F)
    where
        F: FnOnce(&Delivery<T>),
    {
        if self.envelope.claim() {
            action(self);
            self.envelope.consume();
        }
    }
}

impl<T: BusEvent> Deref for Delivery<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.event
    }
}

impl<T: BusEvent> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            envelope: self.envelope.clone(),
        }
    }
}

impl<T: BusEvent> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.envelope.id())
            .field("event", &self.event)
            .finish()
    }
}
