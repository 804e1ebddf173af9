//! Subscription handles
//!
//! A [`Subscription`] is returned by every `register*` call. Disposing it
//! unregisters the callback and drops any delivery that was scheduled but
//! has not started yet; a callback that is already running finishes.

use crate::bus::Shared;
use crate::context::{DeliveryContext, Job};
use crate::envelope::Envelope;
use crate::types::TypeFilter;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Disposal handle for a registered callback
///
/// Clones share the same registration. Dropping the handle does not
/// dispose it; call [`dispose`](Subscription::dispose).
#[derive(Clone)]
pub struct Subscription {
    id: String,
    filter: TypeFilter,
    active: Arc<AtomicBool>,
    bus: Weak<Shared>,
}

impl Subscription {
    /// Unique subscription identifier (sub-<uuid>)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The filter this subscription was registered with
    pub fn filter(&self) -> TypeFilter {
        self.filter
    }

    /// Whether the subscription no longer receives events
    pub fn is_disposed(&self) -> bool {
        !self.active.load(Ordering::Acquire)
    }

    /// Stop receiving events
    ///
    /// Safe to call repeatedly and after the bus is closed or dropped.
    pub fn dispose(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(&self.id);
        }
        tracing::debug!(subscription = %self.id, filter = %self.filter, "Subscription disposed");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

pub(crate) type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Bus-side half of a subscription
pub(crate) struct Subscriber {
    pub(crate) id: String,
    filter: TypeFilter,
    active: Arc<AtomicBool>,
    handler: Handler,
    context: Arc<dyn DeliveryContext>,
}

impl Subscriber {
    pub(crate) fn new(
        filter: TypeFilter,
        handler: Handler,
        context: Arc<dyn DeliveryContext>,
        bus: Weak<Shared>,
    ) -> (Self, Subscription) {
        let id = format!("sub-{}", uuid::Uuid::new_v4());
        let active = Arc::new(AtomicBool::new(true));
        let handle = Subscription {
            id: id.clone(),
            filter,
            active: active.clone(),
            bus,
        };
        let subscriber = Self {
            id,
            filter,
            active,
            handler,
            context,
        };
        (subscriber, handle)
    }

    pub(crate) fn accepts(&self, envelope: &Envelope) -> bool {
        self.filter
            .matches(envelope.event_type_id(), envelope.families())
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Hand `envelope` to this subscriber's delivery context
    pub(crate) fn deliver(&self, envelope: &Envelope, isolate_panics: bool) {
        let id = self.id.clone();
        let active = self.active.clone();
        let handler = self.handler.clone();
        let envelope = envelope.clone();
        let tag = envelope.tag();

        let job: Job = Box::new(move || {
            if !active.load(Ordering::Acquire) {
                tracing::trace!(subscription = %id, tag = %tag, "Dropped delivery to disposed subscription");
                return;
            }
            if !isolate_panics {
                handler(&envelope);
                return;
            }
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                tracing::error!(
                    subscription = %id,
                    tag = %tag,
                    message = %panic_message(panic.as_ref()),
                    "Subscriber panicked"
                );
            }
        });

        if let Err(e) = self.context.schedule(job) {
            tracing::warn!(
                subscription = %self.id,
                context = %self.context.name(),
                tag = %tag,
                error = %e,
                "Delivery rejected by context"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
