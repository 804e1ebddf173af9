//! Stream adapter for subscriptions
//!
//! `EventBus::subscribe_stream::<T>()` exposes a typed subscription as a
//! [`Stream`], for consumers that prefer `while let Some(..) = stream.next()`
//! over callbacks. Deliveries are forwarded into an unbounded channel on
//! the posting thread, so items arrive in global post order.

use crate::bus::EventBus;
use crate::context::InlineContext;
use crate::envelope::Delivery;
use crate::error::Result;
use crate::subscription::Subscription;
use crate::types::BusEvent;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Stream of deliveries for one event type
///
/// Dropping the stream disposes its subscription.
pub struct EventStream<T: BusEvent> {
    subscription: Subscription,
    inner: UnboundedReceiverStream<Delivery<T>>,
}

impl<T: BusEvent> EventStream<T> {
    /// The underlying subscription
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<T: BusEvent> Stream for EventStream<T> {
    type Item = Delivery<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl<T: BusEvent> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<T: BusEvent> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl EventBus {
    /// Receive every event of concrete type `T` as a stream
    ///
    /// Retained sticky events of type `T` are replayed into the stream
    /// immediately, like any other registration.
    pub fn subscribe_stream<T: BusEvent>(&self) -> Result<EventStream<T>> {
        let (tx, rx) = mpsc::unbounded_channel::<Delivery<T>>();
        let subscription = self.register_on::<T, _>(InlineContext, move |delivery| {
            // A closed receiver means the stream is being dropped; its Drop
            // disposes the subscription.
            let _ = tx.send(delivery);
        })?;

        Ok(EventStream {
            subscription,
            inner: UnboundedReceiverStream::new(rx),
        })
    }
}
