//! In-process event bus with sticky event retention
//!
//! `EventBus` owns the broadcast point, the subscriber list and the sticky
//! store behind a single lock. Every mutation (posting, sticky management,
//! registration, disposal) takes that lock, so fan-out of one posted event
//! completes before the next one starts and the sticky store never sees
//! interleaved writers.
//!
//! ```text
//! producer ──► post / post_sticky ──► [lock] ──► sticky store (sticky only)
//!                                       │
//!                                       └──► for each subscriber (registration order)
//!                                              filter.matches? ──► context.schedule(job)
//!                                                                      │
//!                                                                      ▼
//!                                                             callback on its context
//! ```
//!
//! ## Sticky replay
//!
//! Registering a subscription re-broadcasts every retained sticky event,
//! in retention order, to **all** matching live subscriptions, not only
//! the new one. A subscriber that already saw a sticky event receives it
//! again whenever another subscription is registered. Callbacks that
//! handle sticky events must tolerate redundant delivery, typically by
//! checking [`Envelope::is_consumed`] or using `consume_with`.

use crate::config::BusConfig;
use crate::context::DeliveryContext;
use crate::envelope::{Delivery, Envelope};
use crate::error::{EventError, Result};
use crate::sticky::StickyStore;
use crate::subscription::{Handler, Subscriber, Subscription};
use crate::types::{lock, BusEvent, EventFamily, Tag, TypeFilter};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Typed publish/subscribe bus
///
/// Construct one at the composition root and pass clones to producers
/// and consumers; clones share the same subscribers and sticky store.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: BusConfig,
    context: Arc<dyn DeliveryContext>,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    subscribers: Vec<Subscriber>,
    sticky: StickyStore,
}

/// Snapshot of bus status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusInfo {
    /// Bus name
    pub name: String,
    /// Live subscriptions
    pub subscribers: usize,
    /// Retained sticky events
    pub sticky_events: usize,
    /// Whether the bus has been closed
    pub closed: bool,
}

impl EventBus {
    /// Create a bus with the default configuration
    ///
    /// `context` is where callbacks run unless a subscription overrides it.
    pub fn new(context: impl DeliveryContext + 'static) -> Self {
        Self::from_parts(BusConfig::default(), Arc::new(context))
    }

    /// Create a bus with an explicit configuration
    pub fn with_config(config: BusConfig, context: impl DeliveryContext + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, Arc::new(context)))
    }

    fn from_parts(config: BusConfig, context: Arc<dyn DeliveryContext>) -> Self {
        tracing::debug!(bus = %config.name, context = %context.name(), "Event bus created");
        Self {
            shared: Arc::new(Shared {
                config,
                context,
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    /// Bus name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Active configuration
    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    // ─── Registration ────────────────────────────────────────────

    /// Receive every event of concrete type `T` on the bus context
    pub fn register<T, F>(&self, on_event: F) -> Result<Subscription>
    where
        T: BusEvent,
        F: Fn(Delivery<T>) + Send + Sync + 'static,
    {
        self.subscribe(
            TypeFilter::exact::<T>(),
            self.shared.context.clone(),
            typed_handler(on_event),
        )
    }

    /// Receive every event of concrete type `T` on `context`
    pub fn register_on<T, F>(
        &self,
        context: impl DeliveryContext + 'static,
        on_event: F,
    ) -> Result<Subscription>
    where
        T: BusEvent,
        F: Fn(Delivery<T>) + Send + Sync + 'static,
    {
        self.subscribe(
            TypeFilter::exact::<T>(),
            Arc::new(context),
            typed_handler(on_event),
        )
    }

    /// Receive every event that declares `family`
    pub fn register_family<F>(&self, family: EventFamily, on_event: F) -> Result<Subscription>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.register_filter(TypeFilter::family(family), on_event)
    }

    /// Receive every event posted on the bus
    pub fn register_all<F>(&self, on_event: F) -> Result<Subscription>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.register_filter(TypeFilter::All, on_event)
    }

    /// Receive every event accepted by `filter`
    pub fn register_filter<F>(&self, filter: TypeFilter, on_event: F) -> Result<Subscription>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |envelope: &Envelope| on_event(envelope.clone()));
        self.subscribe(filter, self.shared.context.clone(), handler)
    }

    pub(crate) fn subscribe(
        &self,
        filter: TypeFilter,
        context: Arc<dyn DeliveryContext>,
        handler: Handler,
    ) -> Result<Subscription> {
        filter.validate()?;

        let mut state = self.open_state()?;
        let (subscriber, subscription) =
            Subscriber::new(filter, handler, context, Arc::downgrade(&self.shared));
        state.subscribers.push(subscriber);

        tracing::debug!(
            bus = %self.name(),
            subscription = %subscription.id(),
            filter = %filter,
            subscribers = state.subscribers.len(),
            "Subscription registered"
        );

        // Replay goes through the shared broadcast path: every matching
        // subscription gets the retained events again, not only this one.
        if !state.sticky.is_empty() {
            tracing::debug!(
                bus = %self.name(),
                sticky_events = state.sticky.len(),
                "Replaying sticky events to all matching subscriptions"
            );
            for envelope in state.sticky.ordered() {
                self.shared.broadcast(&state, envelope);
            }
        }

        Ok(subscription)
    }

    // ─── Posting ─────────────────────────────────────────────────

    /// Deliver `event` to the current matching subscriptions
    ///
    /// Subscriptions registered later never see it.
    pub fn post<E: BusEvent>(&self, event: E) -> Result<()> {
        self.post_envelope(Envelope::new(event))
    }

    /// Deliver an existing envelope, e.g. one forwarded from a callback
    pub fn post_envelope(&self, envelope: Envelope) -> Result<()> {
        let state = self.open_state()?;
        tracing::trace!(bus = %self.name(), tag = %envelope.tag(), id = %envelope.id(), "Posting event");
        self.shared.broadcast(&state, &envelope);
        Ok(())
    }

    /// Retain `event` as the sticky event of its type, then deliver it
    ///
    /// Replaces (and detaches) any previously retained event of the same
    /// type. The returned envelope is the retained instance.
    pub fn post_sticky<E: BusEvent>(&self, event: E) -> Result<Envelope> {
        let envelope = Envelope::new(event);
        self.post_sticky_envelope(envelope.clone())?;
        Ok(envelope)
    }

    /// Retain and deliver an existing envelope
    ///
    /// An envelope retained by another bus is released there first, so it
    /// is only ever retained by one bus at a time.
    pub fn post_sticky_envelope(&self, envelope: Envelope) -> Result<()> {
        drop(self.open_state()?);
        if let Some(previous) = envelope.owner() {
            if !Arc::ptr_eq(&previous, &self.shared) {
                previous.release(&envelope);
            }
        }

        let mut state = self.open_state()?;

        if let Some(replaced) = state
            .sticky
            .insert(envelope.clone(), Arc::downgrade(&self.shared))
        {
            tracing::debug!(
                bus = %self.name(),
                tag = %replaced.tag(),
                replaced = %replaced.id(),
                id = %envelope.id(),
                "Sticky event overwritten"
            );
        }

        tracing::trace!(bus = %self.name(), tag = %envelope.tag(), id = %envelope.id(), "Posting sticky event");
        self.shared.broadcast(&state, &envelope);
        Ok(())
    }

    // ─── Sticky management ───────────────────────────────────────

    /// Remove the retained event of type `T`
    ///
    /// Fails with [`EventError::Closed`] once the bus is closed.
    pub fn remove_sticky<T: BusEvent>(&self) -> Result<Option<Delivery<T>>> {
        Ok(self
            .remove_sticky_tag(Tag::of::<T>().as_str())?
            .and_then(|envelope| envelope.downcast::<T>()))
    }

    /// Remove the retained event with `tag`
    pub fn remove_sticky_tag(&self, tag: &str) -> Result<Option<Envelope>> {
        let removed = self.open_state()?.sticky.remove(tag);
        if let Some(envelope) = &removed {
            tracing::debug!(bus = %self.name(), tag = %tag, id = %envelope.id(), "Sticky event removed");
        }
        Ok(removed)
    }

    /// Remove the retained event with `envelope`'s tag
    ///
    /// Resolves by tag: a newer event of the same type is removed too.
    pub fn remove_sticky_event(&self, envelope: &Envelope) -> Result<Option<Envelope>> {
        self.remove_sticky_tag(envelope.tag().as_str())
    }

    /// Remove every retained event
    pub fn remove_all_sticky(&self) -> Result<()> {
        let cleared = self.open_state()?.sticky.clear();
        tracing::debug!(bus = %self.name(), cleared, "All sticky events removed");
        Ok(())
    }

    /// The retained event of type `T`
    pub fn get_sticky<T: BusEvent>(&self) -> Option<Delivery<T>> {
        self.get_sticky_tag(Tag::of::<T>().as_str())?.downcast::<T>()
    }

    /// The retained event with `tag`
    pub fn get_sticky_tag(&self, tag: &str) -> Option<Envelope> {
        self.shared.state().sticky.get(tag).cloned()
    }

    /// Whether an event of type `T` is retained
    pub fn has_sticky<T: BusEvent>(&self) -> bool {
        self.has_sticky_tag(Tag::of::<T>().as_str())
    }

    /// Whether an event with `tag` is retained
    pub fn has_sticky_tag(&self, tag: &str) -> bool {
        self.shared.holds(tag)
    }

    /// Retained events in replay order
    pub fn sticky_events(&self) -> Vec<Envelope> {
        self.shared.state().sticky.ordered().to_vec()
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Status snapshot
    pub fn info(&self) -> BusInfo {
        let state = self.shared.state();
        BusInfo {
            name: self.name().to_string(),
            subscribers: state.subscribers.len(),
            sticky_events: state.sticky.len(),
            closed: state.closed,
        }
    }

    /// Whether [`close`](EventBus::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Dispose every subscription and drop all sticky events
    ///
    /// Afterwards posting and registering fail with
    /// [`EventError::Closed`]. Calling `close` again does nothing.
    pub fn close(&self) {
        let (subscribers, cleared) = {
            let mut state = self.shared.state();
            if state.closed {
                return;
            }
            state.closed = true;
            let subscribers = std::mem::take(&mut state.subscribers);
            for subscriber in &subscribers {
                subscriber.deactivate();
            }
            (subscribers, state.sticky.clear())
        };

        tracing::debug!(
            bus = %self.name(),
            subscribers = subscribers.len(),
            sticky_events = cleared,
            "Event bus closed"
        );
    }

    fn open_state(&self) -> Result<MutexGuard<'_, BusState>> {
        let state = self.shared.state();
        if state.closed {
            return Err(EventError::Closed {
                bus: self.name().to_string(),
            });
        }
        Ok(state)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name())
            .field("context", &self.shared.context.name())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BusState> {
        lock(&self.state)
    }

    /// Fan `envelope` out to every matching subscriber, in registration order
    fn broadcast(&self, state: &BusState, envelope: &Envelope) {
        for subscriber in &state.subscribers {
            if subscriber.accepts(envelope) {
                subscriber.deliver(envelope, self.config.isolate_panics);
            }
        }
    }

    /// Whether a sticky event with `tag` is retained
    pub(crate) fn holds(&self, tag: &str) -> bool {
        self.state().sticky.contains(tag)
    }

    /// Drop `envelope` from the sticky store if it is still the retained instance
    pub(crate) fn release(&self, envelope: &Envelope) {
        let released = self.state().sticky.remove_instance(envelope);
        if released.is_some() {
            tracing::debug!(
                bus = %self.config.name,
                tag = %envelope.tag(),
                id = %envelope.id(),
                "Sticky event consumed"
            );
        }
    }

    /// Remove the subscriber with `id`
    pub(crate) fn unregister(&self, id: &str) {
        let removed = {
            let mut state = self.state();
            state
                .subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|pos| state.subscribers.remove(pos))
        };
        if let Some(subscriber) = removed {
            subscriber.deactivate();
        }
    }
}

fn typed_handler<T, F>(on_event: F) -> Handler
where
    T: BusEvent,
    F: Fn(Delivery<T>) + Send + Sync + 'static,
{
    Arc::new(move |envelope: &Envelope| {
        if let Some(delivery) = envelope.downcast::<T>() {
            on_event(delivery);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualContext;
    use std::sync::Mutex as StdMutex;

    const SESSION: EventFamily = EventFamily::new("session");

    #[derive(Debug, Clone, PartialEq)]
    struct Login(&'static str);

    impl BusEvent for Login {
        fn families(&self) -> &'static [EventFamily] {
            &[SESSION]
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Logout;

    impl BusEvent for Logout {
        fn families(&self) -> &'static [EventFamily] {
            &[SESSION]
        }
    }

    #[derive(Debug)]
    struct Tick(u32);

    impl BusEvent for Tick {}

    fn manual_bus() -> (EventBus, Arc<ManualContext>) {
        let ctx = Arc::new(ManualContext::new("test"));
        (EventBus::new(ctx.clone()), ctx)
    }

    fn collect_logins(bus: &EventBus) -> (Subscription, Arc<StdMutex<Vec<&'static str>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus
            .register::<Login, _>(move |d| sink.lock().unwrap().push(d.0))
            .unwrap();
        (sub, seen)
    }

    #[test]
    fn test_post_delivers_on_context_only() {
        let (bus, ctx) = manual_bus();
        let (_sub, seen) = collect_logins(&bus);

        bus.post(Login("u1")).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        ctx.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_exact_filter_ignores_other_types() {
        let (bus, ctx) = manual_bus();
        let (_sub, seen) = collect_logins(&bus);

        bus.post(Tick(1)).unwrap();
        bus.post(Logout).unwrap();
        bus.post(Login("u1")).unwrap();
        ctx.run_pending();

        assert_eq!(*seen.lock().unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_family_and_exact_both_receive() {
        let (bus, ctx) = manual_bus();
        let (_sub, logins) = collect_logins(&bus);

        let family_seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = family_seen.clone();
        bus.register_family(SESSION, move |env| sink.lock().unwrap().push(env.tag()))
            .unwrap();

        bus.post(Login("u1")).unwrap();
        bus.post(Logout).unwrap();
        bus.post(Tick(0)).unwrap();
        ctx.run_pending();

        assert_eq!(*logins.lock().unwrap(), vec!["u1"]);
        assert_eq!(
            *family_seen.lock().unwrap(),
            vec![Tag::of::<Login>(), Tag::of::<Logout>()]
        );
    }

    #[test]
    fn test_register_all_sees_everything() {
        let (bus, ctx) = manual_bus();
        let count = Arc::new(StdMutex::new(0));
        let sink = count.clone();
        bus.register_all(move |_| *sink.lock().unwrap() += 1).unwrap();

        bus.post(Login("a")).unwrap();
        bus.post(Tick(1)).unwrap();
        bus.post(Logout).unwrap();
        ctx.run_pending();

        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn test_register_empty_family_fails_fast() {
        let (bus, _ctx) = manual_bus();
        let result = bus.register_family(EventFamily::new(""), |_| {});
        assert!(matches!(result, Err(EventError::InvalidEventType(_))));
        assert_eq!(bus.info().subscribers, 0);
    }

    #[test]
    fn test_sticky_overwrite_keeps_latest() {
        let (bus, _ctx) = manual_bus();
        let first = bus.post_sticky(Login("u1")).unwrap();
        let second = bus.post_sticky(Login("u2")).unwrap();

        let retained = bus.get_sticky::<Login>().unwrap();
        assert_eq!(retained.0, "u2");
        assert!(retained.envelope().same_instance(&second));
        assert!(!first.is_attached());
        assert!(first.is_consumed());
        assert!(!second.is_consumed());
        assert_eq!(bus.sticky_events().len(), 1);
    }

    #[test]
    fn test_remove_sticky_variants() {
        let (bus, _ctx) = manual_bus();
        let login = bus.post_sticky(Login("u1")).unwrap();
        bus.post_sticky(Logout).unwrap();
        bus.post_sticky(Tick(3)).unwrap();

        let removed = bus.remove_sticky::<Login>().unwrap().unwrap();
        assert!(removed.envelope().same_instance(&login));
        assert!(!login.is_attached());
        assert!(!bus.has_sticky::<Login>());

        let logout_tag = Tag::of::<Logout>();
        assert!(bus.remove_sticky_tag(logout_tag.as_str()).unwrap().is_some());
        assert!(!bus.has_sticky_tag(logout_tag.as_str()));

        let tick = bus.get_sticky_tag(Tag::of::<Tick>().as_str()).unwrap();
        assert!(bus.remove_sticky_event(&tick).unwrap().is_some());
        assert!(bus.sticky_events().is_empty());

        assert!(bus.remove_sticky::<Login>().unwrap().is_none());
        assert!(bus.remove_sticky_tag("missing").unwrap().is_none());
        assert!(bus.get_sticky_tag("missing").is_none());
    }

    #[test]
    fn test_remove_all_sticky_detaches() {
        let (bus, _ctx) = manual_bus();
        let a = bus.post_sticky(Login("u1")).unwrap();
        let b = bus.post_sticky(Tick(1)).unwrap();

        bus.remove_all_sticky().unwrap();

        assert!(!bus.has_sticky::<Login>());
        assert!(!bus.has_sticky::<Tick>());
        assert!(!a.is_attached() && !b.is_attached());
        assert!(a.is_consumed() && b.is_consumed());
    }

    #[test]
    fn test_consume_removes_sticky_once() {
        let (bus, _ctx) = manual_bus();
        let env = bus.post_sticky(Login("u1")).unwrap();
        assert!(!env.is_consumed());

        env.consume();
        assert!(env.is_consumed());
        assert!(!env.is_attached());
        assert!(!bus.has_sticky::<Login>());

        env.consume();
        assert!(env.is_consumed());
        assert!(!bus.has_sticky::<Login>());
    }

    #[test]
    fn test_consume_stale_instance_keeps_newer_sticky() {
        let (bus, _ctx) = manual_bus();
        let old = bus.post_sticky(Login("old")).unwrap();
        bus.post_sticky(Login("new")).unwrap();

        old.consume();
        assert_eq!(bus.get_sticky::<Login>().unwrap().0, "new");
    }

    #[test]
    fn test_consume_with_runs_action_once() {
        let (bus, _ctx) = manual_bus();
        let env = bus.post_sticky(Login("u1")).unwrap();
        let runs = Arc::new(StdMutex::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            env.consume_with(move |_| *runs.lock().unwrap() += 1);
        }

        assert_eq!(*runs.lock().unwrap(), 1);
        assert!(!bus.has_sticky::<Login>());
    }

    #[test]
    fn test_replay_on_register_reaches_existing_subscribers() {
        let (bus, ctx) = manual_bus();
        let (_first, seen_first) = collect_logins(&bus);

        bus.post_sticky(Login("u1")).unwrap();
        let (_second, seen_second) = collect_logins(&bus);
        ctx.run_pending();

        assert_eq!(*seen_first.lock().unwrap(), vec!["u1", "u1"]);
        assert_eq!(*seen_second.lock().unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_replay_preserves_retention_order() {
        let (bus, ctx) = manual_bus();
        bus.post_sticky(Login("u1")).unwrap();
        bus.post_sticky(Tick(1)).unwrap();
        bus.post_sticky(Logout).unwrap();
        bus.post_sticky(Login("u2")).unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        bus.register_all(move |env| sink.lock().unwrap().push(env.tag()))
            .unwrap();
        ctx.run_pending();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Tag::of::<Tick>(), Tag::of::<Logout>(), Tag::of::<Login>()]
        );
    }

    #[test]
    fn test_transient_event_not_replayed() {
        let (bus, ctx) = manual_bus();
        bus.post(Login("gone")).unwrap();
        let (_sub, seen) = collect_logins(&bus);
        ctx.run_pending();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_stops_delivery() {
        let (bus, ctx) = manual_bus();
        let (sub, seen) = collect_logins(&bus);

        bus.post(Login("before")).unwrap();
        sub.dispose();
        bus.post(Login("after")).unwrap();
        ctx.run_pending();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.info().subscribers, 0);
        sub.dispose();
    }

    #[test]
    fn test_closed_bus_fails_fast() {
        let (bus, _ctx) = manual_bus();
        let (sub, _seen) = collect_logins(&bus);
        let env = bus.post_sticky(Login("u1")).unwrap();

        bus.close();
        bus.close();

        assert!(bus.is_closed());
        assert!(sub.is_disposed());
        assert!(env.is_consumed());
        assert!(matches!(bus.post(Tick(1)), Err(EventError::Closed { .. })));
        assert!(matches!(
            bus.post_sticky(Tick(1)),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.register_all(|_| {}),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.remove_all_sticky(),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.remove_sticky::<Login>(),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.remove_sticky_tag("missing"),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.remove_sticky_event(&env),
            Err(EventError::Closed { .. })
        ));
        assert!(matches!(
            bus.post_sticky_envelope(env.clone()),
            Err(EventError::Closed { .. })
        ));
        assert!(bus.get_sticky::<Login>().is_none());
        assert!(!bus.has_sticky::<Login>());
        assert!(env.is_consumed());
        assert_eq!(
            bus.info(),
            BusInfo {
                name: "event-bus".to_string(),
                subscribers: 0,
                sticky_events: 0,
                closed: true,
            }
        );
    }

    #[test]
    fn test_with_config_validates() {
        let ctx = ManualContext::default();
        let result = EventBus::with_config(BusConfig::named(""), ctx);
        assert!(matches!(result, Err(EventError::Config(_))));

        let bus = EventBus::with_config(BusConfig::named("ui"), ManualContext::default()).unwrap();
        assert_eq!(bus.name(), "ui");
    }

    #[test]
    fn test_register_on_overrides_context() {
        let (bus, bus_ctx) = manual_bus();
        let own_ctx = Arc::new(ManualContext::new("own"));
        let seen = Arc::new(StdMutex::new(0));
        let sink = seen.clone();
        bus.register_on::<Tick, _>(own_ctx.clone(), move |t| *sink.lock().unwrap() += t.0)
            .unwrap();

        bus.post(Tick(5)).unwrap();
        assert_eq!(bus_ctx.run_pending(), 0);
        assert_eq!(own_ctx.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), 5);
    }

    #[test]
    fn test_callback_may_reenter_bus() {
        let (bus, ctx) = manual_bus();
        let inner = bus.clone();
        bus.register::<Login, _>(move |d| {
            d.consume();
            inner.post(Tick(1)).unwrap();
        })
        .unwrap();
        let ticks = Arc::new(StdMutex::new(0));
        let sink = ticks.clone();
        bus.register::<Tick, _>(move |_| *sink.lock().unwrap() += 1)
            .unwrap();

        bus.post_sticky(Login("u1")).unwrap();
        ctx.run_pending();

        assert!(!bus.has_sticky::<Login>());
        assert_eq!(*ticks.lock().unwrap(), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let (bus, ctx) = manual_bus();
        bus.register::<Tick, _>(|_| panic!("subscriber failure")).unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        bus.register::<Tick, _>(move |t| sink.lock().unwrap().push(t.0))
            .unwrap();

        bus.post_sticky(Tick(7)).unwrap();
        ctx.run_pending();

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert!(bus.has_sticky::<Tick>());
        bus.post(Tick(8)).unwrap();
        ctx.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_sticky_envelope_moves_between_buses() {
        let (first, _first_ctx) = manual_bus();
        let (second, _second_ctx) = manual_bus();
        let env = first.post_sticky(Login("u1")).unwrap();

        second.post_sticky_envelope(env.clone()).unwrap();
        assert!(!first.has_sticky::<Login>());
        assert!(second.has_sticky::<Login>());
        assert!(!env.is_consumed());

        // The old bus no longer holds it, so its cleanup cannot detach it
        first.remove_all_sticky().unwrap();
        assert!(!env.is_consumed());

        env.consume();
        assert!(env.is_consumed());
        assert!(!second.has_sticky::<Login>());
    }

    #[test]
    fn test_repost_sticky_envelope_on_same_bus() {
        let (bus, _ctx) = manual_bus();
        let env = bus.post_sticky(Login("u1")).unwrap();

        bus.post_sticky_envelope(env.clone()).unwrap();
        assert!(!env.is_consumed());
        assert_eq!(bus.sticky_events().len(), 1);
    }
}
