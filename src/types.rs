//! Core event contract for the a3s-bus system
//!
//! Application messages implement [`BusEvent`]. The bus identifies them by
//! a [`Tag`] derived from the concrete Rust type, and subscriptions select
//! them with a [`TypeFilter`] built from explicit type tokens.

use crate::error::{EventError, Result};
use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A message that can travel on the bus
///
/// Implement this for every concrete event type. Both provided methods are
/// optional: an event without families is only matched by its own type and
/// by catch-all subscriptions, and an event without payload reports
/// `has_payload() == false` on its envelope.
///
/// ```rust
/// use a3s_bus::{BusEvent, EventFamily};
/// use std::any::Any;
///
/// const SESSION: EventFamily = EventFamily::new("session");
///
/// #[derive(Debug)]
/// struct LoginEvent {
///     user: String,
/// }
///
/// impl BusEvent for LoginEvent {
///     fn families(&self) -> &'static [EventFamily] {
///         &[SESSION]
///     }
///
///     fn payload(&self) -> Option<&(dyn Any + Send + Sync)> {
///         Some(&self.user)
///     }
/// }
/// ```
pub trait BusEvent: Any + Send + Sync + fmt::Debug {
    /// Families (supertypes) this event belongs to
    fn families(&self) -> &'static [EventFamily] {
        &[]
    }

    /// Optional application payload
    fn payload(&self) -> Option<&(dyn Any + Send + Sync)> {
        None
    }
}

/// Identity of an event type, stable for the process lifetime
///
/// Derived from the fully qualified type name. Used as the key of the
/// sticky store, so two events of the same concrete type share a tag.
///
/// `std::any::type_name` is not guaranteed unique: two distinct types can
/// report the same name (e.g. the same type from two versions of one
/// crate linked into the process). Such types share one sticky slot.
/// Subscriptions match on `TypeId`, so typed lookups (`get_sticky::<T>`,
/// `remove_sticky::<T>`) return `None` when the slot holds the other type,
/// while tag lookups (`has_sticky::<T>`) still report it. Give colliding
/// event types distinct names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(&'static str);

impl Tag {
    /// Tag of the concrete type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<T>())
    }

    /// The tag as a string slice
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        self.0
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl PartialEq<str> for Tag {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Tag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Named supertype token
///
/// Events list the families they belong to in [`BusEvent::families`]; a
/// subscription registered for a family receives every event that
/// declares it. Families compare by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFamily(&'static str);

impl EventFamily {
    /// Create a family token
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Family name
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EventFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Which events a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    /// Exactly one concrete event type
    Exact { id: TypeId, tag: Tag },
    /// Every event declaring the family
    Family(EventFamily),
    /// Every event posted on the bus
    All,
}

impl TypeFilter {
    /// Filter for the concrete type `T`
    pub fn exact<T: BusEvent>() -> Self {
        Self::Exact {
            id: TypeId::of::<T>(),
            tag: Tag::of::<T>(),
        }
    }

    /// Filter for a family
    pub fn family(family: EventFamily) -> Self {
        Self::Family(family)
    }

    /// Check the filter is well-formed
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Family(family) if family.name().trim().is_empty() => Err(
                EventError::InvalidEventType("event family name must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Whether an event of concrete type `id` declaring `families` passes
    pub fn matches(&self, id: TypeId, families: &[EventFamily]) -> bool {
        match self {
            Self::Exact { id: expected, .. } => *expected == id,
            Self::Family(family) => families.contains(family),
            Self::All => true,
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { tag, .. } => write!(f, "type:{}", tag),
            Self::Family(family) => write!(f, "family:{}", family),
            Self::All => f.write_str("all"),
        }
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked
///
/// No user code runs while the bus holds its locks, so a poisoned lock
/// still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
