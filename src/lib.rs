//! # a3s-bus
//!
//! In-process typed publish/subscribe with sticky event retention for the
//! A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bus` decouples producers and consumers inside one process. Events
//! are plain Rust types implementing [`BusEvent`]; subscribers register for
//! a concrete type, a declared [`EventFamily`], or everything.
//!
//! Two delivery modes:
//!
//! - **Transient**: [`EventBus::post`] reaches the subscriptions that exist
//!   right now and is then forgotten.
//! - **Sticky**: [`EventBus::post_sticky`] additionally retains the latest
//!   event of each type until it is removed or consumed, and replays it
//!   whenever a subscription is registered.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_bus::{BusEvent, EventBus, ManualContext};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct LoginEvent {
//!     user: String,
//! }
//!
//! impl BusEvent for LoginEvent {}
//!
//! # fn main() -> a3s_bus::Result<()> {
//! let ui = Arc::new(ManualContext::new("ui"));
//! let bus = EventBus::new(ui.clone());
//!
//! bus.post_sticky(LoginEvent { user: "u1".into() })?;
//!
//! // Registered after posting, still receives the sticky event
//! bus.register::<LoginEvent, _>(|login| {
//!     println!("logged in: {}", login.user);
//!     login.consume();
//! })?;
//!
//! ui.run_pending();
//! assert!(!bus.has_sticky::<LoginEvent>());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **BusEvent** trait: the contract every message implements
//! - **EventBus**: broadcast point, subscriber list and sticky
//!   store behind one lock
//! - **Envelope** / **Delivery**: the shared posted event and its typed view,
//!   carrying the consumption protocol
//! - **DeliveryContext**: where callbacks run (tokio task, dedicated thread,
//!   or a queue the application pumps)
//! - **Subscription**: disposal handle

pub mod bus;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod stream;
pub mod subscription;
pub mod types;

mod sticky;

// Re-export core types
pub use bus::{BusInfo, EventBus};
pub use config::BusConfig;
pub use context::{DeliveryContext, Job, ManualContext, TaskContext, ThreadContext};
pub use envelope::{Delivery, Envelope};
pub use error::{EventError, Result};
pub use stream::EventStream;
pub use subscription::Subscription;
pub use types::{BusEvent, EventFamily, Tag, TypeFilter};
