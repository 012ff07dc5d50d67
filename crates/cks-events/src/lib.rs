//! CKS Events - Lifecycle event channel for the CKS tool-call gate.
//!
//! This crate provides:
//! - [`GateEvent`], one event per tool-call transition carrying the full
//!   [`cks_core::ToolCall`] snapshot, plus grant and session events
//! - A broadcast-based [`EventBus`] for async observers
//! - A [`SubscriberRegistry`] for synchronous callback observers
//! - [`AuditTrail`], a synchronous observer recording settled calls
//!
//! The channel is one-way fan-out. It never inspects or alters what it
//! carries.
//!
//! # Example
//!
//! ```rust
//! use cks_events::{EventBus, EventMetadata, GateEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(GateEvent::SessionClosed {
//!     metadata: EventMetadata::new("engine"),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "session_closed");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod audit;
mod bus;
mod event;
mod subscriber;

pub use audit::{AuditEntry, AuditTrail};
pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, GateEvent};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
