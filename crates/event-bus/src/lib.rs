//! Typed channels between node services, plus bounded fan-out subscriptions.
//!
//! The [`EventBus`] routes messages between long-running services: each
//! message type gets one channel, and a service extracts only the channels it
//! is allowed to touch. The [`hub`] module provides the one-to-many side:
//! every subscriber owns a bounded queue, and slow subscribers lag instead of
//! blocking the publisher.
mod event_bus;

pub use crate::event_bus::{BusEvent, Error, EventBus};
use std::any::TypeId;

pub mod hub;
mod macros;
mod receiver;

pub use crate::hub::{Hub, HubEvent, HubReceiver};
pub use crate::receiver::Receiver;

pub use event_bus_macros::Event;

/// Wraps retrieving [`std::any::TypeId`] for type T.
///
/// Use [`typeid`] macros for vec
pub fn tid<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}
