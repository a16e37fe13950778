//! The squeak controller: protocol semantics behind the p2p layer.
//!
//! Receives decoded peer messages from the event bus, reconciles them with
//! the store, serves squeaks and offers back to peers, and fans domain
//! events out to admin subscriptions.
mod handler;
pub use handler::{Controller, ControllerConfig, NodeStorage};

mod hubs;
pub use hubs::NodeHubs;

#[cfg(test)]
mod tests;
