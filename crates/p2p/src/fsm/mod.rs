//! The squeak protocol state machine and its sub-protocol managers.
use crate::net::LocalTime;

pub mod addrmgr;
pub mod handler;
pub mod output;
pub mod peermgr;
pub mod pingmgr;

/// A peer-to-peer event, surfaced from whichever manager produced it.
#[derive(Debug, Clone)]
pub enum Event {
    /// The node is initializing its state machine and about to start network activity.
    Initializing,
    /// The node is initialized and ready to receive commands.
    Ready {
        /// Local time.
        time: LocalTime,
    },
    /// An address manager event.
    Address(addrmgr::Event),
    /// A peer manager event.
    Peer(peermgr::Event),
    /// A ping manager event.
    Ping(pingmgr::Event),
}

impl From<peermgr::Event> for Event {
    fn from(e: peermgr::Event) -> Self {
        Self::Peer(e)
    }
}

impl From<addrmgr::Event> for Event {
    fn from(e: addrmgr::Event) -> Self {
        Self::Address(e)
    }
}

impl From<pingmgr::Event> for Event {
    fn from(e: pingmgr::Event) -> Self {
        Self::Ping(e)
    }
}
