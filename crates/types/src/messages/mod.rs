use std::net::SocketAddr;

use event_bus::Event;

use crate::offer::Offer;
use crate::squeak::{InterestFilter, SqueakBundle, SqueakHash};

use self::p2p::Inventory;

pub mod p2p;

/// Messages to the controller service.
#[derive(Clone, Debug, Event)]
pub enum ControllerMessage {
    /// Data that is received from the p2p network.
    P2P(ControllerP2PMessage),
    /// A peer completed its handshake.
    PeerConnected(PeerSummary),
    /// A peer was disconnected.
    PeerDisconnected(PeerSummary),
}

/// Message from p2p to the controller.
#[derive(Clone, Debug, Event)]
pub enum ControllerP2PMessage {
    /// A peer advertised squeaks it carries.
    Inv {
        inv: Vec<Inventory>,
        /// Address of the sender.
        sender: SocketAddr,
    },
    /// A peer asked for squeaks we carry.
    GetSqueaks {
        inv: Vec<Inventory>,
        sender: SocketAddr,
    },
    /// A peer delivered a squeak.
    Squeak {
        squeak: SqueakBundle,
        sender: SocketAddr,
    },
    /// A peer asked for an offer on one of our squeaks.
    GetOffer {
        squeak_hash: SqueakHash,
        sender: SocketAddr,
    },
    /// A peer delivered an offer.
    Offer {
        offer: Offer,
        sender: SocketAddr,
    },
    /// A peer wants squeaks matching the filter pushed to it.
    Subscribe {
        filter: InterestFilter,
        sender: SocketAddr,
    },
    /// A peer withdrew a previously registered filter.
    Unsubscribe {
        filter: InterestFilter,
        sender: SocketAddr,
    },
}

/// Snapshot of one connected peer, published on connect/disconnect and
/// served to the admin surface.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerSummary {
    pub address: SocketAddr,
    pub outbound: bool,
    pub user_agent: String,
    pub version: u32,
    /// Connected since, unix seconds.
    pub connected_since: u64,
}

/// Connection-map change, fanned out to admin subscriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(PeerSummary),
    Disconnected(PeerSummary),
}
