use event_bus::Hub;

use sqk_types::{PeerEvent, ReceivedOffer, ReceivedPayment, SqueakEntry};

/// The fan-out side of the node: one hub per event kind, so publishers only
/// touch the shard they care about. Cloning shares the underlying hubs.
#[derive(Clone, Default)]
pub struct NodeHubs {
    /// Connection-map changes.
    pub peer_events: Hub<PeerEvent>,
    /// Offers received from peers.
    pub buy_offers: Hub<ReceivedOffer>,
    /// Squeaks saved or updated locally.
    pub squeak_displays: Hub<SqueakEntry>,
    /// Settled incoming payments.
    pub received_payments: Hub<ReceivedPayment>,
}

impl NodeHubs {
    pub fn new() -> Self {
        Self::default()
    }
}
