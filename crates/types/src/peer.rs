use crate::address::PeerAddress;

/// A peer saved in the node's address book.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqueakPeer {
    /// Store-assigned identifier; `None` until inserted.
    pub peer_id: Option<u64>,
    pub name: String,
    pub address: PeerAddress,
    /// Whether the autoconnect loop should dial this peer.
    pub autoconnect: bool,
}

impl SqueakPeer {
    pub fn new(name: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            peer_id: None,
            name: name.into(),
            address,
            autoconnect: false,
        }
    }
}
