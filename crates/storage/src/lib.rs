//! Persistence interfaces of the node.
//!
//! The trait family is the collaborator surface the rest of the node is
//! written against; [`MemoryStore`] is the engine bundled here. A SQL-backed
//! engine plugs in by implementing the same traits.
mod traits;
pub use traits::StorageError;
pub use traits::{
    OfferStorage, PaymentStorage, PeerStorage, ProfileStorage, SqueakStorage, StorageResult,
};

mod impls;
pub use impls::memory::MemoryStore;
