//! JSON-RPC interface definitions: the admin surface operators drive the
//! node with, and the peer surface nodes sync squeaks over.
pub mod admin;
pub mod peer;
