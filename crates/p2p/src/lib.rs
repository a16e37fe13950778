//! Peer-to-peer networking for the squeak protocol: a poll-based reactor
//! drives a protocol state machine that manages connections, handshakes,
//! keepalive, address exchange, and squeak message dispatch.
pub mod client;
pub mod common;
pub mod fsm;
pub mod net;
