//! Async client facade for the node's Lightning backend.
//!
//! The [`LightningClient`] trait is what the rest of the node programs
//! against; [`LndRestClient`] speaks the LND REST API. Payment preimages are
//! what this node sells, so the send/decode/settle surface is the part that
//! matters; channel and address calls exist for the admin surface.
mod client;
pub mod json;
mod rpc_api;

pub use client::LndRestClient;
pub use json::{
    AddedInvoice, ChannelInfo, DecodedPaymentRequest, NodeInfo, PaymentResult, SettledInvoice,
};
#[cfg(any(test, feature = "mocks"))]
pub use rpc_api::MockLightningClient;
pub use rpc_api::LightningClient;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("lightning backend rejected the request: {0}")]
    Rejected(String),
    #[error("payment did not settle: {0}")]
    PaymentFailed(String),
    #[error("payment timed out")]
    PaymentTimeout,
    #[error("unexpected response field: {0}")]
    BadResponse(&'static str),
}
