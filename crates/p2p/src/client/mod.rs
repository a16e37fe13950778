//! The p2p client: runs the protocol state machine on a reactor and hands
//! out handles for talking to it.
use flume as chan;
use thiserror::Error;

mod controller;
pub use controller::*;
mod seeds;

pub mod handle;
mod service;

/// Ways running the client can fail.
#[derive(Error, Debug)]
pub enum Error {
    /// A handle operation failed.
    #[error(transparent)]
    Handle(#[from] handle::Error),
    /// The networking sub-system failed.
    #[error(transparent)]
    Net(#[from] crate::net::Error),
    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A command channel went away.
    #[error("command channel disconnected")]
    Channel,
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::Channel
    }
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::Channel
    }
}
