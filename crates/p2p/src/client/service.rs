//! Glue between the byte-oriented reactor and the message-oriented state
//! machine: one frame decoder per peer on the way in, consensus encoding on
//! the way out.
use async_trait::async_trait;
use bitcoin::consensus::{deserialize_partial, encode, Encodable};
use event_bus::EventBus;
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error};

use sqk_types::RawNetworkMessage;

use crate::{
    client::seeds,
    client::P2PConfig,
    common::time::AdjustedClock,
    fsm,
    net::LocalTime,
    net::StateMachine,
    net::{Disconnect, Io, Link},
};

/// Reassembles wire frames from a peer's byte stream.
#[derive(Debug, Default)]
struct Decoder {
    unparsed: Vec<u8>,
}

impl Decoder {
    /// Input bytes into the decoder.
    fn input(&mut self, bytes: &[u8]) {
        self.unparsed.extend_from_slice(bytes);
    }

    /// Decode and return the next message. Returns [`None`] if a full
    /// message hasn't arrived yet.
    fn decode_next(&mut self) -> Result<Option<RawNetworkMessage>, encode::Error> {
        match deserialize_partial(self.unparsed.as_slice()) {
            Ok((msg, index)) => {
                self.unparsed.drain(..index);
                Ok(Some(msg))
            }

            Err(encode::Error::Io(ref err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Client service. Wraps the state machine and handles decoding and encoding
/// of network messages.
pub struct Service<C> {
    inboxes: HashMap<SocketAddr, Decoder>,
    fsm: fsm::handler::StateMachine<C>,
}

impl<C: AdjustedClock<SocketAddr> + Sync + Send> Service<C> {
    /// Create a new client service.
    pub fn new(clock: C, rng: fastrand::Rng, config: P2PConfig, full_event_bus: &EventBus) -> Self {
        Self {
            inboxes: HashMap::new(),
            fsm: fsm::handler::StateMachine::new(
                clock,
                rng,
                fsm::handler::Config {
                    seeds: seeds::seed_nodes(config.network),
                    network: config.network,
                    connect: config.connect,
                    user_agent: config.user_agent,
                    limits: config.limits,
                    update_interval: config.update_interval,
                },
                full_event_bus,
            ),
        }
    }
}

#[async_trait]
impl<C> crate::net::Service for Service<C>
where
    C: AdjustedClock<SocketAddr> + Sync + Send,
{
    type Command = fsm::handler::Command;

    async fn command_received(&mut self, cmd: Self::Command) {
        self.fsm.command(cmd).await
    }
}

#[async_trait]
impl<C> StateMachine for Service<C>
where
    C: AdjustedClock<SocketAddr> + Sync + Send,
{
    type Message = [u8];
    type Event = crate::fsm::Event;
    type DisconnectReason = fsm::handler::DisconnectReason;

    async fn initialize(&mut self, time: LocalTime) {
        self.fsm.initialize(time).await;
    }

    async fn message_received(&mut self, addr: &SocketAddr, bytes: Cow<'_, [u8]>) {
        let Some(inbox) = self.inboxes.get_mut(addr) else {
            debug!("Received message from unknown peer {}", addr);
            return;
        };

        inbox.input(bytes.borrow());

        loop {
            match inbox.decode_next() {
                Ok(Some(msg)) => self.fsm.message_received(addr, Cow::Owned(msg)).await,
                Ok(None) => break,
                Err(err) => {
                    error!("Invalid message received from {}. Error: {}", addr, err);
                    self.fsm
                        .disconnect(*addr, fsm::handler::DisconnectReason::DecodeError);
                    return;
                }
            }
        }
    }

    fn attempted(&mut self, addr: &SocketAddr) {
        self.fsm.attempted(addr)
    }

    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link) -> bool {
        if !self.fsm.connected(addr, local_addr, link) {
            return false;
        }
        self.inboxes.insert(addr, Decoder::default());
        true
    }

    async fn disconnected(
        &mut self,
        addr: &SocketAddr,
        reason: Disconnect<Self::DisconnectReason>,
    ) {
        self.inboxes.remove(addr);
        self.fsm.disconnected(addr, reason).await
    }

    fn is_disconnected(&mut self, addr: SocketAddr) -> bool {
        self.inboxes.get(&addr).is_none() && self.fsm.is_disconnected(addr)
    }

    fn tick(&mut self, local_time: LocalTime) {
        self.fsm.tick(local_time);
    }

    async fn timer_expired(&mut self) {
        self.fsm.timer_expired().await;
    }

    fn is_connected(&mut self, addr: SocketAddr) -> bool {
        self.inboxes.get(&addr).is_some() || self.fsm.is_connected(addr)
    }
}

impl<C> Iterator for Service<C> {
    type Item = Io<Vec<u8>, crate::fsm::Event, fsm::handler::DisconnectReason>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fsm.next() {
            Some(Io::Write(addr, msg)) => {
                let mut buf = Vec::new();

                msg.consensus_encode(&mut buf)
                    .expect("writing to an in-memory buffer doesn't fail");
                Some(Io::Write(addr, buf))
            }
            Some(Io::Event(e)) => Some(Io::Event(e)),
            Some(Io::Connect(a)) => Some(Io::Connect(a)),
            Some(Io::Disconnect(a, r)) => Some(Io::Disconnect(a, r)),
            Some(Io::SetTimer(d)) => Some(Io::SetTimer(d)),

            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::serialize;
    use sqk_types::network::Network;
    use sqk_types::NetworkMessage;

    #[test]
    fn split_frames_reassemble() {
        let msg = RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload: NetworkMessage::Ping(99),
        };
        let bytes = serialize(&msg);
        let (first, second) = bytes.split_at(bytes.len() / 2);

        let mut decoder = Decoder::default();

        decoder.input(first);
        assert!(decoder.decode_next().unwrap().is_none());

        decoder.input(second);
        assert_eq!(decoder.decode_next().unwrap(), Some(msg));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let ping = RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload: NetworkMessage::Ping(1),
        };
        let pong = RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload: NetworkMessage::Pong(1),
        };

        let mut bytes = serialize(&ping);
        bytes.extend(serialize(&pong));

        let mut decoder = Decoder::default();
        decoder.input(&bytes);

        assert_eq!(decoder.decode_next().unwrap(), Some(ping));
        assert_eq!(decoder.decode_next().unwrap(), Some(pong));
    }
}
