use crate::{tid, Receiver};

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use flume as channel;

pub type EventBusResult<T> = Result<T, Error>;

type InnerSender = channel::Sender<Box<dyn BusEvent>>;
type InnerReceiver = channel::Receiver<Box<dyn BusEvent>>;

/// Trait for events that can be sent through the event bus. Use the
/// [`event_bus_macros::Event`] derive macro to implement it.
///
/// Declares an `as_any` method that returns a reference to `dyn Any`, used to
/// downcast the event to its concrete type on the subscriber side.
pub trait BusEvent: Send {
    fn as_any(&self) -> &dyn Any;
}

/// Event bus routing typed messages between different parts of the
/// application. Built on [`flume`] channels, one channel per event type.
///
/// Use [`EventBus::extract`] to hand a service only the channels it needs.
///
/// # Examples
/// ```
/// use event_bus::{EventBus, BusEvent, Receiver, typeid};
/// use std::any::TypeId;
/// use event_bus_macros::Event;
///
/// #[derive(Clone, Event)]
/// struct MyEvent {
///    id: u32,
/// }
///
/// # tokio_test::block_on(async {
/// let mut full_event_bus = EventBus::default();
///
/// // Registering channel for MyEvent event.
/// full_event_bus.register::<MyEvent>(None);
///
/// // Extracting the MyEvent sender and receiver sides.
/// let event_bus = full_event_bus.extract(&typeid![MyEvent], &typeid![MyEvent]).unwrap();
///
/// event_bus.send(MyEvent { id: 1 }).await;
///
/// let receiver: Receiver<MyEvent> = event_bus.subscribe();
/// let event = receiver.recv().await.unwrap();
/// # });
/// ```
#[derive(Clone, Default, Debug)]
pub struct EventBus {
    /// Map of event type id to channel sender.
    txs: HashMap<TypeId, InnerSender>,

    /// Map of event type id to channel receiver.
    rxs: HashMap<TypeId, InnerReceiver>,
}

impl EventBus {
    /// Register a channel for the specified event type. Unbounded unless a
    /// channel size is given. Returns `true` if the channel already existed.
    pub fn register<E: BusEvent + Clone + 'static>(&mut self, channel_size: Option<usize>) -> bool {
        if self.txs.contains_key(&tid::<E>()) {
            return true;
        }

        let (tx, rx) = match channel_size {
            Some(size) => channel::bounded::<Box<dyn BusEvent>>(size),
            None => channel::unbounded::<Box<dyn BusEvent>>(),
        };

        self.txs.insert(tid::<E>(), tx);
        self.rxs.insert(tid::<E>(), rx);

        false
    }

    /// Extract a subset of channels from an existing event bus. Fails with
    /// [`Error::ChannelForTypeIdDoesntExist`] if any requested channel is
    /// missing.
    ///
    /// Use the [`typeid`](`crate::typeid`) macro for the type id lists.
    pub fn extract(&self, tx_ids: &[TypeId], rx_ids: &[TypeId]) -> EventBusResult<Self> {
        Ok(Self {
            txs: subset::<InnerSender>(&self.txs, tx_ids)?,
            rxs: subset::<InnerReceiver>(&self.rxs, rx_ids)?,
        })
    }

    /// Subscribe to the channel for the specified event type.
    ///
    /// Panics if the channel doesn't exist; use [`EventBus::try_subscribe`]
    /// to avoid the panic.
    pub fn subscribe<E: BusEvent + Clone + 'static>(&self) -> Receiver<E> {
        self.try_subscribe()
            .expect("channel for event must be present")
    }

    /// Subscribe to the channel for the specified event type, failing with
    /// [`Error::ChannelForTypeIdDoesntExist`] if it was never registered.
    pub fn try_subscribe<E: BusEvent + Clone + 'static>(&self) -> EventBusResult<Receiver<E>> {
        let rx = self
            .rxs
            .get(&tid::<E>())
            .ok_or(Error::ChannelForTypeIdDoesntExist)?
            .clone();

        Ok(Receiver::new(rx))
    }

    /// Send an event to its channel.
    ///
    /// Panics if the channel was never registered; use [`EventBus::try_send`]
    /// to avoid the panic. If the channel is bounded and full, waits until
    /// there is space.
    pub async fn send<E: BusEvent + 'static>(&self, event: E) {
        self.try_send(event)
            .await
            .expect("channel for event must be present");
    }

    /// Send an event to its channel, failing if the channel was never
    /// registered or the receiving side is gone.
    pub async fn try_send<E: BusEvent + 'static>(&self, event: E) -> EventBusResult<()> {
        let channel = self
            .txs
            .get(&tid::<E>())
            .ok_or(Error::ChannelForTypeIdDoesntExist)?;

        channel
            .send_async(Box::new(event))
            .await
            .map_err(Error::ChannelSend)?;

        Ok(())
    }
}

fn subset<Channel: Clone>(
    src: &HashMap<TypeId, Channel>,
    event_ids: &[TypeId],
) -> EventBusResult<HashMap<TypeId, Channel>> {
    let mut extracted_channels: HashMap<TypeId, Channel> = Default::default();

    for event_id in event_ids {
        extracted_channels.insert(
            *event_id,
            src.get(event_id)
                .ok_or(Error::ChannelForTypeIdDoesntExist)?
                .clone(),
        );
    }

    Ok(extracted_channels)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to send message to channel: {0}")]
    ChannelSend(channel::SendError<Box<dyn BusEvent>>),
    #[error("channel for event id doesn't exist")]
    ChannelForTypeIdDoesntExist,
}
