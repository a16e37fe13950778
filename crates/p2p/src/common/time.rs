//! How the managers tell the time: never from the system directly, always
//! from whatever clock they were handed, so tests can freeze it.
use crate::net::LocalTime;
use std::sync::{Arc, Mutex};

/// Tells the time.
pub trait Clock: Clone {
    fn local_time(&self) -> LocalTime;
}

/// A clock someone else winds: the reactor sets it on every tick.
pub trait AdjustedClock<K>: Clock {
    fn set(&mut self, local_time: LocalTime);
}

/// Shares one clock between the service and its managers.
#[derive(Debug, Clone)]
pub struct RefClock<T: Clock> {
    inner: Arc<Mutex<T>>,
}

impl<T: Clock> From<T> for RefClock<T> {
    fn from(other: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(other)),
        }
    }
}

impl<T: Clock> Clock for RefClock<T> {
    fn local_time(&self) -> LocalTime {
        self.inner.lock().unwrap().local_time()
    }
}

/// A frozen clock; handy in tests.
impl Clock for LocalTime {
    fn local_time(&self) -> LocalTime {
        *self
    }
}

/// Wall-clock time holder, set by the reactor on every tick.
#[derive(Debug, Clone)]
pub struct WallClock {
    local_time: LocalTime,
}

impl WallClock {
    pub fn new(local_time: LocalTime) -> Self {
        Self { local_time }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new(LocalTime::default())
    }
}

impl Clock for WallClock {
    fn local_time(&self) -> LocalTime {
        self.local_time
    }
}

impl<K> AdjustedClock<K> for WallClock {
    fn set(&mut self, local_time: LocalTime) {
        self.local_time = local_time;
    }
}

impl<K> AdjustedClock<K> for RefClock<WallClock> {
    fn set(&mut self, local_time: LocalTime) {
        self.inner.lock().unwrap().local_time = local_time;
    }
}
