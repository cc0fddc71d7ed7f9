//! Typed stream handles and delivery slots.
//!
//! A [Stream] is one subscriber's view of a registered stream: a
//! capacity-1 slot the update loop overwrites, plus the conversion from
//! the dynamic wire value to `T`. Handles are cheap to clone; each clone
//! is an independent slot on the same underlying server stream. Dropping
//! handles never removes the stream, only [Stream::remove] or closing the
//! connection does.

use std::sync::{Arc, Weak};

use tokio::sync::watch;

use crate::client::{ClientInner, KrpcClient};
use crate::codec::{KrpcValue, Value};
use crate::error::{ConnectError, Error};

use super::StreamSlot;

type Convert<T> = Arc<dyn Fn(Value) -> Result<T, Error> + Send + Sync>;

/// A typed handle to a server-side stream.
pub struct Stream<T> {
    id: u64,
    client: Weak<ClientInner>,
    rx: watch::Receiver<StreamSlot>,
    convert: Convert<T>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: self.client.clone(),
            rx: self.rx.clone(),
            convert: self.convert.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "stream {}", self.id)
    }
}

impl<T: KrpcValue> Stream<T> {
    pub(crate) fn typed(
        id: u64, client: Weak<ClientInner>, rx: watch::Receiver<StreamSlot>,
    ) -> Self {
        Self {
            id,
            client,
            rx,
            convert: Arc::new(|value| T::from_value(value).map_err(Error::Codec)),
        }
    }
}

impl<T> Stream<T> {
    /// The server-assigned stream id, stable for the stream's lifetime.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Await the next publish and return the value it carried.
    ///
    /// If several updates arrived since the last poll, only the newest is
    /// observed; the intermediates are gone (coalesce-latest). Fails with
    /// [Error::StreamClosed] once the stream is removed or the streams
    /// connection is closed.
    pub async fn recv(&mut self) -> Result<T, Error> {
        if self.rx.changed().await.is_err() {
            return Err(Error::StreamClosed);
        }
        self.latest()
    }

    /// Return the most recent value, waiting only when nothing has been
    /// delivered yet.
    pub async fn get(&mut self) -> Result<T, Error> {
        loop {
            {
                let slot = self.rx.borrow_and_update();
                if slot.is_some() {
                    break;
                }
            }
            if self.rx.changed().await.is_err() {
                return Err(Error::StreamClosed);
            }
        }
        self.latest()
    }

    fn latest(&mut self) -> Result<T, Error> {
        let slot = self.rx.borrow_and_update().clone();
        match slot {
            Some(Ok(value)) => (self.convert)(value),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::StreamClosed),
        }
    }

    /// A new independent delivery slot on the same server stream.
    /// Equivalent to `clone()`.
    pub fn subscribe(&self) -> Self {
        self.clone()
    }

    /// Activate a stream created with `start = false`.
    pub async fn start(&self) -> Result<(), Error> {
        self.client()?.start_stream(self.id).await
    }

    /// Set the update rate in Hz; 0 means every simulation tick.
    pub async fn set_rate(&self, rate: f32) -> Result<(), Error> {
        self.client()?.set_stream_rate(self.id, rate).await
    }

    /// Remove the stream from the server and close every subscriber slot.
    pub async fn remove(self) -> Result<(), Error> {
        self.client()?.remove_stream(self.id).await
    }

    /// Derive a stream applying `f` to every delivered value.
    ///
    /// The result shares the server stream and registry entry; no extra
    /// server round trip, no second id.
    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
        T: 'static,
    {
        let base = self.convert.clone();
        Stream {
            id: self.id,
            client: self.client.clone(),
            rx: self.rx.clone(),
            convert: Arc::new(move |value| base(value).map(&f)),
        }
    }

    // Handles hold a non-owning back-reference: a live Stream does not
    // keep the connection alive.
    fn client(&self) -> Result<KrpcClient, Error> {
        match self.client.upgrade() {
            Some(inner) => Ok(KrpcClient { inner }),
            None => Err(ConnectError::Closed.into()),
        }
    }
}
