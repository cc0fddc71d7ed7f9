//! The streams connection.
//!
//! A second long-lived connection carries server-pushed updates: each
//! `StreamUpdate` frame holds the re-evaluated results of every active
//! stream for one simulation tick, keyed by stream id. One dedicated
//! reader task demultiplexes them into per-stream slots; subscribers only
//! ever observe values through those slots, with coalesce-latest
//! semantics, so a slow subscriber can never stall the reader.

mod handle;

pub use handle::Stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use captains_log::filter::LogFilter;
use crossfire::*;
use futures::{future::FutureExt, pin_mut};
use tokio::sync::watch;

use crate::codec::{decode, TypeHint, Value};
use crate::error::{CodecError, Error, RpcError};
use crate::net::FramedStream;
use crate::proto;

/// What a delivery slot holds: nothing yet, the latest decoded value, or
/// the latest server-reported error for the owning stream.
pub(crate) type StreamSlot = Option<Result<Value, SlotError>>;

/// Errors that can ride a delivery slot. Cloned into every subscriber.
#[derive(Clone, Debug)]
pub(crate) enum SlotError {
    Rpc(RpcError),
    Codec(CodecError),
}

impl From<SlotError> for Error {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::Rpc(e) => Error::Rpc(e),
            SlotError::Codec(e) => Error::Codec(e),
        }
    }
}

pub(crate) struct StreamEntry {
    hint: TypeHint,
    started: bool,
    rate: f32,
    tx: watch::Sender<StreamSlot>,
}

/// Client side of the streams connection. Owned by the `KrpcClient`;
/// user code reaches it only through [Stream] handles.
pub struct StreamClient {
    inner: Arc<StreamInner>,
    close_tx: MTx<()>,
}

struct StreamInner {
    registry: Mutex<HashMap<u64, StreamEntry>>,
    closed: AtomicBool,
    logger: Arc<LogFilter>,
}

impl StreamClient {
    /// Take ownership of a handshaken streams connection and spawn the
    /// update loop.
    pub(crate) fn start(conn: FramedStream, logger: Arc<LogFilter>) -> Self {
        let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
        let inner = Arc::new(StreamInner {
            registry: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            logger,
        });
        let loop_inner = inner.clone();
        tokio::spawn(async move {
            loop_inner.receive_loop(conn, close_rx).await;
        });
        Self { inner, close_tx }
    }

    /// Ask the update loop to exit. It closes the socket, empties the
    /// registry and thereby closes every subscriber slot.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.close_tx.send(());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Install a registry entry for a server-assigned id and hand back
    /// the first delivery slot.
    pub(crate) fn register(
        &self, id: u64, hint: TypeHint, started: bool,
    ) -> Result<watch::Receiver<StreamSlot>, Error> {
        if self.is_closed() {
            return Err(Error::StreamClosed);
        }
        let mut registry = self.inner.registry();
        // the server hands out one id per distinct call; a second
        // add_stream for the same call subscribes to the existing entry
        if let Some(entry) = registry.get(&id) {
            return Ok(entry.tx.subscribe());
        }
        let (tx, rx) = watch::channel(None);
        registry.insert(id, StreamEntry { hint, started, rate: 0.0, tx });
        Ok(rx)
    }

    /// Drop an entry. Subsequent updates with this id are discarded and
    /// all of its subscriber slots observe closure.
    pub(crate) fn deregister(&self, id: u64) {
        self.inner.registry().remove(&id);
    }

    pub(crate) fn set_started(&self, id: u64, started: bool) {
        if let Some(entry) = self.inner.registry().get_mut(&id) {
            entry.started = started;
        }
    }

    pub(crate) fn set_rate(&self, id: u64, rate: f32) {
        if let Some(entry) = self.inner.registry().get_mut(&id) {
            entry.rate = rate;
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl StreamInner {
    // Lock poisoning cannot leave the registry inconsistent: every
    // critical section is a plain insert/remove/lookup.
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, StreamEntry>> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn receive_loop(&self, mut conn: FramedStream, close_rx: MAsyncRx<()>) {
        loop {
            let recv_f = conn.recv_msg::<proto::StreamUpdate>().fuse();
            pin_mut!(recv_f);
            let close_f = close_rx.recv().fuse();
            pin_mut!(close_f);
            futures::select! {
                r = recv_f => match r {
                    Ok(update) => self.dispatch(update),
                    Err(e) => {
                        if !self.closed.load(Ordering::SeqCst) {
                            logger_warn!(self.logger, "streams connection read err: {}", e);
                        }
                        break;
                    }
                },
                _ = close_f => {
                    break;
                }
            }
        }
        let _ = conn.close().await;
        self.closed.store(true, Ordering::SeqCst);
        // dropping the entries drops their watch senders, which closes
        // every subscriber slot
        self.registry().clear();
        logger_debug!(self.logger, "streams connection loop exit");
    }

    fn dispatch(&self, update: proto::StreamUpdate) {
        let registry = self.registry();
        for stream_result in update.results {
            let entry = match registry.get(&stream_result.id) {
                Some(entry) => entry,
                // removed stream, or an id this client never owned
                None => continue,
            };
            if !entry.started {
                continue;
            }
            let result = stream_result.result.unwrap_or_default();
            let slot = match result.error {
                Some(error) => Err(SlotError::Rpc(error.into())),
                None => match decode(&result.value, &entry.hint) {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        logger_warn!(
                            self.logger,
                            "stream {} decode err: {}",
                            stream_result.id,
                            e
                        );
                        Err(SlotError::Codec(e))
                    }
                },
            };
            // overwrite-on-full: a subscriber that has not polled loses
            // the previous value, never the reader's time
            entry.tx.send_replace(Some(slot));
        }
    }
}
