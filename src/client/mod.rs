//! The RPC connection and the client handle.
//!
//! One [KrpcClient] owns both sockets. Procedure calls ride the RPC
//! connection as batches; the server answers each batch in send order on
//! the same socket, so the send-then-receive pair runs under one mutex.
//! There is no pipelining: interleaving two requests would cross their
//! responses.

mod krpc;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use captains_log::filter::LogFilter;
use crossfire::*;
use futures::{future::FutureExt, pin_mut};

use crate::codec::{unmarshal, KrpcValue};
use crate::config::{ClientConfig, TimeoutSetting};
use crate::error::{ConnectError, Error, ProtocolError};
use crate::net::FramedStream;
use crate::proto;
use crate::stream::StreamClient;

/// Handle to one kRPC server connection pair. Cheap to clone; all clones
/// share the underlying sockets. Created by [KrpcClient::connect], ended
/// by [KrpcClient::close]; a closed client may not be reused.
#[derive(Clone)]
pub struct KrpcClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    rpc: tokio::sync::Mutex<FramedStream>,
    client_identifier: [u8; 16],
    pub(crate) stream: Option<StreamClient>,
    closed: AtomicBool,
    close_tx: MTx<()>,
    close_rx: MAsyncRx<()>,
    pub(crate) logger: Arc<LogFilter>,
}

impl fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "krpc client {}:{}", self.config.host, self.config.rpc_port)
    }
}

impl fmt::Debug for KrpcClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

async fn handshake(
    conn: &mut FramedStream, request: proto::ConnectionRequest, timeout: &TimeoutSetting,
) -> Result<proto::ConnectionResponse, Error> {
    conn.send_msg_timeout(&request, timeout.write_timeout)
        .await
        .map_err(|e| Error::Protocol(ProtocolError::Io(e)))?;
    let resp: proto::ConnectionResponse = conn.recv_msg_timeout(timeout.read_timeout).await?;
    let status = proto::ConnectionStatus::try_from(resp.status)
        .unwrap_or(proto::ConnectionStatus::MalformedMessage);
    if status != proto::ConnectionStatus::Ok {
        return Err(ConnectError::Refused { status, message: resp.message }.into());
    }
    Ok(resp)
}

impl KrpcClient {
    /// Dial the server and perform the handshakes.
    ///
    /// Opens the RPC connection, stores the server-assigned client
    /// identifier, and unless `rpc_only` is set also opens the streams
    /// connection and spawns its update loop. Errors from either
    /// handshake fail the whole connect.
    pub async fn connect(mut config: ClientConfig) -> Result<Self, Error> {
        config.set_defaults();
        let logger = Arc::new(LogFilter::new());
        let timeout = config.timeout;

        let mut rpc =
            FramedStream::connect(&config.host, config.rpc_port, timeout.connect_timeout).await?;
        let request = proto::ConnectionRequest {
            r#type: proto::ConnectionType::Rpc as i32,
            client_name: config.client_name.clone(),
            client_identifier: Vec::new(),
        };
        let resp = handshake(&mut rpc, request, &timeout).await?;
        let mut client_identifier = [0u8; 16];
        let n = resp.client_identifier.len().min(client_identifier.len());
        client_identifier[..n].copy_from_slice(&resp.client_identifier[..n]);

        let stream = if config.rpc_only {
            None
        } else {
            let mut conn =
                FramedStream::connect(&config.host, config.stream_port, timeout.connect_timeout)
                    .await?;
            let request = proto::ConnectionRequest {
                r#type: proto::ConnectionType::Stream as i32,
                client_name: String::new(),
                client_identifier: resp.client_identifier.clone(),
            };
            handshake(&mut conn, request, &timeout).await?;
            Some(StreamClient::start(conn, logger.clone()))
        };

        let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
        let inner = Arc::new(ClientInner {
            config,
            rpc: tokio::sync::Mutex::new(rpc),
            client_identifier,
            stream,
            closed: AtomicBool::new(false),
            close_tx,
            close_rx,
            logger,
        });
        logger_debug!(inner.logger, "{:?} connected", inner);
        Ok(Self { inner })
    }

    /// Perform a batch of procedure calls.
    ///
    /// Results come back one-to-one in call order. A request-level server
    /// error fails the whole batch; per-call errors are left in the
    /// returned results for the caller to inspect.
    #[inline]
    pub async fn call_batch(
        &self, calls: Vec<proto::ProcedureCall>,
    ) -> Result<Vec<proto::ProcedureResult>, Error> {
        self.inner.call_batch(calls).await
    }

    /// Perform a single procedure call, surfacing its per-call error.
    #[inline]
    pub async fn call(&self, call: proto::ProcedureCall) -> Result<proto::ProcedureResult, Error> {
        self.inner.call(call).await
    }

    /// Perform a single call and decode the result under `T`'s shape.
    pub async fn invoke<T: KrpcValue>(&self, call: proto::ProcedureCall) -> Result<T, Error> {
        let result = self.call(call).await?;
        Ok(unmarshal(&result.value)?)
    }

    /// The 16-byte identifier the server bound this client to.
    #[inline]
    pub fn client_identifier(&self) -> &[u8; 16] {
        &self.inner.client_identifier
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close both connections. Errors from each socket are collected;
    /// the first is returned, the rest logged.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

impl ClientInner {
    pub(crate) async fn call_batch(
        &self, calls: Vec<proto::ProcedureCall>,
    ) -> Result<Vec<proto::ProcedureResult>, Error> {
        let expected = calls.len();
        let request = proto::Request { calls };
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectError::Closed.into());
        }
        let mut conn = self.rpc.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectError::Closed.into());
        }
        if let Err(e) = conn.send_msg_timeout(&request, self.config.timeout.write_timeout).await {
            logger_warn!(self.logger, "{:?} send request err: {}", self, e);
            return Err(self.comm_err(ProtocolError::Io(e)));
        }
        // The read is raced against close() so shutting the client down
        // interrupts a blocked call instead of waiting out the server.
        let response: proto::Response = {
            let read_f =
                conn.recv_msg_timeout::<proto::Response>(self.config.timeout.read_timeout).fuse();
            pin_mut!(read_f);
            let close_f = self.close_rx.recv().fuse();
            pin_mut!(close_f);
            futures::select! {
                r = read_f => match r {
                    Ok(resp) => resp,
                    Err(e) => {
                        logger_warn!(self.logger, "{:?} recv response err: {}", self, e);
                        return Err(self.comm_err(e));
                    }
                },
                _ = close_f => {
                    return Err(ConnectError::Closed.into());
                }
            }
        };
        drop(conn);

        if let Some(error) = response.error {
            return Err(Error::Rpc(error.into()));
        }
        if response.results.len() != expected {
            return Err(
                ProtocolError::ResultCount { expected, got: response.results.len() }.into()
            );
        }
        Ok(response.results)
    }

    pub(crate) async fn call(
        &self, call: proto::ProcedureCall,
    ) -> Result<proto::ProcedureResult, Error> {
        let mut results = self.call_batch(vec![call]).await?;
        let result = match results.pop() {
            Some(r) => r,
            None => return Err(ProtocolError::ResultCount { expected: 1, got: 0 }.into()),
        };
        if let Some(error) = result.error {
            return Err(Error::Rpc(error.into()));
        }
        Ok(result)
    }

    pub(crate) async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        logger_debug!(self.logger, "{:?} closing", self);
        // wake any call blocked on its response
        let _ = self.close_tx.send(());
        if let Some(stream) = self.stream.as_ref() {
            stream.close();
        }
        let mut errors: Vec<Error> = Vec::new();
        let mut conn = self.rpc.lock().await;
        if let Err(e) = conn.close().await {
            errors.push(ProtocolError::Io(e).into());
        }
        drop(conn);
        let first = errors.pop();
        for e in errors {
            logger_warn!(self.logger, "{:?} close: {}", self, e);
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // A socket error observed after close() is the close, not a protocol
    // failure.
    fn comm_err(&self, e: ProtocolError) -> Error {
        if self.closed.load(Ordering::Acquire) {
            ConnectError::Closed.into()
        } else {
            e.into()
        }
    }
}
