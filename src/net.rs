//! Buffered TCP stream with varint length-prefix framing.
//!
//! Both kRPC connections speak the same framing: every message is a
//! protobuf base-128 varint carrying the payload length, followed by
//! exactly that many bytes. Writes are atomic at the message level within
//! one connection; concurrent writers must serialize outside (the RPC
//! mutex, or the single streams reader).

use std::io;
use std::time::Duration;

use log::*;
use prost::Message;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
    time::timeout,
};

use crate::error::{ConnectError, ProtocolError};

const ZERO_TIME: Duration = Duration::from_secs(0);

/// A length varint never legitimately needs more bytes than a u64 can fill.
const MAX_LEN_VARINT_BYTES: usize = 10;

/// Cap on a declared frame length. The protocol never bounds frames, but a
/// corrupted varint must surface as [ProtocolError], not as an allocation
/// the size of the corruption.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

const STREAM_BUF_SIZE: usize = 8 * 1024;

/// Buffered framed connection to one kRPC port.
pub struct FramedStream {
    buf_stream: BufStream<TcpStream>,
    peer: String,
}

impl std::fmt::Debug for FramedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "conn {}", self.peer)
    }
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Self {
        let peer = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "unknown".to_string(),
        };
        Self {
            buf_stream: BufStream::with_capacity(STREAM_BUF_SIZE, STREAM_BUF_SIZE, stream),
            peer,
        }
    }

    pub async fn connect(
        host: &str, port: u16, connect_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let addr = format!("{}:{}", host, port);
        let stream = if connect_timeout == ZERO_TIME {
            TcpStream::connect((host, port)).await
        } else {
            match timeout(connect_timeout, TcpStream::connect((host, port))).await {
                Ok(r) => r,
                Err(_) => {
                    warn!("dial {} timed out after {:?}", addr, connect_timeout);
                    return Err(ConnectError::Timeout { addr });
                }
            }
        };
        match stream {
            Ok(stream) => {
                // RPC batches are small and latency-bound
                let _ = stream.set_nodelay(true);
                Ok(Self::new(stream))
            }
            Err(e) => {
                warn!("cannot connect {}: {}", addr, e);
                Err(ConnectError::Dial { addr, source: e })
            }
        }
    }

    /// Write one framed payload and flush. One call, one wire message.
    pub async fn send_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut head: Vec<u8> = Vec::with_capacity(MAX_LEN_VARINT_BYTES);
        prost::encoding::encode_varint(payload.len() as u64, &mut head);
        self.buf_stream.write_all(&head).await?;
        self.buf_stream.write_all(payload).await?;
        self.buf_stream.flush().await
    }

    /// Read one framed payload. Never reads past the declared length.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_frame_len().await?;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::OversizeFrame(len));
        }
        let mut payload = vec![0u8; len as usize];
        self.buf_stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    // The length prefix is consumed byte by byte: a frame boundary is not
    // known until the varint terminates, and a hostile peer must not be
    // able to keep the continuation bit set forever.
    async fn read_frame_len(&mut self) -> Result<u64, ProtocolError> {
        let mut len = 0u64;
        let mut shift = 0u32;
        for _ in 0..MAX_LEN_VARINT_BYTES {
            let b = self.buf_stream.read_u8().await?;
            len |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(len);
            }
            shift += 7;
        }
        Err(ProtocolError::VarintTooLong)
    }

    #[inline]
    pub async fn send_msg<M: Message>(&mut self, msg: &M) -> io::Result<()> {
        self.send_frame(&msg.encode_to_vec()).await
    }

    #[inline]
    pub async fn recv_msg<M: Message + Default>(&mut self) -> Result<M, ProtocolError> {
        let frame = self.recv_frame().await?;
        M::decode(frame.as_slice()).map_err(ProtocolError::Malformed)
    }

    pub async fn send_msg_timeout<M: Message>(
        &mut self, msg: &M, write_timeout: Duration,
    ) -> io::Result<()> {
        if write_timeout == ZERO_TIME {
            return self.send_msg(msg).await;
        }
        match timeout(write_timeout, self.send_msg(msg)).await {
            Ok(r) => r,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn recv_msg_timeout<M: Message + Default>(
        &mut self, read_timeout: Duration,
    ) -> Result<M, ProtocolError> {
        if read_timeout == ZERO_TIME {
            return self.recv_msg().await;
        }
        match timeout(read_timeout, self.recv_msg()).await {
            Ok(r) => r,
            Err(e) => Err(ProtocolError::Io(e.into())),
        }
    }

    pub async fn close(&mut self) -> io::Result<()> {
        self.buf_stream.shutdown().await
    }
}
