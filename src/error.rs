//! Error taxonomy of the client.
//!
//! Kinds are separated by what they poison: [ConnectError] and
//! [ProtocolError] are fatal for a connection, [CodecError] for a single
//! call, and [RpcError] is a server-reported value that leaves the
//! connection usable. Nothing in here retries; callers own the
//! reconnect policy because simulator state is not idempotent.

use std::fmt;
use std::io;

use crate::proto;

/// Top-level error returned by every fallible client operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Rpc(#[from] RpcError),
    /// The awaited stream, or the whole streams connection, was removed.
    #[error("stream closed")]
    StreamClosed,
}

/// Handshake failure, dial failure, or an operation on a closed
/// connection. The connection is not auto-reconnected.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("dial {addr}: {source}")]
    Dial { addr: String, source: io::Error },
    #[error("dial {addr}: timed out")]
    Timeout { addr: String },
    #[error("handshake refused ({status}): {message}")]
    Refused { status: proto::ConnectionStatus, message: String },
    #[error("connection closed")]
    Closed,
    /// add_stream on a client connected with `rpc_only`.
    #[error("streams connection was not opened (rpc_only)")]
    StreamDisabled,
}

/// Malformed frame or message. Fatal for the connection carrying it;
/// both sockets should be closed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("length varint too long")]
    VarintTooLong,
    #[error("frame length {0} exceeds the frame cap")]
    OversizeFrame(u64),
    #[error("malformed message: {0}")]
    Malformed(#[from] prost::DecodeError),
    /// The server answered a batch with a result list of the wrong length.
    #[error("expected {expected} results, server returned {got}")]
    ResultCount { expected: usize, got: usize },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// The kind tag of a wire value, used in codec diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Void,
    SInt32,
    SInt64,
    UInt32,
    UInt64,
    Bool,
    Float,
    Double,
    String,
    Bytes,
    Class,
    Enumeration,
    List,
    Set,
    Dictionary,
    Tuple,
    Message,
}

/// A value that cannot be encoded or decoded. Fatal for the single call,
/// not for the connection.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("wrong tuple arity: expected {expected}, got {got}")]
    WrongTupleArity { expected: usize, got: usize },
    #[error("expected a {expected} value, got {got}")]
    WrongKind { expected: ValueKind, got: ValueKind },
    #[error("truncated {0} payload")]
    Truncated(ValueKind),
    #[error("{0} payload has trailing bytes")]
    TrailingBytes(ValueKind),
    #[error("string payload is not valid utf-8")]
    InvalidUtf8,
    #[error("malformed {0} wrapper message")]
    Wrapper(ValueKind),
    #[error("enumeration value {0} has no symbolic name")]
    EnumOutOfRange(i32),
}

/// A failure reported by the server for one call, or for an entire
/// request. Carries the canonical exception name of the owning service.
///
/// This is a value, not a control-flow primitive: `call_batch` hands the
/// per-call instances back untouched and the connection stays usable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RpcError {
    pub service: String,
    pub name: String,
    pub description: String,
    pub stack_trace: String,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.service.is_empty() {
            write!(f, "{}: {}", self.name, self.description)
        } else {
            write!(f, "{}.{}: {}", self.service, self.name, self.description)
        }
    }
}

impl From<proto::Error> for RpcError {
    fn from(e: proto::Error) -> Self {
        Self {
            service: e.service,
            name: e.name,
            description: e.description,
            stack_trace: e.stack_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let e = RpcError {
            service: "KRPC".to_string(),
            name: "ProcedureNotFound".to_string(),
            description: "no such procedure".to_string(),
            stack_trace: String::new(),
        };
        assert_eq!(format!("{}", e), "KRPC.ProcedureNotFound: no such procedure");

        let anon = RpcError {
            name: "InvalidRequest".to_string(),
            description: "bad".to_string(),
            ..Default::default()
        };
        assert_eq!(format!("{}", anon), "InvalidRequest: bad");
    }

    #[test]
    fn test_value_kind_names() {
        assert_eq!(ValueKind::SInt32.to_string(), "s_int32");
        assert_eq!(ValueKind::Dictionary.to_string(), "dictionary");
        let e = CodecError::WrongTupleArity { expected: 2, got: 3 };
        assert_eq!(e.to_string(), "wrong tuple arity: expected 2, got 3");
    }
}
