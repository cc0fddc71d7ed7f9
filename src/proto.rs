//! Wire schema of the kRPC protocol.
//!
//! Hand-written `prost` structs for the messages exchanged on the RPC and
//! streams connections, plus the self-describing schema returned by
//! `KRPC.GetServices`. Field numbers follow the kRPC server's protobuf
//! definitions; keep them stable, the server will not renumber.

/// Which kind of connection a handshake opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionType {
    Rpc = 0,
    Stream = 1,
}

/// Handshake outcome reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, ::prost::Enumeration)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ConnectionStatus {
    Ok = 0,
    MalformedMessage = 1,
    Timeout = 2,
    WrongType = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectionRequest {
    #[prost(enumeration = "ConnectionType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub client_name: String,
    #[prost(bytes = "vec", tag = "3")]
    pub client_identifier: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectionResponse {
    #[prost(enumeration = "ConnectionStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", tag = "3")]
    pub client_identifier: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(message, repeated, tag = "1")]
    pub calls: Vec<ProcedureCall>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(message, optional, tag = "1")]
    pub error: Option<Error>,
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<ProcedureResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcedureCall {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub procedure: String,
    #[prost(message, repeated, tag = "3")]
    pub arguments: Vec<Argument>,
}

impl ProcedureCall {
    pub fn new(service: &str, procedure: &str) -> Self {
        Self { service: service.to_string(), procedure: procedure.to_string(), arguments: Vec::new() }
    }

    /// Append an encoded argument at the next formal parameter position.
    pub fn arg(mut self, value: Vec<u8>) -> Self {
        let position = self.arguments.len() as u32;
        self.arguments.push(Argument { position, value });
        self
    }

    /// Append an encoded argument at an explicit position. Positions may
    /// be sparse or out of order; the server matches them to formal
    /// parameters by index.
    pub fn arg_at(mut self, position: u32, value: Vec<u8>) -> Self {
        self.arguments.push(Argument { position, value });
        self
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argument {
    #[prost(uint32, tag = "1")]
    pub position: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcedureResult {
    #[prost(message, optional, tag = "1")]
    pub error: Option<Error>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub stack_trace: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamUpdate {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<StreamResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamResult {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, optional, tag = "2")]
    pub result: Option<ProcedureResult>,
}

/// Server-side record of a stream, as returned by `KRPC.AddStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stream {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(message, optional, tag = "1")]
    pub stream: Option<Stream>,
}

/// Liveness and performance counters from `KRPC.GetStatus`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(uint64, tag = "2")]
    pub bytes_read: u64,
    #[prost(uint64, tag = "3")]
    pub bytes_written: u64,
    #[prost(float, tag = "4")]
    pub bytes_read_rate: f32,
    #[prost(float, tag = "5")]
    pub bytes_written_rate: f32,
    #[prost(uint64, tag = "6")]
    pub rpcs_executed: u64,
    #[prost(float, tag = "7")]
    pub rpc_rate: f32,
    #[prost(bool, tag = "8")]
    pub one_rpc_per_update: bool,
    #[prost(uint32, tag = "9")]
    pub max_time_per_update: u32,
    #[prost(bool, tag = "10")]
    pub adaptive_rate_control: bool,
    #[prost(bool, tag = "11")]
    pub blocking_recv: bool,
    #[prost(uint32, tag = "12")]
    pub recv_timeout: u32,
    #[prost(float, tag = "13")]
    pub time_per_rpc_update: f32,
    #[prost(float, tag = "14")]
    pub poll_time_per_rpc_update: f32,
    #[prost(float, tag = "15")]
    pub exec_time_per_rpc_update: f32,
    #[prost(uint32, tag = "16")]
    pub stream_rpcs: u32,
    #[prost(uint64, tag = "17")]
    pub stream_rpcs_executed: u64,
    #[prost(float, tag = "18")]
    pub time_per_stream_update: f32,
}

// ---------------------------------------------------------------------------
// Self-describing schema, consumed by the codegen model.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Services {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<Service>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub procedures: Vec<Procedure>,
    #[prost(message, repeated, tag = "3")]
    pub classes: Vec<Class>,
    #[prost(message, repeated, tag = "4")]
    pub enumerations: Vec<Enumeration>,
    #[prost(message, repeated, tag = "5")]
    pub exceptions: Vec<Exception>,
    #[prost(string, tag = "6")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Procedure {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub parameters: Vec<Parameter>,
    #[prost(message, optional, tag = "3")]
    pub return_type: Option<Type>,
    #[prost(bool, tag = "4")]
    pub return_is_nullable: bool,
    #[prost(string, tag = "5")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Parameter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<Type>,
    #[prost(bytes = "vec", tag = "3")]
    pub default_value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Class {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Enumeration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<EnumerationValue>,
    #[prost(string, tag = "3")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnumerationValue {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub value: i32,
    #[prost(string, tag = "3")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Exception {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub documentation: String,
}

/// Type codes used by [Type]. Scalars and message kinds are flat;
/// `CLASS`/`ENUMERATION` carry the owning service and name, collection
/// codes carry element types in [Type::types].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeCode {
    None = 0,
    Double = 1,
    Float = 2,
    Sint32 = 3,
    Sint64 = 4,
    Uint32 = 5,
    Uint64 = 6,
    Bool = 7,
    String = 8,
    Bytes = 9,
    ProcedureCall = 10,
    Stream = 11,
    Event = 12,
    Status = 13,
    Services = 14,
    Class = 100,
    Enumeration = 101,
    Tuple = 200,
    List = 201,
    Set = 202,
    Dictionary = 203,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub service: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(message, repeated, tag = "4")]
    pub types: Vec<Type>,
}

impl Type {
    pub fn scalar(code: TypeCode) -> Self {
        Self { code: code as i32, ..Default::default() }
    }
}

// ---------------------------------------------------------------------------
// Collection wrappers used by the value codec. Their items hold encoded
// values, not messages; the codec nests through them recursively.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct List {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Set {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dictionary {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<DictionaryEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DictionaryEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tuple {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_procedure_call_builder() {
        let call = ProcedureCall::new("KRPC", "GetStatus");
        assert_eq!(call.service, "KRPC");
        assert!(call.arguments.is_empty());

        let call = ProcedureCall::new("Test", "Echo").arg(vec![1]).arg(vec![2]);
        assert_eq!(call.arguments[0].position, 0);
        assert_eq!(call.arguments[1].position, 1);

        let sparse = ProcedureCall::new("Test", "Echo").arg_at(3, vec![9]);
        assert_eq!(sparse.arguments[0].position, 3);
    }

    #[test]
    fn test_request_round_trip() {
        let req = Request {
            calls: vec![ProcedureCall::new("KRPC", "GetStatus").arg(vec![0xff, 0x01])],
        };
        let bytes = req.encode_to_vec();
        let back = Request::decode(bytes.as_slice()).expect("decode");
        assert_eq!(req, back);
    }

    #[test]
    fn test_status_enum_from_wire() {
        assert_eq!(ConnectionStatus::try_from(0).unwrap(), ConnectionStatus::Ok);
        assert_eq!(ConnectionStatus::try_from(3).unwrap(), ConnectionStatus::WrongType);
        assert!(ConnectionStatus::try_from(99).is_err());
        assert_eq!(ConnectionStatus::WrongType.to_string(), "WRONG_TYPE");
    }
}
