#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # krpc-client
//!
//! Client library for kRPC, the remote procedure call protocol that
//! exposes a running simulator's scriptable API over TCP. The client
//! speaks two connections to the server: an RPC connection for batched
//! procedure calls, and a streams connection on which the server pushes
//! the re-evaluated result of subscribed procedures every simulation
//! tick.
//!
//! ## Feature
//!
//! - Batched procedure calls with strict request/response ordering on a
//!   single connection (no pipelining, no crossed responses)
//! - A typed value codec over kRPC's protobuf value union: scalars,
//!   strings, blobs, object handles, enumerations, and nestable
//!   lists/sets/dictionaries/tuples
//! - Server-pushed streams with coalesce-latest delivery: a slow
//!   consumer observes the newest value, never a backlog, and never
//!   stalls the reader
//! - A binding model over the server's self-describing schema for
//!   generating per-service wrappers
//!
//! ## Components
//!
//! - [config]: connection configuration with `KRPC_*` environment
//!   fall-backs
//! - [net]: varint length-prefix framing over buffered TCP
//! - [codec]: the value union, type hints, and the typed [codec::KrpcValue] seam
//! - [client]: the [KrpcClient] handle, handshake and call batching
//! - [stream]: the streams connection, registry and [Stream] handles
//! - [service]: runtime support for generated bindings
//! - [codegen]: schema to binding-model mapping rules
//!
//! ## Usage
//!
//! ```no_run
//! use krpc_client::{ClientConfig, KrpcClient};
//! use krpc_client::proto::ProcedureCall;
//!
//! async fn fly() -> Result<(), krpc_client::Error> {
//!     let mut config = ClientConfig::default();
//!     config.client_name = "mission-control".to_string();
//!     let client = KrpcClient::connect(config).await?;
//!
//!     let status = client.get_status().await?;
//!     println!("server {}", status.version);
//!
//!     // a typed call
//!     let ut: f64 = client.invoke(ProcedureCall::new("SpaceCenter", "get_UT")).await?;
//!     println!("universal time {ut}");
//!
//!     // the same procedure as a stream, sampled at 10 Hz
//!     let mut ut_stream =
//!         client.add_stream::<f64>(ProcedureCall::new("SpaceCenter", "get_UT"), true).await?;
//!     ut_stream.set_rate(10.0).await?;
//!     for _ in 0..5 {
//!         println!("tick {}", ut_stream.recv().await?);
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate captains_log;

pub mod client;
pub mod codec;
pub mod codegen;
pub mod config;
pub mod error;
pub mod net;
pub mod proto;
pub mod service;
pub mod stream;

pub use client::KrpcClient;
pub use codec::{KrpcValue, TypeHint, Value};
pub use config::{ClientConfig, TimeoutSetting};
pub use error::{CodecError, ConnectError, Error, ProtocolError, RpcError};
pub use stream::Stream;
