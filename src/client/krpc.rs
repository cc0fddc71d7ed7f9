//! Procedures of the built-in `KRPC` service.
//!
//! These calls work before any generated binding exists: status and
//! schema bootstrap, plus the stream-control procedures the stream
//! handles are thin wrappers over.

use std::sync::Arc;

use prost::Message;

use crate::codec::{marshal, KrpcValue};
use crate::error::{ConnectError, Error, ProtocolError};
use crate::proto;
use crate::stream::{Stream, StreamClient};

use super::KrpcClient;

const KRPC_SERVICE: &str = "KRPC";

impl KrpcClient {
    /// Server liveness and version counters.
    pub async fn get_status(&self) -> Result<proto::Status, Error> {
        let result = self.call(proto::ProcedureCall::new(KRPC_SERVICE, "GetStatus")).await?;
        proto::Status::decode(result.value.as_slice())
            .map_err(|e| ProtocolError::Malformed(e).into())
    }

    /// The full self-describing schema: every service, procedure, class,
    /// enumeration and exception the server exposes.
    pub async fn get_services(&self) -> Result<proto::Services, Error> {
        let result = self.call(proto::ProcedureCall::new(KRPC_SERVICE, "GetServices")).await?;
        proto::Services::decode(result.value.as_slice())
            .map_err(|e| ProtocolError::Malformed(e).into())
    }

    /// Register a server-side stream re-evaluating `call` every tick.
    ///
    /// With `start == false` the stream can be configured (rate) before
    /// activation via [Stream::start]; updates arriving before activation
    /// are not delivered.
    pub async fn add_stream<T: KrpcValue>(
        &self, call: proto::ProcedureCall, start: bool,
    ) -> Result<Stream<T>, Error> {
        let stream_client = self.stream_client()?;
        let result = self
            .call(
                proto::ProcedureCall::new(KRPC_SERVICE, "AddStream")
                    .arg(call.encode_to_vec())
                    .arg(marshal(start)?),
            )
            .await?;
        let record = proto::Stream::decode(result.value.as_slice())
            .map_err(ProtocolError::Malformed)?;
        let rx = stream_client.register(record.id, T::type_hint(), start)?;
        Ok(Stream::typed(record.id, Arc::downgrade(&self.inner), rx))
    }

    /// Activate a stream created with `start == false`.
    pub async fn start_stream(&self, id: u64) -> Result<(), Error> {
        let stream_client = self.stream_client()?;
        self.call(proto::ProcedureCall::new(KRPC_SERVICE, "StartStream").arg(marshal(id)?))
            .await?;
        stream_client.set_started(id, true);
        Ok(())
    }

    /// Set a stream's update rate in updates per second; 0 means every
    /// simulation tick.
    pub async fn set_stream_rate(&self, id: u64, rate: f32) -> Result<(), Error> {
        let stream_client = self.stream_client()?;
        self.call(
            proto::ProcedureCall::new(KRPC_SERVICE, "SetStreamRate")
                .arg(marshal(id)?)
                .arg(marshal(rate)?),
        )
        .await?;
        stream_client.set_rate(id, rate);
        Ok(())
    }

    /// Remove a stream on the server and drop its registry entry; later
    /// server updates carrying this id are discarded, and every
    /// subscriber slot closes.
    pub async fn remove_stream(&self, id: u64) -> Result<(), Error> {
        let stream_client = self.stream_client()?;
        self.call(proto::ProcedureCall::new(KRPC_SERVICE, "RemoveStream").arg(marshal(id)?))
            .await?;
        stream_client.deregister(id);
        Ok(())
    }

    fn stream_client(&self) -> Result<&StreamClient, Error> {
        match self.inner.stream.as_ref() {
            Some(sc) => Ok(sc),
            None => Err(ConnectError::StreamDisabled.into()),
        }
    }
}
