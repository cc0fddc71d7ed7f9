//! Shared harness for the integration tests: a runtime fixture and a
//! scripted in-process kRPC server speaking the real wire protocol.

#![allow(dead_code)]

pub use captains_log::logfn;
use captains_log::*;
use rstest::*;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prost::Message;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use krpc_client::codec::marshal;
use krpc_client::net::FramedStream;
use krpc_client::proto;
use krpc_client::ClientConfig;

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

pub struct TestRunner {
    rt: Runtime,
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/krpc_client_test.log", Level::Trace)
            .test()
            .build()
            .expect("log");
        Self {
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    pub fn block_on<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        self.rt.block_on(f);
    }
}

/// Identifier the scripted server hands out in the RPC handshake and
/// expects back on the streams handshake.
pub const CLIENT_ID: [u8; 16] = *b"test-client-id-0";

/// Sentinel procedure: the server answers the whole request with a
/// request-level error instead of per-call results.
pub const FAIL_REQUEST: &str = "__fail_request";

pub type RpcHandler = Arc<dyn Fn(&proto::ProcedureCall) -> proto::ProcedureResult + Send + Sync>;

enum ServerEvent {
    Push(proto::StreamUpdate),
    CloseStream,
}

/// An in-process kRPC server scripted by the test: RPC calls go through
/// the handler, stream updates are pushed explicitly.
pub struct ScriptedServer {
    pub rpc_port: u16,
    pub stream_port: u16,
    requests_seen: Arc<AtomicUsize>,
    update_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ScriptedServer {
    pub async fn spawn(handler: RpcHandler) -> Self {
        let rpc_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind rpc");
        let stream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stream");
        let rpc_port = rpc_listener.local_addr().expect("addr").port();
        let stream_port = stream_listener.local_addr().expect("addr").port();
        let requests_seen = Arc::new(AtomicUsize::new(0));
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let counter = requests_seen.clone();
        tokio::spawn(async move {
            rpc_conn(rpc_listener, handler, counter).await;
        });
        tokio::spawn(async move {
            stream_conn(stream_listener, update_rx).await;
        });

        Self { rpc_port, stream_port, requests_seen, update_tx }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.host = "127.0.0.1".to_string();
        config.rpc_port = self.rpc_port;
        config.stream_port = self.stream_port;
        config.client_name = "test".to_string();
        config
    }

    /// Count of complete, well-formed `Request` frames the server parsed.
    pub fn requests_seen(&self) -> usize {
        self.requests_seen.load(Ordering::SeqCst)
    }

    pub fn push(&self, update: proto::StreamUpdate) {
        let _ = self.update_tx.send(ServerEvent::Push(update));
    }

    /// Push one double-valued update for a stream id.
    pub fn push_double(&self, id: u64, value: f64) {
        self.push(proto::StreamUpdate {
            results: vec![proto::StreamResult {
                id,
                result: Some(ok_result(marshal(value).expect("marshal"))),
            }],
        });
    }

    /// Drop the streams connection from the server side.
    pub fn close_stream_conn(&self) {
        let _ = self.update_tx.send(ServerEvent::CloseStream);
    }
}

async fn rpc_conn(listener: TcpListener, handler: RpcHandler, counter: Arc<AtomicUsize>) {
    let (socket, _) = match listener.accept().await {
        Ok(a) => a,
        Err(_) => return,
    };
    let mut conn = FramedStream::new(socket);

    let request: proto::ConnectionRequest = conn.recv_msg().await.expect("rpc handshake");
    assert_eq!(request.r#type, proto::ConnectionType::Rpc as i32);
    assert!(!request.client_name.is_empty());
    conn.send_msg(&proto::ConnectionResponse {
        status: proto::ConnectionStatus::Ok as i32,
        message: String::new(),
        client_identifier: CLIENT_ID.to_vec(),
    })
    .await
    .expect("handshake response");

    loop {
        let request: proto::Request = match conn.recv_msg().await {
            Ok(r) => r,
            Err(_) => return, // client closed
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let response = if request.calls.iter().any(|c| c.procedure == FAIL_REQUEST) {
            proto::Response {
                error: Some(proto::Error {
                    service: "KRPC".to_string(),
                    name: "InvalidRequest".to_string(),
                    description: "rejected by test script".to_string(),
                    stack_trace: String::new(),
                }),
                results: Vec::new(),
            }
        } else {
            proto::Response {
                error: None,
                results: request.calls.iter().map(|c| handler(c)).collect(),
            }
        };
        conn.send_msg(&response).await.expect("send response");
    }
}

async fn stream_conn(listener: TcpListener, mut rx: mpsc::UnboundedReceiver<ServerEvent>) {
    let (socket, _) = match listener.accept().await {
        Ok(a) => a,
        Err(_) => return,
    };
    let mut conn = FramedStream::new(socket);

    let request: proto::ConnectionRequest = conn.recv_msg().await.expect("stream handshake");
    assert_eq!(request.r#type, proto::ConnectionType::Stream as i32);
    assert_eq!(request.client_identifier, CLIENT_ID.to_vec());
    conn.send_msg(&proto::ConnectionResponse {
        status: proto::ConnectionStatus::Ok as i32,
        message: String::new(),
        client_identifier: Vec::new(),
    })
    .await
    .expect("handshake response");

    while let Some(event) = rx.recv().await {
        match event {
            ServerEvent::Push(update) => {
                if conn.send_msg(&update).await.is_err() {
                    return;
                }
            }
            ServerEvent::CloseStream => {
                let _ = conn.close().await;
                return;
            }
        }
    }
}

pub fn ok_result(value: Vec<u8>) -> proto::ProcedureResult {
    proto::ProcedureResult { error: None, value }
}

pub fn err_result(name: &str, description: &str) -> proto::ProcedureResult {
    proto::ProcedureResult {
        error: Some(proto::Error {
            service: "Test".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            stack_trace: String::new(),
        }),
        value: Vec::new(),
    }
}

/// Handler answering `KRPC.GetStatus` with a fixed version, `Test.Echo`
/// with its first argument, and everything else with a procedure-not-found
/// error.
pub fn basic_handler(version: &str) -> RpcHandler {
    let version = version.to_string();
    Arc::new(move |call: &proto::ProcedureCall| {
        match (call.service.as_str(), call.procedure.as_str()) {
            ("KRPC", "GetStatus") => {
                let status =
                    proto::Status { version: version.clone(), ..Default::default() };
                ok_result(status.encode_to_vec())
            }
            ("Test", "Echo") => match call.arguments.first() {
                Some(arg) => ok_result(arg.value.clone()),
                None => err_result("ArgumentError", "Echo needs one argument"),
            },
            (service, procedure) => err_result(
                "ProcedureNotFound",
                &format!("{}.{} does not exist", service, procedure),
            ),
        }
    })
}
