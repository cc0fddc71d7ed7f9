//! RPC connection scenarios against the scripted server: handshake,
//! batching, call serialization, and error surfacing.

mod common;

use common::*;

use std::sync::Arc;

use rstest::*;

use krpc_client::codec::marshal;
use krpc_client::error::{ConnectError, Error};
use krpc_client::proto::ProcedureCall;
use krpc_client::KrpcClient;

#[logfn]
#[rstest]
fn test_connect_get_status_close(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("0.5.4-test")).await;
        let client = KrpcClient::connect(server.config()).await.expect("connect");
        assert_eq!(client.client_identifier(), &CLIENT_ID);

        let status = client.get_status().await.expect("get_status");
        assert!(!status.version.is_empty());
        assert_eq!(status.version, "0.5.4-test");

        client.close().await.expect("close");
        assert!(client.is_closed());
        // a closed connection may not be reused
        match client.get_status().await {
            Err(Error::Connect(ConnectError::Closed)) => {}
            other => panic!("expected Closed, got {:?}", other.map(|s| s.version)),
        }
        // closing again is a no-op
        client.close().await.expect("second close");
    });
}

#[logfn]
#[rstest]
fn test_rpc_only_skips_stream_connection(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("1.0")).await;
        let mut config = server.config();
        config.rpc_only = true;
        let client = KrpcClient::connect(config).await.expect("connect");
        let status = client.get_status().await.expect("get_status");
        assert_eq!(status.version, "1.0");
        // stream operations are refused, not hung
        match client.add_stream::<f64>(ProcedureCall::new("Test", "X"), true).await {
            Err(Error::Connect(ConnectError::StreamDisabled)) => {}
            other => panic!("expected StreamDisabled, got {:?}", other.map(|s| s.id())),
        }
        client.close().await.expect("close");
    });
}

#[logfn]
#[rstest]
fn test_typed_round_trip_through_call(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("1.0")).await;
        let client = KrpcClient::connect(server.config()).await.expect("connect");

        let input: Vec<(String, u64)> =
            vec![("a".to_string(), 7), ("kerbal".to_string(), 18446744073709551615)];
        let call =
            ProcedureCall::new("Test", "Echo").arg(marshal(input.clone()).expect("marshal"));
        let output: Vec<(String, u64)> = client.invoke(call).await.expect("invoke");
        assert_eq!(output, input);

        client.close().await.expect("close");
    });
}

#[logfn]
#[rstest]
fn test_batch_ordering(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("1.0")).await;
        let client = KrpcClient::connect(server.config()).await.expect("connect");

        let payloads: Vec<Vec<u8>> =
            (1u32..=3).map(|i| marshal(i).expect("marshal")).collect();
        let call = |i: usize| ProcedureCall::new("Test", "Echo").arg(payloads[i].clone());

        let results =
            client.call_batch(vec![call(0), call(1), call(2)]).await.expect("batch");
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert!(result.error.is_none());
            assert_eq!(result.value, payloads[i]);
        }

        // a permuted batch returns the permuted results
        let permuted =
            client.call_batch(vec![call(2), call(0), call(1)]).await.expect("batch");
        assert_eq!(permuted[0].value, payloads[2]);
        assert_eq!(permuted[1].value, payloads[0]);
        assert_eq!(permuted[2].value, payloads[1]);

        client.close().await.expect("close");
    });
}

#[logfn]
#[rstest]
fn test_concurrent_calls_are_serialized(runner: TestRunner) {
    runner.block_on(async {
        let server = Arc::new(ScriptedServer::spawn(basic_handler("1.0")).await);
        let client = KrpcClient::connect(server.config()).await.expect("connect");

        const TASKS: usize = 2;
        const CALLS: usize = 100;
        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..CALLS {
                    let status = client.get_status().await.expect("get_status");
                    assert_eq!(status.version, "1.0");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        // every batch reached the server as one complete, parseable
        // Request frame; interleaved writes could not have parsed
        assert_eq!(server.requests_seen(), TASKS * CALLS);
        client.close().await.expect("close");
    });
}

#[logfn]
#[rstest]
fn test_per_call_error_leaves_connection_usable(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("1.0")).await;
        let client = KrpcClient::connect(server.config()).await.expect("connect");

        match client.call(ProcedureCall::new("Nope", "Missing")).await {
            Err(Error::Rpc(e)) => {
                assert!(!e.name.is_empty());
                assert_eq!(e.name, "ProcedureNotFound");
            }
            other => panic!("expected RpcError, got {:?}", other.map(|r| r.value)),
        }

        // batch form: per-call errors stay in the results
        let results = client
            .call_batch(vec![ProcedureCall::new("Nope", "Missing")])
            .await
            .expect("batch itself succeeds");
        assert!(results[0].error.is_some());

        // the connection survives the failed call
        let status = client.get_status().await.expect("get_status after error");
        assert_eq!(status.version, "1.0");
        client.close().await.expect("close");
    });
}

#[logfn]
#[rstest]
fn test_request_level_error_fails_batch(runner: TestRunner) {
    runner.block_on(async {
        let server = ScriptedServer::spawn(basic_handler("1.0")).await;
        let client = KrpcClient::connect(server.config()).await.expect("connect");

        let batch = vec![
            ProcedureCall::new("KRPC", "GetStatus"),
            ProcedureCall::new("Test", FAIL_REQUEST),
        ];
        match client.call_batch(batch).await {
            Err(Error::Rpc(e)) => assert_eq!(e.name, "InvalidRequest"),
            other => panic!("expected request-level RpcError, got {:?}", other.map(|r| r.len())),
        }

        // request-level failure does not poison the connection either
        let status = client.get_status().await.expect("get_status");
        assert_eq!(status.version, "1.0");
        client.close().await.expect("close");
    });
}
