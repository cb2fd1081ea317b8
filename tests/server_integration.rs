//! TCP server integration tests — framed JSON-RPC over a real socket.

use futures::{SinkExt, StreamExt};
use rpc_core::parts::attach_builtin;
use rpc_core::rpc::codec::{Frame, FrameCodec};
use rpc_core::rpc::{Endpoint, MethodEntry, RequestContext, RpcServer};
use rpc_core::types::ServerConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Helper: spin up an RpcServer on a random port.
async fn start_test_server(max_connections: usize) -> (std::net::SocketAddr, Arc<RpcServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig {
        listen_addr: addr.to_string(),
        max_connections,
    };
    let server = Arc::new(RpcServer::new(config, || {
        let endpoint = Endpoint::default();
        attach_builtin(&endpoint);
        endpoint.register(MethodEntry::new(
            "echo",
            |ctx: RequestContext, params: Value| async move {
                Ok(json!({"method": ctx.method(), "params": params}))
            },
        ));
        endpoint
    }));

    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = server.serve_listener(listener).await;
        });
    }

    (addr, server)
}

async fn round_trip(conn: &mut Framed<TcpStream, FrameCodec>, request: Value) -> Value {
    conn.send(bytes::Bytes::from(serde_json::to_vec(&request).unwrap()))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Frame::Message { body, .. } => serde_json::from_slice(&body).unwrap(),
        Frame::Oversized { length } => panic!("unexpected oversized frame of {}", length),
        Frame::Unframed { skipped } => panic!("unexpected unframed bytes: {}", skipped),
    }
}

#[tokio::test]
async fn test_echo_over_tcp() {
    let (addr, server) = start_test_server(4).await;
    let mut conn = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());

    let reply = round_trip(
        &mut conn,
        json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"x": 1}}),
    )
    .await;
    assert_eq!(
        reply,
        json!({"jsonrpc": "2.0", "id": 1, "result": {"method": "echo", "params": {"x": 1}}})
    );

    server.shutdown();
}

#[tokio::test]
async fn test_connections_are_isolated() {
    let (addr, server) = start_test_server(4).await;
    let mut a = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());
    let mut b = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());

    let ra = round_trip(&mut a, json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": ["a"]})).await;
    let rb = round_trip(&mut b, json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": ["b"]})).await;
    assert_eq!(ra["result"]["params"], json!(["a"]));
    assert_eq!(rb["result"]["params"], json!(["b"]));

    server.shutdown();
}

#[tokio::test]
async fn test_max_connections_refuses_extra() {
    let (addr, server) = start_test_server(1).await;
    let mut first = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());
    // make sure the first connection holds its permit
    round_trip(&mut first, json!({"jsonrpc": "2.0", "id": 1, "method": "echo"})).await;

    let mut second = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());
    let closed = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .unwrap();
    assert!(matches!(closed, None | Some(Err(_))));

    server.shutdown();
}

#[tokio::test]
async fn test_exit_closes_connection() {
    let (addr, server) = start_test_server(4).await;
    let mut conn = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());

    let reply = round_trip(&mut conn, json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"})).await;
    assert_eq!(reply["result"], Value::Null);

    conn.send(bytes::Bytes::from_static(br#"{"jsonrpc":"2.0","method":"exit"}"#))
        .await
        .unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .unwrap();
    assert!(matches!(closed, None | Some(Err(_))));

    server.shutdown();
}
