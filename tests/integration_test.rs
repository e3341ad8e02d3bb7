use blinkdb::resp::{RespCodec, RespValue};
use blinkdb::{BlinkError, Client, Config, Server};
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: JoinHandle<blinkdb::BlinkResult<()>>,
}

async fn start_server(config: Config) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(config));
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });
    TestServer { server, addr, handle }
}

fn with_password(password: &str) -> Config {
    Config {
        requirepass: Some(password.to_string()),
        ..Default::default()
    }
}

/// A raw connection for sending hand-written frames.
async fn raw_conn(addr: SocketAddr) -> Framed<TcpStream, RespCodec> {
    Framed::new(TcpStream::connect(addr).await.unwrap(), RespCodec)
}

async fn send_raw(conn: &mut Framed<TcpStream, RespCodec>, data: &[u8]) {
    conn.get_mut().write_all(data).await.unwrap();
}

async fn next_reply(conn: &mut Framed<TcpStream, RespCodec>) -> Option<RespValue> {
    timeout(WAIT, conn.next())
        .await
        .expect("timed out waiting for reply")
        .map(|r| r.unwrap())
}

#[tokio::test]
async fn test_set_get() {
    let t = start_server(Config::default()).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    client.set("foo", "bar").await.unwrap();
    let val = client.get("foo").await.unwrap();
    assert_eq!(val, Some(Bytes::from("bar")));
}

#[tokio::test]
async fn test_get_missing_key_is_nil() {
    let t = start_server(Config::default()).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    assert_eq!(client.get("never-set").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete() {
    let t = start_server(Config::default()).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    client.set("key1", "val1").await.unwrap();
    client.delete("key1").await.unwrap();
    assert_eq!(client.get("key1").await.unwrap(), None);

    // Deleting again, or deleting a key that never existed, is a no-op.
    client.delete("key1").await.unwrap();
    client.delete("ghost").await.unwrap();
    assert_eq!(client.get("key1").await.unwrap(), None);
}

#[tokio::test]
async fn test_overwrite_and_binary_values() {
    let t = start_server(Config::default()).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    let value = Bytes::from_static(b"\x00\r\n\xffbinary");
    client.set("k", "first").await.unwrap();
    client.set("k", value.clone()).await.unwrap();
    client.set("k", value.clone()).await.unwrap();
    assert_eq!(client.get("k").await.unwrap(), Some(value));
}

#[tokio::test]
async fn test_writes_are_visible_to_other_connections() {
    let t = start_server(Config::default()).await;
    let mut writer = Client::connect(t.addr).await.unwrap();
    let mut reader = Client::connect(t.addr).await.unwrap();

    writer.set("shared", "value").await.unwrap();
    // A reply on the writer's connection proves the SET was applied.
    assert!(writer.get("shared").await.unwrap().is_some());
    assert_eq!(reader.get("shared").await.unwrap(), Some(Bytes::from("value")));
}

#[tokio::test]
async fn test_wrong_password_then_set_is_rejected() {
    let t = start_server(with_password("admin123")).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    let err = client.auth(None, "wrongpass").await.unwrap_err();
    assert!(matches!(err, BlinkError::Server(ref msg) if msg == "ERR invalid username-password pair"));

    client.set("foo", "bar").await.unwrap();
    let reply = client.poll_reply(WAIT).await.unwrap();
    assert_eq!(reply, Some(RespValue::error("NOAUTH Authentication required.")));
    assert_eq!(t.server.store().get(b"foo").await, None);
}

#[tokio::test]
async fn test_auth_unlocks_commands() {
    let t = start_server(with_password("admin123")).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    let err = client.get("foo").await.unwrap_err();
    assert!(matches!(err, BlinkError::Server(ref msg) if msg.starts_with("NOAUTH")));

    client.auth(None, "admin123").await.unwrap();
    client.set("foo", "bar").await.unwrap();
    assert_eq!(client.get("foo").await.unwrap(), Some(Bytes::from("bar")));
}

#[tokio::test]
async fn test_authentication_is_per_connection() {
    let t = start_server(with_password("admin123")).await;
    let mut alice = Client::connect(t.addr).await.unwrap();
    let mut bob = Client::connect(t.addr).await.unwrap();

    alice.auth(None, "admin123").await.unwrap();
    assert_eq!(alice.get("k").await.unwrap(), None);

    let err = bob.get("k").await.unwrap_err();
    assert!(matches!(err, BlinkError::Server(ref msg) if msg.starts_with("NOAUTH")));
}

#[tokio::test]
async fn test_username_must_match_when_given() {
    let config = Config {
        username: Some("admin".into()),
        requirepass: Some("admin123".into()),
        ..Default::default()
    };
    let t = start_server(config).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    assert!(client.auth(Some("root"), "admin123").await.is_err());
    assert!(client.get("k").await.is_err());

    client.auth(Some("admin"), "admin123").await.unwrap();
    assert_eq!(client.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_password_only_auth_without_username() {
    let t = start_server(with_password("admin123")).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    client.auth(None, "admin123").await.unwrap();
    assert_eq!(client.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_username_without_password_still_gates() {
    let t = start_server(Config {
        username: Some("admin".into()),
        ..Default::default()
    })
    .await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("NOAUTH Authentication required."))
    );

    let mut client = Client::connect(t.addr).await.unwrap();
    client.auth(Some("admin"), "").await.unwrap();
    assert_eq!(client.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_no_password_means_no_gating() {
    let t = start_server(Config::default()).await;
    let mut client = Client::connect(t.addr).await.unwrap();

    client.set("open", "door").await.unwrap();
    assert_eq!(client.get("open").await.unwrap(), Some(Bytes::from("door")));
}

#[tokio::test]
async fn test_wrong_arity_set_closes_connection() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*4\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR wrong number of arguments for 'set' command"))
    );
    assert_eq!(next_reply(&mut conn).await, None);

    assert!(t.server.store().is_empty().await);
}

#[tokio::test]
async fn test_commands_before_fatal_error_are_applied() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*1\r\n$3\r\nGET\r\n",
    )
    .await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR wrong number of arguments for 'get' command"))
    );
    assert_eq!(next_reply(&mut conn).await, None);

    assert_eq!(t.server.store().get(b"k").await, Some(Bytes::from("v")));
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*1\r\n$abc\r\n").await;
    match next_reply(&mut conn).await {
        Some(RespValue::Error(msg)) => assert!(msg.starts_with("ERR Protocol error")),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(next_reply(&mut conn).await, None);

    // Other clients are unaffected.
    let mut client = Client::connect(t.addr).await.unwrap();
    client.set("still", "up").await.unwrap();
    assert_eq!(client.get("still").await.unwrap(), Some(Bytes::from("up")));
}

async fn assert_still_serving(addr: SocketAddr) {
    let mut client = Client::connect(addr).await.unwrap();
    timeout(WAIT, async {
        client.set("still", "up").await.unwrap();
        assert_eq!(client.get("still").await.unwrap(), Some(Bytes::from("up")));
    })
    .await
    .expect("server stopped serving other clients");
}

#[tokio::test]
async fn test_oversized_array_header_closes_connection() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*2000000\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR Protocol error: invalid multibulk length"))
    );
    assert_eq!(next_reply(&mut conn).await, None);

    assert_still_serving(t.addr).await;
}

#[tokio::test]
async fn test_nested_array_closes_connection() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*1\r\n*1\r\n$3\r\nGET\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR Protocol error: nested arrays are not supported"))
    );
    assert_eq!(next_reply(&mut conn).await, None);

    assert_still_serving(t.addr).await;
}

#[tokio::test]
async fn test_deeply_nested_headers_do_not_crash_server() {
    let t = start_server(Config::default()).await;
    let mut stream = TcpStream::connect(t.addr).await.unwrap();

    // The server may reset the connection before reading all of it.
    let _ = stream.write_all(&b"*1\r\n".repeat(100_000)).await;

    assert_still_serving(t.addr).await;
}

#[tokio::test]
async fn test_client_that_stops_reading_is_dropped() {
    let t = start_server(Config {
        write_timeout_ms: 200,
        ..Default::default()
    })
    .await;
    t.server
        .store()
        .set(Bytes::from("big"), Bytes::from(vec![b'x'; 1024 * 1024]))
        .await;

    // Pipeline far more reply data than the socket buffers hold, then never read.
    let mut stalled = TcpStream::connect(t.addr).await.unwrap();
    let get_big = b"*2\r\n$3\r\nGET\r\n$3\r\nbig\r\n".repeat(64);
    stalled.write_all(&get_big).await.unwrap();

    let mut client = Client::connect(t.addr).await.unwrap();
    timeout(Duration::from_secs(5), async {
        client.set("other", "ok").await.unwrap();
        assert_eq!(client.get("other").await.unwrap(), Some(Bytes::from("ok")));
    })
    .await
    .expect("a stalled reader blocked other clients");

    t.server.shutdown();
    timeout(WAIT, t.handle).await.unwrap().unwrap().unwrap();
    drop(stalled);
}

#[tokio::test]
async fn test_bad_auth_arity_keeps_connection_open() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*4\r\n$4\r\nAUTH\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR wrong number of arguments for 'auth' command"))
    );

    send_raw(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n").await;
    assert_eq!(next_reply(&mut conn).await, Some(RespValue::null_bulk_string()));
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    // Both frames in one write: the replies come back in request order.
    send_raw(&mut conn, b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nx\r\n").await;
    assert_eq!(
        next_reply(&mut conn).await,
        Some(RespValue::error("ERR unknown command 'PING', with args beginning with: "))
    );
    assert_eq!(next_reply(&mut conn).await, Some(RespValue::null_bulk_string()));
}

#[tokio::test]
async fn test_empty_array_is_ignored() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*0\r\n*2\r\n$3\r\nget\r\n$1\r\nx\r\n").await;
    assert_eq!(next_reply(&mut conn).await, Some(RespValue::null_bulk_string()));
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;

    send_raw(&mut conn, b"*3\r\n$3\r\nSET\r\n$3\r\nfo").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    send_raw(&mut conn, b"o\r\n$3\r\nbar\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
    assert_eq!(next_reply(&mut conn).await, Some(RespValue::bulk_string("bar")));
}

#[tokio::test]
async fn test_concurrent_clients_on_disjoint_keys() {
    let t = start_server(Config::default()).await;

    let mut handles = Vec::new();
    for c in 0..8 {
        let addr = t.addr;
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await.unwrap();
            for i in 0..50 {
                let key = format!("client{c}:key{i}");
                let value = format!("client{c}:value{i}");
                client.set(key.clone(), value.clone()).await.unwrap();
                assert_eq!(client.get(key.clone()).await.unwrap(), Some(Bytes::from(value)));
                if i % 2 == 0 {
                    client.delete(key.clone()).await.unwrap();
                    assert_eq!(client.get(key).await.unwrap(), None);
                }
            }
        }));
    }
    for handle in handles {
        timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    }

    let store = t.server.store();
    assert_eq!(store.len().await, 8 * 25);
    for c in 0..8 {
        let value = store.get(format!("client{c}:key1").as_bytes()).await;
        assert_eq!(value, Some(Bytes::from(format!("client{c}:value1"))));
    }
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let t = start_server(Config::default()).await;
    let mut conn = raw_conn(t.addr).await;
    let mut client = Client::connect(t.addr).await.unwrap();
    // Round trip so both connections are registered before shutting down.
    assert_eq!(client.get("k").await.unwrap(), None);

    t.server.shutdown();
    timeout(WAIT, t.handle).await.unwrap().unwrap().unwrap();

    assert_eq!(next_reply(&mut conn).await, None);
    assert!(TcpStream::connect(t.addr).await.is_err());
}

#[tokio::test]
async fn test_start_fails_when_address_in_use() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Server::new(Config {
        bind: "127.0.0.1".into(),
        port,
        ..Default::default()
    });

    let result = timeout(WAIT, server.start()).await.unwrap();
    assert!(matches!(result, Err(BlinkError::Io(_))));
}
