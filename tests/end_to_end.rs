//! Full-pipeline tests: real TCP connections through `Connection::run`,
//! exercising the literal wire scenarios in spec.md §8 rather than unit
//! tests of individual modules (those live alongside their code).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rdis::rdis::commands::Registry;
use rdis::rdis::connection::Connection;
use rdis::rdis::engine::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Engine::new();
    let registry = Arc::new(Registry::new());
    tokio::spawn(async move {
        let mut next_id = 0u64;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            let engine = engine.clone();
            let registry = registry.clone();
            let client_id = next_id;
            next_id += 1;
            tokio::spawn(async move {
                Connection::new(stream, peer, client_id).run(registry, engine).await;
            });
        }
    });
    addr
}

async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("reply timed out")
        .expect("read error");
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn ping_round_trip() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"+PONG\r\n".to_vec());
}

#[tokio::test]
async fn set_then_get() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"+OK\r\n".to_vec());
    client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\nbar\r\n".to_vec());
}

#[tokio::test]
async fn get_on_absent_key_is_null_bulk() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"$-1\r\n".to_vec());
}

#[tokio::test]
async fn lpush_then_lrange() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*4\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b":2\r\n".to_vec());
    client
        .write_all(b"*4\r\n$6\r\nLRANGE\r\n$1\r\nk\r\n$1\r\n0\r\n$2\r\n-1\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"*2\r\n$1\r\nb\r\n$1\r\na\r\n".to_vec());
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();
    let mut collected = Vec::new();
    while collected.len() < 21 {
        collected.extend(read_reply(&mut client).await);
    }
    assert_eq!(collected, b"+PONG\r\n+PONG\r\n+PONG\r\n".to_vec());
}

#[tokio::test]
async fn unknown_command_replies_but_keeps_connection_open() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*1\r\n$6\r\nBOGUS!\r\n")
        .await
        .unwrap();
    assert_eq!(
        read_reply(&mut client).await,
        b"-ERR unknown command 'BOGUS!'\r\n".to_vec()
    );
    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"+PONG\r\n".to_vec());
}

#[tokio::test]
async fn blpop_races_push_across_connections() {
    let addr = start_server().await;
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    let blocker = tokio::spawn(async move {
        a.write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$1\r\n5\r\n").await.unwrap();
        read_reply(&mut a).await
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    b.write_all(b"*3\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$5\r\nhello\r\n").await.unwrap();
    assert_eq!(read_reply(&mut b).await, b":1\r\n".to_vec());

    let reply = blocker.await.unwrap();
    assert_eq!(reply, b"*2\r\n$1\r\nk\r\n$5\r\nhello\r\n".to_vec());

    b.write_all(b"*2\r\n$4\r\nTYPE\r\n$1\r\nk\r\n").await.unwrap();
    assert_eq!(read_reply(&mut b).await, b"+none\r\n".to_vec());
}

#[tokio::test]
async fn blpop_times_out_on_empty_keyspace() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$3\r\n0.1\r\n")
        .await
        .unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(reply, b"$-1\r\n".to_vec());
}

#[tokio::test]
async fn xadd_then_xrange() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\nf\r\n$2\r\nv1\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\n1-1\r\n".to_vec());

    client
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nf\r\n$2\r\nv2\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\n1-2\r\n".to_vec());

    client
        .write_all(b"*4\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n1\r\n$1\r\n1\r\n")
        .await
        .unwrap();
    let expected =
        b"*2\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$2\r\nv1\r\n*2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nf\r\n$2\r\nv2\r\n".to_vec();
    assert_eq!(read_reply(&mut client).await, expected);
}

#[tokio::test]
async fn bulk_string_body_split_across_two_writes_still_decodes() {
    // The declared length and its CRLF arrive in one write; the payload
    // bytes and closing CRLF trickle in afterward, on their own write —
    // the streaming-parser fix this guards against a malformed-frame
    // false positive on a genuine split TCP read (spec.md §4.1, §9).
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nba").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b"r\r\n").await.unwrap();

    assert_eq!(read_reply(&mut client).await, b"+OK\r\n".to_vec());
    client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\nbar\r\n".to_vec());
}

#[tokio::test]
async fn length_prefix_split_across_two_writes_still_decodes() {
    // The `$` tag and first length digit arrive, then the rest of the
    // length, its CRLF, and the payload follow in a second write.
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"*1\r\n$").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b"4\r\nPING\r\n").await.unwrap();

    assert_eq!(read_reply(&mut client).await, b"+PONG\r\n".to_vec());
}

#[tokio::test]
async fn xadd_smaller_id_is_rejected() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-0\r\n$1\r\nf\r\n$1\r\nv\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\n5-0\r\n".to_vec());

    client
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-0\r\n$1\r\nf\r\n$1\r\nv\r\n")
        .await
        .unwrap();
    assert_eq!(
        read_reply(&mut client).await,
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n".to_vec()
    );
}
