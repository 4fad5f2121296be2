use std::net::SocketAddr;
use std::time::Duration;

use axum_speedtest::{router, RandomBody};
use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router("/speedtest")).await.unwrap();
    });
    addr
}

async fn expected_bytes(len: u64) -> Vec<u8> {
    let mut out = Vec::new();
    RandomBody::new(len).read_to_end(&mut out).await.unwrap();
    out
}

/// Reads from `stream` until `needle` shows up in everything read so far.
async fn read_until(stream: &mut TcpStream, seen: &mut Vec<u8>, needle: &[u8]) {
    let mut buf = [0u8; 1024];
    while !seen.windows(needle.len()).any(|window| window == needle) {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed, got {:?}", String::from_utf8_lossy(seen));
        seen.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn upload_gets_continue_before_body_is_sent() {
    let addr = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(
            b"POST /speedtest HTTP/1.1\r\n\
              Host: localhost\r\n\
              Content-Type: application/octet-stream\r\n\
              Content-Length: 5\r\n\
              Expect: 100-continue\r\n\
              \r\n",
        )
        .await
        .unwrap();

    // nothing of the body has been written yet
    let mut seen = Vec::new();
    timeout(Duration::from_secs(5), read_until(&mut stream, &mut seen, b"\r\n\r\n"))
        .await
        .expect("no interim response");
    assert!(
        seen.starts_with(b"HTTP/1.1 100 Continue\r\n"),
        "{:?}",
        String::from_utf8_lossy(&seen)
    );

    stream.write_all(b"hello").await.unwrap();

    let mut seen = Vec::new();
    timeout(Duration::from_secs(5), read_until(&mut stream, &mut seen, b"Received 5 B.\n"))
        .await
        .expect("no final response");
    assert!(seen.starts_with(b"HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn concurrent_transfers_do_not_interfere() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let downloads = [1_000u64, 65_537, 300_000, 1_000_000].map(|len| {
        let client = client.clone();
        async move {
            let response = client
                .get(format!("http://{addr}/speedtest?bytes={len}"))
                .send()
                .await
                .unwrap();
            assert_eq!(reqwest::StatusCode::OK, response.status());
            (len, response.bytes().await.unwrap())
        }
    });

    let uploads = [1usize, 4_096, 2_000_000].map(|len| {
        let client = client.clone();
        async move {
            let response = client
                .post(format!("http://{addr}/speedtest"))
                .header("Content-Type", "application/octet-stream")
                .body(vec![1u8; len])
                .send()
                .await
                .unwrap();
            assert_eq!(reqwest::StatusCode::OK, response.status());
            (len, response.text().await.unwrap())
        }
    });

    let (downloads, uploads) = tokio::join!(join_all(downloads), join_all(uploads));

    for (len, body) in downloads {
        assert_eq!(expected_bytes(len).await, body.to_vec(), "download of {len}");
    }

    let expected = ["Received 1 B.\n", "Received 4.1 kB.\n", "Received 2.0 MB.\n"];
    for ((_, body), expected) in uploads.into_iter().zip(expected) {
        assert_eq!(expected, body);
    }
}

#[tokio::test]
async fn partial_download_over_the_wire() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/speedtest?bytes=1GB"))
        .header("Range", "bytes=0-9999")
        .send()
        .await
        .unwrap();
    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(expected_bytes(10_000).await, response.bytes().await.unwrap().to_vec());

    let response = client
        .get(format!("http://{addr}/speedtest?bytes=1GB"))
        .header("Range", "bytes=10000-19999")
        .send()
        .await
        .unwrap();
    assert_eq!(reqwest::StatusCode::RANGE_NOT_SATISFIABLE, response.status());
    assert_eq!("seeking not supported\n", response.text().await.unwrap());
}
