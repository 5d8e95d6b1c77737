// tests/fetch_client.rs
mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use common::{code, location_json, status_json};
use wash_scrape::core::{Fetcher, HttpFetcher};
use wash_scrape::engine::{FetchError, FetchTarget, Outcome};

/// Canned vendor API: routes on the request line only.
async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(respond(stream));
        }
    });
    addr
}

async fn respond(mut stream: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

    let (status, body) = match path.as_str() {
        "/locations?srcode=W000001" => ("200 OK", location_json("MI1001")),
        "/locations?srcode=W000002" => ("404 Not Found", b"{\"error\":\"not found\"}".to_vec()),
        "/locations?srcode=W000003" => ("500 Internal Server Error", b"oops".to_vec()),
        "/locations?srcode=W000004" => ("200 OK", b"<html>maintenance</html>".to_vec()),
        "/locations?srcode=W000005" => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        }
        "/get_machine_status_v1?uln=MI1001" => ("200 OK", status_json()),
        _ => ("400 Bad Request", Vec::new()),
    };

    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

async fn fetch(addr: SocketAddr, target: FetchTarget) -> Outcome {
    let client = HttpFetcher::new(&format!("http://{addr}/"), Duration::from_millis(500)).unwrap();
    client.fetch(&target).await
}

#[tokio::test]
async fn location_lookup_returns_the_body() {
    let addr = serve().await;
    let out = fetch(addr, FetchTarget::location(code("W000001"))).await;
    assert_eq!(out, Outcome::Success(location_json("MI1001")));
}

#[tokio::test]
async fn status_fetch_uses_the_uln() {
    let addr = serve().await;
    let out = fetch(addr, FetchTarget::status(code("W000001"), "MI1001")).await;
    assert_eq!(out, Outcome::Success(status_json()));
}

#[tokio::test]
async fn missing_location_is_not_found() {
    let addr = serve().await;
    assert_eq!(fetch(addr, FetchTarget::location(code("W000002"))).await, Outcome::NotFound);
}

#[tokio::test]
async fn server_error_is_transient() {
    let addr = serve().await;
    assert_eq!(
        fetch(addr, FetchTarget::location(code("W000003"))).await,
        Outcome::TransientError(FetchError::Status(500))
    );
}

#[tokio::test]
async fn non_json_body_is_transient() {
    let addr = serve().await;
    let out = fetch(addr, FetchTarget::location(code("W000004"))).await;
    assert!(matches!(out, Outcome::TransientError(FetchError::Body(_))), "{out:?}");
}

#[tokio::test]
async fn slow_server_times_out() {
    let addr = serve().await;
    let out = fetch(addr, FetchTarget::location(code("W000005"))).await;
    assert_eq!(out, Outcome::TransientError(FetchError::Timeout(Duration::from_millis(500))));
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let out = fetch(addr, FetchTarget::location(code("W000001"))).await;
    assert!(matches!(out, Outcome::TransientError(FetchError::Network(_))), "{out:?}");
}
