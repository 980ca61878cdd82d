//! Integration tests against a live in-process gateway.
//!
//! Each test binds its own gateway on an ephemeral port over a temporary
//! storage directory. Archives are seeded by importing them through a
//! separate archiver over the same directory; the gateway materializes
//! them from storage on first request.
//!
//! The public-network test is `#[ignore]`d; run it with:
//!   cargo test -p dat-gateway --test gateway_integration -- --ignored

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use dat_gateway::{Gateway, GatewayConfig};
use dat_gateway_core::ArchiveKey;
use dat_gateway_registry::RegistryError;
use dat_gateway_swarm::{Drive, LocalArchiver, Swarm, SwarmEvent};
use tempfile::TempDir;

const FAVICON: &[u8] = b"\x00\x00\x01\x00favicon-bytes";
const INDEX: &[u8] = b"<html><body>hello archive</body></html>";

fn fixture_key(byte: u8) -> ArchiveKey {
    ArchiveKey::from_bytes([byte; 32])
}

/// Seed an archive into a storage directory.
async fn seed_archive(dir: &Path, key: ArchiveKey) {
    let archiver = LocalArchiver::open(dir).unwrap();
    archiver
        .import(
            key,
            vec![
                ("/index.html".to_string(), Bytes::from_static(INDEX)),
                ("/icons/favicon.ico".to_string(), Bytes::from_static(FAVICON)),
            ],
        )
        .await
        .unwrap();
}

/// Start a gateway over `dir` on an ephemeral port, with fast timeouts.
async fn start_gateway(dir: &Path, mutate: impl FnOnce(&mut GatewayConfig)) -> (Gateway, SocketAddr) {
    let mut config = GatewayConfig {
        dir: dir.to_path_buf(),
        ready_timeout_ms: 500,
        request_timeout_ms: 2_000,
        ..GatewayConfig::default()
    };
    mutate(&mut config);
    let mut gateway = Gateway::load(config).unwrap();
    let addr = gateway.listen(([127, 0, 0, 1], 0).into()).await.unwrap();
    (gateway, addr)
}

#[tokio::test]
async fn landing_page_is_served() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let body = response.text().await.unwrap();
    assert!(body.contains("Dat Gateway"));

    gateway.close().await;
}

#[tokio::test]
async fn health_endpoint_responds() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let response = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(response.status(), 200);

    gateway.close().await;
}

#[tokio::test]
async fn seeded_archive_file_is_served() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa1);
    seed_archive(dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let url = format!("http://{addr}/{}/icons/favicon.ico", key.to_hex());
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    let etag = response.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(FAVICON));

    // Conditional request on the validator.
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("if-none-match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 304);

    gateway.close().await;
}

#[tokio::test]
async fn directory_serves_index_html() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa2);
    seed_archive(dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let response = reqwest::get(format!("http://{addr}/{}/", key.to_hex()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(INDEX));

    gateway.close().await;
}

#[tokio::test]
async fn directory_without_index_lists_entries() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa3);
    seed_archive(dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let response = reqwest::get(format!("http://{addr}/{}/icons/", key.to_hex()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("favicon.ico"));

    gateway.close().await;
}

#[tokio::test]
async fn range_requests_are_honored() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa4);
    seed_archive(dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/{}/icons/favicon.ico", key.to_hex()))
        .header("range", "bytes=0-3")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 206);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        &format!("bytes 0-3/{}", FAVICON.len())
    );
    assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(&FAVICON[..4]));

    gateway.close().await;
}

#[tokio::test]
async fn dead_address_answers_not_found() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    // A key nobody can provide: admission times out not-ready.
    let key = "af75142d92dd1e456cf2a7e58a37f891fe42a1e49ce2a5a7859de938e38f4642";
    let response = reqwest::get(format!("http://{addr}/{key}/")).await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Not found");

    gateway.close().await;
}

#[tokio::test]
async fn well_known_record_is_resolved() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa5);
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let hex = key.to_hex();
    let response = reqwest::get(format!("http://{addr}/{hex}/.well-known/dat"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), format!("dat://{hex}\nttl=3600"));

    // The record endpoint resolves without admitting.
    assert!(!gateway.registry().contains(&key));

    gateway.close().await;
}

#[tokio::test]
async fn redirect_mode_sends_clients_to_subdomain() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa6);
    let (mut gateway, addr) = start_gateway(dir.path(), |c| c.redirect = true).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(format!("http://{addr}/{}/some/path", key.to_hex()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(location, &format!("http://{}.{addr}/some/path", key.to_base32()));

    gateway.close().await;
}

#[tokio::test]
async fn subdomain_label_addresses_archive() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa7);
    seed_archive(dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |c| c.redirect = true).await;

    // Speak HTTP directly so the Host header can carry the key label.
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /icons/favicon.ico HTTP/1.1\r\nHost: {}.example.com\r\nConnection: close\r\n\r\n",
        key.to_base32()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("favicon-bytes"));

    gateway.close().await;
}

/// Replication over WebSocket: a local peer joins an archive the gateway
/// can serve, pipes its replication stream through the gateway, and ends
/// up with the content.
#[tokio::test]
async fn websocket_replication_delivers_archive() {
    let gateway_dir = TempDir::new().unwrap();
    let peer_dir = TempDir::new().unwrap();
    let key = fixture_key(0xa8);
    seed_archive(gateway_dir.path(), key).await;
    let (mut gateway, addr) = start_gateway(gateway_dir.path(), |_| {}).await;

    let peer = LocalArchiver::open(peer_dir.path()).unwrap();
    let mut events = peer.subscribe();
    peer.join(&key).await.unwrap();

    let (ws, _) = connect_async(format!("ws://{addr}/{}", key.to_hex()))
        .await
        .unwrap();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (mut rd, mut wr) = tokio::io::split(peer.replicate());

    // Pipe the peer's replication stream through the gateway.
    let pipe = tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if wr.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                read = rd.read(&mut buf) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = Bytes::copy_from_slice(&buf[..n]);
                        if ws_tx.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    let event = timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("replication should deliver the archive within 3s")
        .unwrap();
    let SwarmEvent::Materialized { key: event_key, drive } = event;
    assert_eq!(event_key, key);
    assert_eq!(
        drive.read_file("/icons/favicon.ico").await.unwrap(),
        Bytes::from_static(FAVICON)
    );

    pipe.abort();
    gateway.close().await;
}

#[tokio::test]
async fn websocket_without_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    let close = timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Close(frame)) = msg {
                return frame;
            }
        }
        None
    })
    .await
    .unwrap();

    let frame = close.expect("server should close with a reason");
    assert_eq!(frame.reason.as_str(), "Must provide archive key");

    drop(ws);
    gateway.close().await;
}

/// A double-slash path routes through the wildcard with an empty address
/// segment; the handshake still completes and closes with the reason.
#[tokio::test]
async fn websocket_empty_address_segment_is_refused() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |_| {}).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}//")).await.unwrap();
    let close = timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Close(frame)) = msg {
                return frame;
            }
        }
        None
    })
    .await
    .unwrap();

    let frame = close.expect("server should close with a reason");
    assert_eq!(frame.reason.as_str(), "Must provide archive key");

    drop(ws);
    gateway.close().await;
}

/// Admit/remove round trip on the registry.
#[tokio::test]
async fn admit_remove_round_trip() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xa9);
    seed_archive(dir.path(), key).await;
    let (mut gateway, _addr) = start_gateway(dir.path(), |_| {}).await;
    let registry = gateway.registry().clone();

    registry.add(key).await.unwrap();
    assert!(registry.contains(&key));

    registry.remove(&key).await.unwrap();
    assert!(!registry.contains(&key));

    registry.add(key).await.unwrap();
    assert!(registry.contains(&key));

    gateway.close().await;
}

/// Archives survive a gateway restart through the archiver's storage dir.
#[tokio::test]
async fn persistence_hands_off_across_restart() {
    let dir = TempDir::new().unwrap();
    let key = fixture_key(0xaa);
    seed_archive(dir.path(), key).await;

    {
        let (mut gateway, _addr) = start_gateway(dir.path(), |_| {}).await;
        gateway.registry().add(key).await.unwrap();
        gateway.close().await;
    }

    let (mut gateway, _addr) = start_gateway(dir.path(), |_| {}).await;
    let archive = gateway.registry().get_or_admit(key).await.unwrap();
    let drive = archive
        .ready(Duration::from_secs(1))
        .await
        .expect("persisted archive should materialize");
    assert_eq!(drive.key(), key);

    gateway.close().await;
}

/// With `max = 1`, admitting a second archive evicts the first.
#[tokio::test]
async fn lru_eviction_under_capacity_one() {
    let dir = TempDir::new().unwrap();
    let key_a = fixture_key(0xab);
    let key_b = fixture_key(0xac);
    seed_archive(dir.path(), key_a).await;
    seed_archive(dir.path(), key_b).await;
    let (mut gateway, addr) = start_gateway(dir.path(), |c| c.max = 1).await;

    let url_a = format!("http://{addr}/{}/index.html", key_a.to_hex());
    let url_b = format!("http://{addr}/{}/index.html", key_b.to_hex());
    assert_eq!(reqwest::get(&url_a).await.unwrap().status(), 200);
    assert!(gateway.registry().contains(&key_a));

    assert_eq!(reqwest::get(&url_b).await.unwrap().status(), 200);
    assert!(!gateway.registry().contains(&key_a));
    assert!(gateway.registry().contains(&key_b));
    assert_eq!(gateway.registry().len(), 1);

    gateway.close().await;
}

#[tokio::test]
async fn evict_oldest_on_empty_registry_is_an_error() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, _addr) = start_gateway(dir.path(), |_| {}).await;

    assert!(matches!(
        gateway.registry().evict_oldest().await,
        Err(RegistryError::Empty)
    ));

    gateway.close().await;
}

/// Liveness against the public Dat network. Requires internet access and a
/// reachable hashbase peer, so it does not run by default.
#[tokio::test]
#[ignore]
async fn live_name_resolves_and_serves() {
    let dir = TempDir::new().unwrap();
    let (mut gateway, addr) = start_gateway(dir.path(), |c| {
        c.ready_timeout_ms = 3_000;
        c.request_timeout_ms = 5_000;
    })
    .await;

    let response = reqwest::get(format!(
        "http://{addr}/garbados.hashbase.io/icons/favicon.ico"
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);

    gateway.close().await;
}
