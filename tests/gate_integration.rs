//! Access gate tests: perimeter policy on the full router, suspicious request
//! logging, and peer addresses taken from a real socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::util::ServiceExt;

use filegate::config::{default_public_prefixes, Config};
use filegate::files::BaseRoot;
use filegate::server::{
    build_router, AccessGate, AppState, IpAllowList, PerimeterPolicy, SuspiciousLog,
    TrustedProxies,
};

struct Harness {
    _files: TempDir,
    data: TempDir,
    log: Arc<SuspiciousLog>,
    app: Router,
}

fn harness(allow_list: IpAllowList) -> Harness {
    harness_with_proxies(allow_list, TrustedProxies::loopback())
}

fn harness_with_proxies(allow_list: IpAllowList, trusted: TrustedProxies) -> Harness {
    let files = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(files.path().join("report.pdf"), b"%PDF-1.4").unwrap();

    let root = BaseRoot::new(files.path()).unwrap();
    let state = Arc::new(AppState::open(root, data.path(), "http://localhost:3000").unwrap());
    let log = Arc::new(SuspiciousLog::new(data.path().join("suspicious-ips.list")));
    let policy = PerimeterPolicy::new(default_public_prefixes(), allow_list);
    let gate = Arc::new(
        AccessGate::new(Arc::new(policy), Arc::clone(&log)).with_trusted_proxies(trusted),
    );

    Harness {
        _files: files,
        data,
        log,
        app: build_router(state, gate),
    }
}

fn default_harness() -> Harness {
    let mut config = Config::default();
    config.whitelist = vec![IpAddr::V4(Ipv4Addr::new(86, 92, 129, 223))];
    harness(config.allow_list())
}

fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(addr.parse().unwrap())
}

/// A request forwarded by the local reverse proxy on behalf of `ip`.
fn from_ip(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .extension(peer("127.0.0.1:40000"))
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

async fn status_for(app: &Router, uri: &str, ip: &str) -> StatusCode {
    app.clone().oneshot(from_ip(uri, ip)).await.unwrap().status()
}

#[tokio::test]
async fn test_whitelisted_ip_reaches_private_paths() {
    let h = default_harness();
    assert_eq!(status_for(&h.app, "/health", "86.92.129.223").await, StatusCode::OK);
    assert_eq!(status_for(&h.app, "/", "86.92.129.223").await, StatusCode::OK);
}

#[tokio::test]
async fn test_range_bounds_reach_private_paths() {
    let h = default_harness();
    for ip in ["192.168.2.1", "192.168.2.128", "192.168.2.255"] {
        assert_eq!(status_for(&h.app, "/health", ip).await, StatusCode::OK, "{}", ip);
    }
}

#[tokio::test]
async fn test_outside_ips_denied_on_private_paths() {
    let h = default_harness();
    for ip in ["192.168.1.255", "192.168.3.1", "8.8.8.8"] {
        let response = h.app.clone().oneshot(from_ip("/health", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", ip);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"DENIED");
    }
}

#[tokio::test]
async fn test_missing_ip_denied_on_private_paths() {
    let h = default_harness();
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_spoofed_headers_from_untrusted_peer_denied() {
    let h = harness(IpAllowList::new(
        [],
        Some(filegate::server::Ipv4Range::new(
            Ipv4Addr::new(192, 168, 2, 1),
            Ipv4Addr::new(192, 168, 2, 255),
        )),
    ));

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .extension(peer("203.0.113.9:5555"))
                .header("x-real-ip", "192.168.2.7")
                .header("x-forwarded-for", "192.168.2.8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The same header without any socket peer is not believed either.
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-real-ip", "192.168.2.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // From an in-range peer the request passes on its own address.
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .extension(peer("192.168.2.40:5555"))
                .header("x-real-ip", "8.8.8.8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_configured_proxy_is_trusted() {
    let h = harness_with_proxies(
        IpAllowList::new([IpAddr::V4(Ipv4Addr::new(86, 92, 129, 223))], None),
        TrustedProxies::new([IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))]),
    );

    let via_proxy = Request::builder()
        .uri("/health")
        .extension(peer("10.0.0.2:8080"))
        .header("x-real-ip", "86.92.129.223")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        h.app.clone().oneshot(via_proxy).await.unwrap().status(),
        StatusCode::OK
    );

    // Loopback is no longer trusted once the list is replaced.
    let via_loopback = Request::builder()
        .uri("/health")
        .extension(peer("127.0.0.1:8080"))
        .header("x-real-ip", "86.92.129.223")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        h.app.clone().oneshot(via_loopback).await.unwrap().status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn test_probe_in_query_string_recorded() {
    let h = default_harness();
    status_for(&h.app, "/health?page=wp-admin", "86.92.129.223").await;
    status_for(&h.app, "/api/files?subdir=music", "86.92.129.223").await;

    assert_eq!(h.log.pending_len(), 1);
    h.log.flush().await.unwrap();
    let contents =
        std::fs::read_to_string(h.data.path().join("suspicious-ips.list")).unwrap();
    assert!(contents.contains("tried accessing \"/health?page=wp-admin\""));
}

#[tokio::test]
async fn test_public_paths_open_to_anyone() {
    let h = default_harness();
    assert_eq!(status_for(&h.app, "/api/files", "8.8.8.8").await, StatusCode::OK);
    assert_eq!(
        status_for(&h.app, "/static/styles.css", "8.8.8.8").await,
        StatusCode::OK
    );
    // Unknown links are the handler's 404, not the gate's 403.
    assert_eq!(
        status_for(&h.app, "/download/does-not-exist", "8.8.8.8").await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_probes_recorded_and_flushed() {
    let h = default_harness();
    status_for(&h.app, "/.env", "45.1.1.1").await;
    status_for(&h.app, "/.env", "45.1.1.1").await;
    status_for(&h.app, "/wp-login.php", "45.1.1.2").await;
    status_for(&h.app, "/api/files", "45.1.1.3").await;

    assert_eq!(h.log.pending_len(), 2);
    assert_eq!(h.log.flush().await.unwrap(), 2);

    let contents =
        std::fs::read_to_string(h.data.path().join("suspicious-ips.list")).unwrap();
    assert!(contents.contains("45.1.1.1 | tried accessing \"/.env\""));
    assert!(contents.contains("45.1.1.2 | tried accessing \"/wp-login.php\""));
    assert_eq!(contents.lines().count(), 2);
}

async fn raw_get(addr: SocketAddr, path: &str) -> String {
    raw_get_with(addr, path, "").await
}

async fn raw_get_with(addr: SocketAddr, path: &str, extra_headers: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\n{}Connection: close\r\n\r\n",
        path, extra_headers
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn test_socket_peer_used_when_no_proxy_headers() {
    let allowed = harness(IpAllowList::new(
        [IpAddr::V4(Ipv4Addr::LOCALHOST)],
        None,
    ));
    let addr = spawn_server(allowed.app.clone()).await;
    let response = raw_get(addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    let denied = harness(IpAllowList::new(
        [IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9))],
        None,
    ));
    let addr = spawn_server(denied.app.clone()).await;
    let response = raw_get(addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 403"), "{}", response);
    assert!(response.ends_with("DENIED"));
}

#[tokio::test]
async fn test_socket_peer_cannot_spoof_without_trust() {
    let h = harness_with_proxies(
        IpAllowList::new([IpAddr::V4(Ipv4Addr::new(86, 92, 129, 223))], None),
        TrustedProxies::new([]),
    );
    let addr = spawn_server(h.app.clone()).await;
    let response = raw_get_with(addr, "/health", "X-Real-IP: 86.92.129.223\r\n").await;
    assert!(response.starts_with("HTTP/1.1 403"), "{}", response);
}
