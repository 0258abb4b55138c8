//! Probe pipeline against local mock relays

use relay_ranker::proxy::{
    AnonymityLevel, Candidate, IncrementalPersister, NoGeoLookup, Probe, ProbeStatus, ProxyParser,
    RelayProber, RunController, WorkingCache, UNREACHABLE_MS,
};
use relay_ranker::Settings;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

const IP_BODY: &str = r#"{"origin": "203.0.113.7"}"#;

const GEO_BODY: &str =
    r#"{"status":"success","country":"Germany","countryCode":"DE","isp":"Example Networks"}"#;

/// Serve the same canned response to every request, closing after each one
async fn spawn_mock(status_line: &'static str, extra_headers: &'static str, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(answer(stream, status_line, extra_headers, body));
        }
    });
    port
}

async fn answer(mut stream: TcpStream, status_line: &str, extra_headers: &str, body: &str) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        extra_headers,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A listener that never accepts, with its backlog filled so further
/// connects hang. The returned streams keep the backlog occupied.
async fn saturated_listener() -> (u16, TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut fillers = Vec::new();
    for _ in 0..64 {
        let connect = TcpStream::connect(("127.0.0.1", port));
        match tokio::time::timeout(Duration::from_millis(200), connect).await {
            Ok(Ok(stream)) => fillers.push(stream),
            _ => break,
        }
    }
    (port, listener, fillers)
}

fn local(port: u16) -> Candidate {
    ProxyParser::normalize(&format!("127.0.0.1:{}", port)).unwrap()
}

fn settings(geo_port: u16) -> Settings {
    Settings::default()
        .with_timeout(3)
        .with_test_https(false)
        .with_test_urls(vec!["http://relay-check.invalid/".to_string()])
        .with_reflector_url("http://reflector.invalid/ip".to_string())
        .with_geo_endpoint(format!("http://127.0.0.1:{}/json", geo_port))
}

fn prober(settings: Settings) -> RelayProber {
    let client = RelayProber::shared_client(4).unwrap();
    RelayProber::new(settings, client)
}

#[tokio::test]
async fn test_active_relay_is_enriched() {
    let relay = spawn_mock("200 OK", "", IP_BODY).await;
    let geo = spawn_mock("200 OK", "", GEO_BODY).await;

    let result = prober(settings(geo)).probe(&local(relay)).await;

    assert_eq!(result.status, ProbeStatus::Active);
    assert!(result.tcp_connect_ms < UNREACHABLE_MS);
    assert!(result.http_time_ms < UNREACHABLE_MS);
    assert_eq!(result.country, "Germany");
    assert_eq!(result.country_code, "DE");
    assert_eq!(result.isp, "Example Networks");
    assert_eq!(result.anonymity, AnonymityLevel::Anonymous);
}

#[tokio::test]
async fn test_relay_leaking_via_is_transparent() {
    let relay = spawn_mock("200 OK", "Via: 1.1 squid\r\n", IP_BODY).await;

    let result = prober(settings(closed_port().await))
        .with_geo_lookup(Arc::new(NoGeoLookup))
        .probe(&local(relay))
        .await;

    assert_eq!(result.status, ProbeStatus::Active);
    assert_eq!(result.anonymity, AnonymityLevel::Transparent);
    assert_eq!(result.country, "Unknown");
    assert_eq!(result.country_code, "XX");
}

#[tokio::test]
async fn test_unreachable_relay() {
    let port = closed_port().await;

    let result = prober(settings(port)).probe(&local(port)).await;

    assert_eq!(result.status, ProbeStatus::Failed);
    assert_eq!(result.tcp_connect_ms, UNREACHABLE_MS);
    assert_eq!(result.http_time_ms, UNREACHABLE_MS);
    assert_eq!(result.anonymity, AnonymityLevel::Unknown);
}

#[tokio::test]
async fn test_tcp_connect_timeout() {
    let (port, _listener, _fillers) = saturated_listener().await;

    let result = prober(settings(closed_port().await))
        .with_tcp_timeout(Duration::from_millis(300))
        .probe(&local(port))
        .await;

    assert_eq!(result.status, ProbeStatus::Failed);
    assert_eq!(result.tcp_connect_ms, UNREACHABLE_MS);
    assert_eq!(result.http_time_ms, UNREACHABLE_MS);
}

#[tokio::test]
async fn test_reachable_but_not_forwarding() {
    let relay = spawn_mock("503 Service Unavailable", "", "").await;

    let result = prober(settings(closed_port().await)).probe(&local(relay)).await;

    assert_eq!(result.status, ProbeStatus::Failed);
    assert!(result.tcp_connect_ms < UNREACHABLE_MS);
    assert_eq!(result.http_time_ms, UNREACHABLE_MS);
    assert_eq!(result.country, "Unknown");
}

#[tokio::test]
async fn test_fast_active_relay_is_cached() {
    let relay = spawn_mock("200 OK", "", IP_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let cache = WorkingCache::new(dir.path().join("live.txt"));
    cache.ensure_exists().unwrap();

    let (persister, worker) = IncrementalPersister::spawn(cache.clone());
    let prober = prober(settings(closed_port().await))
        .with_geo_lookup(Arc::new(NoGeoLookup))
        .with_persister(persister);

    let result = prober.probe(&local(relay)).await;
    assert_eq!(result.status, ProbeStatus::Active);

    drop(prober);
    worker.await.unwrap();

    assert_eq!(cache.read_entries().unwrap(), vec![local(relay)]);
}

#[tokio::test]
async fn test_run_over_mixed_relays() {
    let good = spawn_mock("200 OK", "", IP_BODY).await;
    let refusing = spawn_mock("403 Forbidden", "", "").await;
    let dead = closed_port().await;

    let prober = prober(settings(closed_port().await)).with_geo_lookup(Arc::new(NoGeoLookup));
    let controller = RunController::new(prober);

    let mut seen = Vec::new();
    let mut last_progress = (0, 0);
    let run = controller
        .run(
            vec![local(dead), local(good), local(refusing)],
            2,
            |r| seen.push(r.candidate.clone()),
            |completed, total| last_progress = (completed, total),
        )
        .await
        .unwrap();

    assert!(!run.stopped);
    assert_eq!(seen.len(), 3);
    assert_eq!(last_progress, (3, 3));
    assert_eq!(run.stats.total, 3);
    assert_eq!(run.stats.tested, 3);
    assert_eq!(run.stats.active, 1);
    assert_eq!(run.stats.failed, 2);
    assert_eq!(run.session.best(), Some(&local(good)));
    assert!(!controller.is_running());
}
