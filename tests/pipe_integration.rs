//! Integration tests for the pipe HTTP endpoint.
//!
//! Runs the real server on an ephemeral port against the in-memory control
//! plane, so no cluster is needed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use podpipe::cluster::UnitPhase;
use podpipe::config::Config;
use podpipe::orchestrator::{PipeApi, PipeState, Pipeline};
use podpipe::template::UnitTemplate;
use podpipe::testing::StubControlPlane;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn fast_config() -> Config {
    let mut config = Config::default();
    config.provisioner.poll_interval = Duration::from_millis(20);
    config.provisioner.start_timeout = Duration::from_millis(200);
    config
}

async fn start_test_server(
    stub: Arc<StubControlPlane>,
    config: Config,
) -> (SocketAddr, CancellationToken) {
    let shutdown = CancellationToken::new();
    let pipeline = Pipeline::new(
        stub,
        Arc::new(UnitTemplate::builtin().unwrap()),
        &config,
        shutdown.clone(),
    );
    let state = PipeState {
        pipeline: Arc::new(pipeline),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = shutdown.clone();
    tokio::spawn(async move {
        PipeApi::serve(listener, state, token)
            .await
            .expect("server failed");
    });

    (addr, shutdown)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_payload_reaches_pod_stdin() {
    let stub = Arc::new(StubControlPlane::running().with_phases([UnitPhase::Pending]));
    let (addr, shutdown) = start_test_server(stub.clone(), fast_config()).await;
    let payload: Vec<u8> = (0..10 * 1024).map(|i| (i % 256) as u8).collect();

    let resp = client()
        .post(format!("http://{}/", addr))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "done.");
    assert_eq!(stub.sink().contents(), payload);
    assert!(stub.sink().is_shut_down());
    assert_eq!(stub.phase_calls(), 2);
    assert_eq!(stub.deleted().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_chunked_upload_is_streamed_in_order() {
    let stub = Arc::new(StubControlPlane::running());
    let (addr, shutdown) = start_test_server(stub.clone(), fast_config()).await;

    let chunks: Vec<Result<Bytes, std::io::Error>> = (0..16)
        .map(|i| Ok(Bytes::from(vec![i as u8; 4096])))
        .collect();
    let expected: Vec<u8> = (0..16).flat_map(|i| vec![i as u8; 4096]).collect();

    let resp = client()
        .put(format!("http://{}/upload/context.tar", addr))
        .body(reqwest::Body::wrap_stream(futures::stream::iter(chunks)))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(stub.sink().contents(), expected);

    shutdown.cancel();
}

#[tokio::test]
async fn test_create_failure_is_reported_as_text() {
    let stub = Arc::new(StubControlPlane::running().fail_create("pods is forbidden"));
    let (addr, shutdown) = start_test_server(stub.clone(), fast_config()).await;

    let resp = client()
        .post(format!("http://{}/", addr))
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let text = resp.text().await.unwrap();
    assert!(text.starts_with("createBuilderPod: "), "got: {}", text);
    assert!(text.contains("pods is forbidden"));
    assert!(stub.attached().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn test_pod_that_never_runs_times_out() {
    let stub = Arc::new(StubControlPlane::never_running());
    let (addr, shutdown) = start_test_server(stub.clone(), fast_config()).await;

    let resp = client()
        .post(format!("http://{}/", addr))
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let text = resp.text().await.unwrap();
    assert!(text.contains("timed out waiting for the condition"), "got: {}", text);
    assert!(stub.phase_calls() >= 2);
    assert!(stub.attached().is_empty());
    assert_eq!(stub.deleted().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_pods() {
    let stub = Arc::new(StubControlPlane::running());
    let (addr, shutdown) = start_test_server(stub.clone(), fast_config()).await;
    let client = client();

    let requests = (0..4).map(|_| {
        client
            .post(format!("http://{}/", addr))
            .body(Vec::new())
            .send()
    });
    for resp in futures::future::join_all(requests).await {
        assert_eq!(resp.unwrap().status(), 200);
    }

    let mut names: Vec<String> = stub
        .created()
        .into_iter()
        .filter_map(|pod| pod.metadata.name)
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
    assert_eq!(stub.deleted().len(), 4);

    shutdown.cancel();
}

#[tokio::test]
async fn test_health() {
    let stub = Arc::new(StubControlPlane::running());
    let (addr, shutdown) = start_test_server(stub, fast_config()).await;

    let resp = client()
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    shutdown.cancel();
}
