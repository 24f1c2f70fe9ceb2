// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Integration tests for the coordinator: registration surface, liveness
//! reload, and dispatch sessions against mocked workers.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hpc_bench_core::config::{CoordinatorSettings, DispatchTunables};
use hpc_bench_core::coordinator::{
    CoordinatorState, DispatchSession, NodeOutcome, NodeRegistry,
};
use hpc_bench_core::protocol::{
    CompetitiveRequest, HplParams, JobStatus, RegisterRequest, SystemMetrics,
};

const TASK_ID: &str = "0123456789abcdef0123456789abcdef";

fn metrics() -> SystemMetrics {
    SystemMetrics {
        hostname: "node".to_string(),
        cpu_count: 8,
        total_ram_bytes: 16 << 30,
        available_ram_bytes: 8 << 30,
        disk_total_bytes: 500 << 30,
        disk_available_bytes: 250 << 30,
        operating_system: "Linux".to_string(),
    }
}

fn fast_tunables() -> DispatchTunables {
    DispatchTunables {
        pacing_delay: Duration::from_millis(0),
        poll_interval: Duration::from_millis(20),
        max_unreachable_polls: 2,
        ping_timeout: Duration::from_millis(500),
        ..DispatchTunables::default()
    }
}

fn settings_in(dir: &TempDir) -> CoordinatorSettings {
    CoordinatorSettings {
        results_dir: dir.path().join("benchmarks"),
        collectl_program: "not-a-collectl".to_string(),
        ..CoordinatorSettings::default()
    }
}

/// Register a wiremock server as a node; it reports the loopback IP.
fn register_mock(registry: &NodeRegistry, server: &MockServer) {
    registry.upsert(
        server.address().ip().to_string(),
        RegisterRequest {
            port: server.address().port(),
            metrics: metrics(),
        },
    );
}

fn params() -> CompetitiveRequest {
    CompetitiveRequest {
        ps: 2,
        qs: 2,
        n_value: 1000,
        nb: 192,
        instances_num: 1,
    }
}

async fn mock_submit(server: &MockServer, route: &str) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "task_id": TASK_ID })),
        )
        .mount(server)
        .await;
}

async fn mock_status(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/task_status/{TASK_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "task_id": TASK_ID,
            "status": status,
        })))
        .mount(server)
        .await;
}

async fn mock_results(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/get_results/{TASK_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "task_id": TASK_ID,
            "results": [
                { "filename": format!("hpl_4_{TASK_ID}_1.result"), "content": "T/V  N  NB  P  Q  Time  Gflops\n" },
                { "filename": "collectl.log", "content": "#cpu sample\n" },
            ],
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_competitive_completed_artifacts_written() {
    let dir = TempDir::new().unwrap();
    let worker = MockServer::start().await;
    mock_submit(&worker, "/submit_competitive_benchmark").await;
    mock_status(&worker, "Completed").await;
    mock_results(&worker).await;

    let registry = Arc::new(NodeRegistry::new());
    register_mock(&registry, &worker);

    let session = DispatchSession::new(Arc::clone(&registry), settings_in(&dir), fast_tunables());
    let report = session.run_competitive(&params()).await.unwrap();

    let ip = worker.address().ip().to_string();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[&ip], NodeOutcome::Completed { files: 2 });

    let node_dir = report.session_dir.join(&ip);
    let result_file = node_dir.join(format!("hpl_4_{TASK_ID}_1.result"));
    assert!(result_file.exists());
    assert!(std::fs::read_to_string(result_file)
        .unwrap()
        .contains("Gflops"));
    assert!(node_dir.join("collectl.log").exists());
}

#[tokio::test]
async fn test_failed_node_reported_distinctly() {
    let dir = TempDir::new().unwrap();
    let worker = MockServer::start().await;
    mock_submit(&worker, "/submit_competitive_benchmark").await;
    mock_status(&worker, "Execution Error").await;
    Mock::given(method("GET"))
        .and(path(format!("/get_results/{TASK_ID}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": "No result files found for the given Task ID."
        })))
        .mount(&worker)
        .await;

    let registry = Arc::new(NodeRegistry::new());
    register_mock(&registry, &worker);

    let session = DispatchSession::new(Arc::clone(&registry), settings_in(&dir), fast_tunables());
    let report = session.run_competitive(&params()).await.unwrap();

    let ip = worker.address().ip().to_string();
    assert_eq!(
        report.outcomes[&ip],
        NodeOutcome::Failed(JobStatus::ExecutionError)
    );
}

#[tokio::test]
async fn test_unreachable_node_abandoned_after_k_polls() {
    let dir = TempDir::new().unwrap();
    let worker = MockServer::start().await;
    mock_submit(&worker, "/submit_competitive_benchmark").await;
    // Status polls blow up; after max_unreachable_polls the task is dropped.
    Mock::given(method("GET"))
        .and(path(format!("/task_status/{TASK_ID}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&worker)
        .await;

    let registry = Arc::new(NodeRegistry::new());
    register_mock(&registry, &worker);

    let session = DispatchSession::new(Arc::clone(&registry), settings_in(&dir), fast_tunables());
    let report = session.run_competitive(&params()).await.unwrap();

    let ip = worker.address().ip().to_string();
    assert_eq!(report.outcomes[&ip], NodeOutcome::Unreachable);
}

#[tokio::test]
async fn test_submit_rejection_skips_node() {
    let dir = TempDir::new().unwrap();
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit_competitive_benchmark"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "Resource busy. Another benchmark is currently running."
        })))
        .mount(&worker)
        .await;

    let registry = Arc::new(NodeRegistry::new());
    register_mock(&registry, &worker);

    let session = DispatchSession::new(Arc::clone(&registry), settings_in(&dir), fast_tunables());
    let report = session.run_competitive(&params()).await.unwrap();

    let ip = worker.address().ip().to_string();
    assert_eq!(report.outcomes[&ip], NodeOutcome::SubmitRejected);
}

#[tokio::test]
async fn test_cooperative_single_submit_with_fleet_slots() {
    let dir = TempDir::new().unwrap();
    let worker = MockServer::start().await;
    let ip = worker.address().ip().to_string();

    let mut node_slots = serde_json::Map::new();
    node_slots.insert(ip.clone(), serde_json::json!(4));
    Mock::given(method("POST"))
        .and(path("/submit_cooperative_benchmark"))
        .and(body_partial_json(serde_json::json!({
            "ps": 2,
            "qs": 4,
            "node_slots": node_slots,
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "task_id": TASK_ID })),
        )
        .expect(1)
        .mount(&worker)
        .await;
    mock_status(&worker, "Completed").await;
    mock_results(&worker).await;

    let registry = Arc::new(NodeRegistry::new());
    register_mock(&registry, &worker);

    let session = DispatchSession::new(Arc::clone(&registry), settings_in(&dir), fast_tunables());
    let report = session
        .run_cooperative(
            HplParams {
                ps: 2,
                qs: 4,
                n_value: 20000,
                nb: 192,
            },
            4,
        )
        .await
        .unwrap();

    assert_eq!(report.outcomes[&ip], NodeOutcome::Completed { files: 2 });
}

#[tokio::test]
async fn test_dispatch_without_nodes_fails() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(NodeRegistry::new());
    let session = DispatchSession::new(registry, settings_in(&dir), fast_tunables());
    assert!(session.run_competitive(&params()).await.is_err());
}

#[tokio::test]
async fn test_reload_prunes_dead_nodes() {
    let live = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "message": "pong" })),
        )
        .mount(&live)
        .await;

    // A node whose port stopped answering.
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let registry = NodeRegistry::new();
    register_mock(&registry, &live);
    registry.upsert(
        "127.0.0.1".to_string(),
        RegisterRequest {
            port: dead_port,
            metrics: metrics(),
        },
    );
    assert_eq!(registry.len(), 2);

    let removed = registry.reload(&fast_tunables()).await;
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].port, dead_port);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.snapshot()[0].port, live.address().port());
}

#[tokio::test]
async fn test_register_endpoint_uses_observed_ip() {
    use std::net::SocketAddr;

    let dir = TempDir::new().unwrap();
    let registry = Arc::new(NodeRegistry::new());
    let state = Arc::new(CoordinatorState {
        registry: Arc::clone(&registry),
        ssh_dir: dir.path().join(".ssh"),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = hpc_bench_core::coordinator::server::router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let body = serde_json::json!({
        // A spoofed IP in the body must be ignored; only the port is trusted.
        "ip": "203.0.113.50",
        "port": 5000,
        "metrics": serde_json::to_value(metrics()).unwrap(),
    });
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reply: serde_json::Value = response.json().await.unwrap();
    assert_eq!(reply["status"], "registered");
    assert_eq!(reply["node"]["ip"], "127.0.0.1");

    let nodes = registry.snapshot();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].ip, "127.0.0.1");

    // Key endpoints answer 404 until a pair exists.
    let response = reqwest::Client::new()
        .get(format!("http://{addr}/get_ssh_public_key"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_key_endpoints_serve_installed_pair() {
    use std::net::SocketAddr;

    let dir = TempDir::new().unwrap();
    let ssh_dir = dir.path().join(".ssh");
    hpc_bench_core::ssh::write_public_key(&ssh_dir, "ssh-rsa AAAA coordinator").unwrap();
    hpc_bench_core::ssh::write_private_key(&ssh_dir, "PRIVATE KEY MATERIAL").unwrap();

    let state = Arc::new(CoordinatorState {
        registry: Arc::new(NodeRegistry::new()),
        ssh_dir,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = hpc_bench_core::coordinator::server::router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let public: serde_json::Value = reqwest::get(format!("http://{addr}/get_ssh_public_key"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(public["public_key"], "ssh-rsa AAAA coordinator");

    let private: serde_json::Value = reqwest::get(format!("http://{addr}/get_ssh_private_key"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(private["private_key"], "PRIVATE KEY MATERIAL");
}
