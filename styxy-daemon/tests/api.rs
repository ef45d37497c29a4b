//! End-to-end HTTP tests against an in-process server.

use std::net::Ipv4Addr;
use std::sync::Arc;

use styxy::{Daemon, DaemonOptions, MockProber, PortProber};
use styxy_daemon::{auth, build_router, AppState};

struct App {
    base: String,
    prober: Arc<MockProber>,
    _dir: tempfile::TempDir,
}

async fn spawn_app(config_json: Option<&str>, token: Option<&str>) -> App {
    let dir = tempfile::tempdir().unwrap();
    if let Some(body) = config_json {
        std::fs::write(dir.path().join("config.json"), body).unwrap();
    }
    if let Some(token) = token {
        std::fs::write(dir.path().join("auth.token"), format!("{token}\n")).unwrap();
    }

    let prober = Arc::new(MockProber::new());
    let daemon = Arc::new(
        Daemon::bootstrap(DaemonOptions {
            config_dir: Some(dir.path().to_path_buf()),
            prober: Some(Arc::clone(&prober) as Arc<dyn PortProber>),
            version: Some("test".into()),
        })
        .unwrap(),
    );

    let token = auth::load_token(daemon.paths());
    let router = build_router(AppState { daemon, token });
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    App {
        base: format!("http://{addr}"),
        prober,
        _dir: dir,
    }
}

#[tokio::test]
async fn allocate_check_release_round_trip() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "dev", "instance_id": "i1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["port"], 3000);
    let lock_id = body["lock_id"].as_str().unwrap().to_string();

    let check: serde_json::Value = client
        .get(format!("{}/check/3000", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["available"], false);
    assert_eq!(check["allocation"]["service_type"], "dev");

    let released: serde_json::Value = client
        .delete(format!("{}/allocate/{lock_id}", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(released["success"], true);
    assert_eq!(released["port"], 3000);

    // Releasing again is a 404 with the taxonomy kind.
    let response = client
        .delete(format!("{}/allocate/{lock_id}", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["success"], false);
    assert_eq!(error["errorKind"], "lockNotFound");
}

#[tokio::test]
async fn conflicted_preferred_port_moves_to_the_next_candidate() {
    let app = spawn_app(None, None).await;
    app.prober.mark_busy(styxy::Port::try_from(3000).unwrap());

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "dev", "instance_id": "i1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["port"], 3001);
}

#[tokio::test]
async fn unknown_service_type_error_shape() {
    let app = spawn_app(Some(r#"{"auto_allocation": {"enabled": false}}"#), None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "grafana", "instance_id": "i1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["success"], false);
    assert_eq!(error["errorKind"], "unknownServiceType");
    assert!(error["error"].as_str().unwrap().contains("grafana"));
    assert!(error["hint"].as_str().unwrap().contains("service_type"));
}

#[tokio::test]
async fn dry_run_reserves_nothing() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({
            "service_type": "dev",
            "instance_id": "i1",
            "dry_run": true,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["port"], 3000);
    assert!(body.get("lock_id").is_none());

    let allocations: serde_json::Value = client
        .get(format!("{}/allocations", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(allocations["allocations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn singleton_reuse_over_http() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    let first: serde_json::Value = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "ai", "instance_id": "a"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "ai", "instance_id": "b"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["port"], 11430);
    assert_eq!(second["port"], 11430);
    assert_eq!(second["lock_id"], first["lock_id"]);
    assert_eq!(second["existing"], true);
}

#[tokio::test]
async fn scan_reports_each_port_in_the_window() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "dev", "instance_id": "i1"}))
        .send()
        .await
        .unwrap();

    let reports: serde_json::Value = client
        .get(format!("{}/scan?start=3000&end=3002", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0]["available"], false);
    assert_eq!(reports[1]["available"], true);
    assert_eq!(reports[2]["available"], true);
}

#[tokio::test]
async fn instance_registration_and_heartbeat() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    // No id: the daemon synthesizes one from the pid.
    let registered: serde_json::Value = client
        .post(format!("{}/instance/register", app.base))
        .json(&serde_json::json!({"pid": 4242, "working_directory": "/work/app"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registered["instance"]["instance_id"], "ldpreload-4242");

    let heartbeat: serde_json::Value = client
        .put(format!("{}/instance/ldpreload-4242/heartbeat", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(heartbeat["success"], true);

    let listing: serde_json::Value = client
        .get(format!("{}/instance/list", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["instances"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn suggest_falls_back_to_dev_for_unknown_types() {
    let app = spawn_app(Some(r#"{"auto_allocation": {"enabled": false}}"#), None).await;
    let client = reqwest::Client::new();

    let suggestions: serde_json::Value = client
        .get(format!("{}/suggest/never-heard-of-it?count=2", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(suggestions["fallback"], true);
    assert_eq!(suggestions["service_type"], "dev");
    assert_eq!(suggestions["ports"], serde_json::json!([3000, 3001]));
}

#[tokio::test]
async fn cleanup_endpoint_runs_a_sweep() {
    let app = spawn_app(
        Some(r#"{"recovery": {"health_monitoring": {"max_failures": 1}}}"#),
        None,
    )
    .await;
    let client = reqwest::Client::new();

    // No pid, port probes free: stale on the first sweep.
    client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "dev", "instance_id": "i1"}))
        .send()
        .await
        .unwrap();

    let report: serde_json::Value = client
        .post(format!("{}/cleanup", app.base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["checked"], 1);
    assert_eq!(report["released"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn auth_gates_everything_except_status_and_health() {
    let app = spawn_app(None, Some("sekrit")).await;
    let client = reqwest::Client::new();

    // Open endpoints work bare.
    for path in ["/status", "/health"] {
        let response = client
            .get(format!("{}{path}", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK, "{path}");
    }

    // Everything else rejects missing and wrong tokens.
    let bare = client
        .get(format!("{}/allocations", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(bare.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = client
        .get(format!("{}/allocations", app.base))
        .header("Authorization", "Bearer nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    let right = client
        .get(format!("{}/allocations", app.base))
        .header("Authorization", "Bearer sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(right.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn status_and_config_expose_daemon_state() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/allocate", app.base))
        .json(&serde_json::json!({"service_type": "dev", "instance_id": "i1"}))
        .send()
        .await
        .unwrap();

    let status: serde_json::Value = client
        .get(format!("{}/status", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["version"], "test");
    assert_eq!(status["allocation_count"], 1);
    assert_eq!(status["metrics"]["allocations_total"], 1);
    assert!(status["recovery"]["steps"].is_array());

    let config: serde_json::Value = client
        .get(format!("{}/config", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = config["service_types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"dev"));
    assert!(names.contains(&"ai"));
    assert_eq!(config["auto_allocation"]["default_chunk_size"], 10);
}

#[tokio::test]
async fn malformed_port_is_an_invalid_request() {
    let app = spawn_app(None, None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/check/0", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["errorKind"], "invalidRequest");
}
