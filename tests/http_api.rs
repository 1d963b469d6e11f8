use anyhow::Result;
use serde_json::{Value, json};
use sheet_sweep::server::{ServerState, StatusResponse, serve};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::fake::FakeBackend;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

mod support;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(state: Arc<ServerState>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(serve(listener, state, async {
            let _ = rx.await;
        }));
        Ok(Self {
            addr,
            shutdown: Some(tx),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn status(client: &reqwest::Client, server: &TestServer) -> Result<StatusResponse> {
    Ok(client
        .get(server.url("/api/status"))
        .send()
        .await?
        .json()
        .await?)
}

/// Poll until the server reports nothing running; every observed status must be consistent.
async fn wait_until_idle(client: &reqwest::Client, server: &TestServer) -> Result<StatusResponse> {
    for _ in 0..400 {
        let current = status(client, server).await?;
        if !current.running {
            if current.total_replacements > 0 {
                assert!(current.report_path.is_some(), "idle without report: {current:?}");
            }
            return Ok(current);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("batch did not finish in time")
}

#[tokio::test]
async fn run_status_and_download_round() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let path = workspace.create_text_workbook("a.xlsx", &[("A1", "OldValue")]);
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator(2)),
    );
    let server = TestServer::start(state).await?;
    let client = reqwest::Client::new();

    let idle = status(&client, &server).await?;
    assert!(!idle.running);
    assert_eq!(idle.phase, "idle");

    let started: Value = client
        .post(server.url("/api/run"))
        .json(&json!({"search": "OldValue", "replace": "NewValue"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(started, json!({"status": "started"}));

    let finished = wait_until_idle(&client, &server).await?;
    assert_eq!(finished.phase, "done");
    assert_eq!(finished.processed_files, 1);
    assert_eq!(finished.total_files, 1);
    assert_eq!(finished.total_replacements, 1);
    assert_eq!(finished.progress, 100.0);
    assert_eq!(support::read_cell(&path, "Sheet1", "A1"), "NewValue");

    let report = finished.report_path.expect("report path");
    let download = client
        .get(server.url("/api/download"))
        .query(&[("path", report.to_string_lossy().as_ref())])
        .send()
        .await?;
    assert_eq!(download.status(), reqwest::StatusCode::OK);
    let disposition = download
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.starts_with("attachment;"), "{disposition}");
    let body = download.bytes().await?;
    assert!(String::from_utf8_lossy(&body).contains("OldValue,NewValue,Success"));
    Ok(())
}

#[tokio::test]
async fn empty_search_is_a_bad_request() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator(1)),
    );
    let server = TestServer::start(state).await?;

    let response = reqwest::Client::new()
        .post(server.url("/api/run"))
        .json(&json!({"search": ""}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "bad_request");
    Ok(())
}

#[tokio::test]
async fn second_run_while_busy_conflicts() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    for i in 0..4 {
        workspace.touch(&format!("slow_{i}.xlsx"));
    }
    let backend = Arc::new(
        FakeBackend::with_cells(&[(1, 1, "v")]).with_delay(Duration::from_millis(200)),
    );
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator_with(backend, 1)),
    );
    let server = TestServer::start(state).await?;
    let client = reqwest::Client::new();

    let first = client
        .post(server.url("/api/run"))
        .json(&json!({"search": "v", "replace": "w"}))
        .send()
        .await?;
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client
        .post(server.url("/api/run"))
        .json(&json!({"search": "v", "replace": "w"}))
        .send()
        .await?;
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    let finished = wait_until_idle(&client, &server).await?;
    assert_eq!(finished.processed_files, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_status_means_the_report_is_ready() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let addresses: Vec<String> = (1..=300).map(|row| format!("A{row}")).collect();
    let cells: Vec<(&str, &str)> = addresses
        .iter()
        .map(|address| (address.as_str(), "OldValue"))
        .collect();
    workspace.create_text_workbook("big.xlsx", &cells);
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator(1)),
    );
    let server = TestServer::start(state).await?;
    let client = reqwest::Client::new();

    let first = client
        .post(server.url("/api/run"))
        .json(&json!({"search": "OldValue", "replace": "NewValue"}))
        .send()
        .await?;
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let finished = wait_until_idle(&client, &server).await?;
    assert_eq!(finished.phase, "done");
    assert_eq!(finished.total_replacements, 300);
    assert!(finished.report_path.is_some());

    // Idle means a new batch is accepted right away.
    let again = client
        .post(server.url("/api/run"))
        .json(&json!({"search": "NewValue", "search_only": true}))
        .send()
        .await?;
    assert_eq!(again.status(), reqwest::StatusCode::OK);
    let second = wait_until_idle(&client, &server).await?;
    assert_eq!(second.total_replacements, 300);
    Ok(())
}

#[tokio::test]
async fn download_refuses_unknown_paths() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let secret = workspace.touch("secret.csv");
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator(1)),
    );
    let server = TestServer::start(state).await?;

    let response = reqwest::Client::new()
        .get(server.url("/api/download"))
        .query(&[("path", secret.to_string_lossy().as_ref())])
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn missing_directory_is_a_bad_request() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let state = ServerState::with_coordinator(
        workspace.config(),
        Arc::new(workspace.coordinator(1)),
    );
    let server = TestServer::start(state).await?;

    let response = reqwest::Client::new()
        .post(server.url("/api/run"))
        .json(&json!({"search": "x", "dir": "no/such/dir"}))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    Ok(())
}
