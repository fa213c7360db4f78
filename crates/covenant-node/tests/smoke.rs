//! End-to-end smoke test for covenant-node.
//!
//! Starts a real node process with a fresh, empty registry and exercises
//! the RPC surface: auth enforcement, chain/masternode read methods, and
//! peer/ban bookkeeping.
//!
//! Run with:
//!   cargo test -p covenant-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_node(data_dir: &PathBuf, rpc_port: u16, p2p_port: u16, bootstrap: Option<&str>) -> Child {
    let node_bin = env!("CARGO_BIN_EXE_covenant-node");
    let mut cmd = Command::new(node_bin);
    cmd.args([
        "--datadir", data_dir.to_str().unwrap(),
        "--rpc-port", &rpc_port.to_string(),
        "--p2p-listen", &format!("/ip4/127.0.0.1/tcp/{}", p2p_port),
        "--rpc-user", "rpcuser",
        "--rpc-password", "a-reasonably-long-test-password",
    ]);
    if let Some(bs) = bootstrap {
        cmd.args(["--bootstrap", bs]);
    }
    cmd.stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn covenant-node")
}

// ── RPC helpers ───────────────────────────────────────────────────────────────

fn basic_auth_header(user: &str, pass: &str) -> String {
    use base64::Engine;
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}")))
}

async fn rpc_call_raw(
    client: &reqwest::Client,
    url: &str,
    auth: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> reqwest::Response {
    let body = serde_json::json!({ "method": method, "params": params, "id": 1 });
    let mut req = client.post(url).json(&body);
    if let Some(a) = auth {
        req = req.header("Authorization", a);
    }
    req.send().await.unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"))
}

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    auth: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = rpc_call_raw(client, url, Some(auth), method, params).await;
    let json: serde_json::Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        if !err.is_null() {
            panic!("RPC error from {method}: {err}");
        }
    }
    json["result"].clone()
}

/// Poll until the RPC server responds or the timeout elapses.
async fn wait_for_rpc(client: &reqwest::Client, url: &str, auth: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let resp = rpc_call_raw(client, url, Some(auth), "getblockcount", serde_json::json!([])).await;
        if resp.status().is_success() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_rpc_surface() {
    let data_dir = std::env::temp_dir().join(format!("covenant_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let rpc_port = free_port();
    let p2p_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{}", rpc_port);
    let auth = basic_auth_header("rpcuser", "a-reasonably-long-test-password");

    let child = spawn_node(&data_dir, rpc_port, p2p_port, None);
    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, &auth, Duration::from_secs(20)).await,
        "covenant-node did not become ready within 20 seconds"
    );

    // ── Auth is enforced ───────────────────────────────────────────────────────
    let unauth = rpc_call_raw(&http, &rpc_url, None, "getblockcount", serde_json::json!([])).await;
    assert_eq!(unauth.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = basic_auth_header("rpcuser", "wrong-password");
    let wrong_resp = rpc_call_raw(&http, &rpc_url, Some(&wrong), "getblockcount", serde_json::json!([])).await;
    assert_eq!(wrong_resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    // ── Fresh registry is empty ────────────────────────────────────────────────
    let count = rpc_call(&http, &rpc_url, &auth, "masternode", serde_json::json!(["count"])).await;
    assert_eq!(count["total"], 0);
    assert_eq!(count["enabled"], 0);

    let list = rpc_call(&http, &rpc_url, &auth, "masternodelist", serde_json::json!([])).await;
    assert!(list.as_array().unwrap().is_empty());

    // ── Chain collaborator reads ───────────────────────────────────────────────
    let height = rpc_call(&http, &rpc_url, &auth, "getblockcount", serde_json::json!([])).await;
    assert_eq!(height, 0);

    // ── Peer/ban bookkeeping round-trips ───────────────────────────────────────
    rpc_call(&http, &rpc_url, &auth, "addnode", serde_json::json!(["10.0.0.5:9999", "add"])).await;
    let peers = rpc_call(&http, &rpc_url, &auth, "getpeerinfo", serde_json::json!([])).await;
    assert_eq!(peers.as_array().unwrap().len(), 1);

    rpc_call(&http, &rpc_url, &auth, "setban", serde_json::json!(["10.1.0.0/16", "add"])).await;
    let banned = rpc_call(&http, &rpc_url, &auth, "listbanned", serde_json::json!([])).await;
    assert_eq!(banned.as_array().unwrap().len(), 1);

    rpc_call(&http, &rpc_url, &auth, "clearbanned", serde_json::json!([])).await;
    let banned_after = rpc_call(&http, &rpc_url, &auth, "listbanned", serde_json::json!([])).await;
    assert!(banned_after.as_array().unwrap().is_empty());

    // ── Unknown method surfaces as 404 / method-not-found ──────────────────────
    let missing = rpc_call_raw(&http, &rpc_url, Some(&auth), "notarealmethod", serde_json::json!([])).await;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
