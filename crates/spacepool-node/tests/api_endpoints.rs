// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use tokio::time::sleep;

fn unique_tmp(prefix: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("spacepool_e2e_{}_{}", prefix, nanos))
}

async fn wait_ready(client: &Client<hyper::client::HttpConnector>, addr: &str, secs: u64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(secs);
    loop {
        if Instant::now() > deadline {
            return false;
        }
        let uri: Uri = format!("http://{}/readyz", addr).parse().unwrap();
        match client.get(uri).await {
            Ok(resp) if resp.status() == StatusCode::OK => return true,
            _ => sleep(Duration::from_millis(100)).await,
        }
    }
}

#[tokio::test]
#[ignore]
async fn serve_pool_info_stats_and_partial_flow() {
    let data_dir = unique_tmp("data");
    std::fs::create_dir_all(&data_dir).expect("create data dir");

    let client: Client<hyper::client::HttpConnector> = Client::new();
    let bin = cargo_bin("spacepool-node");
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
        let p = l.local_addr().unwrap().port();
        drop(l);
        p
    };
    let addr = format!("127.0.0.1:{}", port);
    let mut child = Command::new(&bin)
        .arg("serve")
        .arg("--addr")
        .arg(&addr)
        .arg("--data-dir")
        .arg(data_dir.to_string_lossy().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn spacepool-node serve");

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        if Instant::now() > deadline {
            panic!("server not ready in time");
        }
        if let Ok(Some(status)) = child.try_wait() {
            panic!("serve exited early: {:?}", status);
        }
        if wait_ready(&client, &addr, 1).await {
            break;
        }
    }

    // pool_info
    let uri: Uri = format!("http://{}/pool_info", addr).parse().unwrap();
    let resp = client.get(uri).await.expect("pool_info resp");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["pool_name"], "SpacePool");
    assert!(info["pool_fee"].as_f64().unwrap() > 0.0);

    // stats (leer)
    let uri: Uri = format!("http://{}/stats", addr).parse().unwrap();
    let resp = client.get(uri).await.expect("stats resp");
    assert_eq!(resp.status(), StatusCode::OK);

    // Partial mit unbekanntem Singleton: wird angenommen (enqueue-Ack), der
    // Validator lehnt asynchron ab
    let partial = serde_json::json!({
        "launcher_id": "11".repeat(32),
        "challenge": "22".repeat(32),
        "proof": "33".repeat(64),
        "signature": "44".repeat(96),
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs(),
        "difficulty": 1000u64,
        "plot_size": 32u8,
    });
    let uri: Uri = format!("http://{}/partial", addr).parse().unwrap();
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri.clone())
        .header("content-type", "application/json")
        .body(Body::from(partial.to_string()))
        .unwrap();
    let resp = client.request(req).await.expect("partial resp");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let ack: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack["accepted"], true);

    // Kaputtes Hex → 400
    let bad = serde_json::json!({
        "launcher_id": "zz",
        "challenge": "22".repeat(32),
        "proof": "33".repeat(64),
        "signature": "44".repeat(96),
        "timestamp": 0u64,
        "difficulty": 1000u64,
        "plot_size": 32u8,
    });
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(bad.to_string()))
        .unwrap();
    let resp = client.request(req).await.expect("bad partial resp");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
#[ignore]
fn keygen_prints_keypair() {
    let out = Command::new(cargo_bin("spacepool-node"))
        .arg("keygen")
        .output()
        .expect("run keygen");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("secret_key="));
    assert!(stdout.contains("public_key="));
}

#[test]
fn invalid_config_exits_with_code_one() {
    let cfg = unique_tmp("cfg.toml");
    std::fs::write(&cfg, "pool_name = \"\"\npool_url = \"x\"\n").expect("write cfg");
    let out = Command::new(cargo_bin("spacepool-node"))
        .arg("serve")
        .arg("--config")
        .arg(cfg.to_string_lossy().to_string())
        .output()
        .expect("run serve");
    assert_eq!(out.status.code(), Some(1));
}
