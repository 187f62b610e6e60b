//! End-to-End Tests
//!
//! Real storage nodes and a gateway on loopback ports, driven over HTTP:
//! - Round-robin placement and per-user isolation
//! - Streaming round trip with headers
//! - Client, auth and backend failures map to the right status
//! - Records survive a gateway restart

use std::path::Path;
use std::sync::Arc;

use fileshard::http_server::{GatewayConfig, GatewayServer, GatewayState, NodeConfig, NodeServer};
use reqwest::{multipart, Client, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// =============================================================================
// Test Utilities
// =============================================================================

async fn spawn_node(storage_dir: &Path, max_file_size: u64) -> String {
    let server = NodeServer::new(NodeConfig {
        storage_dir: storage_dir.to_path_buf(),
        max_file_size,
        ..NodeConfig::default()
    })
    .expect("node starts");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(server.serve(listener));
    address
}

struct Gateway {
    url: String,
    state: Arc<GatewayState>,
    task: JoinHandle<()>,
}

async fn spawn_gateway(data_dir: &Path, backends: Vec<String>) -> Gateway {
    let config = GatewayConfig {
        backends,
        data_dir: data_dir.to_path_buf(),
        jwt_secret: "end-to-end-secret".to_string(),
        ..GatewayConfig::default()
    };
    let server = GatewayServer::new(config).expect("gateway starts");
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    Gateway { url, state, task }
}

/// Three nodes plus a gateway, all rooted in one temp dir
async fn cluster(temp: &TempDir) -> Gateway {
    let mut backends = Vec::new();
    for i in 0..3 {
        backends.push(spawn_node(&temp.path().join(format!("node{}", i)), 1024 * 1024).await);
    }
    spawn_gateway(&temp.path().join("gateway"), backends).await
}

async fn login(client: &Client, url: &str, username: &str) -> String {
    let credentials = serde_json::json!({ "username": username, "password": "hunter2" });
    let response = client
        .post(format!("{}/register", url))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = client
        .post(format!("{}/login", url))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn upload(
    client: &Client,
    url: &str,
    token: &str,
    name: &str,
    content_type: &str,
    data: &[u8],
) -> reqwest::Response {
    let part = multipart::Part::bytes(data.to_vec())
        .file_name(name.to_string())
        .mime_str(content_type)
        .unwrap();
    client
        .post(format!("{}/upload", url))
        .bearer_auth(token)
        .multipart(multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap()
}

async fn upload_ok(client: &Client, url: &str, token: &str, name: &str, data: &[u8]) -> String {
    let response = upload(client, url, token, name, "text/plain", data).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    body["fileId"].as_str().unwrap().to_string()
}

async fn list(client: &Client, url: &str, token: &str) -> Vec<Value> {
    let response = client
        .get(format!("{}/files", url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

fn names(files: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = files
        .iter()
        .map(|f| f["originalName"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Placement and isolation
// =============================================================================

#[tokio::test]
async fn test_round_robin_scenario() {
    let temp = TempDir::new().unwrap();
    let gateway = cluster(&temp).await;
    let client = Client::new();
    let u1 = login(&client, &gateway.url, "u1").await;
    let u2 = login(&client, &gateway.url, "u2").await;

    let mut ids = Vec::new();
    for (name, data) in [("a.txt", "A"), ("b.txt", "BB"), ("c.txt", "CCC"), ("d.txt", "DDDD")] {
        ids.push(upload_ok(&client, &gateway.url, &u1, name, data.as_bytes()).await);
    }

    let placement: Vec<usize> = ids
        .iter()
        .map(|id| gateway.state.proxy.directory().get(id).unwrap().location.backend)
        .collect();
    assert_eq!(placement, vec![0, 1, 2, 0]);

    assert_eq!(names(&list(&client, &gateway.url, &u1).await), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
    assert!(list(&client, &gateway.url, &u2).await.is_empty());

    // Another user's file is indistinguishable from a missing one.
    let response = client
        .get(format!("{}/file/{}", gateway.url, ids[0]))
        .bearer_auth(&u2)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .delete(format!("{}/file/{}", gateway.url, ids[1]))
        .bearer_auth(&u1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["fileId"], ids[1].as_str());

    assert_eq!(names(&list(&client, &gateway.url, &u1).await), vec!["a.txt", "c.txt", "d.txt"]);

    let response = client
        .get(format!("{}/file/{}", gateway.url, ids[1]))
        .bearer_auth(&u1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The blob is gone from node 1 too.
    assert!(!temp.path().join("node1").join(&ids[1]).exists());

    let metrics: Value = client
        .get(format!("{}/metrics", gateway.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["uploads"], 4);
    assert_eq!(metrics["deletes"], 1);
    assert_eq!(metrics["backend_assignments"], serde_json::json!([2, 1, 1]));
}

#[tokio::test]
async fn test_download_round_trip() {
    let temp = TempDir::new().unwrap();
    let gateway = cluster(&temp).await;
    let client = Client::new();
    let token = login(&client, &gateway.url, "alice").await;

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let response = upload(&client, &gateway.url, &token, "résumé.bin", "application/pdf", &data).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let file_id = response.json::<Value>().await.unwrap()["fileId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = client
        .get(format!("{}/file/{}", gateway.url, file_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "application/pdf");
    assert_eq!(headers["content-length"], data.len().to_string().as_str());
    let disposition = headers["content-disposition"].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"r_sum_.bin\""));
    assert!(disposition.contains("filename*=UTF-8''r%C3%A9sum%C3%A9.bin"));

    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), data.as_slice());

    let files = list(&client, &gateway.url, &token).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["size"], data.len() as u64);
    assert_eq!(files[0]["contentType"], "application/pdf");
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_client_errors() {
    let temp = TempDir::new().unwrap();
    let gateway = cluster(&temp).await;
    let client = Client::new();
    let token = login(&client, &gateway.url, "bob").await;

    // Multipart without a file field
    let response = client
        .post(format!("{}/upload", gateway.url))
        .bearer_auth(&token)
        .multipart(multipart::Form::new().text("note", "no file here"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);

    // File name too long to record
    let long_name = format!("{}.txt", "n".repeat(2000));
    let response = upload(&client, &gateway.url, &token, &long_name, "text/plain", b"x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // No token
    let part = multipart::Part::bytes(b"x".to_vec()).file_name("x.txt");
    let response = client
        .post(format!("{}/upload", gateway.url))
        .multipart(multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong password
    let response = client
        .post(format!("{}/login", gateway.url))
        .json(&serde_json::json!({ "username": "bob", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Duplicate username
    let response = client
        .post(format!("{}/register", gateway.url))
        .json(&serde_json::json!({ "username": "bob", "password": "other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(gateway.state.proxy.directory().is_empty());
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let temp = TempDir::new().unwrap();

    // Bind then release a port so nothing is listening on it.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let gateway = spawn_gateway(temp.path(), vec![dead.clone()]).await;
    let client = Client::new();
    let token = login(&client, &gateway.url, "carol").await;

    let response = upload(&client, &gateway.url, &token, "a.txt", "text/plain", b"hello").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 502);
    assert_eq!(body["operation"], "store");

    assert!(gateway.state.proxy.directory().is_empty());
    assert!(list(&client, &gateway.url, &token).await.is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let temp = TempDir::new().unwrap();
    let node = spawn_node(&temp.path().join("node"), 16).await;
    let gateway = spawn_gateway(&temp.path().join("gateway"), vec![node]).await;
    let client = Client::new();
    let token = login(&client, &gateway.url, "dave").await;

    let response = upload(&client, &gateway.url, &token, "big.bin", "application/octet-stream", &[7u8; 64]).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(gateway.state.proxy.directory().is_empty());

    let _ = upload_ok(&client, &gateway.url, &token, "small.txt", b"fits").await;
    assert_eq!(gateway.state.proxy.directory().len(), 1);
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
async fn test_records_survive_gateway_restart() {
    let temp = TempDir::new().unwrap();
    let mut backends = Vec::new();
    for i in 0..3 {
        backends.push(spawn_node(&temp.path().join(format!("node{}", i)), 1024 * 1024).await);
    }
    let data_dir = temp.path().join("gateway");
    let client = Client::new();

    let gateway = spawn_gateway(&data_dir, backends.clone()).await;
    let token = login(&client, &gateway.url, "erin").await;
    let first = upload_ok(&client, &gateway.url, &token, "one.txt", b"first").await;
    let second = upload_ok(&client, &gateway.url, &token, "two.txt", b"second").await;

    gateway.task.abort();
    let _ = gateway.task.await;
    drop(gateway.state);

    let gateway = spawn_gateway(&data_dir, backends).await;

    // Signing key and users carry over, so the old token is still valid.
    assert_eq!(names(&list(&client, &gateway.url, &token).await), vec!["one.txt", "two.txt"]);

    for (id, expected) in [(&first, &b"first"[..]), (&second, &b"second"[..])] {
        let body = client
            .get(format!("{}/file/{}", gateway.url, id))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body.as_ref(), expected);
    }

    // Login against the reopened user store
    let response = client
        .post(format!("{}/login", gateway.url))
        .json(&serde_json::json!({ "username": "erin", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
