#[allow(dead_code)]
mod common;

use clash_core::net::messages::{ClientEvent, SendChatMsg, ServerEvent};
use common::{TestServer, ws_connect_as, ws_read_event, ws_send};

#[tokio::test]
async fn health_and_ready() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["protocol"], 1);

    let resp = client
        .get(format!("{}/ready", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");
}

#[tokio::test]
async fn status_requires_bearer_token() {
    let server = TestServer::with_auth("s3cret").await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/status", server.base_url());

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(&url)
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(&url)
        .header("Authorization", "Bearer s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["rooms"]["rooms"], 0);
    assert!(body["games"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn presence_and_history_endpoints() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    let mut alice = ws_connect_as(&server, "alice").await;

    let body: serde_json::Value = client
        .get(format!("{}/api/v1/presence/alice", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["online"], true);

    ws_send(
        &mut alice,
        &ClientEvent::Message(SendChatMsg {
            to: "bob".to_string(),
            text: "ping".to_string(),
            sender: None,
        }),
    )
    .await;
    assert!(matches!(ws_read_event(&mut alice).await, ServerEvent::MessageSent(_)));

    let body: serde_json::Value = client
        .get(format!(
            "{}/api/v1/chat/history?userA=bob&userB=alice&limit=10",
            server.base_url()
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["threadKey"], "alice_bob");
    assert_eq!(body["messages"][0]["text"], "ping");
    assert_eq!(body["messages"][0]["status"], "sent");
}

#[tokio::test]
async fn history_without_users_is_rejected() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/api/v1/chat/history", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
