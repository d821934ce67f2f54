//! End-to-end tests driving the relay with real WebSocket and HTTP clients.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use pulselink_server::{start, ServerHandle};
use pulselink_settings::RelaySettings;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot(allow_insecure: bool) -> ServerHandle {
    let settings = RelaySettings {
        port: 0, // random port
        allow_insecure_client_id: allow_insecure,
        ..RelaySettings::default()
    };
    start(settings).await.unwrap()
}

async fn connect(port: u16, path: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}{path}"))
        .await
        .unwrap();
    ws
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Open a streaming session and consume its self-announce frame.
async fn open_session(port: u16, path: &str) -> (WsStream, String) {
    let mut ws = connect(port, path).await;
    let announce = recv_json(&mut ws).await;
    assert_eq!(announce["type"], "bind");
    assert_eq!(announce["message"], "targetId");
    let id = announce["clientId"].as_str().unwrap().to_owned();
    (ws, id)
}

/// Bind a third party to an app over the third party's socket and consume
/// the result frames on both sides.
async fn bind_pair(app: &mut WsStream, app_id: &str, tp: &mut WsStream, tp_id: &str) {
    send_json(
        tp,
        json!({"type": "bind", "clientId": tp_id, "targetId": app_id, "message": "DGLAB"}),
    )
    .await;
    assert_eq!(recv_json(app).await["message"], "200");
    assert_eq!(recv_json(tp).await["message"], "200");
}

#[tokio::test]
async fn app_self_announce_is_the_first_frame() {
    let handle = boot(false).await;
    let mut ws = connect(handle.port, "/app").await;

    let announce = recv_json(&mut ws).await;
    assert_eq!(announce["type"], "bind");
    assert_eq!(announce["targetId"], "");
    assert_eq!(announce["message"], "targetId");
    assert!(!announce["clientId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn bind_happy_path_notifies_both_sides() {
    let handle = boot(false).await;
    let (mut app, app_id) = open_session(handle.port, "/app").await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;

    send_json(
        &mut tp,
        json!({"type": "bind", "clientId": tp_id, "targetId": app_id, "message": "DGLAB"}),
    )
    .await;

    let expected = json!({
        "type": "bind",
        "clientId": tp_id,
        "targetId": app_id,
        "message": "200",
    });
    assert_eq!(recv_json(&mut app).await, expected);
    assert_eq!(recv_json(&mut tp).await, expected);
}

#[tokio::test]
async fn bind_to_unknown_app_reports_400() {
    let handle = boot(false).await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;

    send_json(
        &mut tp,
        json!({"type": "bind", "clientId": tp_id, "targetId": "no-such-app", "message": "DGLAB"}),
    )
    .await;

    let result = recv_json(&mut tp).await;
    assert_eq!(result["type"], "bind");
    assert_eq!(result["message"], "400");
}

#[tokio::test]
async fn adjust_strength_is_forwarded_verbatim() {
    let handle = boot(false).await;
    let (mut app, app_id) = open_session(handle.port, "/app").await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;
    bind_pair(&mut app, &app_id, &mut tp, &tp_id).await;

    let envelope = json!({
        "type": "msg",
        "clientId": tp_id,
        "targetId": app_id,
        "message": "strength-1+2+30",
    });
    send_json(&mut tp, envelope.clone()).await;

    assert_eq!(recv_json(&mut app).await, envelope);
}

#[tokio::test]
async fn execute_pulse_is_forwarded_verbatim() {
    let handle = boot(false).await;
    let (mut app, app_id) = open_session(handle.port, "/app").await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;
    bind_pair(&mut app, &app_id, &mut tp, &tp_id).await;

    let envelope = json!({
        "type": "msg",
        "clientId": tp_id,
        "targetId": app_id,
        "message": "1:[\"0a0a0a0a14141414\"]",
    });
    send_json(&mut tp, envelope.clone()).await;

    assert_eq!(recv_json(&mut app).await, envelope);
}

#[tokio::test]
async fn report_strength_reaches_streaming_peer_only() {
    let handle = boot(false).await;
    let (mut app, app_id) = open_session(handle.port, "/app").await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;
    bind_pair(&mut app, &app_id, &mut tp, &tp_id).await;

    // A second, request-response third party bound to the same app. The bind
    // request arrives over the app's own socket, carrying the registered id.
    let registered: Value = reqwest::get(format!("http://127.0.0.1:{}/register", handle.port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rr_id = registered["clientId"].as_str().unwrap().to_owned();
    send_json(
        &mut app,
        json!({"type": "bind", "clientId": rr_id, "targetId": app_id, "message": "DGLAB"}),
    )
    .await;
    assert_eq!(recv_json(&mut app).await["message"], "200");

    // The report names the app's own id in the targetId slot.
    let envelope = json!({
        "type": "msg",
        "clientId": app_id,
        "targetId": app_id,
        "message": "strength-5+6+100+100",
    });
    send_json(&mut app, envelope.clone()).await;

    assert_eq!(recv_json(&mut tp).await, envelope);
}

#[tokio::test]
async fn disconnect_purges_the_session() {
    let handle = boot(false).await;
    let (mut app, app_id) = open_session(handle.port, "/app").await;
    let (mut tp, tp_id) = open_session(handle.port, "/ws").await;
    bind_pair(&mut app, &app_id, &mut tp, &tp_id).await;

    tp.close(None).await.unwrap();

    // Teardown runs after the close frame is processed; poll until the
    // third party's id stops resolving. The '+' separators are form-encoded.
    let url = format!(
        "http://127.0.0.1:{}/command?clientId={tp_id}&message=strength-1%2B2%2B10",
        handle.port
    );
    let mut purged = false;
    for _ in 0..50 {
        let status = reqwest::get(&url).await.unwrap().status();
        if status == 400 {
            purged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(purged, "expected lookups of the closed session to fail");
}

#[tokio::test]
async fn register_returns_the_announce_envelope() {
    let handle = boot(false).await;
    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/register", handle.port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["type"], "bind");
    assert_eq!(body["targetId"], "");
    assert_eq!(body["message"], "targetId");
    assert!(!body["clientId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn command_and_heartbeat_respond_with_code_envelopes() {
    let handle = boot(false).await;
    let base = format!("http://127.0.0.1:{}", handle.port);
    let registered: Value = reqwest::get(format!("{base}/register"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = registered["clientId"].as_str().unwrap();

    let resp = reqwest::get(format!("{base}/heartbeat?clientId={id}")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["code"], 200);

    // '+' separators must be form-encoded in the query string
    let resp = reqwest::get(format!("{base}/command?clientId={id}&message=strength-1%2B2%2B10"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Missing message
    let resp = reqwest::get(format!("{base}/command?clientId={id}")).await.unwrap();
    assert_eq!(resp.status(), 400);

    // Undecodable message
    let resp = reqwest::get(format!("{base}/command?clientId={id}&message=volume-9"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown client
    let resp = reqwest::get(format!("{base}/heartbeat?clientId=nope")).await.unwrap();
    assert_eq!(resp.status(), 400);

    // No client id while insecure ids are disabled
    let resp = reqwest::get(format!("{base}/heartbeat")).await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn qrcode_returns_a_jpeg() {
    let handle = boot(false).await;
    let base = format!("http://127.0.0.1:{}", handle.port);
    let registered: Value = reqwest::get(format!("{base}/register"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = registered["clientId"].as_str().unwrap();

    let resp = reqwest::get(format!("{base}/qrcode?clientId={id}")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn insecure_identity_resolves_and_rejects_duplicates() {
    let handle = boot(true).await;
    let base = format!("http://127.0.0.1:{}", handle.port);

    let resp = reqwest::get(format!("{base}/register")).await.unwrap();
    assert_eq!(resp.status(), 200);

    // Same address, no explicit id: resolved through the IP-derived identity.
    let resp = reqwest::get(format!("{base}/heartbeat")).await.unwrap();
    assert_eq!(resp.status(), 200);

    // A second registration from the same address is refused.
    let resp = reqwest::get(format!("{base}/register")).await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn duplicate_streaming_connection_is_refused_when_insecure_ids_are_on() {
    let handle = boot(true).await;
    let (_app, _app_id) = open_session(handle.port, "/app").await;

    let mut second = connect(handle.port, "/app").await;
    let refusal = recv_json(&mut second).await;
    assert_eq!(refusal["code"], 400);
}

#[tokio::test]
async fn non_upgrade_request_on_socket_route_serves_the_home_page() {
    let handle = boot(false).await;
    let resp = reqwest::get(format!("http://127.0.0.1:{}/app", handle.port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("pulselink"));
}
