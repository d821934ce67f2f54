//! HTTP entry points: socket upgrades, request-response registration, the
//! binding QR code, and the flat query-string command surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use pulselink_core::{
    ClientRole, Event, EventKind, IdentityMinter, RawEvent, RelayError, SecureId,
};
use pulselink_settings::RelaySettings;

use crate::dispatch::Dispatcher;
use crate::qrcode;
use crate::registry::ClientRegistry;
use crate::session::serve_streaming;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub minter: Arc<IdentityMinter>,
    pub settings: Arc<RelaySettings>,
}

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    pub message: Option<String>,
}

/// `GET /app[/{id}]` — controller app socket.
pub async fn app_socket(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    path_id: Option<Path<String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade_streaming(ws, path_id, addr, state, ClientRole::AppClient)
}

/// `GET /ws[/{id}]` — third-party streaming socket.
pub async fn third_party_socket(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    path_id: Option<Path<String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade_streaming(ws, path_id, addr, state, ClientRole::ThirdPartyStreaming)
}

fn upgrade_streaming(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    path_id: Option<Path<String>>,
    addr: SocketAddr,
    state: AppState,
    role: ClientRole,
) -> Response {
    match ws {
        Ok(upgrade) => {
            if let Some(Path(id)) = path_id {
                tracing::debug!(role = role.label(), path_id = %id, "upgrade requested");
            }
            let insecure_id = state.minter.insecure_id(&addr.ip().to_string(), role);
            let registry = Arc::clone(&state.registry);
            let dispatcher = Arc::clone(&state.dispatcher);
            let reject_duplicate = state.settings.allow_insecure_client_id;
            upgrade
                .on_upgrade(move |socket| {
                    serve_streaming(socket, role, insecure_id, registry, dispatcher, reject_duplicate)
                })
                .into_response()
        }
        Err(rejection) => {
            tracing::info!(
                role = role.label(),
                error = %rejection,
                "not a websocket handshake, serving home page"
            );
            home_page(&state.settings).into_response()
        }
    }
}

/// `GET /` — plain landing page, also served when an upgrade fails.
pub async fn home(State(state): State<AppState>) -> Html<String> {
    home_page(&state.settings)
}

fn home_page(settings: &RelaySettings) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>pulselink</title></head>\n<body>\n\
         <h1>pulselink</h1>\n\
         <p>Control-plane relay on <code>{}</code>. Apps connect at <code>/app</code>,\n\
         third parties at <code>/ws</code> or via <code>/register</code>.</p>\n\
         </body>\n</html>\n",
        settings.host_name
    ))
}

/// `GET /register` — create a request-response session. The response body is
/// the same self-announce envelope a streaming session receives as its first
/// frame.
pub async fn register(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let insecure_id = state
        .minter
        .insecure_id(&addr.ip().to_string(), ClientRole::ThirdPartyRequestResponse);
    let secure_id = match state
        .registry
        .new_request_response_session(insecure_id, state.settings.allow_insecure_client_id)
    {
        Ok(id) => id,
        Err(err) => return fail("register", &err.to_string()),
    };
    tracing::info!(client_id = %secure_id, "registered request-response session");
    let announce = Event::BindToServer { client_id: secure_id };
    match announce.encode() {
        Ok(raw) => Json(raw).into_response(),
        Err(err) => fail("register", &err.to_string()),
    }
}

/// `GET /qrcode?clientId=` — JPEG binding code for the controller app.
pub async fn binding_qrcode(
    Query(query): Query<ClientQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let secure_id = match resolve_secure_id(query.client_id.as_deref(), &addr, &state) {
        Ok(id) => id,
        Err(err) => return fail("qrcode", &err.to_string()),
    };
    match qrcode::binding_qr_jpeg(&state.settings, &secure_id) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(err) => fail("qrcode", &err.to_string()),
    }
}

/// `GET /command?clientId=&message=` — dispatch a `msg`-type event from the
/// flat query string.
pub async fn command(
    Query(query): Query<ClientQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let secure_id = match resolve_secure_id(query.client_id.as_deref(), &addr, &state) {
        Ok(id) => id,
        Err(err) => return fail("command", &err.to_string()),
    };
    let message = match query.message {
        Some(message) if !message.is_empty() => message,
        _ => return fail("command", "no message provided"),
    };
    let raw = RawEvent {
        kind: EventKind::Msg,
        client_id: secure_id.as_str().to_owned(),
        target_id: String::new(),
        message,
    };
    dispatch_raw("command", &state, &raw)
}

/// `GET /heartbeat?clientId=` — dispatch a heartbeat.
pub async fn heartbeat(
    Query(query): Query<ClientQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let secure_id = match resolve_secure_id(query.client_id.as_deref(), &addr, &state) {
        Ok(id) => id,
        Err(err) => return fail("heartbeat", &err.to_string()),
    };
    let raw = RawEvent {
        kind: EventKind::Heartbeat,
        client_id: secure_id.as_str().to_owned(),
        target_id: String::new(),
        message: String::new(),
    };
    dispatch_raw("heartbeat", &state, &raw)
}

fn dispatch_raw(context: &str, state: &AppState, raw: &RawEvent) -> Response {
    let event = match Event::decode(raw) {
        Ok(event) => event,
        Err(err) => return fail(context, &err.to_string()),
    };
    if let Err(err) = state.dispatcher.process(&event) {
        return fail(context, &err.to_string());
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"code": 200, "message": "success"})),
    )
        .into_response()
}

/// Resolve the acting session: an explicit `clientId` must exist in the
/// registry; an absent one falls back to the caller's IP-derived identity
/// when the server permits it.
fn resolve_secure_id(
    explicit: Option<&str>,
    addr: &SocketAddr,
    state: &AppState,
) -> Result<SecureId, RelayError> {
    match explicit {
        Some(id) if !id.is_empty() => {
            let secure_id = SecureId::from_raw(id);
            state.registry.lookup_by_secure(&secure_id)?;
            Ok(secure_id)
        }
        _ => {
            if !state.settings.allow_insecure_client_id {
                return Err(RelayError::UnknownClient(
                    "no client ID provided and insecure client IDs are disabled on this server"
                        .to_owned(),
                ));
            }
            let insecure_id = state
                .minter
                .insecure_id(&addr.ip().to_string(), ClientRole::ThirdPartyRequestResponse);
            state
                .registry
                .lookup_by_insecure(&insecure_id)
                .map(|peer| peer.secure_id)
                .map_err(|_| {
                    RelayError::UnknownClient(
                        "no session matches your address; this can happen after an IP change"
                            .to_owned(),
                    )
                })
        }
    }
}

fn fail(context: &str, message: &str) -> Response {
    tracing::warn!(context = context, message = message, "request failed");
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"code": 400, "message": message})),
    )
        .into_response()
}
