use crate::config::{ConfigStore, KEY_DEVICE_NAME, KEY_RESTAURANT_ID};
use crate::discovery;
use crate::runtime_config::Supervisor;
use crate::transport::{os_spooler, tcp, usb};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Cap on a single inbound WS text frame. A frame at or over this size
/// cannot be a legitimate control message and is dropped like malformed
/// input: no reply, no disconnect.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct WsState {
    pub supervisor: Arc<Supervisor>,
    pub config_store: Arc<ConfigStore>,
    pub allowed_origins: Vec<String>,
    pub port: u16,
}

pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade_handler(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());

    if !origin_allowed(origin, &state.allowed_origins) {
        warn!(?origin, "rejected WebSocket upgrade: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Empty allow-list is permissive (logged as a warning on each rejection
/// check site, not here, since this runs on the hot accept path); localhost
/// is always permitted regardless of the configured list.
fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = origin else {
        return false;
    };
    if origin.starts_with("http://localhost:") || origin.starts_with("http://127.0.0.1:") {
        return true;
    }
    allowed.iter().any(|a| a == origin)
}

async fn handle_socket(mut socket: WebSocket, state: WsState) {
    info!("WebSocket client connected");

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };

        if text.len() >= MAX_FRAME_BYTES {
            debug!(len = text.len(), "dropped oversized WS frame");
            continue;
        }

        let Some(reply) = handle_frame(&text, &state).await else {
            continue;
        };

        let Ok(body) = serde_json::to_string(&reply) else {
            continue;
        };
        if socket.send(Message::Text(body)).await.is_err() {
            break;
        }
    }

    info!("WebSocket client disconnected");
}

/// Parse and dispatch one inbound frame. Returns `None` for frames that
/// should be silently dropped (non-JSON, or missing an integer `id`).
async fn handle_frame(text: &str, state: &WsState) -> Option<Value> {
    let parsed: Value = serde_json::from_str(text).ok()?;
    let id = parsed.get("id")?.as_i64()?;
    let command_type = parsed.get("type").and_then(Value::as_str).unwrap_or("");

    let result = dispatch(command_type, &parsed, state).await;
    Some(finish(id, result))
}

fn finish(id: i64, result: Result<Value, String>) -> Value {
    match result {
        Ok(mut body) => {
            let obj = body.as_object_mut().expect("command replies are objects");
            obj.insert("id".to_string(), json!(id));
            obj.insert("ok".to_string(), json!(true));
            body
        }
        Err(error) => json!({ "id": id, "ok": false, "error": error }),
    }
}

async fn dispatch(command_type: &str, frame: &Value, state: &WsState) -> Result<Value, String> {
    match command_type {
        "ping" => Ok(json!({})),
        "getInfo" => handle_get_info(state).await,
        "setRestaurantId" => handle_set_restaurant_id(frame, state).await,
        "printRawTcp" => handle_print_raw_tcp(frame).await,
        "discoverTcp9100" => handle_discover_tcp(frame).await,
        "discoverUsb" => handle_discover_usb().await,
        "printRawUsb" => handle_print_raw_usb(frame).await,
        "discoverOsPrinters" => handle_discover_os_printers().await,
        "printOs" => handle_print_os(frame).await,
        _ => Err("unknown type".to_string()),
    }
}

async fn handle_get_info(state: &WsState) -> Result<Value, String> {
    let local_ip = discovery::detect_local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let snapshot = state.supervisor.snapshot().await;

    let mut body = json!({ "localIp": local_ip, "port": state.port });
    if !snapshot.restaurant_id.is_empty() {
        body["restaurantId"] = json!(snapshot.restaurant_id);
    }
    Ok(body)
}

async fn handle_set_restaurant_id(frame: &Value, state: &WsState) -> Result<Value, String> {
    let restaurant_id = frame.get("restaurantId").and_then(Value::as_str).unwrap_or("");
    if restaurant_id.is_empty() {
        return Err("restaurantId is required".to_string());
    }
    let device_name = frame.get("deviceName").and_then(Value::as_str).unwrap_or("");

    let mut doc = state.config_store.load();
    doc.insert(KEY_RESTAURANT_ID.to_string(), json!(restaurant_id));
    if !device_name.is_empty() {
        doc.insert(KEY_DEVICE_NAME.to_string(), json!(device_name));
    }
    state
        .config_store
        .save(doc)
        .map_err(|e| e.to_string())?;

    let restaurant_id = restaurant_id.to_string();
    let device_name = device_name.to_string();
    state
        .supervisor
        .update(move |c| {
            c.restaurant_id = restaurant_id;
            if !device_name.is_empty() {
                c.device_name = device_name;
            }
        })
        .await;

    Ok(json!({}))
}

async fn handle_print_raw_tcp(frame: &Value) -> Result<Value, String> {
    let ip = frame.get("ip").and_then(Value::as_str).unwrap_or("");
    if ip.is_empty() {
        return Err("ip is required".to_string());
    }
    let port = frame.get("port").and_then(Value::as_u64).unwrap_or(9100) as u16;
    let data_b64 = frame.get("dataB64").and_then(Value::as_str).unwrap_or("");
    let bytes = BASE64.decode(data_b64).map_err(|_| "dataB64 is not valid base64".to_string())?;

    tcp::print_tcp(ip, port, &bytes).await.map_err(|e| e.to_string())?;
    Ok(json!({}))
}

async fn handle_discover_tcp(frame: &Value) -> Result<Value, String> {
    let port = frame.get("port").and_then(Value::as_u64).unwrap_or(9100) as u16;
    let result = discovery::scan_port(port).await.map_err(|e| e.to_string())?;
    Ok(json!({ "prefix": result.prefix, "ips": result.hits }))
}

async fn handle_discover_usb() -> Result<Value, String> {
    let records = tokio::task::spawn_blocking(usb::discover_usb)
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    serde_json::to_value(records).map_err(|e| e.to_string())
}

async fn handle_print_raw_usb(frame: &Value) -> Result<Value, String> {
    let vendor_id = frame.get("vendorId").and_then(Value::as_u64).ok_or("vendorId is required")? as u16;
    let product_id = frame.get("productId").and_then(Value::as_u64).ok_or("productId is required")? as u16;
    let bus_number = frame.get("busNumber").and_then(Value::as_u64).map(|v| v as u8);
    let device_address = frame.get("deviceAddress").and_then(Value::as_u64).map(|v| v as u8);
    let interface_number = frame.get("interface").and_then(Value::as_u64).unwrap_or(0) as u8;
    let out_endpoint = frame.get("outEndpoint").and_then(Value::as_u64).ok_or("outEndpoint is required")? as u8;
    let data_b64 = frame.get("dataB64").and_then(Value::as_str).unwrap_or("");
    let bytes = BASE64.decode(data_b64).map_err(|_| "dataB64 is not valid base64".to_string())?;

    let target = usb::UsbPrintTarget {
        vendor_id,
        product_id,
        bus_number,
        device_address,
        interface_number,
        out_endpoint,
    };

    tokio::task::spawn_blocking(move || usb::print_usb(&target, &bytes))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    Ok(json!({}))
}

async fn handle_discover_os_printers() -> Result<Value, String> {
    let records = os_spooler::discover_os_printers().await;
    serde_json::to_value(records).map_err(|e| e.to_string())
}

async fn handle_print_os(frame: &Value) -> Result<Value, String> {
    let printer_name = frame.get("printerName").and_then(Value::as_str).unwrap_or("");
    if printer_name.is_empty() {
        return Err("printerName is required".to_string());
    }
    let data_b64 = frame.get("dataB64").and_then(Value::as_str).unwrap_or("");
    let bytes = BASE64.decode(data_b64).map_err(|_| "dataB64 is not valid base64".to_string())?;

    os_spooler::print_os(printer_name, &bytes).await.map_err(|e| e.to_string())?;
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;

    fn test_state() -> WsState {
        WsState {
            supervisor: Arc::new(Supervisor::new(RuntimeConfig::default())),
            config_store: Arc::new(ConfigStore::at_path(
                tempfile::tempdir().unwrap().into_path().join("config.json"),
            )),
            allowed_origins: Vec::new(),
            port: 7171,
        }
    }

    #[test]
    fn empty_allow_list_accepts_any_origin() {
        assert!(origin_allowed(Some("https://example.com"), &[]));
        assert!(origin_allowed(None, &[]));
    }

    #[test]
    fn localhost_always_allowed() {
        let allowed = vec!["https://restaurant.example.com".to_string()];
        assert!(origin_allowed(Some("http://localhost:5173"), &allowed));
        assert!(origin_allowed(Some("http://127.0.0.1:3000"), &allowed));
    }

    #[test]
    fn non_listed_origin_rejected_when_list_is_non_empty() {
        let allowed = vec!["https://restaurant.example.com".to_string()];
        assert!(!origin_allowed(Some("https://evil.example.com"), &allowed));
        assert!(origin_allowed(Some("https://restaurant.example.com"), &allowed));
    }

    #[tokio::test]
    async fn ping_replies_ok() {
        let state = test_state();
        let reply = handle_frame(r#"{"id":1,"type":"ping"}"#, &state).await.unwrap();
        assert_eq!(reply, json!({"id": 1, "ok": true}));
    }

    #[tokio::test]
    async fn unknown_command_replies_with_error() {
        let state = test_state();
        let reply = handle_frame(r#"{"id":2,"type":"bogus"}"#, &state).await.unwrap();
        assert_eq!(reply, json!({"id": 2, "ok": false, "error": "unknown type"}));
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let state = test_state();
        assert!(handle_frame("not json", &state).await.is_none());
    }

    #[tokio::test]
    async fn missing_integer_id_is_dropped() {
        let state = test_state();
        assert!(handle_frame(r#"{"type":"ping"}"#, &state).await.is_none());
    }

    #[tokio::test]
    async fn set_restaurant_id_requires_non_empty_value() {
        let state = test_state();
        let reply = handle_frame(r#"{"id":3,"type":"setRestaurantId","restaurantId":""}"#, &state)
            .await
            .unwrap();
        assert_eq!(
            reply,
            json!({"id": 3, "ok": false, "error": "restaurantId is required"})
        );
    }

    #[tokio::test]
    async fn print_raw_tcp_delivers_bytes_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let state = test_state();
        let frame = json!({
            "id": 4,
            "type": "printRawTcp",
            "ip": addr.ip().to_string(),
            "port": addr.port(),
            "dataB64": "SGk="
        });
        let reply = handle_frame(&frame.to_string(), &state).await.unwrap();
        assert_eq!(reply, json!({"id": 4, "ok": true}));

        let received = server.await.unwrap();
        assert_eq!(received, b"Hi");
    }
}
