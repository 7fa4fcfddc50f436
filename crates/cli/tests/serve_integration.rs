//! Integration tests for the `gatehouse serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with a
//! temporary configuration file, makes HTTP requests, and verifies the
//! responses.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Base port is derived from process ID so parallel test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

const CONFIG: &str = r#"
[server]
rescan_window_ms = 0

[[operators]]
token = "gate-token"
name = "Gate 1"
role = "security"

[[operators]]
token = "admin-token"
name = "Office"
role = "admin"

[[operators]]
token = "anil-token"
name = "Anil"
role = "resident"
flat_no = "A-101"

[[residents]]
flat_no = "A-101"
name = "Anil"

[[residents]]
flat_no = "B-202"
name = "Bina"
"#;

const GATE: &str = "gate-token";
const ADMIN: &str = "admin-token";
const ANIL: &str = "anil-token";

/// A running server, killed on drop.
struct Server {
    port: u16,
    child: Child,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn start_server(extra_args: &[&str]) -> Server {
    let port = next_port();
    let dir = TempDir::new().expect("temp dir");
    let config = dir.path().join("gatehouse.toml");
    std::fs::write(&config, CONFIG).expect("write config");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gatehouse"));
    cmd.arg("serve")
        .arg("--config")
        .arg(&config)
        .arg("--port")
        .arg(port.to_string())
        .args(extra_args)
        .env_remove("GATEHOUSE_PORT")
        .env_remove("GATEHOUSE_RATE_LIMIT")
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = cmd.spawn().expect("failed to start gatehouse serve");
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        port,
        child,
        _dir: dir,
    }
}

/// Send one request and return (status, parsed JSON body).
fn request(
    server: &Server,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> (u16, Value) {
    let mut stream =
        TcpStream::connect(format!("127.0.0.1:{}", server.port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\nConnection: close\r\n",
        method, path, server.port
    );
    if let Some(token) = token {
        head.push_str(&format!("Authorization: Bearer {}\r\n", token));
    }
    let body = body.unwrap_or("");
    if !body.is_empty() {
        head.push_str("Content-Type: application/json\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    stream.write_all(head.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    parse_http_response(&response)
}

fn get(server: &Server, path: &str, token: Option<&str>) -> (u16, Value) {
    request(server, "GET", path, token, None)
}

fn post(server: &Server, path: &str, token: Option<&str>, body: &Value) -> (u16, Value) {
    request(server, "POST", path, token, Some(&body.to_string()))
}

fn parse_http_response(response: &str) -> (u16, Value) {
    let (headers, body) = response.split_once("\r\n\r\n").unwrap_or((response, ""));
    let status = headers
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let body = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, body)
}

fn create_delivery(server: &Server, code: &str) -> Value {
    let (status, body) = post(
        server,
        "/entities",
        Some(ANIL),
        &json!({
            "variant": "delivery",
            "credential": code,
            "subject": {
                "delivery_person_name": "Raju",
                "phone": "+919876543210",
                "delivery_company": "Swiggy",
                "apartment": "A-101"
            }
        }),
    );
    assert_eq!(status, 201, "{body}");
    body["entity"].clone()
}

#[test]
fn health_needs_no_token() {
    let server = start_server(&[]);
    let (status, body) = get(&server, "/health", None);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body.get("version").is_some());
}

#[test]
fn machines_are_served() {
    let server = start_server(&[]);
    let (status, body) = get(&server, "/machines", None);
    assert_eq!(status, 200);
    assert_eq!(body["machines"].as_array().unwrap().len(), 5);
}

#[test]
fn missing_or_unknown_token_is_401() {
    let server = start_server(&[]);
    let verify = json!({"credential": "D-001", "variant": "delivery"});
    let (status, body) = post(&server, "/verify", None, &verify);
    assert_eq!(status, 401);
    assert_eq!(body["errorKind"], "Unauthenticated");

    let (status, _) = post(&server, "/verify", Some("stolen"), &verify);
    assert_eq!(status, 401);
}

#[test]
fn delivery_scan_flow_over_http() {
    let server = start_server(&[]);
    let entity = create_delivery(&server, "d-001");
    assert_eq!(entity["credential"], "D-001");
    assert_eq!(entity["status"], "pending");
    let id = entity["id"].as_str().unwrap().to_string();

    let scan = json!({"credential": "D-001", "variant": "delivery"});
    let (status, body) = post(&server, "/verify", Some(GATE), &scan);
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["entity"]["status"], "approved");
    assert!(body["message"].as_str().unwrap().contains("approved"));

    let (status, body) = post(&server, "/verify", Some(GATE), &scan);
    assert_eq!(status, 200);
    assert_eq!(body["entity"]["status"], "completed");

    let (status, body) = post(&server, "/verify", Some(GATE), &scan);
    assert_eq!(status, 409);
    assert_eq!(body["errorKind"], "AlreadyTerminal");

    let (status, body) = get(&server, &format!("/history/{}", id), Some(GATE));
    assert_eq!(status, 200);
    assert_eq!(body["entityId"], id.as_str());
    assert_eq!(body["consistent"], true);
    let steps: Vec<&str> = body["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["toStatus"].as_str().unwrap())
        .collect();
    assert_eq!(steps, ["approved", "completed"]);
}

#[test]
fn duplicate_code_is_409() {
    let server = start_server(&[]);
    create_delivery(&server, "D-200");
    let (status, body) = post(
        &server,
        "/entities",
        Some(ANIL),
        &json!({
            "variant": "delivery",
            "credential": "d-200",
            "subject": {
                "delivery_person_name": "Sunil",
                "phone": "+919876500000",
                "delivery_company": "Zepto",
                "apartment": "A-101"
            }
        }),
    );
    assert_eq!(status, 409);
    assert_eq!(body["errorKind"], "DuplicateCredential");
}

#[test]
fn visitor_needs_approval_before_scan() {
    let server = start_server(&[]);
    let (status, body) = post(
        &server,
        "/entities",
        Some(GATE),
        &json!({
            "variant": "visitor",
            "subject": {"name": "Ravi Kumar", "phone": "9876543210", "flat_no": "A-101"}
        }),
    );
    assert_eq!(status, 201, "{body}");
    let id = body["entity"]["id"].as_str().unwrap().to_string();
    let qr = body["entity"]["credential"].as_str().unwrap().to_string();

    let scan = json!({"credential": qr, "variant": "visitor"});
    let (status, body) = post(&server, "/verify", Some(GATE), &scan);
    assert_eq!(status, 409);
    assert_eq!(body["errorKind"], "IllegalTransition");

    let approve = json!({"action": "approve"});
    let path = format!("/entities/{}/transitions", id);
    let (status, body) = post(&server, &path, Some(ANIL), &approve);
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["entity"]["status"], "granted");

    let (status, body) = post(&server, "/verify", Some(GATE), &scan);
    assert_eq!(status, 200);
    assert_eq!(body["entity"]["status"], "checked_in");

    let (status, body) = post(
        &server,
        "/verify",
        Some(GATE),
        &json!({"credential": "VIS-UNKNOWN", "variant": "visitor"}),
    );
    assert_eq!(status, 404);
    assert_eq!(body["errorKind"], "NotFound");
}

#[test]
fn staff_block_is_admin_only() {
    let server = start_server(&[]);
    let (status, body) = post(
        &server,
        "/entities",
        Some(GATE),
        &json!({"variant": "staff", "credential": "S-42", "subject": {"name": "Meena"}}),
    );
    assert_eq!(status, 201, "{body}");
    let id = body["entity"]["id"].as_str().unwrap().to_string();
    let path = format!("/entities/{}/transitions", id);

    let (status, body) = post(&server, &path, Some(GATE), &json!({"action": "block"}));
    assert_eq!(status, 403);
    assert_eq!(body["errorKind"], "Unauthorized");

    let (status, body) = post(&server, &path, Some(ADMIN), &json!({"action": "block"}));
    assert_eq!(status, 200);
    assert_eq!(body["entity"]["blocked"], true);

    let (status, body) = post(
        &server,
        "/verify",
        Some(GATE),
        &json!({"credential": "s-42", "variant": "staff"}),
    );
    assert_eq!(status, 409);
    assert_eq!(body["errorKind"], "IllegalTransition");
}

#[test]
fn emergency_resolve_validates_text() {
    let server = start_server(&[]);
    let (status, body) = post(
        &server,
        "/entities",
        Some(ANIL),
        &json!({
            "variant": "emergency",
            "subject": {
                "alert_type": "Fire",
                "location": "Tower A lobby",
                "description": "Smoke from the electrical panel"
            }
        }),
    );
    assert_eq!(status, 201, "{body}");
    let id = body["entity"]["id"].as_str().unwrap().to_string();
    let path = format!("/entities/{}/transitions", id);

    let (status, body) = post(
        &server,
        &path,
        Some(GATE),
        &json!({"action": "resolve", "actionTaken": "ok"}),
    );
    assert_eq!(status, 422);
    assert_eq!(body["errorKind"], "ValidationError");

    let (status, body) = post(
        &server,
        &format!("/entities/{}/advance", id),
        Some(GATE),
        &json!({}),
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["entity"]["status"], "Processing");
}

#[test]
fn entity_crud_and_filters() {
    let server = start_server(&[]);
    let entity = create_delivery(&server, "D-300");
    let id = entity["id"].as_str().unwrap().to_string();
    let path = format!("/entities/{}", id);

    let (status, body) = request(
        &server,
        "PATCH",
        &path,
        Some(ANIL),
        Some(&json!({"subject": {"delivery_company": "Zepto"}}).to_string()),
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["entity"]["subjectInfo"]["delivery_company"], "Zepto");

    let (status, body) = get(&server, "/entities?variant=delivery&status=pending", Some(GATE));
    assert_eq!(status, 200);
    assert_eq!(body["entities"].as_array().unwrap().len(), 1);

    let (status, body) = get(&server, "/entities?variant=parcel", Some(GATE));
    assert_eq!(status, 422);
    assert_eq!(body["errorKind"], "ValidationError");

    let (status, body) = request(&server, "DELETE", &path, Some(ANIL), None);
    assert_eq!(status, 200);
    assert_eq!(body["deleted"], id.as_str());

    let (status, body) = get(&server, &path, Some(GATE));
    assert_eq!(status, 404);
    assert_eq!(body["errorKind"], "NotFound");
}

#[test]
fn changes_feed_pages() {
    let server = start_server(&[]);
    create_delivery(&server, "D-400");
    let scan = json!({"credential": "D-400", "variant": "delivery"});
    post(&server, "/verify", Some(GATE), &scan);
    post(&server, "/verify", Some(GATE), &scan);

    let (status, body) = get(&server, "/changes?since=0&limit=1", Some(GATE));
    assert_eq!(status, 200);
    assert_eq!(body["changes"].as_array().unwrap().len(), 1);
    assert_eq!(body["next"], 1);

    let (status, body) = get(&server, "/changes?since=1", Some(GATE));
    assert_eq!(status, 200);
    assert_eq!(body["changes"][0]["toStatus"], "completed");
    assert_eq!(body["next"], 2);
}

#[test]
fn malformed_body_is_validation_error() {
    let server = start_server(&[]);
    let (status, body) = request(&server, "POST", "/verify", Some(GATE), Some("{not json"));
    assert_eq!(status, 422);
    assert_eq!(body["errorKind"], "ValidationError");
}

#[test]
fn unknown_route_is_404() {
    let server = start_server(&[]);
    let (status, body) = get(&server, "/nowhere", Some(GATE));
    assert_eq!(status, 404);
    assert_eq!(body["errorKind"], "NotFound");
}

#[test]
fn rate_limit_returns_429() {
    let server = start_server(&["--rate-limit", "3"]);
    for _ in 0..3 {
        let (status, _) = get(&server, "/machines", None);
        assert_eq!(status, 200);
    }
    let (status, body) = get(&server, "/machines", None);
    assert_eq!(status, 429);
    assert_eq!(body["errorKind"], "RateLimited");

    let (status, _) = get(&server, "/health", None);
    assert_eq!(status, 200);
}
