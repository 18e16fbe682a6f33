#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

pub const PAGE_ID: &str = "page-rust";
pub const SUMMARY_TEXT: &str = "Ownership moves values by default while borrowing lends access.";
pub const ACTIONS_JSON: &str = r#"{"action_items":[{"text":"Rewatch the borrowing video","priority":"high","category":"study"}]}"#;
pub const INSIGHTS_JSON: &str = r#"{"key_insights":["Values move by default."]}"#;

/// One tiny_http server standing in for both the Notion and Responses APIs.
#[derive(Debug, Clone, Default)]
pub struct StubConfig {
    /// Page id to title.
    pub pages: HashMap<String, String>,
    /// Node id to its direct children, as Notion block JSON.
    pub children: HashMap<String, Vec<Value>>,
    /// Nodes whose children endpoint always answers 500.
    pub failing_nodes: HashSet<String>,
    /// Models answered with 429 insufficient_quota.
    pub quota_models: HashSet<String>,
    /// Nodes whose children endpoint never advances past the first page's
    /// cursor and always claims `has_more`.
    pub stuck_cursor_nodes: HashSet<String>,
}

impl StubConfig {
    pub fn failing(mut self, node_id: &str) -> Self {
        self.failing_nodes.insert(node_id.to_owned());
        self
    }

    pub fn stuck_cursor(mut self, node_id: &str) -> Self {
        self.stuck_cursor_nodes.insert(node_id.to_owned());
        self
    }

    pub fn out_of_quota(mut self, model: &str) -> Self {
        self.quota_models.insert(model.to_owned());
        self
    }
}

pub fn block(id: &str, tag: &str, text: &str, has_children: bool) -> Value {
    serde_json::json!({
        "object": "block",
        "id": id,
        "type": tag,
        "has_children": has_children,
        "last_edited_time": "2026-03-01T10:00:00.000Z",
        tag: {
            "rich_text": [{ "type": "text", "plain_text": text }]
        }
    })
}

/// The course page used across the HTTP tests: two module toggles holding
/// video toggles, one collapsed, plus a glossary toggle.
pub fn course_workspace() -> StubConfig {
    let mut config = StubConfig::default();
    config
        .pages
        .insert(PAGE_ID.to_owned(), "Rust course notes".to_owned());
    let mut children = |id: &str, blocks: Vec<Value>| {
        config.children.insert(id.to_owned(), blocks);
    };
    children(
        PAGE_ID,
        vec![
            block("m1", "toggle", "Module 1: Ownership", true),
            block("m2", "toggle", "Module 2: Traits", true),
            block("glossary", "toggle", "Glossary", true),
        ],
    );
    children(
        "m1",
        vec![
            block(
                "m1p",
                "paragraph",
                "Ownership is the core idea that makes Rust memory safe without a garbage collector.",
                false,
            ),
            block("v1", "toggle", "Video: Moves and copies", true),
            block("v2", "toggle", "Video: Borrowing", false),
        ],
    );
    children(
        "v1",
        vec![block(
            "v1p",
            "paragraph",
            "This lecture explains move semantics with an example. Important: values are moved by default, and Copy types are duplicated instead.",
            false,
        )],
    );
    children(
        "m2",
        vec![block("v3", "toggle", "Video: Trait objects", true)],
    );
    children(
        "v3",
        vec![block(
            "v3p",
            "paragraph",
            "Trait objects enable dynamic dispatch through a vtable; prefer generics when the type is known at compile time.",
            false,
        )],
    );
    children(
        "glossary",
        vec![block(
            "gp",
            "paragraph",
            "Lifetime: the region of code for which a reference is valid.",
            false,
        )],
    );
    config
}

#[derive(Debug, Default)]
struct Recorded {
    models: Vec<String>,
    children_requests: Vec<String>,
}

pub struct ApiStub {
    pub base_url: String,
    recorded: Arc<Mutex<Recorded>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ApiStub {
    pub fn spawn(config: StubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start api stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_recorded = Arc::clone(&recorded);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = url::Url::parse(&format!("http://stub{}", request.url()))
                    .expect("parse request url");
                let segments = url
                    .path_segments()
                    .map(|s| s.map(str::to_owned).collect::<Vec<_>>())
                    .unwrap_or_default();
                let segments = segments.iter().map(String::as_str).collect::<Vec<_>>();

                let method = request.method().clone();
                let (status, body) = match (&method, segments.as_slice()) {
                    (tiny_http::Method::Get, ["v1", "pages", page_id]) => {
                        page_response(&config, page_id)
                    }
                    (tiny_http::Method::Get, ["v1", "blocks", node_id, "children"]) => {
                        if let Ok(mut recorded) = thread_recorded.lock() {
                            recorded.children_requests.push(request.url().to_owned());
                        }
                        children_response(&config, node_id, &url)
                    }
                    (tiny_http::Method::Post, ["v1", "responses"]) => {
                        let mut raw = String::new();
                        if request.as_reader().read_to_string(&mut raw).is_err() {
                            (400, serde_json::json!({ "message": "invalid request body" }))
                        } else {
                            responses_response(&config, &thread_recorded, &raw)
                        }
                    }
                    _ => (404, serde_json::json!({ "message": "not found" })),
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(body.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            recorded,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Models named by every Responses call, in arrival order.
    pub fn models(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.models.clone())
            .unwrap_or_default()
    }

    pub fn children_requests(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.children_requests.clone())
            .unwrap_or_default()
    }
}

impl Drop for ApiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn page_response(config: &StubConfig, page_id: &str) -> (u16, Value) {
    let Some(title) = config.pages.get(page_id) else {
        return (404, serde_json::json!({ "message": "page not found" }));
    };
    (
        200,
        serde_json::json!({
            "object": "page",
            "id": page_id,
            "last_edited_time": "2026-03-01T10:00:00.000Z",
            "properties": {
                "Name": {
                    "type": "title",
                    "title": [{ "type": "text", "plain_text": title }]
                }
            }
        }),
    )
}

fn children_response(config: &StubConfig, node_id: &str, url: &url::Url) -> (u16, Value) {
    if config.failing_nodes.contains(node_id) {
        return (500, serde_json::json!({ "message": "internal error" }));
    }

    let query = url.query_pairs().collect::<HashMap<_, _>>();
    let page_size = query
        .get("page_size")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(100)
        .max(1);
    let start = query
        .get("start_cursor")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let all = config.children.get(node_id).cloned().unwrap_or_default();
    let end = (start + page_size).min(all.len());
    let results = all.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
    let (has_more, next_cursor) = if config.stuck_cursor_nodes.contains(node_id) {
        (true, Value::String(page_size.to_string()))
    } else if end < all.len() {
        (true, Value::String(end.to_string()))
    } else {
        (false, Value::Null)
    };

    (
        200,
        serde_json::json!({
            "object": "list",
            "results": results,
            "has_more": has_more,
            "next_cursor": next_cursor,
        }),
    )
}

fn responses_response(
    config: &StubConfig,
    recorded: &Mutex<Recorded>,
    raw: &str,
) -> (u16, Value) {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return (400, serde_json::json!({ "message": "invalid json" }));
    };
    let model = parsed
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    if let Ok(mut recorded) = recorded.lock() {
        recorded.models.push(model.clone());
    }

    if config.quota_models.contains(&model) {
        return (
            429,
            serde_json::json!({
                "error": {
                    "message": "You exceeded your current quota.",
                    "type": "insufficient_quota",
                    "code": "insufficient_quota"
                }
            }),
        );
    }

    let instructions = parsed
        .get("instructions")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let output_text = if instructions.contains("action_items") {
        ACTIONS_JSON
    } else if instructions.contains("key_insights") {
        INSIGHTS_JSON
    } else {
        SUMMARY_TEXT
    };

    (
        200,
        serde_json::json!({
            "id": "resp_stub",
            "object": "response",
            "model": model,
            "output": [
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [
                        { "type": "output_text", "text": output_text }
                    ]
                }
            ],
            "output_text": output_text
        }),
    )
}
