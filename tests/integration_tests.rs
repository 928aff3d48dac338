//! Integration tests for the lambda-dev emulator.

use lambda_dev::build::{BundleStats, BundlerError, ModuleStats, OutputFileSystem, WatchStream};
use lambda_dev::prelude::*;
use parking_lot::Mutex;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CALLBACK_FN: &str = r#"
exports.handler = function (event, context, callback) {
  callback(null, { statusCode: 200, headers: { "x-a": "1" }, body: "ok" });
};
"#;

const PROMISE_FN: &str = r#"
exports.handler = function (event) {
  return Promise.resolve({ statusCode: 200, headers: { "x-a": "1" }, body: "ok" });
};
"#;

fn write_function(dir: &Path, name: &str, source: &str) {
    fs::write(dir.join(name), source).unwrap();
}

fn config_for(dir: &Path) -> DevConfig {
    DevConfig::new()
        .entry(dir)
        .base_path("/api")
        .host("127.0.0.1")
        .port(0)
        .watch(false)
}

async fn start(server: DevServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

async fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).to_string();

    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let mut lines = head.lines();
    let status = lines
        .next()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    RawResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

async fn get(router: &Router, path: &str) -> HttpResponse {
    router
        .dispatch(HttpRequest::new(hyper::Method::GET, path))
        .await
}

#[tokio::test]
async fn test_end_to_end_get() {
    let dir = tempfile::tempdir().unwrap();
    write_function(
        dir.path(),
        "a.js",
        r#"
        exports.handler = function (event, context, callback) {
          callback(null, {
            statusCode: 201,
            headers: { "x-fn": "a", "x-method": event.httpMethod },
            body: "hello " + event.path + " " + event.queryStringParameters.name,
          });
        };
        "#,
    );

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let server = DevServer::create(config, entries).await.unwrap();
    assert_eq!(server.router().paths(), vec!["/api/a"]);

    let addr = start(server).await;
    let res = send(addr, "GET", "/api/a?name=world", "").await;

    assert_eq!(res.status, 201);
    assert_eq!(res.header("x-fn"), Some("a"));
    assert_eq!(res.header("x-method"), Some("GET"));
    assert_eq!(res.body, "hello /api/a world");
}

#[tokio::test]
async fn test_post_body_reaches_function() {
    let dir = tempfile::tempdir().unwrap();
    write_function(
        dir.path(),
        "echo.js",
        r#"
        exports.handler = async (event) => ({
          statusCode: 200,
          body: event.body.toUpperCase(),
        });
        "#,
    );

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let addr = start(DevServer::create(config, entries).await.unwrap()).await;

    let res = send(addr, "POST", "/api/echo", "ping").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "PING");
}

#[tokio::test]
async fn test_system_responses() {
    let dir = tempfile::tempdir().unwrap();
    write_function(dir.path(), "a.js", CALLBACK_FN);

    let mut config = config_for(dir.path());
    config.max_body_size = 4;
    let entries = config.entries().unwrap();
    let addr = start(DevServer::create(config, entries).await.unwrap()).await;

    let health = send(addr, "GET", "/_health", "").await;
    assert_eq!(health.status, 200);
    assert_eq!(health.body, "OK");

    let missing = send(addr, "GET", "/api/nope", "").await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body, "Cannot GET /api/nope");

    let too_large = send(addr, "POST", "/api/a", "0123456789").await;
    assert_eq!(too_large.status, 413);
}

#[tokio::test]
async fn test_callback_and_promise_parity() {
    let dir = tempfile::tempdir().unwrap();
    write_function(dir.path(), "cb.js", CALLBACK_FN);
    write_function(dir.path(), "promise.js", PROMISE_FN);

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let server = DevServer::create(config, entries).await.unwrap();
    let router = server.router();

    let callback = get(&router, "/api/cb").await;
    let promise = get(&router, "/api/promise").await;

    assert_eq!(callback.status, 200);
    assert_eq!(callback.get_header("x-a"), Some("1"));
    assert_eq!(callback.text_body(), "ok");
    assert_eq!(callback, promise);
}

#[tokio::test]
async fn test_load_error_does_not_break_other_routes() {
    let dir = tempfile::tempdir().unwrap();
    write_function(dir.path(), "broken.js", "exports.handler = function ( {");
    write_function(dir.path(), "noexport.js", "exports.other = 1;");
    write_function(dir.path(), "ok.js", CALLBACK_FN);

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let router = DevServer::create(config, entries).await.unwrap().router();

    let broken = get(&router, "/api/broken").await;
    assert_eq!(broken.status, 500);
    assert!(broken.text_body().starts_with("Function invocation failed:"));

    let noexport = get(&router, "/api/noexport").await;
    assert_eq!(noexport.status, 500);

    let ok = get(&router, "/api/ok").await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.text_body(), "ok");
}

#[tokio::test]
async fn test_function_errors_are_500() {
    let dir = tempfile::tempdir().unwrap();
    write_function(
        dir.path(),
        "fails.js",
        r#"exports.handler = (event, context, callback) => callback(new Error("boom"));"#,
    );
    write_function(
        dir.path(),
        "rejects.js",
        r#"exports.handler = async () => { throw new Error("nope"); };"#,
    );

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let router = DevServer::create(config, entries).await.unwrap().router();

    let fails = get(&router, "/api/fails").await;
    assert_eq!(fails.status, 500);
    assert!(fails.text_body().contains("boom"));

    let rejects = get(&router, "/api/rejects").await;
    assert_eq!(rejects.status, 500);
    assert!(rejects.text_body().contains("nope"));
}

#[tokio::test]
async fn test_fresh_module_per_request() {
    let dir = tempfile::tempdir().unwrap();
    write_function(
        dir.path(),
        "counter.js",
        r#"
        let count = 0;
        exports.handler = async () => ({ statusCode: 200, body: String(++count) });
        "#,
    );

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    let router = DevServer::create(config, entries).await.unwrap().router();

    assert_eq!(get(&router, "/api/counter").await.text_body(), "1");
    assert_eq!(get(&router, "/api/counter").await.text_body(), "1");
}

#[tokio::test]
async fn test_initial_compilation_error_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_function(dir.path(), "a.js", CALLBACK_FN);

    let config = config_for(dir.path());
    let entries = config.entries().unwrap();
    fs::remove_file(dir.path().join("a.js")).unwrap();

    let err = DevServer::create(config, entries).await.err().unwrap();
    assert!(matches!(err, ServeError::Build(_)));
}

/// Bundler whose cycles are pushed by the test.
struct ChannelBundler {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<BundleStats, BundlerError>>>>,
}

impl ChannelBundler {
    fn new() -> (Self, mpsc::UnboundedSender<Result<BundleStats, BundlerError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl Bundler for ChannelBundler {
    fn set_output_file_system(&mut self, _fs: Arc<dyn OutputFileSystem>) {}

    async fn run(&self) -> Result<BundleStats, BundlerError> {
        Err(BundlerError::Closed)
    }

    fn watch(&self) -> Result<WatchStream, BundlerError> {
        let rx = self.rx.lock().take().ok_or(BundlerError::Closed)?;
        Ok(WatchStream::new(rx))
    }
}

fn cycle(hash: &str, body: &str) -> Result<BundleStats, BundlerError> {
    Ok(BundleStats {
        hash: hash.to_string(),
        modules: vec![ModuleStats {
            identifier: "/project/functions/a.js".to_string(),
            source: format!(
                "exports.handler = async () => ({{ statusCode: 200, body: {:?} }});",
                body
            ),
        }],
        warnings: Vec::new(),
        errors: Vec::new(),
    })
}

fn failed_cycle(hash: &str) -> Result<BundleStats, BundlerError> {
    Ok(BundleStats {
        hash: hash.to_string(),
        errors: vec!["SyntaxError: Unexpected end of input".to_string()],
        ..Default::default()
    })
}

/// Poll until the route answers `expected` or give up.
async fn eventually(router: &Router, path: &str, expected: &str) -> String {
    let mut body = String::new();
    for _ in 0..100 {
        body = get(router, path).await.text_body();
        if body == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    body
}

#[tokio::test]
async fn test_hot_swap_across_cycles() {
    let (bundler, cycles) = ChannelBundler::new();
    cycles.send(cycle("h1", "S1")).unwrap();

    let config = DevConfig::new().base_path("/api").watch(true);
    let entries = vec![Entry::new("functions/a.js", "/a")];
    let server = DevServer::create_with_bundler(
        config,
        entries,
        bundler,
        Arc::new(DenoRuntime::new()),
    )
    .await
    .unwrap();
    let router = server.router();

    assert_eq!(server.compilation().hash, "h1");
    assert_eq!(get(&router, "/api/a").await.text_body(), "S1");

    cycles.send(cycle("h2", "S2")).unwrap();
    assert_eq!(eventually(&router, "/api/a", "S2").await, "S2");

    // a failed cycle leaves the last good handler serving
    cycles.send(failed_cycle("h3")).unwrap();
    cycles.send(cycle("h4", "S4")).unwrap();
    assert_eq!(eventually(&router, "/api/a", "S4").await, "S4");

    assert_eq!(router.paths(), vec!["/api/a"]);
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_handler() {
    let (bundler, cycles) = ChannelBundler::new();
    cycles.send(cycle("h1", "S1")).unwrap();

    let config = DevConfig::new().base_path("/api").watch(true);
    let entries = vec![Entry::new("functions/a.js", "/a")];
    let server = DevServer::create_with_bundler(
        config,
        entries,
        bundler,
        Arc::new(DenoRuntime::new()),
    )
    .await
    .unwrap();

    let table = server.route_table();
    let before = table.get("/api/a").unwrap();

    cycles.send(failed_cycle("h2")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(Arc::ptr_eq(&before, &table.get("/api/a").unwrap()));
    assert_eq!(get(&server.router(), "/api/a").await.text_body(), "S1");
}

/// Counts registrations made by the route table manager.
#[derive(Default)]
struct CountingRegistrar {
    router: Router,
    calls: Mutex<usize>,
}

impl RouteRegistrar for CountingRegistrar {
    fn register_route(&self, path: &str, handler: Arc<dyn RequestHandler>) {
        *self.calls.lock() += 1;
        self.router.register_route(path, handler);
    }
}

#[tokio::test]
async fn test_routes_registered_once_across_cycles() {
    let (bundler, cycles) = ChannelBundler::new();
    for (hash, body) in [("h1", "one"), ("h2", "two"), ("h3", "three")] {
        cycles.send(cycle(hash, body)).unwrap();
    }

    let registrar = Arc::new(CountingRegistrar::default());
    let manager = RouteTableManager::new("/", registrar.clone(), Arc::new(DenoRuntime::new()));
    let options = BuildOptions::new(vec![Entry::new("functions/a.js", "a")])
        .dev(true)
        .watch(true);

    let first = lambda_dev::build::run_with(bundler, options, Some(manager.into_callback()))
        .await
        .unwrap();
    assert_eq!(first.hash, "h1");

    assert_eq!(eventually(&registrar.router, "/a", "three").await, "three");
    assert_eq!(*registrar.calls.lock(), 1);
}

#[tokio::test]
async fn test_watch_rebuilds_on_file_change() {
    let dir = tempfile::tempdir().unwrap();
    write_function(
        dir.path(),
        "a.js",
        r#"exports.handler = async () => ({ statusCode: 200, body: "v1" });"#,
    );

    let config = config_for(dir.path()).watch(true);
    let entries = config.entries().unwrap();
    let server = DevServer::create(config, entries).await.unwrap();
    let router = server.router();
    assert_eq!(get(&router, "/api/a").await.text_body(), "v1");

    tokio::time::sleep(Duration::from_millis(100)).await;
    write_function(
        dir.path(),
        "a.js",
        r#"exports.handler = async () => ({ statusCode: 200, body: "v2" });"#,
    );

    assert_eq!(eventually(&router, "/api/a", "v2").await, "v2");
}

#[tokio::test]
async fn test_build_bundles_writes_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("functions");
    fs::create_dir(&src).unwrap();
    write_function(&src, "a.js", CALLBACK_FN);

    let mut config = config_for(&src);
    config.target_dir = dir.path().join("lambda");
    let entries = config.entries().unwrap();

    let compilation = build_bundles(&config, entries).await.unwrap();
    assert_eq!(compilation.modules.len(), 1);

    let written = fs::read_to_string(dir.path().join("lambda").join("a.js")).unwrap();
    assert_eq!(written, CALLBACK_FN);
}
