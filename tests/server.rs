use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wwwroot::config::ServerConfig;
use wwwroot::dispatcher::Dispatcher;
use wwwroot::http::{Method, Response, StatusCode};
use wwwroot::router::Route;
use wwwroot::security::{Authorize, HeaderTokenAuthorizer};
use wwwroot::server::Server;

struct Reply {
    head: String,
    body: Vec<u8>,
}

impl Reply {
    fn status(&self) -> u16 {
        self.head[9..12].parse().unwrap()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(dir.path().join("data.bin"), data).unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::create_dir(dir.path().join("docs/b")).unwrap();
    std::fs::write(dir.path().join("docs/a.txt"), "a").unwrap();
    std::fs::write(dir.path().join("docs/c.txt"), "c").unwrap();
    dir
}

async fn start(root: &std::path::Path) -> SocketAddr {
    start_with(ServerConfig {
        root: root.to_owned(),
        ..ServerConfig::default()
    })
    .await
}

async fn start_with(config: ServerConfig) -> SocketAddr {
    let mut dispatcher = Dispatcher::new(&config);
    dispatcher
        .route(wwwroot::upload::route().unwrap())
        .route(
            Route::new(Method::Get, "/admin", |_ctx| async {
                Ok(Response::content("admin", StatusCode::Ok))
            })
            .authorize(Authorize::Required),
        );

    let server = Server::bind("127.0.0.1:0").await.unwrap().with_config(&config);
    let addr = server.local_addr();
    tokio::spawn(server.run(Arc::new(dispatcher)));
    addr
}

// Sends one request on a fresh connection and reads until the server closes it.
async fn send(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut wire = Vec::new();
    stream.read_to_end(&mut wire).await.unwrap();
    split(&wire)
}

// Like `send`, but the server may close before reading everything we wrote,
// so a reset after the response is tolerated.
async fn send_rejected(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut wire = Vec::new();
    let mut chunk = [0u8; 4096];
    while let Ok(n) = stream.read(&mut chunk).await {
        if n == 0 {
            break;
        }
        wire.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8(wire).unwrap()
}

fn split(wire: &[u8]) -> Reply {
    let at = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    Reply {
        head: String::from_utf8(wire[..at].to_vec()).unwrap(),
        body: wire[at..].to_vec(),
    }
}

fn get(target: &str, extra: &str) -> Vec<u8> {
    format!("GET {target} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n{extra}\r\n").into_bytes()
}

#[tokio::test]
async fn ranges_and_full_files() {
    let dir = site();
    let addr = start(dir.path()).await;
    let data = std::fs::read(dir.path().join("data.bin")).unwrap();

    let reply = send(addr, &get("/data.bin", "Range: bytes=0-99\r\n")).await;
    assert_eq!(reply.status(), 206);
    assert_eq!(reply.header("content-range"), Some("bytes 0-99/1000"));
    assert_eq!(reply.header("accept-ranges"), Some("bytes"));
    assert_eq!(reply.body, &data[..100]);

    let reply = send(addr, &get("/data.bin", "Range: bytes=500-\r\n")).await;
    assert_eq!(reply.body, &data[500..]);

    let reply = send(addr, &get("/data.bin", "")).await;
    assert_eq!(reply.status(), 200);
    assert_eq!(reply.header("content-length"), Some("1000"));
    assert_eq!(reply.body, data);
}

#[tokio::test]
async fn repeated_gets_are_identical_and_conditional() {
    let dir = site();
    let addr = start(dir.path()).await;

    let first = send(addr, &get("/data.bin", "")).await;
    let second = send(addr, &get("/data.bin", "")).await;
    assert_eq!(first.body, second.body);
    let stamp = first.header("last-modified").unwrap();
    assert_eq!(Some(stamp), second.header("last-modified"));

    let reply = send(addr, &get("/data.bin", &format!("If-Modified-Since: {stamp}\r\n"))).await;
    assert_eq!(reply.status(), 304);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn directories_redirect_and_list() {
    let dir = site();
    let addr = start(dir.path()).await;

    let reply = send(addr, &get("/docs", "")).await;
    assert_eq!(reply.status(), 301);
    assert_eq!(reply.header("location"), Some("/docs/"));

    let reply = send(addr, &get("/docs/", "")).await;
    assert_eq!(reply.status(), 200);
    let html = String::from_utf8(reply.body).unwrap();
    let b = html.find("href='b/'").unwrap();
    let a = html.find("href='a.txt'").unwrap();
    let c = html.find("href='c.txt'").unwrap();
    assert!(b < a && a < c);

    let reply = send(addr, &get("/missing.txt", "")).await;
    assert_eq!(reply.status(), 404);

    let reply = send(addr, &get("/docs/../../etc/passwd", "")).await;
    assert_eq!(reply.status(), 403);
}

#[tokio::test]
async fn authorization_fails_closed() {
    let dir = site();
    let addr = start(dir.path()).await;

    for extra in ["", "Authorization: Bearer anything\r\n"] {
        let reply = send(addr, &get("/admin", extra)).await;
        assert_eq!(reply.status(), 401);
    }
}

#[tokio::test]
async fn token_authorizer_admits_known_tokens() {
    let dir = site();
    let config = ServerConfig {
        root: dir.path().to_owned(),
        ..ServerConfig::default()
    };
    let mut dispatcher = Dispatcher::new(&config);
    dispatcher
        .authorizer(HeaderTokenAuthorizer, json!({"header": "X-Key", "tokens": ["k"]}))
        .route(
            Route::new(Method::Get, "/admin", |_ctx| async {
                Ok(Response::content("admin", StatusCode::Ok))
            })
            .authorize(Authorize::Required),
        );
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(Arc::new(dispatcher)));

    assert_eq!(send(addr, &get("/admin", "X-Key: k\r\n")).await.status(), 200);
    assert_eq!(send(addr, &get("/admin", "X-Key: nope\r\n")).await.status(), 401);
}

#[tokio::test]
async fn multipart_upload_over_the_wire() {
    let dir = site();
    let addr = start(dir.path()).await;

    let payload: Vec<u8> = (0..1000u32)
        .map(|i| if i % 97 == 0 { b'-' } else { (i * 31 % 256) as u8 })
        .collect();
    let mut body = b"--XYZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n".to_vec();
    body.extend_from_slice(
        b"--XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n",
    );
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--XYZ--\r\n");

    let mut raw = format!(
        "POST /upload.action HTTP/1.1\r\nHost: test\r\nConnection: close\r\nContent-Type: multipart/form-data; boundary=XYZ\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(&body);

    let reply = send(addr, &raw).await;
    assert_eq!(reply.status(), 200);
    assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), payload);

    let summary: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(summary["fields"][0]["value"], "hello");
    assert_eq!(summary["fields"][1]["contentType"], "image/png");
    assert_eq!(summary["fields"][1]["size"], 1000);
}

#[tokio::test]
async fn keep_alive_serves_pipelined_requests() {
    let dir = site();
    let addr = start(dir.path()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut raw = b"GET /upload.action HTTP/1.1\r\nHost: test\r\n\r\n".to_vec();
    raw.extend(get("/docs", ""));
    stream.write_all(&raw).await.unwrap();

    let mut wire = Vec::new();
    stream.read_to_end(&mut wire).await.unwrap();
    let text = String::from_utf8_lossy(&wire);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("ok!HTTP/1.1 301 Moved Permanently\r\n"));
}

#[tokio::test]
async fn body_framing_is_enforced() {
    let dir = site();
    let addr = start_with(ServerConfig {
        root: dir.path().to_owned(),
        max_body_size: 16,
        ..ServerConfig::default()
    })
    .await;
    let hidden = "GET /docs HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n";

    let cases = [
        ("Content-Length: 99999999999999999999999\r\n", "413"),
        ("Content-Length: 17\r\n", "413"),
        ("Content-Length: 5x\r\n", "400"),
        ("Content-Length: 2\r\nContent-Length: 40\r\n", "400"),
        ("Transfer-Encoding: chunked\r\n", "411"),
    ];
    for (headers, status) in cases {
        let raw = format!("POST /upload.action HTTP/1.1\r\nHost: test\r\n{headers}\r\n{hidden}");
        let text = send_rejected(addr, raw.as_bytes()).await;
        assert!(text.starts_with(&format!("HTTP/1.1 {status} ")), "{headers:?}: {text}");
        assert_eq!(text.matches("HTTP/1.1 ").count(), 1, "{headers:?}: {text}");
        assert!(!text.contains("301"), "{headers:?}: {text}");
    }

    let raw = "POST /upload.action HTTP/1.1\r\nHost: test\r\nConnection: close\r\nContent-Length: 16\r\n\r\n0123456789abcdef";
    let reply = send(addr, raw.as_bytes()).await;
    assert_eq!(reply.status(), 200);
}
