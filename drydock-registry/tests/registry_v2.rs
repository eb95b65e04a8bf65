//! Integration tests for the registry v2 client against a canned HTTP
//! double: tag pagination, deletion semantics, and the bearer-token
//! challenge flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use drydock_registry::{ArtifactStore, RegistryClient, StorageError};

const REPO: &str = "team/migrations";

#[derive(Debug)]
struct ReceivedRequest {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct CannedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CannedResponse {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn json(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        self
    }

    fn bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

type Handler = Arc<dyn Fn(ReceivedRequest) -> CannedResponse + Send + Sync>;

/// Bind a local listener, then build the request handler from the
/// server's own base URL so responses can reference it (e.g. auth
/// realms).
async fn start_server<H>(make_handler: impl FnOnce(String) -> H) -> String
where
    H: Fn(ReceivedRequest) -> CannedResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handler: Handler = Arc::new(make_handler(base.clone()));

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    let response = handler(request);
                    write_response(&mut socket, response).await;
                }
            });
        }
    });

    base
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buf.len() - header_end < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = buf[header_end..header_end + content_length.min(buf.len() - header_end)].to_vec();

    Some(ReceivedRequest {
        method,
        target,
        headers,
        body,
    })
}

async fn write_response(socket: &mut tokio::net::TcpStream, response: CannedResponse) {
    let reason = match response.status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Response",
    };
    let mut head = format!("HTTP/1.1 {} {reason}\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&response.body).await;
    let _ = socket.shutdown().await;
}

fn client(base: &str) -> RegistryClient {
    RegistryClient::builder(base, REPO).build().unwrap()
}

#[tokio::test]
async fn test_list_follows_pagination() {
    let base = start_server(|_| {
        move |req: ReceivedRequest| match req.target.as_str() {
            "/v2/team/migrations/tags/list?n=100" => CannedResponse::new(200)
                .header(
                    "Link",
                    format!("</v2/{REPO}/tags/list?last=v0.2.0&n=100>; rel=\"next\""),
                )
                .json(r#"{"name":"team/migrations","tags":["v0.2.0","latest","v0.1.0"]}"#),
            "/v2/team/migrations/tags/list?last=v0.2.0&n=100" => CannedResponse::new(200)
                .header(
                    "Link",
                    format!("</v2/{REPO}/tags/list?last=v1.0.0&n=100>; rel=\"next\""),
                )
                .json(r#"{"name":"team/migrations","tags":["v1.0.0-beta.1","v1.0.0"]}"#),
            "/v2/team/migrations/tags/list?last=v1.0.0&n=100" => {
                CannedResponse::new(200).json(r#"{"name":"team/migrations","tags":["v0.3.0"]}"#)
            }
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let versions = client(&base).list().await.unwrap();
    let strings: Vec<_> = versions.iter().map(|v| v.to_string()).collect();
    assert_eq!(
        strings,
        ["0.1.0", "0.2.0", "0.3.0", "1.0.0-beta.1", "1.0.0"]
    );
}

#[tokio::test]
async fn test_list_missing_repository_is_empty() {
    let base = start_server(|_| |_req: ReceivedRequest| CannedResponse::new(404)).await;
    let versions = client(&base).list().await.unwrap();
    assert!(versions.is_empty());
}

#[tokio::test]
async fn test_delete_absent_tag_is_not_an_error() {
    let base = start_server(|_| |_req: ReceivedRequest| CannedResponse::new(404)).await;
    let version = "1.0.0".parse().unwrap();
    client(&base).delete(&version).await.unwrap();
}

#[tokio::test]
async fn test_delete_unsupported_registry() {
    let base = start_server(|_| {
        |req: ReceivedRequest| match req.method.as_str() {
            "HEAD" => {
                CannedResponse::new(200).header("Docker-Content-Digest", "sha256:aaaa")
            }
            "DELETE" => CannedResponse::new(405),
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let version = "1.0.0".parse().unwrap();
    let err = client(&base).delete(&version).await.unwrap_err();
    assert!(matches!(err, StorageError::Unsupported(_)), "got {err:?}");
}

#[tokio::test]
async fn test_delete_forbidden_distinct_from_unsupported() {
    let base = start_server(|_| {
        |req: ReceivedRequest| match req.method.as_str() {
            "HEAD" => {
                CannedResponse::new(200).header("Docker-Content-Digest", "sha256:aaaa")
            }
            "DELETE" => CannedResponse::new(403),
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let version = "1.0.0".parse().unwrap();
    let err = client(&base).delete(&version).await.unwrap_err();
    assert!(matches!(err, StorageError::Forbidden(_)), "got {err:?}");
}

#[tokio::test]
async fn test_delete_confirms_absence() {
    let deleted = Arc::new(AtomicBool::new(false));
    let flag = deleted.clone();
    let base = start_server(|_| {
        move |req: ReceivedRequest| match req.method.as_str() {
            "HEAD" if flag.load(Ordering::SeqCst) => CannedResponse::new(404),
            "HEAD" => CannedResponse::new(200).header("Docker-Content-Digest", "sha256:aaaa"),
            "DELETE" => {
                flag.store(true, Ordering::SeqCst);
                CannedResponse::new(202)
            }
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let version = "1.0.0".parse().unwrap();
    client(&base).delete(&version).await.unwrap();
    assert!(deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_delete_fails_verification_when_tag_persists() {
    // The registry accepts the delete but the tag keeps resolving.
    let base = start_server(|_| {
        |req: ReceivedRequest| match req.method.as_str() {
            "HEAD" => CannedResponse::new(200).header("Docker-Content-Digest", "sha256:aaaa"),
            "DELETE" => CannedResponse::new(202),
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let version = "1.0.0".parse().unwrap();
    let err = client(&base).delete(&version).await.unwrap_err();
    assert!(
        matches!(err, StorageError::DeleteVerification(_)),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_auth_challenge_exchanges_token_and_retries() {
    let base = start_server(|base| {
        move |req: ReceivedRequest| {
            if req.target.starts_with("/token") {
                // Credentials arrive as basic auth on the token request.
                let auth = req.headers.get("authorization").cloned().unwrap_or_default();
                assert!(auth.starts_with("Basic "), "missing basic auth: {auth}");
                return CannedResponse::new(200).json(r#"{"token":"t0k","expires_in":300}"#);
            }

            match req.headers.get("authorization").map(String::as_str) {
                Some("Bearer t0k") => {
                    CannedResponse::new(200).json(r#"{"name":"team/migrations","tags":["v1.0.0"]}"#)
                }
                _ => CannedResponse::new(401).header(
                    "WWW-Authenticate",
                    format!(
                        "Bearer realm=\"{base}/token\",service=\"test\",scope=\"repository:{REPO}:pull\""
                    ),
                ),
            }
        }
    })
    .await;

    let client = RegistryClient::builder(&base, REPO)
        .credentials("ci-bot", "s3cret")
        .build()
        .unwrap();

    let versions = client.list().await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].to_string(), "1.0.0");
}

#[tokio::test]
async fn test_second_401_is_terminal() {
    let base = start_server(|base| {
        move |req: ReceivedRequest| {
            if req.target.starts_with("/token") {
                return CannedResponse::new(200).json(r#"{"token":"bad","expires_in":300}"#);
            }
            CannedResponse::new(401).header(
                "WWW-Authenticate",
                format!("Bearer realm=\"{base}/token\",service=\"test\""),
            )
        }
    })
    .await;

    let err = client(&base).list().await.unwrap_err();
    assert!(matches!(err, StorageError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn test_push_pull_round_trip() {
    use std::sync::Mutex;

    use drydock_artifact::{ArchiveFile, decode, encode};
    use drydock_manifest::{ManifestBuilder, MigrationKind, Version};

    // Stateful double: blobs keyed by digest, manifests by tag.
    #[derive(Default)]
    struct RegistryState {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
        manifests: Mutex<HashMap<String, Vec<u8>>>,
    }

    let state = Arc::new(RegistryState::default());
    let shared = state.clone();
    let base = start_server(|_| {
        move |req: ReceivedRequest| match (req.method.as_str(), req.target.as_str()) {
            ("POST", "/v2/team/migrations/blobs/uploads/") => CannedResponse::new(202)
                .header("Location", format!("/v2/{REPO}/blobs/uploads/session-1")),
            ("PUT", target) if target.contains("blobs/uploads/session-1?digest=") => {
                let digest = target.split("digest=").nth(1).unwrap().to_string();
                shared.blobs.lock().unwrap().insert(digest, req.body);
                CannedResponse::new(201)
            }
            ("PUT", "/v2/team/migrations/manifests/v1.0.0") => {
                shared
                    .manifests
                    .lock()
                    .unwrap()
                    .insert("v1.0.0".to_string(), req.body);
                CannedResponse::new(201)
            }
            ("GET", "/v2/team/migrations/manifests/v1.0.0") => {
                match shared.manifests.lock().unwrap().get("v1.0.0") {
                    Some(body) => CannedResponse::new(200).bytes(body.clone()),
                    None => CannedResponse::new(404),
                }
            }
            ("GET", target) if target.starts_with("/v2/team/migrations/blobs/") => {
                let digest = target.trim_start_matches("/v2/team/migrations/blobs/");
                match shared.blobs.lock().unwrap().get(digest) {
                    Some(body) => CannedResponse::new(200).bytes(body.clone()),
                    None => CannedResponse::new(404),
                }
            }
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let version = Version::parse("1.0.0").unwrap();
    let files = vec![ArchiveFile::new(
        "drizzle/0001.sql",
        &b"CREATE TABLE t(id int);"[..],
    )];
    let manifest = ManifestBuilder::new(version.clone())
        .file("drizzle/0001.sql", &files[0].content, MigrationKind::Drizzle)
        .build();
    let artifact = encode(&files, &manifest).unwrap();

    let client = client(&base);
    let location = client.push(&version, &artifact, &manifest).await.unwrap();
    assert!(location.contains("team/migrations"));

    // Two blobs (config + layer) landed in the double.
    assert_eq!(state.blobs.lock().unwrap().len(), 2);

    let pulled = client.pull(&version).await.unwrap();
    assert_eq!(pulled.artifact, artifact);
    assert_eq!(pulled.manifest, manifest);

    let migrations = decode(&pulled.artifact, &pulled.manifest).unwrap();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].sql, "CREATE TABLE t(id int);");

    // The manifest half alone resolves too.
    let fetched = client.get_manifest(&version).await.unwrap();
    assert_eq!(fetched, manifest);
}

#[tokio::test]
async fn test_exists_probe() {
    let base = start_server(|_| {
        |req: ReceivedRequest| match req.target.as_str() {
            "/v2/team/migrations/manifests/v1.0.0" => {
                CannedResponse::new(200).header("Docker-Content-Digest", "sha256:aaaa")
            }
            _ => CannedResponse::new(404),
        }
    })
    .await;

    let client = client(&base);
    assert!(client.exists(&"1.0.0".parse().unwrap()).await.unwrap());
    assert!(!client.exists(&"2.0.0".parse().unwrap()).await.unwrap());
}
