//! HTTP integration tests driving the full router

use std::io::Read;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use bulk_processor_server::config::Config;
use bulk_processor_server::db::create_pool;
use bulk_processor_server::routes;
use bulk_processor_server::state::AppState;
use bulk_processor_server::upload::MAX_CHUNK_SIZE;

const BOUNDARY: &str = "bulk-processor-test-boundary";

struct TestApp {
    dir: TempDir,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("outputs");
        config.database.url = format!("sqlite:{}", dir.path().join("records.db").display());
        std::fs::create_dir_all(&config.storage.upload_dir).unwrap();
        std::fs::create_dir_all(&config.storage.output_dir).unwrap();

        let pool = create_pool(&config.database.url).await.unwrap();
        let router = routes::router(AppState::new(config, pool));
        Self { dir, router }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn post_multipart(&self, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn init(&self, kind: &str, filename: &str) -> String {
        let (status, body) = self
            .post_json(&format!("/upload/{}/init", kind), json!({ "filename": filename }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["upload_id"].as_str().unwrap().to_string()
    }

    async fn chunk(&self, kind: &str, upload_id: &str, index: u32, total: u32, data: &[u8]) -> (StatusCode, Value) {
        let index = index.to_string();
        let total = total.to_string();
        self.post_multipart(
            &format!("/upload/{}/chunk", kind),
            &[
                Part::text("upload_id", upload_id),
                Part::text("chunk_index", &index),
                Part::text("total_chunks", &total),
                Part::file("file", "chunk.bin", data),
            ],
        )
        .await
    }

    async fn wait_for_state(&self, task_id: &str, state: &str) -> Value {
        for _ in 0..500 {
            let (status, body) = self.get(&format!("/status/{}", task_id)).await;
            assert_eq!(status, StatusCode::OK);
            let body: Value = serde_json::from_slice(&body).unwrap();
            if body["state"] == state {
                return body;
            }
            assert!(
                !["SUCCESS", "FAILURE", "REVOKED"].contains(&body["state"].as_str().unwrap()),
                "task ended in {} while waiting for {}",
                body,
                state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {}", task_id, state);
    }
}

struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    data: &'a [u8],
}

impl<'a> Part<'a> {
    fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            data: value.as_bytes(),
        }
    }

    fn file(name: &'a str, filename: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            data,
        }
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunked_upload_split_and_download() {
    let app = TestApp::new().await;
    let upload_id = app.init("split", "large.txt").await;

    let (status, body) = app.chunk("split", &upload_id, 0, 2, b"abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunk_index"], 0);
    assert_eq!(body["total_chunks"], 2);
    assert_eq!(body["received_bytes"], 3);

    let (status, _) = app.chunk("split", &upload_id, 1, 2, b"def").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post_json("/upload/split/complete", json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let stored: Vec<_> = std::fs::read_dir(app.dir.path().join("uploads"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with("_large.txt"))
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(std::fs::read(stored[0].path()).unwrap(), b"abcdef");

    let status = app.wait_for_state(&task_id, "SUCCESS").await;
    let archive_name = format!("{}_split.zip", task_id);
    assert_eq!(status["output_file"], archive_name.as_str());
    assert_eq!(status["message"], "completed");

    let (status, bytes) = app.get(&format!("/download/{}", task_id)).await;
    assert_eq!(status, StatusCode::OK);
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    assert_eq!(entry.name(), "0001_large.txt");
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"abcdef");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_out_of_order_chunk_conflicts() {
    let app = TestApp::new().await;
    let upload_id = app.init("split", "large.txt").await;

    let (status, body) = app.chunk("split", &upload_id, 1, 2, b"abc").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("expected 0, got 1"));

    let (status, _) = app.chunk("split", &upload_id, 0, 2, b"abc").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunk_validation_errors() {
    let app = TestApp::new().await;
    let upload_id = app.init("ingest", "rows.csv").await;

    let (status, _) = app.chunk("ingest", &upload_id, 0, 2, b"a,b\n").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.chunk("ingest", &upload_id, 1, 3, b"c,d\n").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TOTAL_CHUNKS_MISMATCH");

    let (status, body) = app.chunk("ingest", &Uuid::new_v4().to_string(), 0, 1, b"").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");

    let (status, body) = app
        .post_json("/upload/split/init", json!({ "filename": "../etc/passwd.txt" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FILE_NAME");

    let (status, body) = app
        .post_json("/upload/ingest/init", json!({ "filename": "notes.txt" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_FILE_TYPE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_chunk_is_rejected() {
    let app = TestApp::new().await;
    let upload_id = app.init("split", "large.txt").await;

    let oversized = vec![b'x'; MAX_CHUNK_SIZE + 1];
    let (status, body) = app.chunk("split", &upload_id, 0, 1, &oversized).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

    // the session did not advance
    let (status, body) = app.chunk("split", &upload_id, 0, 1, b"small").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received_bytes"], 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broken_direct_upload_leaves_no_file() {
    let app = TestApp::new().await;

    let body = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\r\nhello, the body ends early",
        BOUNDARY
    );
    let request = Request::post("/upload/split")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let leftovers = std::fs::read_dir(app.dir.path().join("uploads")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_incomplete_upload_cannot_complete() {
    let app = TestApp::new().await;
    let upload_id = app.init("split", "large.txt").await;
    app.chunk("split", &upload_id, 0, 2, b"abc").await;

    let (status, body) = app
        .post_json("/upload/split/complete", json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INCOMPLETE_UPLOAD");

    let (status, _) = app.chunk("split", &upload_id, 1, 2, b"def").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post_json("/upload/mask/complete", json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "KIND_MISMATCH");

    let (status, _) = app
        .post_json("/upload/split/complete", json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post_json("/upload/split/complete", json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_direct_ingest_and_export() {
    let app = TestApp::new().await;
    let rows: String = (1..=25).map(|i| format!("{},item-{}\n", i, i)).collect();

    let (status, body) = app
        .post_multipart("/upload", &[Part::file("file", "rows.csv", rows.as_bytes())])
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let status = app.wait_for_state(&task_id, "SUCCESS").await;
    assert_eq!(status["current"], 25);
    assert_eq!(status["total"], 25);
    assert!(status.get("output_file").is_none());

    let (status, bytes) = app.get(&format!("/export?task_id={}", task_id)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "id,task_id,row_number,payload");
    assert_eq!(lines.len(), 26);
    assert!(lines[1].ends_with(",1,\"1,item-1\""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_direct_mask_and_download() {
    let app = TestApp::new().await;
    let csv = "name,phone,city\nAlice,138-1234-5678,Paris\n";

    let (status, body) = app
        .post_multipart("/upload/desensitize", &[Part::file("file", "people.csv", csv.as_bytes())])
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let status = app.wait_for_state(&task_id, "SUCCESS").await;
    assert_eq!(status["output_file"], format!("{}_desensitized.csv", task_id).as_str());

    let (status, bytes) = app.get(&format!("/download/{}", task_id)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("name,phone,city"));
    assert!(text.contains("***-****-5678"));
    assert!(text.contains("Paris"));
    assert!(!text.contains("138-1234"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_direct_upload_rejects_wrong_suffix() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_multipart("/upload/split", &[Part::file("file", "rows.csv", b"a,b")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_FILE_TYPE");

    let (status, _) = app
        .post_multipart("/upload/transcode", &[Part::file("file", "a.txt", b"x")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_task_lookups() {
    let app = TestApp::new().await;
    let task_id = Uuid::new_v4().to_string();

    let (status, _) = app.get(&format!("/status/{}", task_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .post_json(&format!("/tasks/{}/cancel", task_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_id"], task_id.as_str());
    assert_eq!(body["message"], "task cancel signal sent");

    let (status, _) = app.get(&format!("/download/{}", task_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_falls_back_to_conventional_name() {
    let app = TestApp::new().await;
    let task_id = Uuid::new_v4();
    std::fs::write(
        app.dir.path().join("outputs").join(format!("{}_split.zip", task_id)),
        b"PK-archive",
    )
    .unwrap();

    let request = Request::get(format!("/download/{}", task_id))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("{}_split.zip", task_id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, bytes) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
}
