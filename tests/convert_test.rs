use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use rust_docx2pdf::config::AppConfig;
use rust_docx2pdf::services::converter::{ConversionError, Converter};
use rust_docx2pdf::{AppState, create_app};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------123456789012345678901234567";

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    ExitNonZero,
    NoOutput,
}

struct MockConverter {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockConverter {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Converter for MockConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(input.exists(), "input must be persisted before conversion");

        let base = input.file_name().unwrap().to_string_lossy().into_owned();
        let stem = input.file_stem().unwrap().to_string_lossy().into_owned();
        let out_dir = input.parent().unwrap().join(format!("{}_output", base));
        let output = out_dir.join(format!("{}.pdf", stem));

        match self.behavior {
            Behavior::Succeed => {
                tokio::fs::create_dir_all(&out_dir).await.unwrap();
                tokio::fs::write(&output, b"%PDF-1.4 mock output").await.unwrap();
                Ok(output)
            }
            Behavior::ExitNonZero => Err(ConversionError::Failed {
                program: "mock".to_string(),
                status: "exit status: 1".to_string(),
                output: "source file could not be loaded".to_string(),
            }),
            Behavior::NoOutput => Err(ConversionError::OutputNotProduced { path: output }),
        }
    }

    fn output_extension(&self) -> &str {
        "pdf"
    }
}

struct TestApp {
    app: axum::Router,
    scratch: PathBuf,
    _dir: tempfile::TempDir,
}

fn setup(converter: Arc<dyn Converter>, tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    let mut config = AppConfig {
        temp_dir: scratch.clone(),
        ..AppConfig::default()
    };
    tweak(&mut config);

    TestApp {
        app: create_app(AppState::new(config, converter)),
        scratch,
        _dir: dir,
    }
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n",
        boundary = BOUNDARY,
        field = field,
        filename = filename
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn convert_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn scratch_entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn wait_for_empty(dir: &Path) -> bool {
    for _ in 0..100 {
        if scratch_entries(dir).is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_health_check() {
    let test = setup(MockConverter::new(Behavior::ExitNonZero), |_| {});

    let response = test
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_successful_conversion_streams_attachment() {
    let converter = MockConverter::new(Behavior::Succeed);
    let test = setup(converter.clone(), |_| {});

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "report.docx", b"PK\x03\x04 fake docx"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"report.docx.pdf\""));
    assert!(response.headers().contains_key("x-request-id"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"%PDF-1.4 mock output");
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);

    // Input, output and output directory go away once the body is done
    assert!(wait_for_empty(&test.scratch).await);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_before_touching_disk() {
    let converter = MockConverter::new(Behavior::Succeed);
    let test = setup(converter.clone(), |config| config.max_file_size = 16);

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "big.docx", &[b'x'; 64]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(
        json["error"].as_str().unwrap(),
        "File too large. Maximum size is 16 bytes"
    );
    assert!(scratch_entries(&test.scratch).is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_size_is_checked_before_extension() {
    let test = setup(MockConverter::new(Behavior::Succeed), |config| {
        config.max_file_size = 4
    });

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "big.txt", b"way more than four bytes"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("File too large"));
}

#[tokio::test]
async fn test_body_over_server_limit_reports_file_too_large() {
    let converter = MockConverter::new(Behavior::Succeed);
    let test = setup(converter.clone(), |config| config.max_file_size = 16);

    // Larger than the file cap plus multipart headroom, so the body limit
    // trips before the per-chunk check does
    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "huge.docx", &vec![b'x'; 2 * 1024 * 1024]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(
        json["error"].as_str().unwrap(),
        "File too large. Maximum size is 16 bytes"
    );
    assert!(scratch_entries(&test.scratch).is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_huge_max_file_size_does_not_overflow_body_limit() {
    let test = setup(MockConverter::new(Behavior::Succeed), |config| {
        config.max_file_size = usize::MAX
    });

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "report.docx", b"docx bytes"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"%PDF-1.4 mock output");
}

#[tokio::test]
async fn test_unknown_bundle_format_is_a_json_error() {
    let converter = MockConverter::new(Behavior::Succeed);
    let test = setup(converter.clone(), |_| {});

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert?bundle=tar",
            multipart_body("file", "report.docx", b"docx bytes"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let json = json_body(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.starts_with("Invalid query string"), "{}", message);
    assert!(message.contains("tar"));
    assert!(scratch_entries(&test.scratch).is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_extension_is_rejected() {
    let converter = MockConverter::new(Behavior::Succeed);
    let test = setup(converter.clone(), |_| {});

    for name in ["notes.txt", "report.doc", "report.docx.exe", "docx"] {
        let response = test
            .app
            .clone()
            .oneshot(convert_request(
                "/api/v1/convert",
                multipart_body("file", name, b"content"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", name);
        let json = json_body(response).await;
        assert_eq!(json["error"].as_str().unwrap(), "Only .docx files are supported");
    }

    assert!(scratch_entries(&test.scratch).is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_file_field_is_rejected() {
    let test = setup(MockConverter::new(Behavior::Succeed), |_| {});

    let response = test
        .app
        .clone()
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("document", "report.docx", b"content"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"].as_str().unwrap(),
        "No file provided or invalid file"
    );

    // Not multipart at all
    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/convert")
                .header("Content-Type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"].as_str().unwrap(),
        "No file provided or invalid file"
    );
}

#[tokio::test]
async fn test_converter_failure_returns_500_and_removes_input() {
    let converter = MockConverter::new(Behavior::ExitNonZero);
    let test = setup(converter.clone(), |_| {});

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "report.docx", b"content"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = json_body(response).await["error"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.starts_with("Conversion failed: "));
    assert!(message.contains("source file could not be loaded"));

    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    // Removed before the response was produced
    assert!(scratch_entries(&test.scratch).is_empty());
}

#[tokio::test]
async fn test_missing_output_returns_500() {
    let test = setup(MockConverter::new(Behavior::NoOutput), |_| {});

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "report.docx", b"content"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = json_body(response).await["error"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.contains("output not produced"));
    assert!(scratch_entries(&test.scratch).is_empty());
}

#[tokio::test]
async fn test_api_token_is_enforced_when_configured() {
    let test = setup(MockConverter::new(Behavior::Succeed), |config| {
        config.api_token = Some("s3cret".to_string())
    });

    let response = test
        .app
        .clone()
        .oneshot(convert_request(
            "/api/v1/convert",
            multipart_body("file", "report.docx", b"content"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await["error"].as_str().unwrap(),
        "Invalid or missing API token"
    );

    let mut request = convert_request(
        "/api/v1/convert",
        multipart_body("file", "report.docx", b"content"),
    );
    request
        .headers_mut()
        .insert("X-API-Token", "wrong".parse().unwrap());
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = convert_request(
        "/api/v1/convert",
        multipart_body("file", "report.docx", b"content"),
    );
    request
        .headers_mut()
        .insert("X-API-Token", "s3cret".parse().unwrap());
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = response.into_body().collect().await.unwrap();

    // Health stays open
    let response = test
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_zip_bundle_contains_original_and_output() {
    let test = setup(MockConverter::new(Behavior::Succeed), |_| {});

    let response = test
        .app
        .oneshot(convert_request(
            "/api/v1/convert?bundle=zip",
            multipart_body("file", "report.docx", b"original docx bytes"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"report.zip\"")
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);

    let mut original = Vec::new();
    archive
        .by_name("report.docx")
        .unwrap()
        .read_to_end(&mut original)
        .unwrap();
    assert_eq!(original, b"original docx bytes");

    let mut converted = Vec::new();
    archive
        .by_name("report.pdf")
        .unwrap()
        .read_to_end(&mut converted)
        .unwrap();
    assert_eq!(converted, b"%PDF-1.4 mock output");

    assert!(wait_for_empty(&test.scratch).await);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let test = setup(MockConverter::new(Behavior::Succeed), |_| {});

    let response = test
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn test_openapi_document_lists_convert_route() {
    let test = setup(MockConverter::new(Behavior::Succeed), |_| {});

    let response = test
        .app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["paths"]["/api/v1/convert"]["post"].is_object());
    assert!(json["paths"]["/health"]["get"].is_object());
}
