//! End-to-end integration tests for fsgate.
//!
//! These tests verify complete flows work correctly:
//! - Minting URLs through the filesystem facade
//! - Redeeming them over HTTP
//! - Uniform rejection of bad, expired and dangling tokens
//! - Capability gaps of the zip backend

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use gateway::config::{Config, StorageBackend};
use gateway::server::NOT_FOUND_BODY;
use gateway::{Gateway, StorageError, WriteOptions};
use http_body_util::BodyExt;
use protocol::{AccessTokenCodec, AccessTokenPayload, CipherAlgorithm, NormalizedPath, TokenCipher};
use serde_json::Map;
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

const SECRET: &str = "s3cr3t-passphrase-value";

/// Create a gateway over a local storage root in a temporary directory.
fn create_local_gateway(prefix: &str) -> (Gateway, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.security.secret = SECRET.to_string();
    config.storage.backend = StorageBackend::Local;
    config.storage.root = temp_dir.path().join("storage");
    config.storage.prefix = prefix.to_string();
    (Gateway::from_config(config).unwrap(), temp_dir)
}

fn create_zip_gateway(debug: bool) -> (Gateway, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.security.secret = SECRET.to_string();
    config.storage.backend = StorageBackend::Zip;
    config.storage.archive = Some(temp_dir.path().join("store.zip"));
    config.storage.debug = debug;
    (Gateway::from_config(config).unwrap(), temp_dir)
}

fn token_of(url: &str) -> String {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "data")
        .map(|(_, value)| value.into_owned())
        .unwrap()
}

/// Path and query of a URL, as sent in the request line.
fn request_target(url: &str) -> String {
    let url = Url::parse(url).unwrap();
    format!("{}?{}", url.path(), url.query().unwrap_or(""))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, content_type, body)
}

// =============================================================================
// Token Lifecycle Tests
// =============================================================================

#[test]
fn test_temporary_url_scenario() {
    let (gateway, _temp_dir) = create_local_gateway("");
    let fs = gateway.filesystem();
    fs.write("docs/report.pdf", b"%PDF-1.4 report", &WriteOptions::default())
        .unwrap();

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let expires_at = UNIX_EPOCH + Duration::from_secs(now + 300);
    let url = fs
        .temporary_url("docs/report.pdf", expires_at, &Map::new())
        .unwrap();
    let token = token_of(&url);

    let codec = gateway.issuer().codec();
    let payload = codec.decode(&token).unwrap();
    assert_eq!(payload.path.as_str(), "docs/report.pdf");
    assert_eq!(payload.expires, now + 300);

    let handler = gateway.delivery_handler();
    let file = handler.handle(Some(&token), now + 300).unwrap();
    assert_eq!(file.contents, b"%PDF-1.4 report");
    assert_eq!(file.mime_type, "application/pdf");
    assert_eq!(file.filename, "report.pdf");

    assert!(handler.handle(Some(&token), now + 301).is_err());
}

#[test]
fn test_token_from_other_replica_verifies() {
    let (gateway, _temp_dir) = create_local_gateway("");
    gateway
        .filesystem()
        .write("a.txt", b"shared", &WriteOptions::default())
        .unwrap();

    // A second codec built from the same settings stands in for another replica.
    let cipher =
        TokenCipher::from_passphrase(SECRET, None, "fsgate", CipherAlgorithm::Aes128Gcm).unwrap();
    let replica = AccessTokenCodec::new(cipher);
    let token = replica
        .encode(&AccessTokenPayload::public(NormalizedPath::new("a.txt"), Map::new()))
        .unwrap();

    let file = gateway
        .delivery_handler()
        .handle(Some(token.as_str()), 0)
        .unwrap();
    assert_eq!(file.contents, b"shared");
}

#[test]
fn test_token_from_other_secret_rejected() {
    let (gateway, _temp_dir) = create_local_gateway("");
    gateway
        .filesystem()
        .write("a.txt", b"x", &WriteOptions::default())
        .unwrap();

    let cipher = TokenCipher::from_passphrase(
        "another-secret",
        None,
        "fsgate",
        CipherAlgorithm::Aes128Gcm,
    )
    .unwrap();
    let token = AccessTokenCodec::new(cipher)
        .encode(&AccessTokenPayload::public(NormalizedPath::new("a.txt"), Map::new()))
        .unwrap();

    assert!(gateway
        .delivery_handler()
        .handle(Some(token.as_str()), 0)
        .is_err());
}

#[test]
fn test_prefix_is_part_of_token_path() {
    let (gateway, temp_dir) = create_local_gateway("tenant-a");
    let fs = gateway.filesystem();
    fs.write("notes/today.txt", b"hello", &WriteOptions::default())
        .unwrap();
    assert!(temp_dir
        .path()
        .join("storage/tenant-a/notes/today.txt")
        .exists());

    let url = fs.public_url("notes/today.txt", &Map::new()).unwrap();
    let payload = gateway.issuer().codec().decode(&token_of(&url)).unwrap();
    assert_eq!(payload.path.as_str(), "tenant-a/notes/today.txt");
    assert_eq!(payload.expires, 0);

    let file = gateway
        .delivery_handler()
        .handle(Some(&token_of(&url)), u64::MAX)
        .unwrap();
    assert_eq!(file.contents, b"hello");
}

// =============================================================================
// HTTP Tests
// =============================================================================

#[tokio::test]
async fn test_http_delivery() {
    let (gateway, _temp_dir) = create_local_gateway("");
    let fs = gateway.filesystem();
    fs.write("docs/readme.md", b"# Title", &WriteOptions::default())
        .unwrap();
    let url = fs.public_url("docs/readme.md", &Map::new()).unwrap();
    assert!(url.starts_with("http://127.0.0.1:8080/site/file?data="));

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .uri(request_target(&url))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "text/markdown");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "inline; filename=\"readme.md\""
    );
    assert_eq!(headers[header::CONTENT_LENGTH], "7");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"# Title");
}

#[tokio::test]
async fn test_http_rejections_are_indistinguishable() {
    let (gateway, _temp_dir) = create_local_gateway("");
    let fs = gateway.filesystem();
    fs.write("present.txt", b"x", &WriteOptions::default()).unwrap();

    let expired = fs
        .temporary_url(
            "present.txt",
            UNIX_EPOCH + Duration::from_secs(1_000),
            &Map::new(),
        )
        .unwrap();
    let dangling = fs.public_url("absent.txt", &Map::new()).unwrap();

    let mut tampered = token_of(&dangling);
    let flipped = if tampered.ends_with('A') { "B" } else { "A" };
    tampered.replace_range(tampered.len() - 1.., flipped);

    let targets = vec![
        "/site/file?data=not-a-token".to_string(),
        format!("/site/file?data={}", tampered),
        request_target(&expired),
        request_target(&dangling),
        "/site/file".to_string(),
    ];

    let mut responses = Vec::new();
    for target in &targets {
        responses.push(get(gateway.router(), target).await);
    }

    for response in &responses {
        assert_eq!(response.0, StatusCode::NOT_FOUND);
        assert_eq!(response, &responses[0]);
    }
    assert_eq!(responses[0].2, NOT_FOUND_BODY.as_bytes());
    assert!(responses[0]
        .1
        .as_deref()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_http_health() {
    let (gateway, _temp_dir) = create_local_gateway("");
    let (status, _, body) = get(gateway.router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

// =============================================================================
// Capability Tests
// =============================================================================

#[test]
fn test_zip_capability_gaps_without_debug() {
    let (gateway, _temp_dir) = create_zip_gateway(false);
    let fs = gateway.filesystem();
    fs.write("a.txt", b"zipped", &WriteOptions::default()).unwrap();

    assert_eq!(fs.read("a.txt").unwrap(), b"zipped");
    assert_eq!(fs.checksum("a.txt", "md5").unwrap(), "");
    assert_eq!(fs.public_url("a.txt", &Map::new()).unwrap(), "");
    assert_eq!(
        fs.temporary_url("a.txt", SystemTime::now() + Duration::from_secs(60), &Map::new())
            .unwrap(),
        ""
    );
}

#[test]
fn test_zip_capability_gaps_with_debug() {
    let (gateway, _temp_dir) = create_zip_gateway(true);
    let fs = gateway.filesystem();
    fs.write("a.txt", b"zipped", &WriteOptions::default()).unwrap();

    assert!(matches!(
        fs.checksum("a.txt", "md5"),
        Err(StorageError::ChecksumUnsupported { backend: "zip" })
    ));
    assert!(matches!(
        fs.public_url("a.txt", &Map::new()),
        Err(StorageError::UnsupportedCapability { backend: "zip", .. })
    ));
    assert!(matches!(
        fs.temporary_url("a.txt", SystemTime::now() + Duration::from_secs(60), &Map::new()),
        Err(StorageError::UnsupportedCapability { backend: "zip", .. })
    ));
}

#[test]
fn test_local_checksums() {
    let (gateway, _temp_dir) = create_local_gateway("");
    let fs = gateway.filesystem();
    fs.write("hello.txt", b"hello", &WriteOptions::default())
        .unwrap();

    assert_eq!(
        fs.checksum("hello.txt", "md5").unwrap(),
        "5d41402abc4b2a76b9719d911017c592"
    );
    assert_eq!(
        fs.checksum("hello.txt", "sha256").unwrap(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert!(matches!(
        fs.checksum("hello.txt", "crc32"),
        Err(StorageError::ChecksumAlgoUnsupported(_))
    ));
}

#[test]
fn test_local_native_public_url() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.security.secret = SECRET.to_string();
    config.storage.root = PathBuf::from(temp_dir.path());
    config.storage.public_base_url = Some("https://cdn.example.com/files/".to_string());
    let gateway = Gateway::from_config(config).unwrap();

    let url = gateway
        .filesystem()
        .public_url("docs/a.pdf", &Map::new())
        .unwrap();
    assert_eq!(url, "https://cdn.example.com/files/docs/a.pdf");

    // Temporary URLs still go through signed delivery.
    let url = gateway
        .filesystem()
        .temporary_url("docs/a.pdf", SystemTime::now() + Duration::from_secs(60), &Map::new())
        .unwrap();
    assert!(url.starts_with("http://127.0.0.1:8080/site/file?data="));
}
