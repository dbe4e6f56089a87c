//! HTTP API tests driving the router in-process with a stub extractor.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use muster_core::{Embedding, ExtractError, FaceExtractor, IdentityCache};
use musterd::api::{self, AppState};
use musterd::config::Config;
use musterd::engine::spawn_engine;
use musterd::store::{SqliteStore, Store};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "muster-test-boundary";

/// Embeds the top-left pixel scaled to [0, 1]; black means "no face".
/// A `SHORT_PIXEL` image yields a two-value embedding.
struct PixelExtractor;

const SHORT_PIXEL: [u8; 3] = [7, 7, 7];

impl FaceExtractor for PixelExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<Embedding>, ExtractError> {
        let Rgb([r, g, b]) = *image.get_pixel(0, 0);
        if [r, g, b] == [0, 0, 0] {
            return Ok(None);
        }
        if [r, g, b] == SHORT_PIXEL {
            return Ok(Some(Embedding::new(vec![0.5, 0.5])));
        }
        Ok(Some(Embedding::new(vec![
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
        ])))
    }
}

async fn app() -> Router {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let cache = Arc::new(IdentityCache::new());
    let engine = spawn_engine(|| Ok(Box::new(PixelExtractor) as Box<dyn FaceExtractor>))
        .await
        .unwrap();
    let config = Config::default();
    api::router(
        AppState::new(store, cache, engine, &config),
        config.max_upload_bytes,
    )
}

fn png(pixel: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(8, 8, Rgb(pixel))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, Vec<u8>),
}

fn multipart(parts: Vec<Part<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"face.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post(app: &Router, uri: &str, parts: Vec<Part<'_>>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(parts)))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn enroll(app: &Router, id: &str, name: Option<&str>, pixel: [u8; 3]) -> (StatusCode, Value) {
    let mut parts = vec![Part::Text("external_id", id)];
    if let Some(name) = name {
        parts.push(Part::Text("display_name", name));
    }
    parts.push(Part::File("image", png(pixel)));
    post(app, "/enroll", parts).await
}

#[tokio::test]
async fn test_health_reports_cache_size() {
    let app = app().await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["identities_cached"], 0);

    enroll(&app, "U1", None, [200, 10, 10]).await;
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["identities_cached"], 1);
}

#[tokio::test]
async fn test_enroll_then_mark_then_cooldown() {
    let app = app().await;

    let (status, body) = enroll(&app, "U1", Some("Ada"), [200, 10, 10]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["external_id"], "U1");
    assert_eq!(body["display_name"], "Ada");

    let (status, body) = post(
        &app,
        "/mark",
        vec![
            Part::File("image", png([200, 10, 10])),
            Part::Text("source", "front-door"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["external_id"], "U1");
    assert_eq!(body["display_name"], "Ada");
    assert_eq!(body["distance"], 0.0);
    assert!(body["record_id"].is_i64());
    assert!(body["timestamp"].is_string());
    assert!(body.get("message").is_none());

    let (status, body) = post(&app, "/mark", vec![Part::File("image", png([200, 10, 10]))]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Already marked recently (cooldown)");
    assert_eq!(body["external_id"], "U1");
    assert!(body.get("record_id").is_none());

    let (_, ledger) = get(&app, "/attendance").await;
    let ledger = ledger.as_array().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0]["external_id"], "U1");
    assert_eq!(ledger[0]["source"], "front-door");
}

#[tokio::test]
async fn test_unrecognized_face() {
    let app = app().await;
    enroll(&app, "U1", None, [255, 255, 255]).await;

    let (status, body) = post(&app, "/mark", vec![Part::File("image", png([10, 10, 10]))]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["reason"], "Face not recognized");
    assert!(body["distance"].as_f64().unwrap() > 0.6);
}

#[tokio::test]
async fn test_mark_with_empty_registry() {
    let app = app().await;
    let (status, body) = post(&app, "/mark", vec![Part::File("image", png([1, 2, 3]))]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["detail"],
        "No enrolled faces yet. Register at least one person."
    );
}

#[tokio::test]
async fn test_no_face_detected() {
    let app = app().await;
    let (status, body) = enroll(&app, "U1", None, [0, 0, 0]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No face detected in image.");

    let (_, people) = get(&app, "/people").await;
    assert!(people.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_enroll_validation() {
    let app = app().await;

    let (status, _) = post(&app, "/enroll", vec![Part::File("image", png([9, 9, 9]))]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post(&app, "/enroll", vec![Part::Text("external_id", "U1")]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post(
        &app,
        "/enroll",
        vec![
            Part::Text("external_id", "U1"),
            Part::File("image", b"definitely not a png".to_vec()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reenroll_keeps_people_count_and_name() {
    let app = app().await;
    enroll(&app, "U1", Some("Ada"), [200, 10, 10]).await;
    enroll(&app, "U2", Some("Bob"), [10, 200, 10]).await;

    let (status, body) = enroll(&app, "U1", None, [10, 10, 200]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ada");

    let (_, people) = get(&app, "/people").await;
    let people = people.as_array().unwrap();
    assert_eq!(people.len(), 2);
    assert_eq!(people[0]["external_id"], "U1");
    assert_eq!(people[0]["display_name"], "Ada");
    assert!(people[0].get("id").is_none());

    // Matching now uses the new embedding.
    let (_, body) = post(&app, "/mark", vec![Part::File("image", png([10, 10, 200]))]).await;
    assert_eq!(body["external_id"], "U1");
    assert_eq!(body["distance"], 0.0);
}

#[tokio::test]
async fn test_mark_with_wrong_length_embedding_is_bad_gateway() {
    let app = app().await;
    enroll(&app, "U1", None, [200, 10, 10]).await;

    let (status, body) = post(&app, "/mark", vec![Part::File("image", png(SHORT_PIXEL))]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"].is_string());

    let (_, ledger) = get(&app, "/attendance").await;
    assert!(ledger.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_person_attendance() {
    let app = app().await;
    enroll(&app, "U1", None, [200, 10, 10]).await;
    enroll(&app, "U2", None, [10, 200, 10]).await;
    post(&app, "/mark", vec![Part::File("image", png([200, 10, 10]))]).await;
    post(&app, "/mark", vec![Part::File("image", png([10, 200, 10]))]).await;

    let (status, body) = get(&app, "/people/U2/attendance").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["external_id"], "U2");

    let (status, _) = get(&app, "/people/nobody/attendance").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, all) = get(&app, "/attendance").await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}
