//! HTTP API tests driven through the router without a socket

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use punchup::api::{create_router, AppState, StoreEventQueries};
use punchup::processing::entities::event_slug;
use punchup::processing::{Batch, EventBus, FlushTrigger, ProcessingOptions, ProcessingPipeline};
use punchup::scheduler::{SchedulingOptions, SchedulingService};
use punchup::storage::SessionFactory;

use common::{performer, RecordingDispatcher};

fn app(sessions: &SessionFactory) -> Router {
    let scheduling = Arc::new(SchedulingService::new(
        sessions.clone(),
        Arc::new(RecordingDispatcher::default()),
        SchedulingOptions::default(),
    ));
    let queries = Arc::new(StoreEventQueries::new(sessions.clone()));
    create_router(AppState::new(scheduling, queries))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let app = app(&SessionFactory::in_memory());
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_event_slug_is_not_found() {
    let app = app(&SessionFactory::in_memory());
    let (status, body) = send(&app, "GET", "/events/nowhere-2026-01-01-2000", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("nowhere"));
}

#[tokio::test]
async fn test_source_creation_statuses() {
    let app = app(&SessionFactory::in_memory());
    let source = json!({ "name": "Punchup", "website": "https://punchup.live" });

    let (status, body) = send(&app, "POST", "/sources", Some(source.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["id"].as_str().unwrap().parse::<Uuid>().is_ok());

    let (status, _) = send(&app, "POST", "/sources", Some(source)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let invalid = json!({ "name": "Elsewhere", "website": "ftp://elsewhere" });
    let (status, body) = send(&app, "POST", "/sources", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("website"));
}

#[tokio::test]
async fn test_schedule_flow() {
    let app = app(&SessionFactory::in_memory());

    let (_, body) = send(
        &app,
        "POST",
        "/sources",
        Some(json!({ "name": "Punchup", "website": "https://punchup.live" })),
    )
    .await;
    let source_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/skus",
        Some(json!({ "source_id": source_id, "name": "comics", "type": "full_crawl" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let sku_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/schedules",
        Some(json!({
            "source_id": source_id,
            "sku_id": sku_id,
            "name": "nightly",
            "cron_expression": "0 2 * * *"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let schedule_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/schedules/{schedule_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "nightly");
    assert_eq!(body["data"]["cron_expression"], "0 2 * * *");

    let (status, _) = send(&app, "GET", &format!("/schedules/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_detail_includes_venue_and_lineup() {
    let sessions = SessionFactory::in_memory();
    let start = Utc.with_ymd_and_hms(2026, 12, 31, 21, 30, 0).unwrap();

    let pipeline =
        ProcessingPipeline::new(ProcessingOptions::new(1, 10, 1), sessions.clone(), EventBus::default())
            .unwrap();
    let mut records = Vec::new();
    for name in ["Nate Bargatze", "Ali Wong"] {
        records.extend(
            performer(name, "The Stand", start)
                .into_raw_records(Uuid::nil(), Uuid::nil())
                .unwrap(),
        );
    }
    pipeline
        .process_batch(Batch::new(records, FlushTrigger::Final), &CancellationToken::new())
        .await
        .unwrap();

    let app = app(&sessions);
    let slug = event_slug("The Stand", start);
    let (status, body) = send(&app, "GET", &format!("/events/{slug}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["event"]["slug"], slug);
    assert_eq!(body["data"]["venue"]["name"], "The Stand");
    let acts: Vec<&str> = body["data"]["acts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(acts, vec!["Ali Wong", "Nate Bargatze"]);
}
