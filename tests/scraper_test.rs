//! HTTP scraper tests against a mock server

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use punchup::collection::{
    BrowserContextOptions, CollectionError, HttpScraperFactory, ScraperFactory,
};

use common::performer_page;

fn context() -> BrowserContextOptions {
    BrowserContextOptions {
        user_agent: "punchup-test/1.0".to_string(),
        navigation_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_collects_performer_from_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/comedians/mark-normand"))
        .and(header("user-agent", "punchup-test/1.0"))
        .and(header("viewport-width", "1280"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(performer_page("Mark Normand", "Gotham", "2026-11-14T19:30:00Z"))
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let scraper = HttpScraperFactory::new(50)
        .create_scraper(&context())
        .await
        .unwrap();
    let records = scraper
        .collect(&format!("{}/comedians/mark-normand", server.uri()))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.name, "Mark Normand");
    assert_eq!(record.bio.as_deref(), Some("Mark Normand tours the country"));
    assert_eq!(record.events.len(), 1);

    let event = &record.events[0];
    assert_eq!(event.venue, "Gotham");
    assert_eq!(event.location, "New York, NY");
    assert_eq!(event.start_time, Utc.with_ymd_and_hms(2026, 11, 14, 19, 30, 0).unwrap());
    assert_eq!(event.ticket_link.as_deref(), Some("https://tickets.example/Gotham"));

    assert_ok!(scraper.close().await);
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/comedians/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let scraper = HttpScraperFactory::new(50)
        .create_scraper(&context())
        .await
        .unwrap();
    let err = assert_err!(
        scraper
            .collect(&format!("{}/comedians/missing", server.uri()))
            .await
    );

    assert!(matches!(err, CollectionError::Status { status: 404, .. }));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_server_error_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let scraper = HttpScraperFactory::new(50)
        .create_scraper(&context())
        .await
        .unwrap();
    let err = assert_err!(scraper.collect(&server.uri()).await);

    assert!(matches!(err, CollectionError::Status { status: 503, .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_page_without_performer_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;

    let scraper = HttpScraperFactory::new(50)
        .create_scraper(&context())
        .await
        .unwrap();
    let records = assert_ok!(scraper.collect(&server.uri()).await);
    assert!(records.is_empty());
}
