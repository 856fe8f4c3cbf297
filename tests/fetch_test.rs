use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doc_ingest::pipeline::fetch::{FetchError, Fetcher, HttpFetcher};
use doc_ingest::retry::RetryPolicy;

fn fetcher(max_attempts: u32) -> HttpFetcher {
    HttpFetcher::new(
        Duration::from_secs(5),
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn recovers_after_transient_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"%PDF-1.7 body".to_vec(), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let payload = fetcher(4)
        .fetch(&format!("{}/doc.pdf", server.uri()))
        .await
        .unwrap();

    assert_eq!(payload.status, 200);
    assert!(payload.bytes.starts_with(b"%PDF-"));
    assert_eq!(payload.content_type.as_deref(), Some("application/pdf"));
}

#[tokio::test]
async fn permanent_404_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(4)
        .fetch(&format!("{}/missing.pdf", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404 }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limiting_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy.pdf"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let payload = fetcher(3)
        .fetch(&format!("{}/busy.pdf", server.uri()))
        .await
        .unwrap();
    assert_eq!(payload.status, 200);
}

#[tokio::test]
async fn exhaustion_surfaces_the_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = fetcher(3)
        .fetch(&format!("{}/down.pdf", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 500 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn badly_encoded_urls_fall_back_to_mutations() {
    let server = MockServer::start().await;
    // Only the variant with '%' stripped resolves; everything else 404s.
    Mock::given(method("GET"))
        .and(path("/a20b.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let payload = fetcher(2)
        .fetch(&format!("{}/a%20b.pdf", server.uri()))
        .await
        .unwrap();
    assert_eq!(payload.status, 200);
}

#[tokio::test]
async fn malformed_url_fails_without_any_request() {
    let err = fetcher(4).fetch("not a url at all").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
}
