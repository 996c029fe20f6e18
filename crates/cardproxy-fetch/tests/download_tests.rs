//! Functional tests for the image fetch transport.
//!
//! These run the client against a local mock image host and pin down the
//! observable contract of a download:
//! - one GET per call, to the base URL with `id` appended
//! - the body comes back as text whatever the status
//! - transport failures surface as errors and are never retried

use cardproxy_fetch::{FetchConfig, FetchError, ImageFetchClient, ImageIdentifier};
use cardproxy_test_utils::{unreachable_url, MockImageHost, MockResponse, ResettingHost};
use std::time::Duration;

fn client_for(base_url: url::Url) -> ImageFetchClient {
    ImageFetchClient::new(&FetchConfig::new(base_url)).unwrap()
}

#[tokio::test]
async fn issues_one_get_with_id_query() {
    let host = MockImageHost::start().await;
    host.respond("c0ffee", MockResponse::ok("data"));
    let client = client_for(host.url("/api/image"));

    client.download(&ImageIdentifier::from("c0ffee")).await.unwrap();

    let requests = host.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/image");
    assert_eq!(requests[0].query, "id=c0ffee");
    assert_eq!(requests[0].id.as_deref(), Some("c0ffee"));
}

#[tokio::test]
async fn identifier_arrives_verbatim_after_query_decoding() {
    let host = MockImageHost::start().await;
    let client = client_for(host.url("/api/image"));
    let id = "set 7/card#12&foil=yes";

    client.download(&ImageIdentifier::from(id)).await.unwrap();

    let requests = host.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id.as_deref(), Some(id));
}

#[tokio::test]
async fn success_body_is_returned_as_text() {
    let host = MockImageHost::start().await;
    host.respond("x", MockResponse::ok("ABC123"));
    let client = client_for(host.url("/api/image"));

    let payload = client.download(&ImageIdentifier::from("x")).await.unwrap();
    assert_eq!(payload.as_str(), "ABC123");
}

#[tokio::test]
async fn error_status_body_is_returned_not_rejected() {
    let host = MockImageHost::start().await;
    host.respond("missing", MockResponse::status(404, "not found"));
    let client = client_for(host.url("/api/image"));

    let payload = client
        .download(&ImageIdentifier::from("missing"))
        .await
        .expect("404 must resolve, not reject");
    assert_eq!(payload.as_str(), "not found");
}

#[tokio::test]
async fn server_error_body_is_returned_not_rejected() {
    let host = MockImageHost::start().await;
    host.respond("boom", MockResponse::status(502, "upstream unavailable"));
    let client = client_for(host.url("/api/image"));

    let payload = client.download(&ImageIdentifier::from("boom")).await.unwrap();
    assert_eq!(payload.as_str(), "upstream unavailable");
    assert_eq!(host.request_count(), 1);
}

#[tokio::test]
async fn empty_body_is_an_empty_payload() {
    let host = MockImageHost::start().await;
    host.respond("blank", MockResponse::ok(""));
    let client = client_for(host.url("/api/image"));

    let payload = client.download(&ImageIdentifier::from("blank")).await.unwrap();
    assert!(payload.is_empty());
}

#[tokio::test]
async fn connection_reset_fails_without_retry() {
    let host = ResettingHost::start().await;
    let client = client_for(host.url("/api/image"));

    let result = client.download(&ImageIdentifier::from("x")).await;
    match result {
        Err(FetchError::Transport(_)) => {}
        other => panic!("expected transport failure, got {other:?}"),
    }
    assert_eq!(host.connection_count(), 1);
}

#[tokio::test]
async fn refused_connection_is_a_transport_failure() {
    let client = client_for(unreachable_url("/api/image").await);

    let err = client
        .download(&ImageIdentifier::from("x"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn slow_response_past_timeout_is_a_transport_failure() {
    let host = MockImageHost::start().await;
    host.respond(
        "slow",
        MockResponse::ok("late").with_delay(Duration::from_millis(1500)),
    );
    let config =
        FetchConfig::new(host.url("/api/image")).with_timeout(Duration::from_millis(300));
    let client = ImageFetchClient::new(&config).unwrap();

    let err = client
        .download(&ImageIdentifier::from("slow"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(err.is_timeout());
    assert_eq!(host.request_count(), 1);
}

#[tokio::test]
async fn each_call_is_its_own_request() {
    let host = MockImageHost::start().await;
    host.respond("same", MockResponse::ok("v1"));
    let client = client_for(host.url("/api/image"));
    let id = ImageIdentifier::from("same");

    assert_eq!(client.download(&id).await.unwrap().as_str(), "v1");
    host.respond("same", MockResponse::ok("v2"));
    assert_eq!(client.download(&id).await.unwrap().as_str(), "v2");

    assert_eq!(host.request_count(), 2);
}
