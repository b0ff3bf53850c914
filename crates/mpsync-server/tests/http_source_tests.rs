//! Marketplace HTTP pager and fetcher against a mock server

use mpsync_server::ingest::{
    FetchError, HttpItemFetcher, HttpPager, ItemFetcher, Pager, RawRecord, SourceAccount,
    SourceApiConfig,
};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn source(server: &MockServer) -> SourceApiConfig {
    SourceApiConfig {
        base_url: server.uri(),
        page_timeout: Duration::from_secs(2),
        detail_timeout: Duration::from_secs(2),
    }
}

fn account() -> SourceAccount {
    SourceAccount::new("123456", "APP_USR-test")
}

// ============================================================================
// Pager
// ============================================================================

#[tokio::test]
async fn test_pager_requests_one_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .and(query_param("seller", "123456"))
        .and(query_param("offset", "50"))
        .and(query_param("limit", "20"))
        .and(query_param("sort", "date_desc"))
        .and(header("authorization", "Bearer APP_USR-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": 2000001}, {"id": 2000002}],
            "paging": {"total": 70, "offset": 50, "limit": 20}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pager = HttpPager::new(Client::new(), source(&server));
    let page = pager.fetch_page(&account(), 50, 20).await.unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].external_id(), Some(2000001));
}

#[tokio::test]
async fn test_pager_missing_results_is_empty_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"paging": {}})))
        .mount(&server)
        .await;

    let pager = HttpPager::new(Client::new(), source(&server));
    assert!(pager.fetch_page(&account(), 0, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pager_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let pager = HttpPager::new(Client::new(), source(&server));
    let err = pager.fetch_page(&account(), 0, 50).await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized(StatusCode::UNAUTHORIZED)));
}

#[tokio::test]
async fn test_pager_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let pager = HttpPager::new(Client::new(), source(&server));
    let err = pager.fetch_page(&account(), 0, 50).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)));
}

#[tokio::test]
async fn test_pager_invalid_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let pager = HttpPager::new(Client::new(), source(&server));
    let err = pager.fetch_page(&account(), 0, 50).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
}

#[tokio::test]
async fn test_pager_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = SourceApiConfig {
        page_timeout: Duration::from_millis(200),
        ..source(&server)
    };
    let pager = HttpPager::new(Client::new(), config);
    let err = pager.fetch_page(&account(), 0, 50).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(ref e) if e.is_timeout()));
}

// ============================================================================
// Item fetcher
// ============================================================================

#[tokio::test]
async fn test_fetcher_merges_order_shipment_and_fees() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/2000001"))
        .and(header("authorization", "Bearer APP_USR-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2000001,
            "status": "paid",
            "total_amount": 150.0,
            "order_items": [{"sale_fee": 12.0}, {"sale_fee": 3.0}],
            "shipping": {"id": 555, "cost": 8.5}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shipments/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 555,
            "status": "delivered"
        })))
        .mount(&server)
        .await;

    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));
    let raw = RawRecord(json!({"id": 2000001, "buyer": {"nickname": "TESTBUYER"}}));
    let record = fetcher.fetch(&account(), &raw).await.unwrap();

    assert_eq!(record.external_id, 2000001);
    assert_eq!(record.data["buyer"]["nickname"], "TESTBUYER");
    assert_eq!(record.data["status"], "paid");
    assert_eq!(record.data["shipping_details"]["status"], "delivered");
    assert_eq!(record.data["sale_fees"], 15.0);
    assert_eq!(record.data["shipping_fees"], 8.5);
    assert_eq!(record.data["total_fees"], 23.5);
    // no discounts mocked, the lookup answers 404
    assert!(record.data.get("discounts_applied").is_none());
    assert_eq!(record.data["is_advertising_sale"], false);
}

#[tokio::test]
async fn test_fetcher_attaches_discounts_and_advertising_flag() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/2000004"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2000004,
            "status": "paid",
            "context": {"flows": ["cbt"]}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/orders/2000004/discounts"))
        .and(header("authorization", "Bearer APP_USR-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "details": [{"type": "coupon", "value": 5.0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));
    let record = fetcher
        .fetch(&account(), &RawRecord(json!({"id": 2000004})))
        .await
        .unwrap();

    assert_eq!(record.data["discounts_applied"]["details"][0]["type"], "coupon");
    assert_eq!(record.data["is_advertising_sale"], true);
    assert!(record.data["advertising_campaign_id"].is_null());
}

#[tokio::test]
async fn test_fetcher_tolerates_failing_discounts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/2000005"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2000005,
            "status": "paid"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/orders/2000005/discounts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));
    let record = fetcher
        .fetch(&account(), &RawRecord(json!({"id": 2000005})))
        .await
        .unwrap();

    assert_eq!(record.external_id, 2000005);
    assert!(record.data.get("discounts_applied").is_none());
}

#[tokio::test]
async fn test_fetcher_tolerates_missing_shipment() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/2000002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2000002,
            "status": "paid",
            "shipping": {"id": 777}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shipments/777"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));
    let record = fetcher
        .fetch(&account(), &RawRecord(json!({"id": "2000002"})))
        .await
        .unwrap();

    assert_eq!(record.external_id, 2000002);
    assert!(record.data.get("shipping_details").is_none());
    assert_eq!(record.data["total_fees"], 0.0);
}

#[tokio::test]
async fn test_fetcher_fails_when_order_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/2000003"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));
    let err = fetcher
        .fetch(&account(), &RawRecord(json!({"id": 2000003})))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("2000003"));
}

#[tokio::test]
async fn test_fetcher_rejects_record_without_id() {
    let server = MockServer::start().await;
    let fetcher = HttpItemFetcher::new(Client::new(), source(&server));

    let result = fetcher.fetch(&account(), &RawRecord(json!({"status": "paid"}))).await;
    assert!(result.is_err());
}
