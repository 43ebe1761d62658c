//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the search API and the sentiment
//! endpoint and run complete crawls end-to-end against a temporary database.

use reply_trawl::config::{parse_config, Config};
use reply_trawl::crawler::Coordinator;
use reply_trawl::storage::{RunStatus, Storage};
use reply_trawl::{Collection, CrawlPhase, TrawlError};
use serde_json::{json, Value};
use std::path::Path;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SEARCH_PATH: &str = "/tweets/search/all";
const LOOKUP_PATH: &str = "/tweets";

/// Creates a test configuration against the given API and database
fn create_test_config(base_url: &str, db_path: &Path, top_percent: u32, extra: &str) -> Config {
    parse_config(&format!(
        r#"
[api]
base-url = "{}"
bearer-token = "test-token"
timeout-secs = 5
max-retries = 3
retry-backoff-ms = 1

[search]
query = "rust"
top-percent = {}

[rate-limit]
safety-margin-ms = 0

[[rate-limit.window]]
max-requests = 1000
period-secs = 1

[output]
database-path = "{}"
{}
"#,
        base_url,
        top_percent,
        db_path.display(),
        extra
    ))
    .expect("Failed to parse test config")
}

fn post_json(id: i64, conversation_id: i64, likes: u32, text: &str) -> Value {
    json!({
        "id": id.to_string(),
        "author_id": "1",
        "text": text,
        "conversation_id": conversation_id.to_string(),
        "created_at": "2023-03-01T12:00:00.000Z",
        "public_metrics": {"like_count": likes, "reply_count": 0, "retweet_count": 0, "quote_count": 0}
    })
}

fn page_json(posts: Vec<Value>, next_token: Option<&str>) -> Value {
    json!({
        "data": posts,
        "includes": {"users": [{"id": "1", "username": "ann", "name": "Ann"}]},
        "meta": {"result_count": posts.len(), "next_token": next_token}
    })
}

fn ok_json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

async fn mount_search(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("query", "rust"))
        .respond_with(ok_json(body))
        .mount(server)
        .await;
}

async fn mount_replies(server: &MockServer, conversation_id: i64, replies: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param(
            "query",
            format!("conversation_id:{} is:reply", conversation_id).as_str(),
        ))
        .respond_with(ok_json(page_json(replies, None)))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}

fn query_value(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn test_full_crawl_three_phases() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    // 100 posts, engagement equal to the id
    let posts: Vec<Value> = (1..=100)
        .map(|i| post_json(i, i, i as u32, "root"))
        .collect();
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("query", "rust"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ok_json(page_json(posts, None)))
        .mount(&mock_server)
        .await;

    // Top 5% is ids 96..=100; two replies point at roots outside the search
    mount_replies(
        &mock_server,
        100,
        vec![post_json(10001, 100, 0, "r"), post_json(10002, 5001, 0, "r")],
    )
    .await;
    mount_replies(&mock_server, 99, vec![post_json(9901, 5002, 0, "r")]).await;
    mount_replies(&mock_server, 98, vec![post_json(9801, 98, 0, "r")]).await;
    mount_replies(&mock_server, 97, vec![post_json(9701, 97, 0, "r")]).await;
    mount_replies(&mock_server, 96, vec![]).await;

    // Root 5002 was deleted: the lookup only returns 5001
    Mock::given(method("GET"))
        .and(path(LOOKUP_PATH))
        .and(query_param("ids", "5001,5002"))
        .respond_with(ok_json(json!({
            "data": [post_json(5001, 5001, 3, "found root")],
            "errors": [{"resource_id": "5002", "title": "Not Found Error"}]
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), &db_path, 5, "");
    let mut coordinator =
        Coordinator::from_config(config, "hash").expect("Failed to create coordinator");
    let report = coordinator.run().await.expect("Crawl failed");

    assert_eq!(report.search.stored, 100);
    assert_eq!(report.roots_selected, 5);
    assert_eq!(report.conversations, 5);
    assert_eq!(report.replies.stored, 5);
    assert_eq!(report.gaps_found, 2);
    assert_eq!(report.backfill.stored, 1);
    assert_eq!(report.gaps_remaining, 1);
    assert_eq!(coordinator.phase(), CrawlPhase::Complete);

    // Replies are requested in engagement order
    let searches = requests_to(&mock_server, SEARCH_PATH).await;
    let reply_queries: Vec<String> = searches
        .iter()
        .filter_map(|r| query_value(r, "query"))
        .filter(|q| q.starts_with("conversation_id:"))
        .collect();
    assert_eq!(
        reply_queries,
        vec![
            "conversation_id:100 is:reply",
            "conversation_id:99 is:reply",
            "conversation_id:98 is:reply",
            "conversation_id:97 is:reply",
            "conversation_id:96 is:reply",
        ]
    );
    assert_eq!(requests_to(&mock_server, LOOKUP_PATH).await.len(), 1);

    let storage = coordinator.storage();
    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_posts(Collection::Posts).unwrap(), 101);
    assert_eq!(storage.count_posts(Collection::Replies).unwrap(), 5);
    assert_eq!(storage.count_users().unwrap(), 1);
    assert_eq!(storage.missing_conversation_roots(None, 10).unwrap(), vec![5002]);

    let reply = storage
        .get_post(Collection::Replies, 10002)
        .unwrap()
        .expect("reply stored");
    assert_eq!(reply.conversation_id, Some(5001));
    assert_eq!(reply.url, "https://twitter.com/1/status/10002");

    let run = storage.get_run(coordinator.run_id()).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.phase, CrawlPhase::Complete);
    assert_eq!(run.query, "rust");
}

#[tokio::test]
async fn test_search_follows_next_token() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("query", "rust"))
        .and(query_param("next_token", "page2"))
        .respond_with(ok_json(page_json(vec![post_json(3, 3, 0, "c")], None)))
        .mount(&mock_server)
        .await;
    mount_search(
        &mock_server,
        page_json(vec![post_json(1, 1, 0, "a"), post_json(2, 2, 0, "b")], Some("page2")),
    )
    .await;

    let config = create_test_config(&mock_server.uri(), &db_path, 0, "");
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.search.pages, 2);
    assert_eq!(report.search.stored, 3);
    assert_eq!(report.roots_selected, 0);
    assert_eq!(report.conversations, 0);
}

#[tokio::test]
async fn test_rate_limit_response_is_retried() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    // First request is rejected, the replay succeeds
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("query", "rust"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_search(&mock_server, page_json(vec![post_json(1, 1, 0, "a")], None)).await;

    let config = create_test_config(&mock_server.uri(), &db_path, 0, "");
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.search.stored, 1);
    assert_eq!(report.rate_limit_hits, 1);
    assert_eq!(requests_to(&mock_server, SEARCH_PATH).await.len(), 2);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    mount_search(&mock_server, page_json(vec![post_json(1, 1, 0, "a")], None)).await;

    let config = create_test_config(&mock_server.uri(), &db_path, 0, "");
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.search.stored, 1);
    assert_eq!(requests_to(&mock_server, SEARCH_PATH).await.len(), 3);
}

#[tokio::test]
async fn test_unauthorized_aborts_search_phase() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), &db_path, 5, "");
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(
        err,
        TrawlError::Phase {
            phase: CrawlPhase::Search,
            ..
        }
    ));
    assert_eq!(requests_to(&mock_server, SEARCH_PATH).await.len(), 1);

    let storage = coordinator.storage();
    let run = storage
        .lock()
        .unwrap()
        .get_run(coordinator.run_id())
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_backfill_chunks_lookups() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    mount_search(&mock_server, page_json(vec![post_json(1, 1, 9, "root")], None)).await;

    // 150 replies, each in a conversation we never saw
    let replies: Vec<Value> = (0..150)
        .map(|i| post_json(2000 + i, 10_000 + i, 0, "r"))
        .collect();
    mount_replies(&mock_server, 1, replies).await;

    Mock::given(method("GET"))
        .and(path(LOOKUP_PATH))
        .respond_with(ok_json(json!({"errors": []})))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), &db_path, 100, "");
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.gaps_found, 150);
    assert_eq!(report.gaps_remaining, 150);

    let lookups = requests_to(&mock_server, LOOKUP_PATH).await;
    let sizes: Vec<usize> = lookups
        .iter()
        .filter_map(|r| query_value(r, "ids"))
        .map(|ids| ids.split(',').count())
        .collect();
    assert_eq!(sizes, vec![100, 50]);
}

#[tokio::test]
async fn test_sentiment_labels_are_stored() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    mount_search(
        &mock_server,
        page_json(
            vec![
                post_json(1, 1, 0, "great work"),
                post_json(2, 2, 0, "bad take"),
                post_json(3, 3, 0, "nice"),
            ],
            None,
        ),
    )
    .await;

    // Labels each input, answering in the nested shape
    Mock::given(method("POST"))
        .and(path("/model"))
        .respond_with(|request: &Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
            let labels: Vec<Value> = body["inputs"]
                .as_array()
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|text| {
                            let negative = text.as_str().unwrap_or("").contains("bad");
                            json!([
                                {"label": "NEGATIVE", "score": if negative { 0.9 } else { 0.1 }},
                                {"label": "POSITIVE", "score": if negative { 0.1 } else { 0.9 }}
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(labels)
        })
        .mount(&mock_server)
        .await;

    let extra = format!(
        "[sentiment]\nendpoint = \"{}/model\"\nbatch-size = 2\n",
        mock_server.uri()
    );
    let config = create_test_config(&mock_server.uri(), &db_path, 0, &extra);
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.search.scored, 3);
    assert_eq!(requests_to(&mock_server, "/model").await.len(), 2);

    let storage = coordinator.storage();
    let storage = storage.lock().unwrap();
    let bad = storage.get_post(Collection::Posts, 2).unwrap().unwrap();
    assert_eq!(bad.sentiment_label.as_deref(), Some("NEGATIVE"));
    assert_eq!(bad.sentiment_score, Some(0.9));
    assert_eq!(storage.count_scored(Collection::Posts).unwrap(), 3);
}

#[tokio::test]
async fn test_sentiment_failure_still_stores_posts() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    mount_search(&mock_server, page_json(vec![post_json(1, 1, 0, "a")], None)).await;
    Mock::given(method("POST"))
        .and(path("/model"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let extra = format!("[sentiment]\nendpoint = \"{}/model\"\n", mock_server.uri());
    let config = create_test_config(&mock_server.uri(), &db_path, 0, &extra);
    let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.search.stored, 1);
    assert_eq!(report.search.scored, 0);

    let storage = coordinator.storage();
    let post = storage
        .lock()
        .unwrap()
        .get_post(Collection::Posts, 1)
        .unwrap()
        .unwrap();
    assert!(post.sentiment_label.is_none());
}

#[tokio::test]
async fn test_rerun_does_not_duplicate() {
    let mock_server = MockServer::start().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("trawl.db");

    mount_search(
        &mock_server,
        page_json(vec![post_json(1, 1, 5, "a"), post_json(2, 2, 1, "b")], None),
    )
    .await;
    mount_replies(&mock_server, 1, vec![post_json(11, 1, 0, "r")]).await;

    for expected_new in [2, 0] {
        let config = create_test_config(&mock_server.uri(), &db_path, 50, "");
        let mut coordinator = Coordinator::from_config(config, "hash").unwrap();
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.search.stored, expected_new);

        let storage = coordinator.storage();
        let storage = storage.lock().unwrap();
        assert_eq!(storage.count_posts(Collection::Posts).unwrap(), 2);
        assert_eq!(storage.count_posts(Collection::Replies).unwrap(), 1);
    }
}
