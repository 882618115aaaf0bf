// webgrab-lib/tests/integration.rs

//! Integration tests for webgrab-lib exports and fetch behavior against
//! local mock servers.

use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;
use webgrab_lib::{
    generate_partitions, group_by_domain, read_local, BatchOptions, GrabConfig, GrabError,
    Grabber, ReadMode,
};
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A port nothing listens on.
const UNREACHABLE: &str = "http://127.0.0.1:1/";

fn quick_grabber() -> Grabber {
    let config = GrabConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_retry_backoff(Duration::from_millis(1));
    Grabber::with_config(config).unwrap()
}

async fn mount_ok(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_batch_has_one_key_per_distinct_url() {
    let server = MockServer::start().await;
    mount_ok(&server, "/a", "a").await;
    mount_ok(&server, "/b", "b").await;
    mount_ok(&server, "/c", "c").await;

    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());
    let c = format!("{}/c", server.uri());
    let urls = vec![a.clone(), a.clone(), b.clone(), c.clone(), b.clone(), a.clone()];

    let grabber = quick_grabber();
    let results = grabber
        .get_batch(urls, &grabber.batch_options())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for (url, body) in [(&a, "a"), (&b, "b"), (&c, "c")] {
        let response = results[url].as_ref().expect("fetched");
        assert_eq!(response.text().unwrap(), body);
    }
    assert!(grabber.warnings().is_empty());
}

#[tokio::test]
async fn test_duplicates_are_requested_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/once"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/once", server.uri());
    let grabber = quick_grabber();
    grabber
        .get_batch(vec![url.clone(); 5], &grabber.batch_options())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_503_is_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let opts = grabber.fetch_options().with_retries(2);
    let err = grabber
        .get(&format!("{}/flaky", server.uri()), &opts)
        .await
        .unwrap_err();

    assert!(matches!(err, GrabError::Transport { .. }));
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_success_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let response = grabber
        .get(&format!("{}/ok", server.uri()), &grabber.fetch_options())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text().unwrap(), "fine");
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recover"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_ok(&server, "/recover", "back").await;

    let grabber = quick_grabber();
    let response = grabber
        .get(
            &format!("{}/recover", server.uri()),
            &grabber.fetch_options().with_retries(5),
        )
        .await
        .unwrap();
    assert_eq!(response.text().unwrap(), "back");
}

#[tokio::test]
async fn test_client_errors_are_returned_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let response = grabber
        .get(&format!("{}/missing", server.uri()), &grabber.fetch_options())
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_post_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let response = grabber
        .post(
            &format!("{}/submit", server.uri()),
            b"payload".to_vec(),
            &grabber.fetch_options().with_retries(3),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let body: HashMap<&str, u32> = HashMap::from([("answer", 42)]);
    let response = grabber
        .post_json(&format!("{}/json", server.uri()), &body, &grabber.fetch_options())
        .await
        .unwrap();
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_repeated_response_headers_are_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "session=1")
                .append_header("set-cookie", "theme=dark"),
        )
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let response = grabber
        .get(&format!("{}/login", server.uri()), &grabber.fetch_options())
        .await
        .unwrap();
    assert_eq!(response.header_all("Set-Cookie"), ["session=1", "theme=dark"]);
}

#[tokio::test]
async fn test_headers_and_query_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(header("x-request-id", "abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let opts = grabber
        .fetch_options()
        .with_query("q", "rust")
        .with_header("X-Request-Id", "abc");
    let response = grabber
        .get(&format!("{}/search", server.uri()), &opts)
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_one_unreachable_url_becomes_one_warning() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for i in 0..4 {
        let route = format!("/page/{}", i);
        mount_ok(&server, &route, "ok").await;
        urls.push(format!("{}{}", server.uri(), route));
    }
    urls.push(UNREACHABLE.to_string());

    let grabber = quick_grabber();
    let mut opts = grabber.batch_options();
    opts.fetch = opts.fetch.with_retries(0);

    let results = grabber.get_batch(urls.clone(), &opts).await.unwrap();

    assert_eq!(results.len(), 5);
    let fetched = results.values().filter(|r| r.is_some()).count();
    assert_eq!(fetched, 4);
    assert!(results[UNREACHABLE].is_none());

    let warnings = grabber.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("127.0.0.1:1"));
}

#[tokio::test]
async fn test_disabled_warnings_stay_silent() {
    let grabber = quick_grabber();
    grabber.set_warnings(false);
    let mut opts = grabber.batch_options();
    opts.fetch = opts.fetch.with_retries(0);

    let results = grabber.get_batch(vec![UNREACHABLE], &opts).await.unwrap();
    assert!(results[UNREACHABLE].is_none());
    assert!(grabber.warnings().is_empty());
}

#[tokio::test]
async fn test_malformed_url_does_not_abort_the_batch() {
    let server = MockServer::start().await;
    mount_ok(&server, "/ok", "ok").await;
    let good = format!("{}/ok", server.uri());
    let malformed = "http://exa mple.com/";

    let grabber = quick_grabber();
    let mut opts = grabber.batch_options();
    opts.fetch = opts.fetch.with_retries(0);
    let results = grabber
        .get_batch(vec![good.as_str(), malformed, UNREACHABLE], &opts)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[&good].as_ref().unwrap().text().unwrap(), "ok");
    assert!(results[malformed].is_none());
    assert!(results[UNREACHABLE].is_none());

    let warnings = grabber.take_warnings();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.contains("exa mple.com")));
}

#[tokio::test]
async fn test_post_batch_sends_each_body_once() {
    let server = MockServer::start().await;
    for (route, body) in [("/a", "alpha"), ("/b", "beta")] {
        Mock::given(method("POST"))
            .and(path(route))
            .and(body_string(body))
            .respond_with(ResponseTemplate::new(201).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let urls = vec![
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
        format!("{}/down", server.uri()),
    ];
    let bodies = ["alpha", "beta", "gamma"];

    let grabber = quick_grabber();
    let results = grabber
        .post_batch(&urls, &bodies, &grabber.batch_options())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[&urls[0]].as_ref().unwrap().text().unwrap(), "alpha");
    assert_eq!(results[&urls[1]].as_ref().unwrap().status, 201);
    // POSTs are not retried; the 503 comes back as a response
    assert_eq!(results[&urls[2]].as_ref().unwrap().status, 503);
    assert!(grabber.warnings().is_empty());
}

#[tokio::test]
async fn test_post_json_batch_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(body_json(serde_json::json!({"id": 7})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/items", server.uri());
    let grabber = quick_grabber();
    let results = grabber
        .post_json_batch(&[url.as_str()], &[serde_json::json!({"id": 7})], &grabber.batch_options())
        .await
        .unwrap();
    assert_eq!(results[&url].as_ref().unwrap().status, 200);
}

#[tokio::test]
async fn test_identity_lookup_without_tor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "query": "203.0.113.9",
            "country": "Iceland",
            "regionName": "Capital Region",
            "city": "Reykjavik"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let identity = grabber
        .tor_identity_from(&format!("{}/json", server.uri()))
        .await
        .unwrap();
    assert!(!identity.tor_enabled);
    assert_eq!(identity.ip, "203.0.113.9");
    assert_eq!(identity.country.as_deref(), Some("Iceland"));
    assert_eq!(identity.region.as_deref(), Some("Capital Region"));
    assert_eq!(identity.city.as_deref(), Some("Reykjavik"));
}

#[tokio::test]
async fn test_high_volume_domain_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(25)
        .mount(&server)
        .await;

    let urls: Vec<String> = (0..25)
        .map(|i| format!("{}/item/{}", server.uri(), i))
        .collect();

    let grabber = quick_grabber();
    let opts = BatchOptions::default()
        .with_thread_limit(2)
        .with_partitioning(2, 2, 3)
        .with_time_rest(Duration::from_millis(1));
    let results = grabber.get_batch(urls, &opts).await.unwrap();

    assert_eq!(results.len(), 25);
    assert!(results.values().all(|r| r.as_ref().map(|r| r.status) == Some(200)));
}

#[tokio::test]
async fn test_batch_rejects_bad_options_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let opts = grabber.batch_options().with_thread_limit(0);
    let err = grabber
        .get_batch(vec![format!("{}/x", server.uri())], &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::InvalidArgument { .. }));
}

#[test]
fn test_partition_coverage() {
    let sizes = [1usize, 3, 8, 2, 10];
    let urls: Vec<String> = sizes
        .iter()
        .enumerate()
        .flat_map(|(d, &n)| (0..n).map(move |i| format!("https://d{}.test/{}", d, i)))
        .collect();

    let groups = group_by_domain(&urls);
    let partitions = generate_partitions(&groups, 2, 1, 10);

    for (d, &size) in sizes.iter().enumerate() {
        let domain = format!("https://d{}.test", d);
        let mut covered: Vec<usize> = partitions
            .iter()
            .filter(|p| p.domain == domain)
            .flat_map(|p| p.range())
            .collect();
        covered.sort_unstable();
        assert_eq!(covered, (0..size).collect::<Vec<_>>(), "{}", domain);
    }
}

#[tokio::test]
async fn test_local_paths_are_rejected() {
    let grabber = quick_grabber();
    for target in ["./a.txt", "/etc/hosts", "C:\\x"] {
        let err = grabber
            .get(target, &grabber.fetch_options())
            .await
            .unwrap_err();
        assert!(
            matches!(err, GrabError::InvalidTarget { .. }),
            "{} should be rejected",
            target
        );
        assert!(err.to_string().contains("read_local"));
    }
}

#[tokio::test]
async fn test_invalid_arguments() {
    let grabber = quick_grabber();
    let opts = grabber.fetch_options();

    assert!(matches!(
        grabber.get("", &opts).await,
        Err(GrabError::InvalidArgument { .. })
    ));
    assert!(matches!(
        grabber.get("ftp://example.com/x", &opts).await,
        Err(GrabError::InvalidTarget { .. })
    ));
    assert!(matches!(
        grabber
            .get("http://example.com/", &opts.clone().with_retries(101))
            .await,
        Err(GrabError::InvalidArgument { .. })
    ));
    assert!(matches!(
        grabber
            .get("http://example.com/", &opts.with_timeout(Duration::ZERO))
            .await,
        Err(GrabError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn test_download_writes_body() {
    let server = MockServer::start().await;
    mount_ok(&server, "/files/report.txt", "report body").await;
    Mock::given(method("GET"))
        .and(path("/files/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("saved.txt");
    let grabber = quick_grabber();

    let written = grabber
        .download(
            &format!("{}/files/report.txt", server.uri()),
            Some(&target),
            &grabber.fetch_options(),
        )
        .await
        .unwrap();
    assert_eq!(written, target);
    assert_eq!(
        read_local(&target, ReadMode::Text, "utf-8").unwrap().into_text(),
        "report body"
    );

    let err = grabber
        .download(
            &format!("{}/files/gone.txt", server.uri()),
            Some(&dir.path().join("gone.txt")),
            &grabber.fetch_options(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_download_batch() {
    let server = MockServer::start().await;
    mount_ok(&server, "/one.txt", "1").await;
    mount_ok(&server, "/two.txt", "2").await;

    let dir = TempDir::new().unwrap();
    let urls = vec![
        format!("{}/one.txt", server.uri()),
        format!("{}/two.txt", server.uri()),
        UNREACHABLE.to_string(),
    ];
    let names = vec![
        dir.path().join("one.txt"),
        dir.path().join("two.txt"),
        dir.path().join("three.txt"),
    ];

    let grabber = quick_grabber();
    let mut opts = grabber.batch_options();
    opts.fetch = opts.fetch.with_retries(0);

    let written = grabber.download_batch(&urls[..], &names[..], &opts).await.unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(grabber.take_warnings().len(), 1);

    let err = grabber
        .download_batch(&urls[..], &names[..1], &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_proxy_list_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proxies.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("10.1.1.1:8080\n10.1.1.2:3128\n"))
        .mount(&server)
        .await;

    let grabber = quick_grabber();
    let count = grabber
        .update_proxies_from(&format!("{}/proxies.txt", server.uri()))
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert!(grabber.proxies().random().is_some());
}

#[test]
fn test_library_info() {
    let info = webgrab_lib::info();
    assert!(!info.version.is_empty());
}

#[tokio::test]
async fn test_reset_sessions_drops_shared_and_dedicated_clients() {
    let server = MockServer::start().await;
    mount_ok(&server, "/page", "ok").await;

    let grabber = quick_grabber();
    let urls: Vec<String> = (0..5)
        .map(|i| format!("{}/page?n={}", server.uri(), i))
        .collect();
    grabber
        .get_batch(urls, &grabber.batch_options())
        .await
        .unwrap();
    grabber
        .get(&format!("{}/page", server.uri()), &grabber.fetch_options())
        .await
        .unwrap();

    assert_eq!(grabber.reset_sessions(), 2);
    assert_eq!(grabber.reset_sessions(), 0);
}
