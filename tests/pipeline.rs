use proxy_harvest::config::{HarvestConfig, RetryPolicy, SourceConfig, SourceFormat};
use proxy_harvest::proxy::sink;
use proxy_harvest::{
    harvest, CheckerConfig, GeoStatus, HarvestError, HttpSource, PoolBuilder, ProxyCandidate,
    ProxyChecker, ProxyType, Verdict,
};
use std::collections::HashSet;
use std::net::TcpListener;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Routed through a proxy, so the host is never resolved
const CHECK_URL: &str = "http://check.invalid/ip";

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        factor: 2.0,
        max_delay_ms: 50,
    }
}

fn http_source(server: &MockServer, route: &str, format: SourceFormat, retry: RetryPolicy) -> HttpSource {
    HttpSource::new(
        SourceConfig::new(route, &format!("{}{}", server.uri(), route), format, ProxyType::Http),
        Duration::from_secs(5),
        retry,
    )
    .unwrap()
}

/// A mock server that answers proxied IP echo requests
async fn echo_proxy(origin: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "origin": origin })))
        .mount(&server)
        .await;
    server
}

async fn geo_server(country_code: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "status": "success",
                    "countryCode": country_code
                }))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

fn candidate_for(server: &MockServer) -> ProxyCandidate {
    ProxyCandidate::new("127.0.0.1", server.address().port(), ProxyType::Http)
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn checker(country: Option<&str>, geo: Option<&MockServer>) -> ProxyChecker {
    let mut config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(5))
        .with_geo_timeout(Duration::from_millis(300))
        .with_test_url(CHECK_URL.to_string())
        .with_country(country.map(String::from));
    if let Some(geo) = geo {
        config = config.with_geo_url(format!("{}/json/{{ip}}", geo.uri()));
    }
    ProxyChecker::with_config(config).unwrap()
}

#[tokio::test]
async fn pool_builder_merges_text_and_json_sources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/text"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:8080\nbad-entry\n1.2.3.4:8080\n5.6.7.8:3128\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geonode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"ip": "5.6.7.8", "port": "3128", "country": "US", "protocols": ["http"]},
                {"ip": "9.9.9.9", "port": "1080", "country": "US", "protocols": ["socks5"]}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let build = PoolBuilder::new()
        .with_source(http_source(&server, "/text", SourceFormat::Auto, RetryPolicy::none()))
        .with_source(http_source(&server, "/geonode", SourceFormat::Auto, RetryPolicy::none()))
        .with_source(http_source(&server, "/broken", SourceFormat::Auto, RetryPolicy::none()))
        .build()
        .await
        .unwrap();

    let keys: Vec<String> = build.candidates.iter().map(ProxyCandidate::key).collect();
    assert_eq!(keys, vec!["1.2.3.4:8080", "5.6.7.8:3128", "9.9.9.9:1080"]);
    assert_eq!(build.candidates[2].proxy_type, ProxyType::Socks5);
    assert!(build.candidates[0].claimed_country.is_none());
    assert!(!build.sources[2].is_success());
}

#[tokio::test]
async fn all_sources_failing_is_an_aggregate_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(6)
        .mount(&server)
        .await;

    let result = PoolBuilder::new()
        .with_source(http_source(&server, "/a", SourceFormat::Text, fast_retry(2)))
        .with_source(http_source(&server, "/b", SourceFormat::Json, fast_retry(2)))
        .with_source(http_source(&server, "/c", SourceFormat::Auto, fast_retry(2)))
        .build()
        .await;

    match result {
        Err(HarvestError::AllSourcesFailed { attempted }) => assert_eq!(attempted, 3),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(build) => panic!("expected failure, got {} candidates", build.candidates.len()),
    }
}

#[tokio::test]
async fn validator_accepts_working_proxy() {
    let proxy = echo_proxy("203.0.113.9, 10.0.0.1").await;

    let result = checker(None, None).check_proxy(&candidate_for(&proxy)).await;

    assert!(result.reachable);
    assert!(result.is_accepted());
    assert_eq!(result.observed_origin_ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(result.geo, GeoStatus::Skipped);
}

#[tokio::test]
async fn validator_rejects_dead_proxy() {
    let candidate = ProxyCandidate::new("127.0.0.1", closed_port(), ProxyType::Http);

    let result = checker(None, None).check_proxy(&candidate).await;

    assert!(!result.reachable);
    assert!(!result.is_accepted());
    assert!(result.observed_origin_ip.is_none());
}

#[tokio::test]
async fn validator_rejects_non_success_status() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(407))
        .mount(&proxy)
        .await;

    let result = checker(None, None).check_proxy(&candidate_for(&proxy)).await;

    assert!(!result.reachable);
    assert_eq!(result.verdict, Verdict::BadStatus(407));
}

#[tokio::test]
async fn validator_times_out_slow_proxy() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "origin": "203.0.113.9" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&proxy)
        .await;

    let config = CheckerConfig::new()
        .with_timeout(Duration::from_millis(300))
        .with_test_url(CHECK_URL.to_string());
    let result = ProxyChecker::with_config(config)
        .unwrap()
        .check_proxy(&candidate_for(&proxy))
        .await;

    assert!(!result.reachable);
    assert_eq!(result.verdict, Verdict::TimedOut);
    assert!(result.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn geolocation_timeout_accepts_optimistically() {
    let proxy = echo_proxy("203.0.113.9").await;
    let geo = geo_server("DE", Duration::from_secs(5)).await;

    let result = checker(Some("US"), Some(&geo))
        .check_proxy(&candidate_for(&proxy))
        .await;

    assert!(result.is_accepted());
    assert!(result.resolved_country.is_none());
    assert!(matches!(result.geo, GeoStatus::Unavailable(_)));
}

#[tokio::test]
async fn geolocation_mismatch_rejects() {
    let proxy = echo_proxy("203.0.113.9").await;
    let geo = geo_server("DE", Duration::ZERO).await;

    let result = checker(Some("us"), Some(&geo))
        .check_proxy(&candidate_for(&proxy))
        .await;

    assert!(result.reachable);
    assert!(!result.is_accepted());
    assert_eq!(result.resolved_country.as_deref(), Some("DE"));
    assert_eq!(
        result.verdict,
        Verdict::CountryMismatch {
            expected: "US".to_string(),
            found: "DE".to_string()
        }
    );
}

#[tokio::test]
async fn geolocation_match_accepts() {
    let proxy = echo_proxy("203.0.113.9").await;
    let geo = geo_server("US", Duration::ZERO).await;

    let result = checker(Some("US"), Some(&geo))
        .check_proxy(&candidate_for(&proxy))
        .await;

    assert!(result.is_accepted());
    assert_eq!(result.resolved_country.as_deref(), Some("US"));
    assert_eq!(result.geo, GeoStatus::Resolved);
}

#[tokio::test]
async fn harvest_end_to_end_writes_reloadable_artifact() {
    let proxy = echo_proxy("203.0.113.9").await;
    let dead = closed_port();
    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "127.0.0.1:{}\nbad-entry\n127.0.0.1:{}\n127.0.0.1:{}\n",
            proxy.address().port(),
            dead,
            proxy.address().port()
        )))
        .mount(&lists)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("proxies.txt");
    let report_path = dir.path().join("report.json");
    let config = HarvestConfig {
        sources: vec![SourceConfig::new(
            "mock",
            &format!("{}/list", lists.uri()),
            SourceFormat::Text,
            ProxyType::Http,
        )],
        check_url: CHECK_URL.to_string(),
        check_timeout_secs: 5,
        workers: 2,
        max_proxies: 5,
        output: output.clone(),
        retry: RetryPolicy::none(),
        ..HarvestConfig::default()
    };

    let builder = PoolBuilder::from_config(&config).unwrap();
    let outcome = harvest(&config, builder, false, Some(report_path.clone()))
        .await
        .unwrap();

    assert_eq!(outcome.build.candidates.len(), 2);
    assert_eq!(outcome.report.pool.len(), 1);
    assert_eq!(outcome.written.as_deref(), Some(output.as_path()));

    let expected: HashSet<String> = [format!("127.0.0.1:{}", proxy.address().port())].into();
    let loaded: HashSet<String> = sink::read_pool(&output)
        .unwrap()
        .iter()
        .map(ProxyCandidate::key)
        .collect();
    assert_eq!(loaded, expected);
    assert!(report_path.exists());
}

#[tokio::test]
async fn harvest_with_no_working_proxies_leaves_output_untouched() {
    let lists = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("127.0.0.1:{}\n", closed_port())))
        .mount(&lists)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("proxies.txt");
    std::fs::write(&output, "1.2.3.4:8080\n").unwrap();
    let config = HarvestConfig {
        sources: vec![SourceConfig::new("mock", &lists.uri(), SourceFormat::Auto, ProxyType::Http)],
        check_url: CHECK_URL.to_string(),
        output: output.clone(),
        retry: RetryPolicy::none(),
        ..HarvestConfig::default()
    };

    let builder = PoolBuilder::from_config(&config).unwrap();
    let outcome = harvest(&config, builder, false, None).await.unwrap();
    assert!(outcome.is_empty());
    assert!(outcome.written.is_none());
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "1.2.3.4:8080\n");

    let builder = PoolBuilder::from_config(&config).unwrap();
    let outcome = harvest(&config, builder, true, None).await.unwrap();
    assert!(outcome.is_empty());
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
}

#[tokio::test]
async fn harvest_fails_when_every_source_fails() {
    let config = HarvestConfig {
        sources: vec![
            SourceConfig::new("a", &format!("http://127.0.0.1:{}/a", closed_port()), SourceFormat::Auto, ProxyType::Http),
            SourceConfig::new("b", &format!("http://127.0.0.1:{}/b", closed_port()), SourceFormat::Auto, ProxyType::Http),
            SourceConfig::new("c", &format!("http://127.0.0.1:{}/c", closed_port()), SourceFormat::Auto, ProxyType::Http),
        ],
        retry: RetryPolicy::none(),
        ..HarvestConfig::default()
    };

    let builder = PoolBuilder::from_config(&config).unwrap();
    let err = harvest(&config, builder, false, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HarvestError>(),
        Some(HarvestError::AllSourcesFailed { attempted: 3 })
    ));
}
