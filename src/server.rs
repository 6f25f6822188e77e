//! HTTP surface: the JSON query endpoint, CORS handling, and the server
//! lifecycle including drain-on-shutdown for outstanding cache writes.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::dns::{DnsQuery, DnsResponse, JsonBody, RecordType};
use crate::metrics::{Metrics, run_metrics_server};
use crate::resolver::{Resolution, Resolver};
use crate::upstream::{DNS_JSON_CONTENT_TYPE, DohClient};

/// Country signal stamped by the network edge, consulted when the request
/// carries no explicit `region` parameter.
const EDGE_REGION_HEADER: &str = "cf-ipcountry";

const LANDING_PAGE: &str = "<html>\n<body>\n<h1>dohgate</h1>\n\
<p>DNS query endpoint: <code>/dns-query?name=example.com&amp;type=A</code></p>\n\
</body>\n</html>\n";

#[derive(Debug, Deserialize)]
struct QueryParams {
    name: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    region: Option<String>,
}

struct AppState {
    resolver: Resolver,
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/dns-query", get(dns_query).options(preflight))
        .with_state(state)
}

/// Build the query router around an already constructed resolver.
pub fn router(resolver: Resolver) -> Router {
    app(Arc::new(AppState { resolver }))
}

/// Run the proxy until ctrl-c, then drain outstanding cache writes.
pub async fn run(config: RuntimeConfig) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .context("Invalid listener address")?;

    let metrics = Arc::new(Metrics::new().context("Failed to initialise metrics")?);
    let client = Arc::new(DohClient::new(Duration::from_secs(
        config.upstream.timeout_seconds,
    ))?);
    let resolver = Resolver::new(&config, client, metrics.clone());

    info!(
        listener = %addr,
        block_patterns = resolver.pattern_count(),
        overrides = resolver.override_count(),
        regions = resolver.region_count(),
        "Starting dohgate DoH server"
    );

    let state = Arc::new(AppState { resolver });
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind listener at {addr}"))?;
    let server = axum::serve(listener, app(state.clone()).into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    match config.server.metrics_listen.clone() {
        Some(metrics_addr) => {
            tokio::try_join!(
                async { server.await.context("DoH server terminated unexpectedly") },
                async { run_metrics_server(&metrics_addr, metrics.clone()).await },
            )?;
        }
        None => server.await.context("DoH server terminated unexpectedly")?,
    }

    state.resolver.drain().await;
    info!("Outstanding cache writes drained; stopping");
    Ok(())
}

pub(crate) async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received; stopping dohgate");
}

async fn dns_query(
    State(state): State<Arc<AppState>>,
    params: Option<Query<QueryParams>>,
    headers: HeaderMap,
) -> Response {
    let Some(Query(params)) = params else {
        return error_response("invalid query string");
    };

    let Some(name) = params.name.filter(|n| !n.trim().is_empty()) else {
        return error_response("missing name parameter");
    };

    let record_type = match params.record_type.as_deref() {
        None => RecordType::A,
        Some(raw) => match RecordType::parse(raw) {
            Some(record_type) => record_type,
            None => return error_response(&format!("unsupported record type: {raw}")),
        },
    };

    let region = params
        .region
        .filter(|r| !r.trim().is_empty())
        .or_else(|| {
            headers
                .get(EDGE_REGION_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });

    let query = DnsQuery {
        name,
        record_type,
        region,
    };
    let resolution = state.resolver.resolve(&query).await;
    resolution_response(&resolution)
}

async fn preflight() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    apply_cors(response.headers_mut());
    response
}

async fn index() -> Response {
    let mut response = Response::new(Body::from(LANDING_PAGE));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn resolution_response(resolution: &Resolution) -> Response {
    json_response(
        &JsonBody::from_response(&resolution.response),
        resolution.client_max_age,
    )
}

fn error_response(message: &str) -> Response {
    json_response(
        &JsonBody::from_response(&DnsResponse::upstream_error(message)),
        0,
    )
}

fn json_response(body: &JsonBody, max_age: u64) -> Response {
    let payload =
        serde_json::to_vec(body).unwrap_or_else(|_| br#"{"Status":2,"Answer":[]}"#.to_vec());
    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(DNS_JSON_CONTENT_TYPE),
    );
    let cache_control = HeaderValue::from_str(&format!("public, max-age={max_age}"))
        .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=0"));
    headers.insert(header::CACHE_CONTROL, cache_control);
    apply_cors(headers);
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsAnswer, ResponseStatus};
    use crate::upstream::{FetchError, Upstream};
    use async_trait::async_trait;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct StubUpstream {
        fail: bool,
        last_endpoint: Mutex<Option<String>>,
    }

    impl StubUpstream {
        fn answering() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                last_endpoint: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                last_endpoint: Mutex::new(None),
            })
        }

        fn last_endpoint(&self) -> Option<String> {
            self.last_endpoint.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Upstream for StubUpstream {
        async fn fetch(
            &self,
            endpoint: &str,
            name: &str,
            record_type: RecordType,
        ) -> Result<DnsResponse, FetchError> {
            *self.last_endpoint.lock().expect("lock") = Some(endpoint.to_string());
            if self.fail {
                return Err(FetchError::Unreachable("connect timed out".into()));
            }
            Ok(DnsResponse {
                status: ResponseStatus::Ok,
                answers: vec![DnsAnswer {
                    name: name.to_string(),
                    rtype: record_type.code(),
                    ttl: 240,
                    data: "93.184.216.34".into(),
                }],
                note: None,
            })
        }
    }

    fn test_router(upstream: Arc<StubUpstream>) -> Router {
        let raw = r#"
            [cache]
            ttl_seconds = 300

            [upstream]
            default = "https://default.test/dns-query"

            [upstream.regions]
            BD = "https://bd.test/dns-query"

            [overrides.hosts]
            "prothomalo.com" = ["103.101.91.10"]

            [blocklist]
            patterns = ["doubleclick.net"]
        "#;
        let config: RuntimeConfig = toml::from_str(raw).expect("config parses");
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        router(Resolver::new(&config, upstream, metrics))
    }

    async fn get_json(router: Router, uri: &str) -> (Response, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request served");
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.expect("body collects").to_bytes();
        let value: Value = serde_json::from_slice(&bytes).expect("body is JSON");
        (Response::from_parts(parts, Body::empty()), value)
    }

    #[tokio::test]
    async fn forwarded_query_returns_answers_and_headers() {
        let (response, body) = get_json(
            test_router(StubUpstream::answering()),
            "/dns-query?name=example.com&type=A",
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            DNS_JSON_CONTENT_TYPE
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=300"
        );
        assert_eq!(body["Status"], 0);
        assert_eq!(body["Answer"][0]["data"], "93.184.216.34");
        assert_eq!(body["Answer"][0]["type"], 1);
    }

    #[tokio::test]
    async fn blocked_query_serves_empty_answer_with_comment() {
        let (response, body) = get_json(
            test_router(StubUpstream::answering()),
            "/dns-query?name=ads.doubleclick.net",
        )
        .await;

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=0"
        );
        assert_eq!(body["Status"], 0);
        assert_eq!(body["Answer"].as_array().unwrap().len(), 0);
        assert!(body["Comment"].is_string());
    }

    #[tokio::test]
    async fn override_query_serves_configured_address() {
        let (response, body) = get_json(
            test_router(StubUpstream::answering()),
            "/dns-query?name=prothomalo.com&type=A",
        )
        .await;

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=0"
        );
        assert_eq!(body["Status"], 0);
        assert_eq!(body["Answer"][0]["data"], "103.101.91.10");
        assert_eq!(body["Answer"][0]["TTL"], 3600);
        assert_eq!(body["Comment"], "override");
    }

    #[tokio::test]
    async fn missing_name_is_a_json_error() {
        let (response, body) =
            get_json(test_router(StubUpstream::answering()), "/dns-query?type=A").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body["Status"], 2);
        assert!(body["Comment"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn unsupported_type_is_a_json_error() {
        let (_, body) = get_json(
            test_router(StubUpstream::answering()),
            "/dns-query?name=example.com&type=BOGUS",
        )
        .await;

        assert_eq!(body["Status"], 2);
        assert!(body["Comment"].as_str().unwrap().contains("BOGUS"));
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_as_status_two() {
        let (response, body) = get_json(
            test_router(StubUpstream::failing()),
            "/dns-query?name=example.com&type=A",
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=0"
        );
        assert_eq!(body["Status"], 2);
        assert!(!body["Comment"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn region_parameter_selects_upstream() {
        let upstream = StubUpstream::answering();
        let router = test_router(upstream.clone());
        get_json(router, "/dns-query?name=example.com&region=BD").await;
        assert_eq!(
            upstream.last_endpoint().as_deref(),
            Some("https://bd.test/dns-query")
        );
    }

    #[tokio::test]
    async fn edge_header_supplies_region_when_parameter_absent() {
        let upstream = StubUpstream::answering();
        let router = test_router(upstream.clone());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/dns-query?name=example.com")
                    .header(EDGE_REGION_HEADER, "BD")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request served");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            upstream.last_endpoint().as_deref(),
            Some("https://bd.test/dns-query")
        );
    }

    #[tokio::test]
    async fn region_parameter_beats_edge_header() {
        let upstream = StubUpstream::answering();
        let router = test_router(upstream.clone());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/dns-query?name=example.com&region=ZZ")
                    .header(EDGE_REGION_HEADER, "BD")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request served");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            upstream.last_endpoint().as_deref(),
            Some("https://default.test/dns-query")
        );
    }

    #[tokio::test]
    async fn preflight_returns_no_content_with_cors() {
        let response = test_router(StubUpstream::answering())
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/dns-query")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request served");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn landing_page_names_the_query_endpoint() {
        let response = test_router(StubUpstream::answering())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request served");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let html = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(html.contains("/dns-query"));
    }
}
