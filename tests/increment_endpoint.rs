use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::Value;
use tower::ServiceExt;

use viewguard::clock::ManualClock;
use viewguard::config::Config;
use viewguard::content::{ContentItem, ContentRepository, SqliteContent};
use viewguard::error::{Error, Result};
use viewguard::server::build_router;
use viewguard::state::{build_test_state, AppState};

const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36";
const REFERER: &str = "https://example.com/blog/hello-world/";

struct App {
    router: Router,
    state: AppState,
    content: Arc<SqliteContent>,
    clock: Arc<ManualClock>,
}

impl App {
    fn new() -> App {
        let clock = Arc::new(ManualClock::default());
        let content = Arc::new(SqliteContent::open_in_memory().expect("content db"));
        content.upsert("post-1", "/blog/hello-world/").expect("seed");
        let config = Config {
            trust_proxy_headers: true,
            ..Config::default()
        };
        let state = build_test_state(config, clock.clone(), content.clone()).expect("state");
        App {
            router: build_router(state.clone()),
            state,
            content,
            clock,
        }
    }

    async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("infallible")
    }

    /// Starts a session and returns (cookie, csrf token).
    async fn session(&self, ip: &str) -> (String, String) {
        let req = Request::get("/api/session")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .expect("request");
        let resp = self.send(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .expect("set-cookie")
            .to_owned();
        let body = json(resp).await;
        let token = body["csrf_token"].as_str().expect("token").to_owned();
        (cookie, token)
    }

    fn views(&self) -> u64 {
        self.content
            .find("post-1")
            .expect("find")
            .map_or(0, |i| i.view_count)
    }

    fn attempts(&self) -> usize {
        self.state.attempts.recent(1000).expect("attempts").len()
    }
}

fn view_request(ip: &str, cookie: &str, token: &str) -> axum::http::request::Builder {
    Request::post("/api/content/post-1/view")
        .header("x-forwarded-for", ip)
        .header(header::COOKIE, cookie)
        .header(header::USER_AGENT, UA)
        .header(header::REFERER, REFERER)
        .header("x-requested-with", "XMLHttpRequest")
        .header("x-csrftoken", token)
}

fn with_header(mut req: Request<Body>, name: header::HeaderName, value: &'static str) -> Request<Body> {
    req.headers_mut().insert(name, HeaderValue::from_static(value));
    req
}

async fn json(resp: Response<Body>) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn valid_view_is_counted() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.1").await;
    let resp = app
        .send(view_request("203.0.113.1", &cookie, &token).body(Body::empty()).expect("request"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["view_count"], 1);
    assert_eq!(app.views(), 1);
    assert_eq!(app.attempts(), 1);
}

#[tokio::test]
async fn replays_count_once() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.2").await;
    for i in 0..4 {
        let resp = app
            .send(view_request("203.0.113.2", &cookie, &token).body(Body::empty()).expect("request"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        if i == 0 {
            assert_eq!(body["success"], true);
        } else {
            assert_eq!(body["success"], false);
            assert_eq!(body["message"], "Page already viewed");
            assert_eq!(body["view_count"], 1);
        }
        app.clock.advance(Duration::seconds(11));
    }
    assert_eq!(app.views(), 1);
    assert_eq!(app.attempts(), 4);
}

#[tokio::test]
async fn second_attempt_within_window_is_rate_limited() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.3").await;
    let first = app
        .send(view_request("203.0.113.3", &cookie, &token).body(Body::empty()).expect("request"))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    app.clock.advance(Duration::seconds(3));
    let second = app
        .send(view_request("203.0.113.3", &cookie, &token).body(Body::empty()).expect("request"))
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key(header::RETRY_AFTER));
    let body = json(second).await;
    assert_eq!(body["error"], "rate limit exceeded");
    assert!(body["reset_time"].is_string());
}

#[tokio::test]
async fn rejections_use_taxonomy_status_codes() {
    let app = App::new();
    let ip = "203.0.113.4";
    let (cookie, token) = app.session(ip).await;

    let forged = view_request(ip, &cookie, "forged").body(Body::empty()).expect("request");
    assert_eq!(app.send(forged).await.status(), StatusCode::FORBIDDEN);

    let wrong_method = view_request(ip, &cookie, &token)
        .method("PUT")
        .body(Body::empty())
        .expect("request");
    let resp = app.send(wrong_method).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json(resp).await["error"], "invalid request type");

    let oversized = view_request(ip, &cookie, &token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"pad":"{}"}}"#, "x".repeat(200))))
        .expect("request");
    assert_eq!(app.send(oversized).await.status(), StatusCode::BAD_REQUEST);

    let unknown = view_request(ip, &cookie, &token)
        .uri("/api/content/nope/view")
        .body(Body::empty())
        .expect("request");
    assert_eq!(app.send(unknown).await.status(), StatusCode::NOT_FOUND);

    assert_eq!(app.views(), 0);
    assert_eq!(app.attempts(), 4);
}

#[tokio::test]
async fn unrelated_referer_is_rejected() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.5").await;
    let req = with_header(
        view_request("203.0.113.5", &cookie, &token).body(Body::empty()).expect("request"),
        header::REFERER,
        "https://example.com/projects/other/",
    );
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(resp).await["error"], "invalid referer");
    assert_eq!(app.views(), 0);
}

#[tokio::test]
async fn body_token_is_accepted() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.6").await;
    let req = Request::post("/api/content/post-1/view")
        .header("x-forwarded-for", "203.0.113.6")
        .header(header::COOKIE, &cookie)
        .header(header::USER_AGENT, UA)
        .header(header::REFERER, REFERER)
        .header("x-requested-with", "XMLHttpRequest")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"csrfmiddlewaretoken":"{token}"}}"#)))
        .expect("request");
    assert_eq!(app.send(req).await.status(), StatusCode::OK);
    assert_eq!(app.views(), 1);
}

#[tokio::test]
async fn crawler_is_not_counted_or_recorded() {
    let app = App::new();
    let (cookie, token) = app.session("66.249.66.1").await;
    let req = with_header(
        view_request("66.249.66.1", &cookie, &token).body(Body::empty()).expect("request"),
        header::USER_AGENT,
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    );
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["success"], false);
    assert_eq!(app.views(), 0);
    assert_eq!(app.attempts(), 0);
}

#[tokio::test]
async fn scripted_client_never_reaches_counter() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.7").await;
    for agent in ["curl/8.5.0", ""] {
        let req = with_header(
            view_request("203.0.113.7", &cookie, &token).body(Body::empty()).expect("request"),
            header::USER_AGENT,
            agent,
        );
        assert_eq!(app.send(req).await.status(), StatusCode::FORBIDDEN);
    }
    assert_eq!(app.views(), 0);
    assert_eq!(app.attempts(), 2);
}

/// Finds every item but cannot write counters.
struct ReadOnlyContent;

impl ContentRepository for ReadOnlyContent {
    fn find(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(Some(ContentItem {
            id: id.into(),
            path: "/blog/hello-world/".into(),
            view_count: 3,
        }))
    }

    fn increment_views(&self, _: &str) -> Result<u64> {
        Err(Error::ServiceUnavailable("primary at 10.0.0.9 is read-only".into()))
    }
}

#[tokio::test]
async fn storage_failure_hides_backend_detail() {
    let clock = Arc::new(ManualClock::default());
    let config = Config {
        trust_proxy_headers: true,
        ..Config::default()
    };
    let state = build_test_state(config, clock, Arc::new(ReadOnlyContent)).expect("state");
    let router = build_router(state.clone());

    let req = Request::get("/api/session")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .expect("request");
    let resp = router.clone().oneshot(req).await.expect("infallible");
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("set-cookie")
        .to_owned();
    let token = json(resp).await["csrf_token"].as_str().expect("token").to_owned();

    let req = view_request("203.0.113.9", &cookie, &token).body(Body::empty()).expect("request");
    let resp = router.oneshot(req).await.expect("infallible");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(resp).await;
    assert_eq!(body, serde_json::json!({ "success": false, "error": "server error" }));
    assert!(!body.to_string().contains("10.0.0.9"));

    let rows = state.attempts.recent(10).expect("attempts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, "storage unavailable");
}

#[tokio::test]
async fn crawler_does_not_consume_view_limit() {
    let app = App::new();
    let (cookie, token) = app.session("66.249.66.2").await;
    let crawler = with_header(
        view_request("66.249.66.2", &cookie, &token).body(Body::empty()).expect("request"),
        header::USER_AGENT,
        "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)",
    );
    assert_eq!(app.send(crawler).await.status(), StatusCode::OK);

    let human = view_request("66.249.66.2", &cookie, &token).body(Body::empty()).expect("request");
    let resp = app.send(human).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["success"], true);
    assert_eq!(app.views(), 1);
}

#[tokio::test]
async fn metrics_reflect_outcomes() {
    let app = App::new();
    let (cookie, token) = app.session("203.0.113.8").await;
    app.send(view_request("203.0.113.8", &cookie, &token).body(Body::empty()).expect("request"))
        .await;
    app.send(view_request("203.0.113.8", &cookie, &token).body(Body::empty()).expect("request"))
        .await;
    let resp = app
        .send(Request::get("/metrics").body(Body::empty()).expect("request"))
        .await;
    let body = json(resp).await;
    assert_eq!(body["views_counted"], 1);
    assert_eq!(body["rate_limited"], 1);
}
