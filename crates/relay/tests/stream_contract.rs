use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chatfeed_common::protocol::stream::{PublishRequest, StreamPayload};
use chatfeed_relay::{build_router, log::MessageLog, RelayState, StreamSettings};
use futures_util::StreamExt;
use tower::ServiceExt;

fn relay(heartbeat: Duration) -> (Router, RelayState) {
    let settings = StreamSettings { heartbeat_interval: heartbeat, retry: Duration::from_millis(3000) };
    let state = RelayState::new(MessageLog::new(5), settings);
    (build_router(state.clone(), None), state)
}

fn publish(state: &RelayState, message: &str) {
    state.log.publish_at(
        PublishRequest { name: Some("Alex".to_string()), message: message.to_string(), ..PublishRequest::default() },
        "10:00".to_string(),
    );
}

async fn open_stream(app: Router, request: Request<Body>) -> axum::body::BodyDataStream {
    let response = app.oneshot(request).await.expect("stream request should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/event-stream");
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
    response.into_body().into_data_stream()
}

fn stream_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request should build")
}

/// Read frames until `done` holds for the accumulated text.
async fn read_until(body: &mut axum::body::BodyDataStream, done: impl Fn(&str) -> bool) -> String {
    let mut text = String::new();
    let read = async {
        while !done(&text) {
            match body.next().await {
                Some(Ok(chunk)) => text.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(error)) => panic!("stream body failed: {error}"),
                None => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read).await.expect("stream should produce output in time");
    text
}

/// `(id, payload)` for every `data:` event with an `id:` line.
fn message_events(text: &str) -> Vec<(String, StreamPayload)> {
    text.split("\n\n")
        .filter_map(|block| {
            let id = block.lines().find_map(|line| line.strip_prefix("id: "))?;
            let data = block.lines().find_map(|line| line.strip_prefix("data: "))?;
            Some((id.to_string(), StreamPayload::from_json(data).expect("payload should parse")))
        })
        .collect()
}

#[tokio::test]
async fn stream_starts_with_retry_then_replays_backlog() {
    let (app, state) = relay(Duration::from_secs(60));
    publish(&state, "one");
    publish(&state, "two");

    let mut body = open_stream(app, stream_request("/stream")).await;
    let text = read_until(&mut body, |t| t.contains("\"two\"")).await;

    let first_line = text.lines().next().unwrap_or_default();
    assert!(first_line.starts_with("retry:") && first_line.ends_with("3000"), "unexpected prefix: {text:?}");
    let events = message_events(&text);
    let ids: Vec<_> = events.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);

    let (_, first) = &events[0];
    assert_eq!(first.event_id(), Some(1));
    assert_eq!(first.name.as_deref(), Some("Alex"));
    assert_eq!(first.time.as_deref(), Some("10:00"));
    assert!(!first.cache_hit && !first.glossary_match && !first.skip_src_lang);
}

#[tokio::test]
async fn live_messages_follow_the_backlog() {
    let (app, state) = relay(Duration::from_secs(60));
    let mut body = open_stream(app, stream_request("/stream")).await;
    read_until(&mut body, |t| t.contains("retry:")).await;

    publish(&state, "live");
    let text = read_until(&mut body, |t| t.contains("\"live\"")).await;
    assert_eq!(message_events(&text)[0].0, "1");
}

#[tokio::test]
async fn resume_header_skips_delivered_messages() {
    let (app, state) = relay(Duration::from_secs(60));
    for message in ["a", "b", "c"] {
        publish(&state, message);
    }

    let request = Request::builder()
        .uri("/stream?last_event_id=1")
        .header("last-event-id", "2")
        .body(Body::empty())
        .unwrap();
    let mut body = open_stream(app, request).await;
    let text = read_until(&mut body, |t| t.contains("\"c\"")).await;

    let ids: Vec<_> = message_events(&text).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, ["3"]);
}

#[tokio::test]
async fn resume_query_param_is_used_without_header() {
    let (app, state) = relay(Duration::from_secs(60));
    for message in ["a", "b", "c"] {
        publish(&state, message);
    }

    let mut body = open_stream(app, stream_request("/stream?last_event_id=1")).await;
    let text = read_until(&mut body, |t| t.contains("\"c\"")).await;

    let ids: Vec<_> = message_events(&text).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, ["2", "3"]);
}

#[tokio::test]
async fn trimmed_resume_point_starts_at_oldest_retained() {
    let (app, state) = relay(Duration::from_secs(60));
    for i in 0..8 {
        publish(&state, &format!("m{i}"));
    }

    let mut body = open_stream(app, stream_request("/stream?last_event_id=1")).await;
    let text = read_until(&mut body, |t| t.contains("\"m7\"")).await;

    let ids: Vec<_> = message_events(&text).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, ["4", "5", "6", "7", "8"]);
}

#[tokio::test]
async fn clear_is_signalled_before_post_clear_messages() {
    let (app, state) = relay(Duration::from_secs(60));
    publish(&state, "before");

    let mut body = open_stream(app.clone(), stream_request("/stream")).await;
    read_until(&mut body, |t| t.contains("\"before\"")).await;

    let response = app
        .oneshot(Request::builder().method(Method::POST).uri("/clear-messages").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    publish(&state, "after");

    let text = read_until(&mut body, |t| t.contains("\"after\"")).await;
    let clear_at = text.find(r#"data: {"clear":true}"#).expect("clear signal should be sent");
    let after_at = text.find("\"after\"").unwrap();
    assert!(clear_at < after_at);
    assert_eq!(message_events(&text)[0].0, "1", "ids restart after a clear");
}

#[tokio::test]
async fn idle_stream_sends_heartbeat() {
    let (app, _) = relay(Duration::from_millis(50));
    let mut body = open_stream(app, stream_request("/stream")).await;
    let text = read_until(&mut body, |t| t.contains("event: heartbeat")).await;

    let block = text.split("\n\n").find(|block| block.contains("event: heartbeat")).unwrap();
    let data = block.lines().find_map(|line| line.strip_prefix("data: ")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(data).unwrap();
    assert!(parsed["ts"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let (app, state) = relay(Duration::from_secs(60));
    let mut body = open_stream(app, stream_request("/stream")).await;
    read_until(&mut body, |t| t.contains("retry:")).await;

    state.begin_shutdown();
    let end = tokio::time::timeout(Duration::from_secs(5), body.next()).await.expect("stream should end");
    assert!(end.is_none());
}
