//! Response capture scenarios: filter chain, MIME refinement, the font
//! re-fetch, and resource assembly.

mod common;

use common::*;
use lumen_discovery::{Credentials, MAX_RESOURCE_SIZE};

fn allow_ex_test(options: &mut lumen_discovery::WatchOptions) {
    options.intercept.as_mut().unwrap().allowed_hostnames = vec!["ex.test".to_string()];
}

/// Full lifecycle for one request: decide, respond, finish.
async fn run_lifecycle(harness: &Harness, url: &str, resource_type: &str, status: u16, mime: &str) {
    drive(
        &harness.watcher,
        vec![
            request_will_be_sent("1", url, resource_type),
            request_paused("1", "i1", url, resource_type),
            response_received("1", status, mime),
            loading_finished("1"),
        ],
    )
    .await;
}

#[tokio::test]
async fn captures_stylesheet_response() {
    let harness = watch_page(allow_ex_test).await;
    let body = vec![b'x'; 1024];
    harness.session.script_response_body(&body, true);

    run_lifecycle(&harness, "https://ex.test/app.css", "Stylesheet", 200, "text/css").await;

    assert_eq!(harness.session.count("Fetch.continueRequest"), 1);
    let saved = harness.cache.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].url, "https://ex.test/app.css");
    assert_eq!(saved[0].mimetype, "text/css");
    assert_eq!(saved[0].status, Some(200));
    assert_eq!(saved[0].content, body);
    assert_eq!(saved[0].sha.len(), 64);
    assert!(harness.watcher.in_flight_requests().is_empty());
}

#[tokio::test]
async fn font_body_comes_from_direct_fetch() {
    let harness = watch_page(|options| {
        allow_ex_test(options);
        options.authorization = Some(Credentials {
            username: "user".to_string(),
            password: "hunter2".to_string(),
        });
    })
    .await;
    // the browser-reported body differs from the on-wire bytes
    harness.session.script_response_body(b"browser-decoded", true);

    run_lifecycle(
        &harness,
        "https://ex.test/icons.woff2",
        "Font",
        200,
        "font/woff2",
    )
    .await;

    let fetched = harness.fetcher.fetched();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].0, "https://ex.test/icons.woff2");
    assert_eq!(
        fetched[0].1,
        Some(("user".to_string(), "hunter2".to_string()))
    );

    let saved = harness.cache.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].content, b"direct-fetch-bytes");
}

#[tokio::test]
async fn font_detected_from_inferred_mime() {
    // The browser reports text/plain; the path says font.
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"browser-decoded", true);

    run_lifecycle(
        &harness,
        "https://ex.test/icons.woff2?v=3",
        "Font",
        200,
        "text/plain",
    )
    .await;

    assert_eq!(harness.fetcher.fetched().len(), 1);
    let saved = harness.cache.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].mimetype, "font/woff2");
    assert_eq!(saved[0].content, b"direct-fetch-bytes");
}

#[tokio::test]
async fn refines_text_plain_mime_from_path() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"body{}", true);

    run_lifecycle(
        &harness,
        "https://ex.test/app.css?v=9",
        "Stylesheet",
        200,
        "text/plain",
    )
    .await;

    let saved = harness.cache.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].mimetype, "text/css");
    // not a font, so no direct fetch
    assert!(harness.fetcher.fetched().is_empty());
}

#[tokio::test]
async fn oversized_body_is_not_captured() {
    let harness = watch_page(allow_ex_test).await;
    let body = vec![b'x'; MAX_RESOURCE_SIZE + 1];
    harness.session.script_response_body(&body, false);

    run_lifecycle(&harness, "https://ex.test/huge.bin", "Other", 200, "application/octet-stream")
        .await;

    assert!(harness.cache.saved().is_empty());
    assert!(harness.watcher.in_flight_requests().is_empty());
}

#[tokio::test]
async fn disallowed_status_is_not_captured() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"not found", true);

    run_lifecycle(&harness, "https://ex.test/missing.css", "Stylesheet", 404, "text/css").await;

    assert!(harness.cache.saved().is_empty());
}

#[tokio::test]
async fn redirect_statuses_are_captured() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"moved", true);

    run_lifecycle(&harness, "https://ex.test/old.css", "Stylesheet", 301, "text/css").await;

    assert_eq!(harness.cache.saved().len(), 1);
}

#[tokio::test]
async fn script_skipped_unless_javascript_enabled() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"console.log(1)", true);

    run_lifecycle(&harness, "https://ex.test/app.js", "Script", 200, "text/javascript").await;
    assert!(harness.cache.saved().is_empty());

    let harness = watch_page(|options| {
        allow_ex_test(options);
        options.intercept.as_mut().unwrap().enable_javascript = true;
    })
    .await;
    harness.session.script_response_body(b"console.log(1)", true);

    run_lifecycle(&harness, "https://ex.test/app.js", "Script", 200, "text/javascript").await;
    assert_eq!(harness.cache.saved().len(), 1);
}

#[tokio::test]
async fn empty_body_is_not_captured() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"", true);

    run_lifecycle(&harness, "https://ex.test/empty.css", "Stylesheet", 200, "text/css").await;

    assert!(harness.cache.saved().is_empty());
}

#[tokio::test]
async fn hostname_outside_allowlist_is_not_captured() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"body{}", true);

    run_lifecycle(&harness, "https://cdn.other/app.css", "Stylesheet", 200, "text/css").await;

    assert!(harness.cache.saved().is_empty());
    // the body is never even requested
    assert_eq!(harness.session.count("Network.getResponseBody"), 0);
}

#[tokio::test]
async fn already_cached_root_is_not_recaptured() {
    let harness = watch_page(allow_ex_test).await;
    harness
        .cache
        .insert(cached_resource("https://ex.test/", b"<html>", true, false));

    run_lifecycle(&harness, "https://ex.test/", "Document", 200, "text/html").await;

    assert!(harness.cache.saved().is_empty());
    assert_eq!(harness.session.count("Network.getResponseBody"), 0);
}

#[tokio::test]
async fn capture_failure_does_not_leak_the_record() {
    // getResponseBody blows up; the capture is skipped and the lifecycle
    // still completes.
    let harness = watch_page(allow_ex_test).await;
    harness
        .session
        .script_err("Network.getResponseBody", "No data found for resource");

    run_lifecycle(&harness, "https://ex.test/app.css", "Stylesheet", 200, "text/css").await;

    assert!(harness.cache.saved().is_empty());
    assert!(harness.watcher.in_flight_requests().is_empty());
}

#[tokio::test]
async fn folded_headers_become_lists() {
    let harness = watch_page(allow_ex_test).await;
    harness.session.script_response_body(b"<html>", true);

    drive(
        &harness.watcher,
        vec![
            request_will_be_sent("1", "https://ex.test/", "Document"),
            request_paused("1", "i1", "https://ex.test/", "Document"),
            lumen_cdp::CdpEvent::new(
                "Network.responseReceived",
                serde_json::json!({
                    "requestId": "1",
                    "type": "Document",
                    "response": {
                        "status": 200,
                        "mimeType": "text/html",
                        "headers": {
                            "content-type": "text/html",
                            "set-cookie": "a=1; Path=/\nb=2; Path=/"
                        }
                    }
                }),
            ),
            loading_finished("1"),
        ],
    )
    .await;

    let saved = harness.cache.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].headers["set-cookie"], vec!["a=1; Path=/", "b=2; Path=/"]);
    assert_eq!(saved[0].headers["content-type"], vec!["text/html"]);
}
