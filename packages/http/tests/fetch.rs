use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use http_fetch::{
    ByteStream, Error, FetchOptions, FetcherConfig, HttpFetcher, Method, ResponseBody,
    ResponseTypeTag,
};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct Camera {
    id: u64,
    name: String,
}

fn options(server: &MockServer, route: &str) -> FetchOptions {
    FetchOptions::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_buffer_is_default_response_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0x00, 0x01]))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/snapshot"))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    let body: Bytes = response.body;
    assert_eq!(&body[..], &[0xFF, 0xD8, 0x00, 0x01]);
}

#[tokio::test]
async fn test_text_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/motd"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello, doorbell"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/motd").text())
        .await
        .unwrap();

    let body: String = response.body;
    assert_eq!(body, "hello, doorbell");
}

#[tokio::test]
async fn test_json_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "devices": ["doorbell", "maeclub"]
        })))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/devices").json())
        .await
        .unwrap();

    let body: serde_json::Value = response.body;
    assert_eq!(body["devices"][1], "maeclub");
}

#[tokio::test]
async fn test_json_into_typed_struct() {
    let server = MockServer::start().await;

    let camera = Camera {
        id: 7,
        name: "MAE Club".to_string(),
    };

    Mock::given(method("GET"))
        .and(path("/cameras/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&camera))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/cameras/7").json_as::<Camera>())
        .await
        .unwrap();

    assert_eq!(response.body, camera);
}

#[tokio::test]
async fn test_readable_response_streams_body() {
    let server = MockServer::start().await;

    let payload = vec![b'x'; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/recording"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/recording").readable())
        .await
        .unwrap();

    let mut stream: ByteStream = response.body;
    let mut received = Vec::new();
    while let Some(chunk) = stream.chunk().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, payload);
    // The stream is forward-only: once ended it stays ended.
    assert!(stream.chunk().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dynamic_response_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"online\":true}"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::with_defaults();

    let text = fetcher
        .fetch_dynamic(options(&server, "/status"), ResponseTypeTag::Text)
        .await
        .unwrap();
    assert!(matches!(text.body, ResponseBody::Text(ref t) if t == "{\"online\":true}"));

    let json = fetcher
        .fetch_dynamic(options(&server, "/status"), "json".parse().unwrap())
        .await
        .unwrap();
    assert!(matches!(json.body, ResponseBody::Json(ref v) if v["online"] == true));
}

#[tokio::test]
async fn test_multi_valued_request_header_is_sent_as_repeated_lines() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/echo"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    HttpFetcher::with_defaults()
        .fetch(options(&server, "/echo").header("X", "a").header("X", "b"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let values: Vec<_> = requests[0]
        .headers
        .get_all("x")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(values, vec!["a", "b"]);
}

#[tokio::test]
async fn test_multi_valued_response_header_is_preserved() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cookies"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("X", "a")
                .append_header("X", "b"),
        )
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/cookies"))
        .await
        .unwrap();

    assert_eq!(response.headers.get_all("X"), vec!["a", "b"]);
    assert_eq!(response.headers.get_all("x"), vec!["a", "b"]);
}

#[tokio::test]
async fn test_json_injects_default_accept() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/api").json())
        .await
        .unwrap();

    assert_eq!(response.body["ok"], true);
}

#[tokio::test]
async fn test_explicit_accept_overrides_default() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/api")
                .header("Accept", "application/vnd.camera+json")
                .json(),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let accepts: Vec<_> = requests[0]
        .headers
        .get_all("accept")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(accepts, vec!["application/vnd.camera+json"]);
}

#[tokio::test]
async fn test_not_found_fails_with_status_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such camera"))
        .mount(&server)
        .await;

    let result = HttpFetcher::with_defaults()
        .fetch(options(&server, "/missing").text())
        .await;

    match result {
        Err(Error::HttpStatus { code }) => assert_eq!(code, 404),
        other => panic!("expected status error, got {:?}", other.map(|r| r.status_code)),
    }
}

#[tokio::test]
async fn test_ignore_status_code_returns_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such camera"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/missing").ignore_status_code(true).text())
        .await
        .unwrap();

    assert_eq!(response.status_code, 404);
    assert!(!response.is_success());
    assert_eq!(response.body, "no such camera");
}

#[tokio::test]
async fn test_server_error_with_json_body_is_status_error_not_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = HttpFetcher::with_defaults()
        .fetch(options(&server, "/broken").json())
        .await;

    assert!(matches!(result, Err(Error::HttpStatus { code: 500 })));
}

#[tokio::test]
async fn test_found_redirect_is_followed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("content of b"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/a").text())
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, "content of b");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_see_other_switches_post_to_get_without_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", "/result"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/submit").body("payload").text())
        .await
        .unwrap();

    assert_eq!(response.body, "done");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].body, b"payload");
    assert_eq!(requests[1].method, Method::GET);
    assert!(requests[1].body.is_empty());
    assert!(requests[1].headers.get("content-type").is_none());
}

#[tokio::test]
async fn test_found_redirect_switches_post_to_get_without_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/clips"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/clips/7"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/clips/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("clip 7"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/clips")
                .header("Content-Language", "en")
                .body("motion")
                .text(),
        )
        .await
        .unwrap();

    assert_eq!(response.body, "clip 7");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(requests[1].method, Method::GET);
    assert!(requests[1].body.is_empty());
    assert!(requests[1].headers.get("content-type").is_none());
    assert!(requests[1].headers.get("content-language").is_none());
}

#[tokio::test]
async fn test_temporary_redirect_preserves_method_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/new"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/new"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(options(&server, "/old").body("payload").text())
        .await
        .unwrap();

    assert_eq!(response.status_code, 201);
    assert_eq!(response.body, "created");
}

#[tokio::test]
async fn test_temporary_redirect_cannot_replay_stream_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(308).insert_header("Location", "/elsewhere"))
        .mount(&server)
        .await;

    let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"frame"))]);
    let result = HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/upload")
                .method(Method::PUT)
                .body(ByteStream::from_stream(chunks)),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::RedirectBodyNotReplayable { status: 308 })
    ));
}

#[tokio::test]
async fn test_redirect_loop_is_capped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(FetcherConfig::default().with_max_redirects(3));
    let result = fetcher.fetch(options(&server, "/loop")).await;

    assert!(matches!(result, Err(Error::RedirectLoop { limit: 3 })));
    // The original request plus three followed hops.
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_cross_origin_redirect_drops_credentials() {
    let origin = MockServer::start().await;
    let other = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/landing", other.uri())),
        )
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .mount(&other)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(
            options(&origin, "/start")
                .header("Authorization", "Bearer secret")
                .header("X-Device", "doorbell")
                .text(),
        )
        .await
        .unwrap();

    assert_eq!(response.body, "landed");

    let first = &origin.received_requests().await.unwrap()[0];
    assert_eq!(first.headers.get("authorization").unwrap(), "Bearer secret");

    let landed = &other.received_requests().await.unwrap()[0];
    assert!(landed.headers.get("authorization").is_none());
    assert_eq!(landed.headers.get("x-device").unwrap(), "doorbell");
}

#[tokio::test]
async fn test_timeout_against_silent_server() {
    // Accepts connections and never writes a byte.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let fetcher = HttpFetcher::with_defaults();
    let fetch = fetcher.fetch(
        FetchOptions::parse(&format!("http://{}/never", addr))
            .unwrap()
            .timeout_ms(1),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("fetch stayed pending past its timeout");

    assert!(matches!(result, Err(Error::Timeout(limit)) if limit == Duration::from_millis(1)));
    holder.abort();
}

#[tokio::test]
async fn test_timeout_bounds_stalled_body() {
    // Sends the head and two of ten promised bytes, then goes quiet.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nab")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let fetcher = HttpFetcher::with_defaults();
    let fetch = fetcher.fetch(
        FetchOptions::parse(&format!("http://{}/feed", addr))
            .unwrap()
            .timeout_ms(300)
            .text(),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("body read stayed pending past its timeout");

    assert!(matches!(result, Err(Error::Timeout(limit)) if limit == Duration::from_millis(300)));
    server.abort();
}

#[tokio::test]
async fn test_timeout_spans_redirect_hops() {
    let server = MockServer::start().await;

    // Each hop alone fits the limit; together they do not.
    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/second")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/second"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let result = HttpFetcher::with_defaults()
        .fetch(options(&server, "/first").timeout_ms(300).text())
        .await;

    assert!(matches!(result, Err(Error::Timeout(limit)) if limit == Duration::from_millis(300)));
}

#[tokio::test]
async fn test_config_default_timeout_applies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(
        FetcherConfig::default().with_default_timeout(Duration::from_millis(100)),
    );
    let result = fetcher.fetch(options(&server, "/slow")).await;

    assert!(result.unwrap_err().is_timeout());
}

#[tokio::test]
async fn test_malformed_json_fails_with_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("definitely not json"))
        .mount(&server)
        .await;

    let result = HttpFetcher::with_defaults()
        .fetch(options(&server, "/garbage").json())
        .await;

    assert!(matches!(result, Err(Error::Parse(_))));
}

#[tokio::test]
async fn test_json_body_is_posted_with_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ptz"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"pan":10}"#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/ptz")
                .json_body(&serde_json::json!({"pan": 10}))
                .unwrap(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_caller_content_type_is_not_overridden() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/notes"))
        .and(header("content-type", "text/markdown"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/notes")
                .header("Content-Type", "text/markdown")
                .body("# heading"),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code, 204);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_stream_body_is_piped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio"))
        .and(body_string("chunk-1chunk-2chunk-3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let chunks = stream::iter(
        ["chunk-1", "chunk-2", "chunk-3"]
            .into_iter()
            .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
    );

    HttpFetcher::with_defaults()
        .fetch(options(&server, "/audio").body(ByteStream::from_stream(chunks)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failing_stream_body_is_stream_error() {
    // Accepts and reads whatever arrives, never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let holder = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sink = [0u8; 1024];
                while let Ok(n) = socket.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    let chunks = stream::iter(vec![
        Ok(Bytes::from_static(b"part")),
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "camera feed died",
        )),
    ]);
    let fetcher = HttpFetcher::with_defaults();
    let fetch = fetcher.fetch(
        FetchOptions::parse(&format!("http://{}/upload", addr))
            .unwrap()
            .body(ByteStream::from_stream(chunks)),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("fetch stayed pending after its body stream failed");

    assert!(matches!(result, Err(Error::Stream(_))));
    holder.abort();
}

#[tokio::test]
async fn test_unsupported_scheme_is_rejected() {
    let result = HttpFetcher::with_defaults()
        .fetch(FetchOptions::parse("ftp://nvr.local/file").unwrap())
        .await;

    assert!(matches!(result, Err(Error::UnsupportedScheme { scheme }) if scheme == "ftp"));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = HttpFetcher::with_defaults()
        .fetch(FetchOptions::parse(&format!("http://{}/", addr)).unwrap())
        .await;

    assert!(matches!(result, Err(Error::Network(_))));
}

#[tokio::test]
async fn test_ipv4_family_reaches_loopback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v4"))
        .mount(&server)
        .await;

    let response = HttpFetcher::with_defaults()
        .fetch(
            options(&server, "/v4")
                .family(http_fetch::AddressFamily::V4)
                .reject_unauthorized(false)
                .text(),
        )
        .await
        .unwrap();

    assert_eq!(response.body, "v4");
}
