#![cfg(feature = "fetch")]

use std::rc::Rc;
use std::time::Duration;

use crate::blob::File;
use crate::fetch::{AbortController, AbortSignal, Credentials, Request, RequestInit};
use crate::form::{self, FormData};
use crate::headers::Headers;
use crate::payload::Representation;
use crate::transport::{TransportFailure, TransportResponse};
use crate::Error;

use super::scenario::Scenario;

fn get(url: &str) -> Request {
    Request::new(url, RequestInit::default()).unwrap()
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[test]
fn resolves_with_response() {
    let scenario = Scenario::builder()
        .respond(TransportResponse::new(200, "hello").header("Content-Type", "text/plain"))
        .build();
    let client = scenario.client();

    let fut = client.fetch(get("https://q.test/a"));
    assert!(!fut.is_settled());
    // Nothing starts before the scheduler runs.
    assert!(scenario.started().is_empty());

    let response = scenario.scheduler().block_on(fut).unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.status_text(), "OK");
    assert!(response.ok());
    assert_eq!(response.url(), "https://q.test/a");
    assert_eq!(response.headers().get("content-type"), Some("text/plain"));

    let text = scenario.scheduler().block_on(response.text()).unwrap();
    assert_eq!(text.unwrap(), "hello");

    let started = scenario.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].method, "GET");
}

#[test]
fn not_found_is_not_ok() {
    let scenario = Scenario::builder()
        .respond(TransportResponse::new(404, "nope"))
        .build();
    let client = scenario.client();

    let response = scenario
        .scheduler()
        .block_on(client.fetch(get("https://q.test")))
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(!response.ok());
}

#[test]
fn status_out_of_range_is_network_error() {
    let scenario = Scenario::builder()
        .respond(TransportResponse::new(999, ""))
        .build();
    let client = scenario.client();

    let err = scenario
        .scheduler()
        .block_on(client.fetch(get("https://q.test")))
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[test]
fn network_failure_rejects() {
    let scenario = Scenario::builder()
        .fail(TransportFailure::new("connection reset"))
        .build();
    let client = scenario.client();

    let err = scenario
        .scheduler()
        .block_on(client.fetch(get("https://q.test")))
        .unwrap()
        .unwrap_err();
    assert_eq!(err, Error::Network("Network request failed".into()));
}

#[test]
fn default_timeout_rejects() {
    let scenario = Scenario::builder().hang().build();
    let client = scenario
        .client()
        .with_default_timeout(Duration::from_millis(50));

    let err = scenario
        .scheduler()
        .block_on(client.fetch(get("https://q.test")))
        .unwrap()
        .unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert_eq!(scenario.scheduler().now(), Duration::from_millis(50));
    assert_eq!(scenario.aborts(), 1);
}

#[test]
fn abort_in_flight_via_signal() {
    let scenario = Scenario::builder().hang().build();
    let client = scenario.client();
    let controller = AbortController::new();

    let request = Request::new(
        "https://q.test",
        RequestInit {
            signal: Some(controller.signal()),
            ..Default::default()
        },
    )
    .unwrap();

    let fut = client.fetch(request);
    scenario.scheduler().run_until_idle();
    assert_eq!(scenario.started().len(), 1);

    controller.abort(Some("user canceled"));

    let err = scenario.scheduler().block_on(fut).unwrap().unwrap_err();
    assert_eq!(err, Error::Abort("user canceled".into()));
    assert!(err.is_abort());
    assert_eq!(scenario.aborts(), 1);
}

#[test]
fn pre_aborted_signal_never_starts() {
    let scenario = Scenario::builder().build();
    let client = scenario.client();

    let request = Request::new(
        "https://q.test",
        RequestInit {
            signal: Some(AbortSignal::aborted_with("too late")),
            ..Default::default()
        },
    )
    .unwrap();

    let fut = client.fetch(request);
    assert!(fut.is_settled());

    let err = scenario.scheduler().block_on(fut).unwrap().unwrap_err();
    assert_eq!(err, Error::Abort("too late".into()));

    scenario.scheduler().run();
    assert!(scenario.started().is_empty());
}

#[test]
fn abort_before_send_wins() {
    let scenario = Scenario::builder().build();
    let client = scenario.client();
    let controller = AbortController::new();

    let request = Request::new(
        "https://q.test",
        RequestInit {
            signal: Some(controller.signal()),
            ..Default::default()
        },
    )
    .unwrap();

    let fut = client.fetch(request);
    controller.abort(None);

    let err = scenario.scheduler().block_on(fut).unwrap().unwrap_err();
    assert_eq!(err, Error::Abort("The operation was aborted.".into()));
    assert!(scenario.started().is_empty());
}

#[test]
fn dropping_the_future_aborts() {
    let scenario = Scenario::builder().hang().build();
    let client = scenario.client();

    let fut = client.fetch(get("https://q.test"));
    scenario.scheduler().run_until_idle();
    assert_eq!(scenario.started().len(), 1);

    drop(fut);
    scenario.scheduler().run_until_idle();
    assert_eq!(scenario.aborts(), 1);
}

#[test]
fn raw_headers_take_precedence() {
    let scenario = Scenario::builder().ok("").build();
    let client = scenario.client();

    let request = Request::new(
        "https://q.test",
        RequestInit {
            method: Some("POST".into()),
            headers: Some(vec![("X-Custom", "a"), ("Content-Type", "application/json")].into()),
            body: Some("{}".into()),
            ..Default::default()
        },
    )
    .unwrap();

    scenario.scheduler().block_on(client.fetch(request));

    let started = scenario.started();
    assert_eq!(header(&started[0].headers, "x-custom"), Some("a"));
    assert_eq!(
        header(&started[0].headers, "content-type"),
        Some("application/json")
    );
}

#[test]
fn dictionary_headers_forwarded() {
    let scenario = Scenario::builder().ok("").build();
    let client = scenario.client();

    let mut headers = Headers::new();
    headers.append("Accept", "text/html").unwrap();
    headers.append("accept", "application/json").unwrap();

    let request = Request::new(
        "https://q.test",
        RequestInit {
            headers: Some(headers.into()),
            credentials: Some(Credentials::Include),
            ..Default::default()
        },
    )
    .unwrap();

    scenario.scheduler().block_on(client.fetch(request));

    let started = scenario.started();
    assert_eq!(
        header(&started[0].headers, "accept"),
        Some("text/html, application/json")
    );
    assert!(started[0].with_credentials);
}

#[test]
fn get_with_body_fails_before_transport() {
    let err = Request::new(
        "https://q.test",
        RequestInit {
            method: Some("GET".into()),
            body: Some("x".into()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
}

#[test]
fn used_request_body_rejects() {
    let scenario = Scenario::builder().build();
    let client = scenario.client();

    let a = Request::new(
        "https://q.test",
        RequestInit {
            method: Some("POST".into()),
            body: Some("x".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let _b = Request::from_request(&a, RequestInit::default()).unwrap();

    let err = scenario
        .scheduler()
        .block_on(client.fetch(a))
        .unwrap()
        .unwrap_err();
    assert_eq!(err, Error::BodyUsed("Request"));
    assert!(scenario.started().is_empty());
}

#[test]
fn multipart_round_trip() {
    let mut form = FormData::new();
    form.append("title", "line one\r\n\"quoted\"");
    form.append_file(
        "upload",
        File::new(vec![0u8, 159, 146, 150, 255], "da\"ta.bin", "application/octet-stream"),
    );

    // Post the form and capture what the transport got.
    let sent = Scenario::builder().ok("").build();
    let request = Request::new(
        "https://q.test/upload",
        RequestInit {
            method: Some("POST".into()),
            body: Some(form.into()),
            ..Default::default()
        },
    )
    .unwrap();
    sent.scheduler().block_on(sent.client().fetch(request));

    let started = sent.started();
    let content_type = header(&started[0].headers, "content-type")
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("multipart/form-data; boundary=----formdata-"));
    let bytes = started[0].body.as_ref().unwrap().as_bytes().to_vec();

    // Echo it back as a response and parse it again.
    let echo = Scenario::builder()
        .respond(TransportResponse {
            status: 200,
            status_text: None,
            headers: vec![("content-type".into(), content_type)],
            body: Representation::Buffer(Rc::from(bytes)),
            url: None,
        })
        .build();
    let response = echo
        .scheduler()
        .block_on(echo.client().fetch(get("https://q.test/echo")))
        .unwrap()
        .unwrap();

    let back = echo
        .scheduler()
        .block_on(response.form_data())
        .unwrap()
        .unwrap();

    assert_eq!(back.len(), 2);
    assert_eq!(
        back.get("title").and_then(|v| v.as_text()),
        Some("line one\r\n\"quoted\"")
    );
    let file = back.get("upload").and_then(|v| v.as_file()).unwrap();
    assert_eq!(file.name(), "da\"ta.bin");
    assert_eq!(file.blob().as_bytes(), &[0u8, 159, 146, 150, 255]);
    assert_eq!(file.blob().content_type(), "application/octet-stream");

    assert!(form::boundary_from_content_type("text/plain").is_none());
}

#[test]
fn json_body_into_struct() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Greeting {
        to: String,
        count: u32,
    }

    let scenario = Scenario::builder()
        .respond(
            TransportResponse::new(200, r#"{"to":"world","count":3}"#)
                .header("content-type", "application/json"),
        )
        .build();
    let client = scenario.client();

    let response = scenario
        .scheduler()
        .block_on(client.fetch(get("https://q.test/greeting")))
        .unwrap()
        .unwrap();
    let greeting: Greeting = scenario
        .scheduler()
        .block_on(response.json())
        .unwrap()
        .unwrap();
    assert_eq!(
        greeting,
        Greeting {
            to: "world".into(),
            count: 3
        }
    );

    // And back out through a locally built response.
    let echo = crate::fetch::Response::from_json(&greeting, Default::default()).unwrap();
    assert_eq!(echo.headers().get("content-type"), Some("application/json"));
    let again: Greeting = scenario.scheduler().block_on(echo.json()).unwrap().unwrap();
    assert_eq!(again, greeting);
}
