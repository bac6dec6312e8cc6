//! Integration tests for the HTTP/1.1 processor
//!
//! Each test starts a server on a loopback port and talks to it over real
//! sockets with the raw-wire client.

use h11proc::http::{Error, HttpClient, Result, Status};
use h11proc::{Config, Exchange, HttpServer, ServerHandle};
use std::time::Duration;
use test_log::test;

fn route(ex: &mut Exchange<'_>) -> Result<()> {
    let uri = ex.request().uri().to_string();

    match uri.as_str() {
        "/ok" => ex.write(b"OK"),
        "/echo" => {
            let params = ex.parameters()?;
            ex.response_mut().set_content_type("text/plain");
            for (name, value) in params {
                ex.write_str(&format!("{} - {}\n", name, value))?;
            }
            Ok(())
        }
        "/keepalive-400" => {
            ex.response_mut().set_header("Connection", "keep-alive");
            ex.response_mut().set_status(Status::BAD_REQUEST);
            Ok(())
        }
        "/flush" => {
            ex.write(b"OK")?;
            ex.flush()
        }
        "/flush-close" => {
            ex.response_mut().set_header("Connection", "close");
            ex.write(b"OK")?;
            ex.flush()
        }
        "/large-header" => {
            ex.response_mut().set_header("x-Test", "x".repeat(10_000));
            if ex.request().query() == Some("flush") {
                if let Err(e) = ex.flush() {
                    log::debug!("flush failed as expected: {}", e);
                }
            }
            ex.write(b"FAIL")
        }
        "/upload" => {
            let body = ex.read_body_to_end()?;
            ex.write_str(&format!("{} bytes", body.len()))
        }
        "/fail" => Err(Error::application("handler failure")),
        _ => ex.send_error(Status::NOT_FOUND, None),
    }
}

fn start(config: Config) -> ServerHandle {
    HttpServer::bind("127.0.0.1:0", config, route)
        .unwrap()
        .start()
        .unwrap()
}

fn connect(server: &ServerHandle) -> HttpClient {
    let mut client = HttpClient::connect(server.local_addr()).unwrap();
    client.set_timeout(Duration::from_secs(10));
    client
}

#[test]
fn test_closing_status_overrides_keep_alive() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client.get("/keepalive-400").unwrap();

    assert_eq!(response.status().code(), 400);
    let connection = response.headers().get_all("Connection");
    assert_eq!(connection.len(), 1);
    assert!(connection[0].eq_ignore_ascii_case("close"));
    assert!(client.is_closed());
}

#[test]
fn test_unknown_transfer_encoding() {
    let server = start(Config::default());

    for coding in ["void", "buffered", "savedrequest", "unsupported"] {
        let mut client = connect(&server);
        client
            .send(
                format!(
                    "POST /echo HTTP/1.1\r\nHost: any\r\n\
                     Content-Type: application/x-www-form-urlencoded\r\n\
                     Transfer-Encoding: {}\r\nContent-Length: 9\r\n\r\ntest=data",
                    coding
                )
                .as_bytes(),
            )
            .unwrap();

        let response = client.receive_response().unwrap();
        assert_eq!(response.status().code(), 501, "coding {}", coding);
        assert!(response.is_close());
    }
}

#[test]
fn test_chunked_overrides_content_length() {
    let server = start(Config::default());
    let mut client = connect(&server);

    client
        .send(
            b"POST /echo HTTP/1.1\r\nHost: any\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\n\
              9\r\ntest=data\r\n0\r\n\r\n",
        )
        .unwrap();

    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert!(response.text().contains("test - data"));
}

#[test]
fn test_chunked_request_without_content_length() {
    let server = start(Config::default());
    let mut client = connect(&server);

    client
        .send(
            b"POST /echo HTTP/1.1\r\nHost: any\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Transfer-Encoding: chunked\r\n\r\n\
              4\r\ntest\r\n5;ext=1\r\n=data\r\n0\r\nX-Trailer: t\r\n\r\n",
        )
        .unwrap();

    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert!(response.text().contains("test - data"));

    // the connection survives a fully consumed chunked body
    assert_eq!(client.get("/ok").unwrap().text(), "OK");
}

#[test]
fn test_identity_transfer_encoding() {
    let server = start(Config::default());
    let mut client = connect(&server);

    client
        .send(
            b"POST /echo HTTP/1.1\r\nHost: any\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Transfer-Encoding: identity\r\nContent-Length: 9\r\n\r\ntest=data",
        )
        .unwrap();

    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
    assert!(response.text().contains("test - data"));
}

#[test]
fn test_pipelining_with_split_requests() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let part1: &[u8] = b"GET /ok HTTP/1.1\r\n";
    let part2: &[u8] = b"Host: any\r\n\r\n";
    let joined = [part2, part1].concat();
    client
        .send_parts(&[part1, &joined, part2], Duration::from_millis(500))
        .unwrap();

    for _ in 0..2 {
        let response = client.receive_response().unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.text(), "OK");
    }
    assert!(client.buffered().is_empty());
}

#[test]
fn test_pipelined_requests_sent_together() {
    let server = start(Config::default());
    let mut client = connect(&server);

    client
        .send(b"GET /ok HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\nGET /flush HTTP/1.1\r\n\r\n")
        .unwrap();

    assert_eq!(client.receive_response().unwrap().status().code(), 200);
    assert_eq!(client.receive_response().unwrap().status().code(), 404);
    let third = client.receive_response().unwrap();
    assert_eq!(third.header("Transfer-Encoding"), Some("chunked"));
    assert_eq!(third.text(), "OK");
}

#[test]
fn test_flush_without_content_length_is_chunked() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client.get("/flush").unwrap();

    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().count("Transfer-Encoding"), 1);
    assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
    assert!(!response.headers().contains("Content-Length"));
    assert_eq!(response.text(), "OK");
}

#[test]
fn test_flush_with_connection_close_is_close_delimited() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client.get("/flush-close").unwrap();

    assert_eq!(response.status().code(), 200);
    assert!(response.is_close());
    assert!(!response.headers().contains("Transfer-Encoding"));
    assert!(!response.headers().contains("Content-Length"));
    assert_eq!(response.text(), "OK");
}

#[test]
fn test_large_header_overflow() {
    let server = start(Config::default());

    for uri in ["/large-header", "/large-header?flush"] {
        let mut client = connect(&server);
        let response = client.get(uri).unwrap();

        assert_eq!(response.status().code(), 500, "{}", uri);
        assert!(!response.text().contains("FAIL"));
        assert!(!response.headers().contains("x-Test"));
        assert!(response.is_close());
    }
}

#[test]
fn test_keep_alive_serves_sequential_requests() {
    let server = start(Config::default());
    let mut client = connect(&server);

    for _ in 0..5 {
        let response = client.get("/ok").unwrap();
        assert_eq!(response.text(), "OK");
        assert!(!response.is_close());
    }
}

#[test]
fn test_max_keep_alive_requests() {
    let config = Config::builder()
        .max_keep_alive_requests(Some(2))
        .build()
        .unwrap();
    let server = start(config);
    let mut client = connect(&server);

    assert!(!client.get("/ok").unwrap().is_close());
    assert!(client.get("/ok").unwrap().is_close());
    assert!(client.is_closed());
}

#[test]
fn test_keep_alive_timeout_closes_idle_connection() {
    let config = Config::builder()
        .keep_alive_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let server = start(config);
    let mut client = connect(&server);

    assert_eq!(client.get("/ok").unwrap().text(), "OK");
    client.set_timeout(Duration::from_secs(5));
    assert!(client.is_closed());
}

#[test]
fn test_http10_connection_handling() {
    let server = start(Config::default());

    let mut client = connect(&server);
    client.send(b"GET /ok HTTP/1.0\r\n\r\n").unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.text(), "OK");
    assert!(response.is_close());
    assert!(client.is_closed());

    let mut client = connect(&server);
    client
        .send(b"GET /ok HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.header("Connection"), Some("keep-alive"));
    assert_eq!(client.get("/ok").unwrap().text(), "OK");
}

#[test]
fn test_malformed_requests() {
    let server = start(Config::default());

    let mut client = connect(&server);
    client.send(b"GET /ok HTTP/3.0\r\n\r\n").unwrap();
    assert_eq!(client.receive_response().unwrap().status().code(), 505);

    let mut client = connect(&server);
    client.send(b"GET /ok\r\n\r\n").unwrap();
    assert_eq!(client.receive_response().unwrap().status().code(), 400);

    let mut client = connect(&server);
    client
        .send(b"POST /ok HTTP/1.1\r\nContent-Length: nine\r\n\r\n")
        .unwrap();
    assert_eq!(client.receive_response().unwrap().status().code(), 400);

    let mut client = connect(&server);
    let big = format!("GET /ok HTTP/1.1\r\nX-Big: {}\r\n\r\n", "x".repeat(10_000));
    client.send(big.as_bytes()).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 400);
    assert!(response.is_close());
}

#[test]
fn test_expect_continue() {
    let server = start(Config::default());
    let mut client = connect(&server);

    client
        .send(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n")
        .unwrap();
    let interim = client.receive_response().unwrap();
    assert_eq!(interim.status().code(), 100);

    client.send(b"data").unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.text(), "4 bytes");
}

#[test]
fn test_unread_body_is_discarded() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client
        .request("POST", "/ok", &[], &[b'a'; 20_000])
        .unwrap();
    assert_eq!(response.text(), "OK");
    assert!(!response.is_close());

    assert_eq!(client.get("/ok").unwrap().text(), "OK");
}

#[test]
fn test_unread_chunked_body_over_budget() {
    let config = Config::builder().max_swallow_size(Some(4)).build().unwrap();
    let server = start(config);
    let mut client = connect(&server);

    client
        .send(
            b"POST /ok HTTP/1.1\r\nHost: any\r\nTransfer-Encoding: chunked\r\n\r\n\
              10\r\n0123456789abcdef\r\n0\r\n\r\n",
        )
        .unwrap();

    let response = client.receive_response().unwrap();
    assert_eq!(response.text(), "OK");
    assert!(response.is_close());
    assert!(client.is_closed());
}

#[test]
fn test_head_request() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client.request("HEAD", "/ok", &[], b"").unwrap();
    assert_eq!(response.header("Content-Length"), Some("2"));
    assert!(response.body().is_empty());

    assert_eq!(client.get("/ok").unwrap().text(), "OK");
}

#[test]
fn test_application_error_returns_500() {
    let server = start(Config::default());
    let mut client = connect(&server);

    let response = client.get("/fail").unwrap();
    assert_eq!(response.status().code(), 500);
    assert_eq!(
        response.header("Content-Type"),
        Some("text/html;charset=utf-8")
    );
    assert!(response.is_close());
    assert!(client.is_closed());
}
