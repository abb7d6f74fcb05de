//! Scenario: the peer promises a second stream via PUSH_PROMISE while
//! answering the original request, then completes it on its own. The
//! caller never submitted the pushed resource, so it surfaces as
//! connection events rather than through a oneshot.

mod common;

use common::*;
use h2_core::connection;
use h2_core::{ConnectionEvent, Request, Settings, Url};

#[tokio::test]
async fn push_promise_delivers_promise_then_response_as_events() {
    init_logging();
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
    let (handle, mut events) = connection::spawn(client_io, Settings::defaults());

    let fake_peer = tokio::spawn(async move {
        read_preface(&mut server_io).await;
        read_frame(&mut server_io).await; // client's initial SETTINGS

        write_all(&mut server_io, &settings_frame(&[])).await;
        write_all(&mut server_io, &settings_ack()).await;
        read_frame(&mut server_io).await; // client's ack of our SETTINGS

        let request_headers = read_frame(&mut server_io).await;
        assert_eq!(request_headers.stream, 1);

        let promised_headers = hpack_encode(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":authority", "example.test"),
            (":path", "/style.css"),
        ]);
        write_all(&mut server_io, &push_promise_frame(1, true, 2, &promised_headers)).await;

        let main_body = hpack_encode(&[(":status", "200")]);
        write_all(&mut server_io, &headers_frame(1, true, true, &main_body)).await;

        let pushed_body = hpack_encode(&[(":status", "200")]);
        write_all(&mut server_io, &headers_frame(2, true, true, &pushed_body)).await;
    });

    let url = Url::parse("http://example.test/index.html").unwrap();
    let response = handle.send(Request::get(url)).await.expect("request should succeed");
    assert_eq!(response.status, 200);

    let promise = events.recv().await.expect("a PushPromise event should arrive");
    match promise {
        ConnectionEvent::PushPromise { associated_stream, promised_stream, request } => {
            assert_eq!(associated_stream.get(), 1);
            assert_eq!(promised_stream.get(), 2);
            assert_eq!(request.url.path(), "/style.css");
        }
        other => panic!("expected PushPromise, got {other:?}"),
    }

    let pushed = events.recv().await.expect("a PushResponse event should arrive");
    match pushed {
        ConnectionEvent::PushResponse { promised_stream, result } => {
            assert_eq!(promised_stream.get(), 2);
            assert_eq!(result.unwrap().status, 200);
        }
        other => panic!("expected PushResponse, got {other:?}"),
    }

    fake_peer.await.unwrap();
}
