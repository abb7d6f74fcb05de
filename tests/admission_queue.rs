//! Scenario: the peer advertises `SETTINGS_MAX_CONCURRENT_STREAMS: 1`.
//! Three requests submitted at once admit one at a time, each new HEADERS
//! only going out once the previous stream has fully closed.

mod common;

use common::*;
use h2_core::connection;
use h2_core::{Request, Settings, Url};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test]
async fn queued_requests_admit_sequentially_under_a_concurrency_limit() {
    init_logging();
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
    let (handle, _events) = connection::spawn(client_io, Settings::defaults());
    let (limit_applied_tx, limit_applied_rx) = oneshot::channel();

    let fake_peer = tokio::spawn(async move {
        read_preface(&mut server_io).await;
        read_frame(&mut server_io).await; // client's initial SETTINGS

        write_all(&mut server_io, &settings_frame(&[(0x3, 1)])).await;
        write_all(&mut server_io, &settings_ack()).await;
        read_frame(&mut server_io).await; // client's ack of our SETTINGS

        // By the time the client acks our SETTINGS, it has already applied
        // MAX_CONCURRENT_STREAMS=1 to its admission queue; only past this
        // point is it safe to submit the three requests below without
        // racing the connection's settings-vs-command dispatch.
        let _ = limit_applied_tx.send(());

        for _ in 0..3 {
            let headers = read_frame(&mut server_io).await;
            assert_eq!(headers.ty, 0x1);
            assert_eq!(headers.flags & 0x1, 0x1, "GET carries no body: END_STREAM on HEADERS");

            // With only one credit granted, no further request's HEADERS
            // should be on the wire until this stream closes.
            let premature = timeout(Duration::from_millis(50), read_frame(&mut server_io)).await;
            assert!(premature.is_err(), "a second stream was admitted before the first closed");

            let body = hpack_encode(&[(":status", "200")]);
            write_all(&mut server_io, &headers_frame(headers.stream, true, true, &body)).await;
        }
    });

    limit_applied_rx.await.expect("fake peer should signal once the concurrency limit is applied");

    let url_a = Url::parse("http://example.test/a").unwrap();
    let url_b = Url::parse("http://example.test/b").unwrap();
    let url_c = Url::parse("http://example.test/c").unwrap();

    let a = tokio::spawn({
        let handle = handle.clone();
        async move { handle.send(Request::get(url_a)).await }
    });
    let b = tokio::spawn({
        let handle = handle.clone();
        async move { handle.send(Request::get(url_b)).await }
    });
    let c = tokio::spawn(async move { handle.send(Request::get(url_c)).await });

    let (a, b, c) = tokio::join!(a, b, c);
    assert_eq!(a.unwrap().unwrap().status, 200);
    assert_eq!(b.unwrap().unwrap().status, 200);
    assert_eq!(c.unwrap().unwrap().status, 200);

    fake_peer.await.unwrap();
}
