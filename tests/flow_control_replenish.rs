//! Scenario: once the peer has sent more than half of the advertised
//! initial receive window's worth of DATA, the connection core replenishes
//! both the stream-level and connection-level windows in one shot.

mod common;

use common::*;
use h2_core::connection;
use h2_core::settings::SettingsParameter;
use h2_core::{Request, Settings, Url};

#[tokio::test]
async fn data_past_half_window_triggers_window_update() {
    init_logging();
    let mut local_settings = Settings::defaults();
    local_settings.set(SettingsParameter::InitialWindowSize, 100);

    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
    let (handle, _events) = connection::spawn(client_io, local_settings);

    let fake_peer = tokio::spawn(async move {
        read_preface(&mut server_io).await;
        read_frame(&mut server_io).await; // client's initial SETTINGS

        write_all(&mut server_io, &settings_frame(&[])).await;
        write_all(&mut server_io, &settings_ack()).await;
        read_frame(&mut server_io).await; // client's ack of our SETTINGS

        let request_headers = read_frame(&mut server_io).await;
        assert_eq!(request_headers.stream, 1);

        let body = hpack_encode(&[(":status", "200")]);
        write_all(&mut server_io, &headers_frame(1, false, true, &body)).await;

        // 60 bytes > half of the 100-byte initial window.
        write_all(&mut server_io, &data_frame(1, false, &vec![0u8; 60])).await;

        let connection_update = read_frame(&mut server_io).await;
        assert_eq!(connection_update.ty, 0x8);
        assert_eq!(connection_update.stream, 0);
        let stream_update = read_frame(&mut server_io).await;
        assert_eq!(stream_update.ty, 0x8);
        assert_eq!(stream_update.stream, 1);

        write_all(&mut server_io, &data_frame(1, true, &vec![0u8; 1])).await;
    });

    let url = Url::parse("http://example.test/big").unwrap();
    let response = handle.send(Request::get(url)).await.expect("request should succeed");
    assert_eq!(response.body.len(), 61);

    fake_peer.await.unwrap();
}
