//! Minimal wire-level helpers shared by the scenario tests: build raw
//! HTTP/2 frames and a tiny HPACK literal encoder/decoder, independent of
//! the crate's own (private) frame and HPACK modules, so the tests
//! exercise the public `Client`/connection surface against bytes built
//! by hand rather than the crate's own codec.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Installs `env_logger` once per test binary so `RUST_LOG=h2_core=trace`
/// surfaces the crate's own log output while a scenario runs. Safe to call
/// from every test: `try_init` ignores the "already installed" error a
/// second invocation in the same binary would otherwise return.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn frame_header(length: u32, ty: u8, flags: u8, stream: u32) -> Vec<u8> {
    let len = length.to_be_bytes();
    vec![len[1], len[2], len[3], ty, flags, (stream >> 24) as u8, (stream >> 16) as u8, (stream >> 8) as u8, stream as u8]
}

pub fn settings_frame(params: &[(u16, u32)]) -> Vec<u8> {
    let mut out = frame_header((params.len() * 6) as u32, 0x4, 0x0, 0);
    for &(id, value) in params {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub fn settings_ack() -> Vec<u8> {
    frame_header(0, 0x4, 0x1, 0)
}

fn hpack_literal_string(s: &str) -> Vec<u8> {
    assert!(s.len() < 127, "test fixture strings must fit a single-byte HPACK length prefix");
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

/// Encodes a header list as HPACK "literal without indexing, new name"
/// fields — simple, always valid, and exactly what the crate's decoder's
/// literal-without-indexing branch expects.
pub fn hpack_encode(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in headers {
        out.push(0x00);
        out.extend(hpack_literal_string(name));
        out.extend(hpack_literal_string(value));
    }
    out
}

pub fn headers_frame(stream: u32, end_stream: bool, end_headers: bool, header_block: &[u8]) -> Vec<u8> {
    let mut flags = 0u8;
    if end_stream {
        flags |= 0x1;
    }
    if end_headers {
        flags |= 0x4;
    }
    let mut out = frame_header(header_block.len() as u32, 0x1, flags, stream);
    out.extend_from_slice(header_block);
    out
}

pub fn data_frame(stream: u32, end_stream: bool, data: &[u8]) -> Vec<u8> {
    let flags = if end_stream { 0x1 } else { 0x0 };
    let mut out = frame_header(data.len() as u32, 0x0, flags, stream);
    out.extend_from_slice(data);
    out
}

pub fn ping_frame(ack: bool, data: [u8; 8]) -> Vec<u8> {
    let flags = if ack { 0x1 } else { 0x0 };
    let mut out = frame_header(8, 0x6, flags, 0);
    out.extend_from_slice(&data);
    out
}

pub fn goaway_frame(last_stream_id: u32, error_code: u32, debug: &[u8]) -> Vec<u8> {
    let mut out = frame_header(8 + debug.len() as u32, 0x7, 0x0, 0);
    out.extend_from_slice(&last_stream_id.to_be_bytes());
    out.extend_from_slice(&error_code.to_be_bytes());
    out.extend_from_slice(debug);
    out
}

pub fn window_update_frame(stream: u32, increment: u32) -> Vec<u8> {
    let mut out = frame_header(4, 0x8, 0x0, stream);
    out.extend_from_slice(&increment.to_be_bytes());
    out
}

pub fn push_promise_frame(stream: u32, end_headers: bool, promised: u32, header_block: &[u8]) -> Vec<u8> {
    let flags = if end_headers { 0x4 } else { 0x0 };
    let mut out = frame_header(4 + header_block.len() as u32, 0x5, flags, stream);
    out.extend_from_slice(&(promised & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(header_block);
    out
}

pub fn continuation_frame(stream: u32, end_headers: bool, header_block: &[u8]) -> Vec<u8> {
    let flags = if end_headers { 0x4 } else { 0x0 };
    let mut out = frame_header(header_block.len() as u32, 0x9, flags, stream);
    out.extend_from_slice(header_block);
    out
}

pub struct RawFrame {
    pub ty: u8,
    pub flags: u8,
    pub stream: u32,
    pub payload: Vec<u8>,
}

/// Reads exactly one frame from an async byte stream (used by the fake
/// peer side to observe what the client under test sent).
pub async fn read_frame(io: &mut (impl AsyncReadExt + Unpin)) -> RawFrame {
    let mut header = [0u8; 9];
    io.read_exact(&mut header).await.expect("read frame header");
    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
    let ty = header[3];
    let flags = header[4];
    let stream = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;
    let mut payload = vec![0u8; length as usize];
    if length > 0 {
        io.read_exact(&mut payload).await.expect("read frame payload");
    }
    RawFrame { ty, flags, stream, payload }
}

pub async fn read_preface(io: &mut (impl AsyncReadExt + Unpin)) {
    let mut preface = [0u8; 24];
    io.read_exact(&mut preface).await.expect("read connection preface");
    assert_eq!(&preface, b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
}

pub async fn write_all(io: &mut (impl AsyncWriteExt + Unpin), bytes: &[u8]) {
    io.write_all(bytes).await.expect("write to fake peer socket");
}
