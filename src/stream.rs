//! Per-stream state machine (component D), RFC 7540 §5.1.
//!
//! Owned directly inside the [`crate::connection::Connection`]'s stream
//! map — no separate task, no channel back to a stream actor. Response
//! delivery goes out one of two ways: a submitted request's caller waits
//! on a `oneshot::Receiver`, while a server-push stream has no caller
//! waiting synchronously, so its completion is surfaced on the
//! connection's [`crate::events::ConnectionEvent`] channel instead.
//!
//! Header-block assembly (HEADERS/PUSH_PROMISE + CONTINUATION) is tracked
//! by the connection, not here: RFC 7540 §4.3 allows at most one such
//! assembly in progress on the whole connection at a time, so it belongs
//! to connection-level state rather than being duplicated per stream.

use crate::error::{ErrorCode, Http2Error};
use crate::events::ConnectionEvent;
use crate::flow_control::StreamFlowControl;
use crate::response::Response;
use bytes::{Bytes, BytesMut};
use log::warn;
use std::num::NonZeroU32;
use tokio::sync::{mpsc, oneshot};

/// https://httpwg.org/specs/rfc7540.html#StreamStates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// This endpoint sent (or is sending) END_STREAM.
    fn on_send_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// The peer sent END_STREAM.
    fn on_recv_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            // A push stream that never left ReservedRemote (no
            // intermediate half-closed-local leg was observed, e.g. the
            // promised HEADERS itself carried END_STREAM) closes directly.
            StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        }
    }
}

/// Accumulated response state for one stream, built up across HEADERS /
/// CONTINUATION / DATA frames until the peer sends END_STREAM.
#[derive(Debug)]
struct PartialResponse {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl PartialResponse {
    fn new() -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }
}

/// Where a stream's terminal result is delivered: a caller's oneshot for
/// an ordinarily submitted request, or the connection's event channel for
/// a server-pushed stream the caller never explicitly requested.
#[derive(Debug)]
enum ResponseSink {
    Reply(oneshot::Sender<Result<Response, Http2Error>>),
    PushEvent,
}

/// One HTTP/2 stream's full local state.
#[derive(Debug)]
pub struct Stream {
    pub id: NonZeroU32,
    pub state: StreamState,
    pub flow: StreamFlowControl,
    partial: PartialResponse,
    /// Request body bytes not yet sent, gated by flow control and
    /// `SETTINGS_MAX_FRAME_SIZE`; drained by
    /// [`crate::connection::Connection::try_send_body`].
    pub pending_body: Option<Bytes>,
    /// Whether the final DATA frame sent for `pending_body` should carry
    /// END_STREAM.
    pub body_end_stream: bool,
    /// Whether this stream originated from a PUSH_PROMISE rather than a
    /// request this connection submitted. Push streams never consumed an
    /// admission-queue credit, so closing one must not free one either.
    pub is_push: bool,
    sink: Option<ResponseSink>,
}

impl Stream {
    /// A stream opened for a request this connection itself submitted.
    #[must_use]
    pub fn new(id: NonZeroU32, flow: StreamFlowControl, reply: oneshot::Sender<Result<Response, Http2Error>>) -> Self {
        Self {
            id,
            state: StreamState::Open,
            flow,
            partial: PartialResponse::new(),
            pending_body: None,
            body_end_stream: false,
            is_push: false,
            sink: Some(ResponseSink::Reply(reply)),
        }
    }

    /// A stream reserved by an incoming PUSH_PROMISE: RFC 7540 §5.1 starts
    /// it in `ReservedRemote`, never `Open` — this endpoint never sends a
    /// HEADERS frame of its own on it.
    #[must_use]
    pub fn new_pushed(id: NonZeroU32, flow: StreamFlowControl) -> Self {
        Self {
            id,
            state: StreamState::ReservedRemote,
            flow,
            partial: PartialResponse::new(),
            pending_body: None,
            body_end_stream: false,
            is_push: true,
            sink: Some(ResponseSink::PushEvent),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn set_pending_body(&mut self, body: Bytes, end_stream: bool) {
        self.body_end_stream = end_stream;
        if body.is_empty() {
            self.pending_body = None;
        } else {
            self.pending_body = Some(body);
        }
    }

    /// Records decoded response headers. Pseudo-header `:status` is pulled
    /// out; everything else is kept as a plain name/value pair. A push
    /// stream's first HEADERS matures it out of `ReservedRemote`.
    pub fn on_headers(&mut self, headers: Vec<(String, String)>, end_stream: bool) {
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
        for (name, value) in headers {
            if name == ":status" {
                self.partial.status = value.parse().ok();
            } else {
                self.partial.headers.push((name, value));
            }
        }
        if end_stream {
            self.state = self.state.on_recv_end_stream();
        }
    }

    pub fn on_data(&mut self, data: Bytes, end_stream: bool) {
        self.partial.body.extend_from_slice(&data);
        if end_stream {
            self.state = self.state.on_recv_end_stream();
        }
    }

    pub fn on_send_end_stream(&mut self) {
        self.state = self.state.on_send_end_stream();
    }

    /// Delivers the accumulated response, if the stream has fully closed
    /// on the receive side and a sink hasn't already been served. Ordinary
    /// requests go out through their `oneshot`; push streams go out as a
    /// [`ConnectionEvent::PushResponse`].
    pub fn complete_if_done(&mut self, events: &mpsc::UnboundedSender<ConnectionEvent>) {
        if matches!(self.state, StreamState::HalfClosedRemote | StreamState::Closed) {
            if let Some(sink) = self.sink.take() {
                let response = Response {
                    status: self.partial.status.unwrap_or(0),
                    headers: std::mem::take(&mut self.partial.headers),
                    body: self.partial.body.split().freeze(),
                };
                self.deliver(sink, Ok(response), events);
            }
        }
    }

    /// Delivers a terminal error (RST_STREAM received/sent, or connection
    /// teardown) to whichever sink is waiting, if one hasn't already been
    /// served.
    pub fn fail(&mut self, error: Http2Error, events: &mpsc::UnboundedSender<ConnectionEvent>) {
        self.state = StreamState::Closed;
        if let Some(sink) = self.sink.take() {
            self.deliver(sink, Err(error), events);
        }
    }

    fn deliver(
        &self,
        sink: ResponseSink,
        result: Result<Response, Http2Error>,
        events: &mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        match sink {
            ResponseSink::Reply(tx) => {
                let _ = tx.send(result);
            }
            ResponseSink::PushEvent => {
                let _ = events.send(ConnectionEvent::PushResponse {
                    promised_stream: self.id,
                    result,
                });
            }
        }
    }

    pub fn reset(&mut self, code: ErrorCode, events: &mpsc::UnboundedSender<ConnectionEvent>) {
        let id = self.id;
        warn!("stream {id} reset: {code:?}");
        self.fail(Http2Error::stream(id, code, "stream reset"), events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_control::StreamFlowControl;

    fn new_stream() -> (Stream, oneshot::Receiver<Result<Response, Http2Error>>) {
        let (tx, rx) = oneshot::channel();
        let stream = Stream::new(NonZeroU32::new(1).unwrap(), StreamFlowControl::new(65_535, 65_535), tx);
        (stream, rx)
    }

    fn events_channel() -> mpsc::UnboundedSender<ConnectionEvent> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[test]
    fn full_request_response_cycle_delivers_response() {
        let (mut stream, rx) = new_stream();
        let events = events_channel();
        stream.on_send_end_stream();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
        stream.on_headers(vec![(":status".into(), "200".into()), ("x-a".into(), "b".into())], false);
        stream.on_data(Bytes::from_static(b"hello"), true);
        assert_eq!(stream.state, StreamState::Closed);
        stream.complete_if_done(&events);
        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"hello"));
        assert_eq!(response.headers, vec![("x-a".to_string(), "b".to_string())]);
    }

    #[test]
    fn reset_delivers_error_to_waiting_caller() {
        let (mut stream, rx) = new_stream();
        let events = events_channel();
        stream.reset(ErrorCode::Cancel, &events);
        assert!(stream.is_closed());
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn pushed_stream_matures_through_reserved_remote() {
        let flow = StreamFlowControl::new(65_535, 65_535);
        let mut stream = Stream::new_pushed(NonZeroU32::new(2).unwrap(), flow);
        assert_eq!(stream.state, StreamState::ReservedRemote);
        stream.on_headers(vec![(":status".into(), "200".into())], false);
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
        stream.on_data(Bytes::from_static(b"pushed"), true);
        assert_eq!(stream.state, StreamState::Closed);

        let (_tx, mut events) = mpsc::unbounded_channel();
        stream.complete_if_done(&events);
        match events.try_recv() {
            Ok(ConnectionEvent::PushResponse { promised_stream, result }) => {
                assert_eq!(promised_stream.get(), 2);
                assert_eq!(result.unwrap().body, Bytes::from_static(b"pushed"));
            }
            other => panic!("expected PushResponse event, got {other:?}"),
        }
    }

    #[test]
    fn pushed_stream_closes_directly_when_headers_carry_end_stream() {
        let flow = StreamFlowControl::new(65_535, 65_535);
        let mut stream = Stream::new_pushed(NonZeroU32::new(2).unwrap(), flow);
        stream.on_headers(vec![(":status".into(), "204".into())], true);
        assert_eq!(stream.state, StreamState::Closed);
    }
}
