//! Upward events the connection actor emits to whatever owns it, beyond
//! the per-request oneshot responses: pushes, pings, and the connection's
//! own lifecycle. Delivered over an unbounded channel so the connection
//! loop never blocks on a slow consumer.

use crate::error::{ErrorCode, Http2Error};
use crate::request::Request;
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug)]
pub enum ConnectionEvent {
    /// The peer promised a server-initiated stream via PUSH_PROMISE.
    /// `promised_stream` is reserved (`ReservedRemote`) awaiting the
    /// subsequent HEADERS/DATA the caller may choose to admit.
    PushPromise {
        associated_stream: NonZeroU32,
        promised_stream: NonZeroU32,
        request: Request,
    },

    /// A previously-promised push stream reached its terminal state: the
    /// full response if the peer completed it, or the error it failed
    /// with (RST_STREAM, GOAWAY, or connection teardown). This is the
    /// "stream-completed" event named for streams that have no caller
    /// oneshot waiting on them, since nothing explicitly submitted them.
    PushResponse {
        promised_stream: NonZeroU32,
        result: Result<crate::response::Response, Http2Error>,
    },

    /// The peer sent a PING we were not expecting an ACK for; by the time
    /// this is delivered the ACK has already gone out on the wire.
    PingReceived { opaque: [u8; 8] },

    /// A PING round-trip completed; `rtt` is measured from send to the
    /// matching ACK.
    Pong { opaque: [u8; 8], rtt: Duration },

    /// The connection is shutting down. `last_stream_id` and `code` echo
    /// the GOAWAY that caused it (locally or remotely initiated); streams
    /// above `last_stream_id` were never processed by the peer and are
    /// safe to retry on a new connection.
    GoingAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Vec<u8>,
    },

    /// The connection task has exited and will process no further frames.
    Closed { cause: Option<Http2Error> },
}
