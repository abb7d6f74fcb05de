//! Connection state machine (component E): one async task owns the
//! socket, every stream, both HPACK contexts, and both flow-control
//! windows directly — no internal locks, no per-stream tasks. Callers
//! talk to it through a cheap, cloneable [`ConnectionHandle`] and an
//! [`ConnectionEvent`] receiver.

use crate::admission::AdmissionQueue;
use crate::error::{ErrorCode, Http2Error};
use crate::events::ConnectionEvent;
use crate::flow_control::{ConnectionFlowControl, StreamFlowControl};
use crate::frame::Frame;
use crate::hpack;
use crate::request::Request;
use crate::response::Response;
use crate::settings::{Settings, SettingsParameter};
use crate::socket::Transport;
use crate::stream::Stream;
use bytes::{Bytes, BytesMut};
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
const SETTINGS_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 16 * 1024;

struct PendingStream {
    request: Request,
    reply: oneshot::Sender<Result<Response, Http2Error>>,
}

/// Caller-configurable options recognized at connection open (§6's
/// configuration table).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Overrides the default local SETTINGS sent in the handshake.
    pub local_settings: Settings,
    /// Informational: when set, overrides the `:scheme` pseudo-header the
    /// connection writes for every request, regardless of what scheme the
    /// request's own URL carries (e.g. a cleartext connection behind a
    /// TLS-terminating proxy that still wants `:scheme: https` on the wire).
    pub scheme: Option<String>,
    /// Whether a supervising layer (out of scope for this core) should
    /// redial on close. The connection itself never acts on this — it's
    /// carried through unchanged so that layer can read it back via
    /// [`ConnectionHandle::reconnect_on_close`].
    pub reconnect: bool,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(local_settings: Settings) -> Self {
        Self {
            local_settings,
            scheme: None,
            reconnect: false,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Settings::defaults())
    }
}

impl From<Settings> for ConnectionConfig {
    fn from(local_settings: Settings) -> Self {
        Self::new(local_settings)
    }
}

enum Command {
    Submit(Request, oneshot::Sender<Result<Response, Http2Error>>),
    Ping([u8; 8]),
    Close,
}

/// A cheap handle to a running [`Connection`]. Cloning it is free; every
/// clone shares the same command queue to the one owning task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    reconnect: bool,
}

impl ConnectionHandle {
    /// The `reconnect` option this connection was opened with, for a
    /// supervising layer to decide whether to redial after a close.
    #[must_use]
    pub fn reconnect_on_close(&self) -> bool {
        self.reconnect
    }

    /// Submits a request as a new stream and awaits its response.
    pub async fn send(&self, request: Request) -> Result<Response, Http2Error> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit(request, tx))
            .map_err(|_| Http2Error::Closed("connection task has already ended".into()))?;
        rx.await
            .map_err(|_| Http2Error::Closed("connection task ended before replying".into()))?
    }

    /// Sends a PING with the given opaque payload; the RTT surfaces as
    /// [`ConnectionEvent::Pong`] once the peer's ACK arrives.
    pub fn ping(&self, opaque: [u8; 8]) -> Result<(), Http2Error> {
        self.commands
            .send(Command::Ping(opaque))
            .map_err(|_| Http2Error::Closed("connection task has already ended".into()))
    }

    /// Requests a graceful shutdown: the connection task sends GOAWAY and
    /// exits once every in-flight stream completes.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Spawns the connection actor on the current Tokio runtime, returning a
/// handle to submit requests and a receiver for out-of-band events.
/// Accepts either a bare [`Settings`] (local settings, everything else
/// defaulted) or a full [`ConnectionConfig`].
pub fn spawn<T>(transport: T, config: impl Into<ConnectionConfig>) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>)
where
    T: Transport + 'static,
{
    let config = config.into();
    let reconnect = config.reconnect;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connection = Connection::new(transport, config, command_rx, event_tx);
    tokio::spawn(async move {
        connection.run().await;
    });
    (ConnectionHandle { commands: command_tx, reconnect }, event_rx)
}

/// What a HEADERS or PUSH_PROMISE frame without END_HEADERS was carrying,
/// kept until CONTINUATION frame(s) close it out.
enum HeaderAssemblyKind {
    Headers { end_stream: bool },
    PushPromise { promised: NonZeroU32 },
}

/// RFC 7540 §4.3: at most one header-block assembly may be outstanding on
/// the whole connection at a time. `stream` is the id CONTINUATION frames
/// must match — for PUSH_PROMISE this is the *associated* stream's id,
/// not the promised one, since the promised stream doesn't exist in the
/// registry yet.
struct HeaderAssembly {
    stream: NonZeroU32,
    kind: HeaderAssemblyKind,
    buf: BytesMut,
}

struct Connection<T> {
    transport: T,
    streams: HashMap<NonZeroU32, Stream>,
    next_stream_id: u32,
    local_settings: Settings,
    peer_settings: Settings,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    conn_flow: ConnectionFlowControl,
    admission: AdmissionQueue<PendingStream>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    settings_ack_deadline: Option<Instant>,
    goaway_sent: bool,
    shutting_down: bool,
    ping_inflight: HashMap<[u8; 8], Instant>,
    header_assembly: Option<HeaderAssembly>,
    /// Cleared once the first frame after the preface/SETTINGS handshake
    /// has been checked; RFC 7540 §3.5 requires that frame to be SETTINGS.
    awaiting_first_frame: bool,
    /// `ConnectionConfig::scheme`, if the caller overrode it.
    scheme: Option<String>,
    /// Set to the peer's GOAWAY `last_stream_id` once one arrives. While
    /// set, no new stream may be created (§8: "After GOAWAY(last=L)
    /// received, no new stream with id > L is created" — and every stream
    /// id this side could still allocate is necessarily greater than L).
    peer_goaway_last_stream_id: Option<u32>,
}

impl<T: Transport> Connection<T> {
    fn new(
        transport: T,
        config: ConnectionConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let local_settings = config.local_settings;
        let peer_settings = Settings::defaults();
        Self {
            // The connection-level window is fixed at 65535 by RFC 7540
            // §6.9.2 regardless of either side's SETTINGS_INITIAL_WINDOW_SIZE,
            // which only governs per-stream windows.
            conn_flow: ConnectionFlowControl::new(crate::settings::DEFAULT_INITIAL_WINDOW_SIZE),
            admission: AdmissionQueue::new(peer_settings.max_concurrent_streams()),
            // The encoder's dynamic table is bounded by the peer's advertised
            // SETTINGS_HEADER_TABLE_SIZE (what their decoder will allocate for
            // what we send); the decoder's table is bounded by ours.
            encoder: hpack::Encoder::with_size(peer_settings.header_table_size() as usize),
            decoder: hpack::Decoder::with_size(local_settings.header_table_size() as usize),
            transport,
            streams: HashMap::new(),
            next_stream_id: 1,
            local_settings,
            peer_settings,
            events,
            commands,
            settings_ack_deadline: None,
            goaway_sent: false,
            shutting_down: false,
            ping_inflight: HashMap::new(),
            header_assembly: None,
            awaiting_first_frame: true,
            scheme: config.scheme,
            peer_goaway_last_stream_id: None,
        }
    }

    async fn run(mut self) {
        if let Err(err) = self.handshake().await {
            self.fail_all(err);
            return;
        }

        let mut read_buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            let idle_deadline = self.settings_ack_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                result = self.transport.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            warn!("peer closed the transport without sending GOAWAY");
                            self.fail_all(Http2Error::Closed("peer closed the connection".into()));
                            return;
                        }
                        Ok(_) => {
                            if let Err(err) = self.drain_frames(&mut read_buf).await {
                                if err.is_connection_fatal() {
                                    self.report_error(&err).await;
                                    self.fail_all(err);
                                    return;
                                }
                                if let Err(err) = self.reset_local_stream(err).await {
                                    self.report_error(&err).await;
                                    self.fail_all(err);
                                    return;
                                }
                            }
                        }
                        Err(io_err) => {
                            self.fail_all(Http2Error::Io(io_err));
                            return;
                        }
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(err) = self.handle_command(command).await {
                                self.report_error(&err).await;
                                self.fail_all(err);
                                return;
                            }
                        }
                        None => {
                            self.fail_all(Http2Error::Closed("every connection handle was dropped".into()));
                            return;
                        }
                    }
                }
                _ = sleep_until(idle_deadline), if self.settings_ack_deadline.is_some() => {
                    warn!("peer did not ACK our SETTINGS within {SETTINGS_ACK_TIMEOUT:?}");
                    let err = Http2Error::connection(ErrorCode::SettingsTimeout, "peer did not ACK our SETTINGS in time");
                    self.report_error(&err).await;
                    self.fail_all(err);
                    return;
                }
            }

            if self.shutting_down && self.streams.is_empty() {
                debug!("all streams drained after shutdown, closing connection");
                let _ = self.events.send(ConnectionEvent::Closed { cause: None });
                return;
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), Http2Error> {
        trace!("writing connection preface and initial SETTINGS");
        self.transport.write_all(PREFACE).await?;
        let params: Vec<_> = self.local_settings.iter().collect();
        self.write_frame(&Frame::Settings { ack: false, params }).await?;
        self.settings_ack_deadline = Some(Instant::now() + SETTINGS_ACK_TIMEOUT);
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), Http2Error> {
        let bytes = frame.to_bytes(self.peer_settings.max_frame_size());
        self.transport.write_all(&bytes).await?;
        Ok(())
    }

    async fn drain_frames(&mut self, buf: &mut BytesMut) -> Result<(), Http2Error> {
        while let Some(frame) = Frame::parse(buf, self.local_settings.max_frame_size())? {
            self.handle_frame(frame).await?;
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), Http2Error> {
        if self.awaiting_first_frame {
            self.awaiting_first_frame = false;
            if !matches!(frame, Frame::Settings { ack: false, .. }) {
                return Err(Http2Error::connection(
                    ErrorCode::ProtocolError,
                    "first frame received was not SETTINGS",
                ));
            }
        }

        // RFC 7540 §4.3: while a header block assembly is outstanding, the
        // only frame type allowed on the wire is its continuation.
        if self.header_assembly.is_some() && !matches!(frame, Frame::Continuation { .. }) {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "frame received while a header block assembly was still open",
            ));
        }

        trace!("dispatching frame: {frame:?}");
        match frame {
            Frame::Settings { ack, params } => self.handle_settings(ack, params).await,
            Frame::WindowUpdate { stream, increment } => self.handle_window_update(stream, increment).await,
            Frame::Ping { ack, data } => self.handle_ping(ack, data).await,
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                self.handle_goaway(last_stream_id, error_code, debug_data)
            }
            Frame::Headers { stream, end_stream, end_headers, header_block, .. } => {
                self.handle_headers(stream, end_stream, end_headers, header_block).await
            }
            Frame::Continuation { stream, end_headers, header_block } => {
                self.handle_continuation(stream, end_headers, header_block).await
            }
            Frame::Data { stream, end_stream, data, flow_control_len } => {
                self.handle_data(stream, end_stream, data, flow_control_len).await
            }
            Frame::ResetStream { stream, error_code } => self.handle_reset_stream(stream, error_code).await,
            Frame::PushPromise { stream, end_headers, promised_stream, header_block } => {
                self.handle_push_promise(stream, end_headers, promised_stream, header_block)
            }
            // Stream reprioritization is accepted and ignored: this core
            // does not implement a priority tree.
            Frame::Priority { .. } => Ok(()),
        }
    }

    async fn handle_settings(&mut self, ack: bool, params: Vec<(SettingsParameter, u32)>) -> Result<(), Http2Error> {
        if ack {
            debug!("peer acknowledged our SETTINGS");
            self.settings_ack_deadline = None;
            return Ok(());
        }
        debug!("applying peer SETTINGS: {params:?}");

        let old_initial_window = self.peer_settings.apply(&params);
        let new_initial_window = self.peer_settings.initial_window_size();
        if new_initial_window != old_initial_window {
            let delta = i64::from(new_initial_window) - i64::from(old_initial_window);
            for (&id, stream) in self.streams.iter_mut() {
                stream.flow.on_settings_change(delta, id)?;
            }
        }

        if let Some(&(_, table_size)) = params.iter().find(|(p, _)| *p == SettingsParameter::HeaderTableSize) {
            self.encoder.update_max_size(table_size as usize);
        }

        if params.iter().any(|(p, _)| *p == SettingsParameter::MaxConcurrentStreams) {
            let released = self.admission.on_limit_change(self.peer_settings.max_concurrent_streams());
            for pending in released {
                self.open_stream(pending).await?;
            }
        }

        self.write_frame(&Frame::Settings { ack: true, params: vec![] }).await?;

        // A raised initial window may have unblocked streams that were
        // sitting on a partially sent request body.
        self.retry_all_pending_bodies().await?;
        Ok(())
    }

    async fn handle_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), Http2Error> {
        if increment == 0 {
            return match NonZeroU32::new(stream_id) {
                None => Err(Http2Error::connection(ErrorCode::ProtocolError, "zero WINDOW_UPDATE increment on stream 0")),
                Some(id) => Err(Http2Error::stream(id, ErrorCode::FlowControlError, "zero WINDOW_UPDATE increment")),
            };
        }

        match NonZeroU32::new(stream_id) {
            None => {
                self.conn_flow.on_window_update(increment)?;
                self.retry_all_pending_bodies().await?;
            }
            Some(id) => {
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.flow.on_window_update(increment, id)?;
                }
                self.try_send_body(id).await?;
            }
        }
        Ok(())
    }

    async fn retry_all_pending_bodies(&mut self) -> Result<(), Http2Error> {
        let ids: Vec<NonZeroU32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.pending_body.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.try_send_body(id).await?;
        }
        Ok(())
    }

    /// Sends as much of a stream's buffered request body as the
    /// connection window, the stream window, and `SETTINGS_MAX_FRAME_SIZE`
    /// currently allow, splitting into multiple DATA frames as needed.
    /// Stops (without error) once any of those is exhausted, leaving the
    /// remainder queued for the next WINDOW_UPDATE or SETTINGS change.
    async fn try_send_body(&mut self, stream_id: NonZeroU32) -> Result<(), Http2Error> {
        loop {
            let outcome = {
                let stream = match self.streams.get_mut(&stream_id) {
                    Some(s) => s,
                    None => return Ok(()),
                };
                let body = match stream.pending_body.take() {
                    Some(b) if !b.is_empty() => b,
                    _ => return Ok(()),
                };
                let max_frame = i64::from(self.peer_settings.max_frame_size());
                let avail = self.conn_flow.send_available().min(stream.flow.send_available()).min(max_frame);
                if avail <= 0 {
                    stream.pending_body = Some(body);
                    return Ok(());
                }
                let n = (avail as usize).min(body.len());
                let chunk = body.slice(0..n);
                let remaining = body.slice(n..);
                self.conn_flow.consume_send(n as u32)?;
                stream.flow.consume_send(n as u32, stream_id)?;
                let done = remaining.is_empty();
                stream.pending_body = if done { None } else { Some(remaining) };
                (chunk, done && stream.body_end_stream, done)
            };
            let (chunk, end_stream, done) = outcome;
            let flow_control_len = chunk.len() as u32;
            self.write_frame(&Frame::Data { stream: stream_id, end_stream, data: chunk, flow_control_len }).await?;
            if done {
                if end_stream {
                    let should_close = {
                        let stream = match self.streams.get_mut(&stream_id) {
                            Some(s) => s,
                            None => return Ok(()),
                        };
                        stream.on_send_end_stream();
                        stream.is_closed()
                    };
                    if should_close {
                        self.close_stream(stream_id).await?;
                    }
                }
                return Ok(());
            }
        }
    }

    async fn handle_ping(&mut self, ack: bool, data: [u8; 8]) -> Result<(), Http2Error> {
        if ack {
            if let Some(sent_at) = self.ping_inflight.remove(&data) {
                trace!("pong received, rtt={:?}", sent_at.elapsed());
                let _ = self.events.send(ConnectionEvent::Pong { opaque: data, rtt: sent_at.elapsed() });
            }
            Ok(())
        } else {
            trace!("ping received, replying with ack");
            self.write_frame(&Frame::Ping { ack: true, data }).await?;
            let _ = self.events.send(ConnectionEvent::PingReceived { opaque: data });
            Ok(())
        }
    }

    fn handle_goaway(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Result<(), Http2Error> {
        warn!("peer sent GOAWAY last_stream_id={last_stream_id} code={error_code:?}");
        self.peer_goaway_last_stream_id = Some(last_stream_id);
        let _ = self.events.send(ConnectionEvent::GoingAway {
            last_stream_id,
            code: error_code,
            debug_data: debug_data.to_vec(),
        });

        // Nothing still queued will ever get a chance to have its HEADERS
        // written: no new stream may be created above last_stream_id, and
        // every id left to allocate is necessarily above it.
        for pending in self.admission.drain_queued() {
            let _ = pending.reply.send(Err(Http2Error::connection(
                error_code,
                "connection is going away; request was never sent",
            )));
        }

        // Streams above last_stream_id were never processed by the peer;
        // fail them locally so their callers can retry elsewhere, remove
        // them from the registry (mirroring close_stream/handle_reset_stream),
        // and release the admission credit each one held.
        let ids_to_fail: Vec<NonZeroU32> = self.streams.keys().filter(|id| id.get() > last_stream_id).copied().collect();
        for id in ids_to_fail {
            if let Some(mut stream) = self.streams.remove(&id) {
                let is_push = stream.is_push;
                stream.fail(
                    Http2Error::connection(error_code, "stream not processed before peer sent GOAWAY"),
                    &self.events,
                );
                if !is_push {
                    self.admission.release();
                }
            }
        }

        // Streams at or below last_stream_id keep running to completion;
        // once the registry drains, `run`'s loop closes the connection.
        self.shutting_down = true;
        Ok(())
    }

    async fn handle_headers(
        &mut self,
        stream_id: NonZeroU32,
        end_stream: bool,
        end_headers: bool,
        header_block: Bytes,
    ) -> Result<(), Http2Error> {
        if !self.streams.contains_key(&stream_id) {
            return Err(Http2Error::stream(stream_id, ErrorCode::StreamClosed, "HEADERS for unknown stream"));
        }
        if end_headers {
            self.apply_header_block(stream_id, header_block, end_stream).await
        } else {
            let mut buf = BytesMut::with_capacity(header_block.len());
            buf.extend_from_slice(&header_block);
            self.header_assembly = Some(HeaderAssembly {
                stream: stream_id,
                kind: HeaderAssemblyKind::Headers { end_stream },
                buf,
            });
            Ok(())
        }
    }

    async fn handle_continuation(&mut self, stream_id: NonZeroU32, end_headers: bool, header_block: Bytes) -> Result<(), Http2Error> {
        let matches_open_assembly = matches!(&self.header_assembly, Some(a) if a.stream == stream_id);
        if !matches_open_assembly {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "CONTINUATION without a matching preceding header block",
            ));
        }
        {
            let assembly = self.header_assembly.as_mut().expect("checked above");
            assembly.buf.extend_from_slice(&header_block);
        }
        if !end_headers {
            return Ok(());
        }
        let assembly = self.header_assembly.take().expect("checked above");
        let block = assembly.buf.freeze();
        match assembly.kind {
            HeaderAssemblyKind::Headers { end_stream } => self.apply_header_block(stream_id, block, end_stream).await,
            HeaderAssemblyKind::PushPromise { promised } => self.finish_push_promise(stream_id, promised, block),
        }
    }

    async fn apply_header_block(&mut self, stream_id: NonZeroU32, block: Bytes, end_stream: bool) -> Result<(), Http2Error> {
        let headers = self
            .decoder
            .decode(block, self.local_settings.max_header_list_size())
            .map_err(|err| Http2Error::connection(ErrorCode::CompressionError, err.to_string()))?;
        let headers: Vec<(String, String)> = headers.into_iter().map(|(name, value, _)| (name, value)).collect();
        let is_closed = {
            let events = &self.events;
            let stream = self
                .streams
                .get_mut(&stream_id)
                .ok_or_else(|| Http2Error::stream(stream_id, ErrorCode::StreamClosed, "headers decoded for unknown stream"))?;
            stream.on_headers(headers, end_stream);
            stream.complete_if_done(events);
            stream.is_closed()
        };
        if is_closed {
            self.close_stream(stream_id).await?;
        }
        Ok(())
    }

    async fn handle_data(
        &mut self,
        stream_id: NonZeroU32,
        end_stream: bool,
        data: Bytes,
        flow_control_len: u32,
    ) -> Result<(), Http2Error> {
        let conn_increment = self.conn_flow.on_data_received(flow_control_len)?;
        let mut stream_closed = false;
        let stream_increment = {
            let events = &self.events;
            match self.streams.get_mut(&stream_id) {
                Some(stream) => {
                    let increment = stream.flow.on_data_received(flow_control_len, stream_id)?;
                    stream.on_data(data, end_stream);
                    stream.complete_if_done(events);
                    stream_closed = stream.is_closed();
                    increment
                }
                None => None,
            }
        };
        if stream_closed {
            self.close_stream(stream_id).await?;
        }
        if let Some(increment) = conn_increment {
            self.write_frame(&Frame::WindowUpdate { stream: 0, increment }).await?;
        }
        if let Some(increment) = stream_increment {
            self.write_frame(&Frame::WindowUpdate { stream: stream_id.get(), increment }).await?;
        }
        Ok(())
    }

    async fn handle_reset_stream(&mut self, stream_id: NonZeroU32, error_code: ErrorCode) -> Result<(), Http2Error> {
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            let is_push = stream.is_push;
            stream.reset(error_code, &self.events);
            if !is_push {
                self.admission_release().await?;
            }
        }
        Ok(())
    }

    fn handle_push_promise(
        &mut self,
        associated: NonZeroU32,
        end_headers: bool,
        promised: NonZeroU32,
        header_block: Bytes,
    ) -> Result<(), Http2Error> {
        if !self.local_settings.push_enabled() {
            return Err(Http2Error::connection(ErrorCode::ProtocolError, "PUSH_PROMISE received with push disabled"));
        }
        if self.streams.contains_key(&promised) {
            return Err(Http2Error::connection(ErrorCode::ProtocolError, "PUSH_PROMISE promised stream id already in use"));
        }
        if end_headers {
            self.finish_push_promise(associated, promised, header_block)
        } else {
            let mut buf = BytesMut::with_capacity(header_block.len());
            buf.extend_from_slice(&header_block);
            self.header_assembly = Some(HeaderAssembly {
                stream: associated,
                kind: HeaderAssemblyKind::PushPromise { promised },
                buf,
            });
            Ok(())
        }
    }

    fn finish_push_promise(&mut self, associated: NonZeroU32, promised: NonZeroU32, header_block: Bytes) -> Result<(), Http2Error> {
        let headers = self
            .decoder
            .decode(header_block, self.local_settings.max_header_list_size())
            .map_err(|err| Http2Error::connection(ErrorCode::CompressionError, err.to_string()))?;
        let headers: Vec<(String, String)> = headers.into_iter().map(|(name, value, _)| (name, value)).collect();
        let request = crate::request::pushed_request(&headers)
            .ok_or_else(|| Http2Error::connection(ErrorCode::ProtocolError, "PUSH_PROMISE headers missing pseudo-headers"))?;

        let flow = StreamFlowControl::new(self.peer_settings.initial_window_size(), self.local_settings.initial_window_size());
        let stream = Stream::new_pushed(promised, flow);
        self.streams.insert(promised, stream);

        let _ = self.events.send(ConnectionEvent::PushPromise {
            associated_stream: associated,
            promised_stream: promised,
            request,
        });
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), Http2Error> {
        match command {
            Command::Submit(request, reply) => {
                if let Some(last_stream_id) = self.peer_goaway_last_stream_id {
                    debug!("refusing new stream after peer GOAWAY(last_stream_id={last_stream_id})");
                    let _ = reply.send(Err(Http2Error::connection(
                        ErrorCode::RefusedStream,
                        format!("peer sent GOAWAY(last_stream_id={last_stream_id}); no new streams may be opened"),
                    )));
                    return Ok(());
                }
                let pending = PendingStream { request, reply };
                match self.admission.submit(pending) {
                    Some(pending) => self.open_stream(pending).await,
                    None => Ok(()), // queued; released once a slot frees up
                }
            }
            Command::Ping(opaque) => {
                self.ping_inflight.insert(opaque, Instant::now());
                self.write_frame(&Frame::Ping { ack: false, data: opaque }).await
            }
            Command::Close => {
                debug!("local shutdown requested");
                self.shutting_down = true;
                if !self.goaway_sent {
                    self.goaway_sent = true;
                    let last_stream_id = self.streams.keys().map(|id| id.get()).max().unwrap_or(0);
                    self.write_frame(&Frame::GoAway {
                        last_stream_id,
                        error_code: ErrorCode::NoError,
                        debug_data: Bytes::new(),
                    })
                    .await?;
                }
                Ok(())
            }
        }
    }

    async fn open_stream(&mut self, pending: PendingStream) -> Result<(), Http2Error> {
        let id = NonZeroU32::new(self.next_stream_id).expect("client stream ids start at 1 and only increase");
        self.next_stream_id += 2;
        trace!("opening stream {id} method={:?} path={}", pending.request.method, pending.request.url.path());

        let header_block = self.encoder.encode(pending.request.header_block(self.scheme.as_deref()));
        let has_body = !pending.request.body.is_empty();
        self.write_frame(&Frame::Headers {
            stream: id,
            end_stream: !has_body,
            end_headers: true,
            priority: None,
            header_block,
        })
        .await?;

        let flow = StreamFlowControl::new(self.peer_settings.initial_window_size(), self.local_settings.initial_window_size());
        let mut stream = Stream::new(id, flow, pending.reply);

        if has_body {
            stream.set_pending_body(pending.request.body.clone(), true);
        } else {
            stream.on_send_end_stream();
        }
        self.streams.insert(id, stream);

        if has_body {
            self.try_send_body(id).await?;
        }
        Ok(())
    }

    async fn close_stream(&mut self, stream_id: NonZeroU32) -> Result<(), Http2Error> {
        let is_push = self.streams.remove(&stream_id).map_or(false, |stream| stream.is_push);
        if is_push {
            Ok(())
        } else {
            self.admission_release().await
        }
    }

    async fn admission_release(&mut self) -> Result<(), Http2Error> {
        if let Some(pending) = self.admission.release() {
            self.open_stream(pending).await?;
        }
        Ok(())
    }

    /// A stream-scoped error recovers locally: the offending stream is
    /// reset (RST_STREAM out, local sink failed) while the rest of the
    /// connection keeps running. Errors that aren't stream-scoped pass
    /// through unchanged so the caller can treat them as connection-fatal.
    async fn reset_local_stream(&mut self, error: Http2Error) -> Result<(), Http2Error> {
        let (stream_id, code) = match &error {
            Http2Error::Stream { stream, code, .. } => (*stream, *code),
            _ => return Err(error),
        };
        if self.streams.contains_key(&stream_id) {
            self.write_frame(&Frame::ResetStream { stream: stream_id, error_code: code }).await?;
        }
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            let is_push = stream.is_push;
            stream.fail(error, &self.events);
            if !is_push {
                self.admission_release().await?;
            }
        }
        Ok(())
    }

    async fn report_error(&mut self, error: &Http2Error) {
        if !self.goaway_sent && error.is_connection_fatal() {
            error!("connection-fatal error, sending GOAWAY: {error}");
            self.goaway_sent = true;
            let last_stream_id = self.streams.keys().map(|id| id.get()).max().unwrap_or(0);
            let frame = Frame::GoAway {
                last_stream_id,
                error_code: error.error_code(),
                debug_data: Bytes::from(error.to_string()),
            };
            let _ = self.write_frame(&frame).await;
        }
    }

    fn fail_all(mut self, error: Http2Error) {
        error!("connection closing, failing {} open stream(s): {error}", self.streams.len());
        let events = self.events.clone();
        for (_, mut stream) in self.streams.drain() {
            stream.fail(Http2Error::Closed(error.to_string()), &events);
        }
        let _ = self.events.send(ConnectionEvent::Closed { cause: Some(error) });
    }
}
