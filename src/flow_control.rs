//! Flow control windows (component C): connection-wide and per-stream,
//! mirroring RFC 7540 §6.9.
//!
//! Windows are signed because a SETTINGS_INITIAL_WINDOW_SIZE change can
//! push a stream's send window negative (§6.9.2); they must still be
//! usable (just not for sending) until drained back above zero by
//! WINDOW_UPDATE frames.

use crate::error::{ErrorCode, Http2Error};
use std::num::NonZeroU32;

/// Per RFC 7540 §6.9.1, a flow-control window MUST NOT exceed 2^31-1.
pub const MAX_WINDOW_SIZE: i64 = (1i64 << 31) - 1;

/// One direction (send or receive) of one window (connection or stream).
#[derive(Debug, Clone, Copy)]
struct Window {
    size: i64,
}

impl Window {
    fn new(initial: u32) -> Self {
        Self { size: i64::from(initial) }
    }

    fn increment(&mut self, delta: u32) -> Result<(), ErrorCode> {
        let new_size = self.size + i64::from(delta);
        if new_size > MAX_WINDOW_SIZE {
            return Err(ErrorCode::FlowControlError);
        }
        self.size = new_size;
        Ok(())
    }

    fn consume(&mut self, amount: u32) -> Result<(), ErrorCode> {
        let new_size = self.size - i64::from(amount);
        if new_size < -MAX_WINDOW_SIZE {
            return Err(ErrorCode::FlowControlError);
        }
        self.size = new_size;
        Ok(())
    }

    /// Applied when the peer changes SETTINGS_INITIAL_WINDOW_SIZE: every
    /// open stream's send window shifts by the same signed delta (§6.9.2).
    fn apply_initial_window_delta(&mut self, delta: i64) -> Result<(), ErrorCode> {
        let new_size = self.size + delta;
        if !(-MAX_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&new_size) {
            return Err(ErrorCode::FlowControlError);
        }
        self.size = new_size;
        Ok(())
    }

    fn available(&self) -> i64 {
        self.size.max(0)
    }
}

/// The connection-level flow-control state: one send window and one
/// receive window. Both start fixed at the RFC 7540 §6.9.2 default of
/// 65535 and are never resized by SETTINGS — `SETTINGS_INITIAL_WINDOW_SIZE`
/// governs stream windows only, never the connection window.
#[derive(Debug, Clone)]
pub struct ConnectionFlowControl {
    send: Window,
    recv: Window,
    recv_initial: u32,
    /// Bytes received but not yet credited back via WINDOW_UPDATE.
    recv_unacked: u32,
}

impl ConnectionFlowControl {
    #[must_use]
    pub fn new(recv_initial: u32) -> Self {
        Self {
            send: Window::new(crate::settings::DEFAULT_INITIAL_WINDOW_SIZE),
            recv: Window::new(recv_initial),
            recv_initial,
            recv_unacked: 0,
        }
    }

    pub fn on_window_update(&mut self, increment: u32) -> Result<(), Http2Error> {
        self.send
            .increment(increment)
            .map_err(|code| Http2Error::connection(code, "connection send window overflow"))
    }

    pub fn consume_send(&mut self, amount: u32) -> Result<(), Http2Error> {
        self.send
            .consume(amount)
            .map_err(|code| Http2Error::connection(code, "connection send window underflow"))
    }

    #[must_use]
    pub fn send_available(&self) -> i64 {
        self.send.available()
    }

    /// Debits `amount` bytes of DATA received. Returns the WINDOW_UPDATE
    /// increment to send back, if the replenish policy decided one is due:
    /// once the unacknowledged amount exceeds half the initial window,
    /// credit the peer back up to the full window in one frame. Stricter
    /// than echoing exactly what was consumed, but bounds how often
    /// WINDOW_UPDATE frames need to go out.
    pub fn on_data_received(&mut self, amount: u32) -> Result<Option<u32>, Http2Error> {
        self.recv
            .consume(amount)
            .map_err(|code| Http2Error::connection(code, "connection receive window underflow"))?;
        self.recv_unacked += amount;
        if self.recv_unacked as u64 * 2 >= u64::from(self.recv_initial) {
            let increment = self.recv_unacked;
            self.recv_unacked = 0;
            self.recv.increment(increment).map_err(|code| {
                Http2Error::connection(code, "connection receive window replenish overflow")
            })?;
            Ok(Some(increment))
        } else {
            Ok(None)
        }
    }
}

/// Per-stream send/receive windows. Streams are created with whatever
/// `SETTINGS_INITIAL_WINDOW_SIZE` is in effect at the time (§6.5.2) and
/// thereafter only move via WINDOW_UPDATE and initial-window-size deltas.
#[derive(Debug, Clone)]
pub struct StreamFlowControl {
    send: Window,
    recv: Window,
    recv_initial: u32,
    recv_unacked: u32,
}

impl StreamFlowControl {
    #[must_use]
    pub fn new(send_initial: u32, recv_initial: u32) -> Self {
        Self {
            send: Window::new(send_initial),
            recv: Window::new(recv_initial),
            recv_initial,
            recv_unacked: 0,
        }
    }

    pub fn on_window_update(&mut self, increment: u32, stream: NonZeroU32) -> Result<(), Http2Error> {
        self.send
            .increment(increment)
            .map_err(|code| Http2Error::stream(stream, code, "stream send window overflow"))
    }

    pub fn consume_send(&mut self, amount: u32, stream: NonZeroU32) -> Result<(), Http2Error> {
        self.send
            .consume(amount)
            .map_err(|code| Http2Error::stream(stream, code, "stream send window underflow"))
    }

    #[must_use]
    pub fn send_available(&self) -> i64 {
        self.send.available()
    }

    /// Applied to every open stream when the peer's SETTINGS changes
    /// `InitialWindowSize`; `delta` is `new_value - old_value` as signed.
    pub fn on_settings_change(&mut self, delta: i64, stream: NonZeroU32) -> Result<(), Http2Error> {
        self.send
            .apply_initial_window_delta(delta)
            .map_err(|code| Http2Error::stream(stream, code, "initial window size update overflow"))
    }

    pub fn on_data_received(&mut self, amount: u32, stream: NonZeroU32) -> Result<Option<u32>, Http2Error> {
        self.recv
            .consume(amount)
            .map_err(|code| Http2Error::stream(stream, code, "stream receive window underflow"))?;
        self.recv_unacked += amount;
        if self.recv_unacked as u64 * 2 >= u64::from(self.recv_initial) {
            let increment = self.recv_unacked;
            self.recv_unacked = 0;
            self.recv
                .increment(increment)
                .map_err(|code| Http2Error::stream(stream, code, "stream receive window replenish overflow"))?;
            Ok(Some(increment))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_send_window_tracks_window_update() {
        let mut fc = ConnectionFlowControl::new(65_535);
        assert_eq!(fc.send_available(), 65_535);
        fc.consume_send(1_000).unwrap();
        assert_eq!(fc.send_available(), 64_535);
        fc.on_window_update(500).unwrap();
        assert_eq!(fc.send_available(), 65_035);
    }

    #[test]
    fn connection_send_overflow_is_flow_control_error() {
        let mut fc = ConnectionFlowControl::new(65_535);
        let err = fc.on_window_update(u32::MAX).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn recv_window_replenishes_past_half_consumed() {
        let mut fc = ConnectionFlowControl::new(100);
        assert_eq!(fc.on_data_received(40).unwrap(), None);
        let increment = fc.on_data_received(20).unwrap();
        assert_eq!(increment, Some(60));
    }

    #[test]
    fn stream_window_shifts_with_initial_window_delta() {
        let stream = NonZeroU32::new(1).unwrap();
        let mut sfc = StreamFlowControl::new(65_535, 65_535);
        sfc.consume_send(60_000, stream).unwrap();
        assert_eq!(sfc.send_available(), 5_535);
        // peer drops SETTINGS_INITIAL_WINDOW_SIZE to 0
        sfc.on_settings_change(-65_535, stream).unwrap();
        assert_eq!(sfc.send_available(), 0);
        assert!(sfc.consume_send(1, stream).is_err());
    }

    #[test]
    fn stream_send_underflow_past_negative_bound_errors() {
        let stream = NonZeroU32::new(1).unwrap();
        let mut sfc = StreamFlowControl::new(0, 65_535);
        sfc.on_settings_change(-(MAX_WINDOW_SIZE), stream).unwrap();
        assert!(sfc.consume_send(1, stream).is_err());
    }
}
