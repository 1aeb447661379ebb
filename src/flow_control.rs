//! HTTP/2 flow control windows (RFC 7540 Section 5.2 and 6.9).

use crate::error::ErrorCode;
use crate::settings::MAX_WINDOW_SIZE;

/// Send-side window: how many DATA bytes the peer lets us send.
///
/// Signed because a SETTINGS_INITIAL_WINDOW_SIZE reduction can drive an
/// existing stream's window below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(i32);

impl Window {
    pub fn new(size: u32) -> Self {
        Self(size.min(MAX_WINDOW_SIZE) as i32)
    }

    pub fn size(&self) -> i32 {
        self.0
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> usize {
        self.0.max(0) as usize
    }

    /// Account for `n` bytes sent. Callers never send past
    /// [`available`](Self::available).
    pub fn deduct(&mut self, n: usize) {
        self.0 -= n as i32;
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn increase(&mut self, increment: u32) -> Result<(), ErrorCode> {
        let new_window = self.0 as i64 + increment as i64;
        if new_window > MAX_WINDOW_SIZE as i64 {
            return Err(ErrorCode::FlowControlError);
        }
        self.0 = new_window as i32;
        Ok(())
    }

    /// Apply the difference between an old and a new initial window size.
    pub fn adjust(&mut self, delta: i64) -> Result<(), ErrorCode> {
        let new_window = self.0 as i64 + delta;
        if new_window > MAX_WINDOW_SIZE as i64 {
            return Err(ErrorCode::FlowControlError);
        }
        self.0 = new_window as i32;
        Ok(())
    }
}

/// Receive-side window: how many DATA bytes we still allow the peer.
///
/// Credit is returned with one WINDOW_UPDATE once the window falls to half
/// of its maximum, restoring it to the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvWindow {
    available: u32,
    max: u32,
    low: u32,
}

impl RecvWindow {
    /// A window advertised at `max` bytes.
    pub fn new(max: u32) -> Self {
        Self {
            available: max,
            max,
            low: max / 2,
        }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Account for `n` received bytes. Receiving more than the window
    /// allows is a FLOW_CONTROL_ERROR.
    pub fn consume(&mut self, n: usize) -> Result<(), ErrorCode> {
        if n > self.available as usize {
            return Err(ErrorCode::FlowControlError);
        }
        self.available -= n as u32;
        Ok(())
    }

    /// The WINDOW_UPDATE increment to send, if the window has drained to
    /// its low-water mark. Assumes the update is sent.
    pub fn take_update(&mut self) -> Option<u32> {
        if self.available > self.low {
            return None;
        }
        let increment = self.max - self.available;
        if increment == 0 {
            return None;
        }
        self.available = self.max;
        Some(increment)
    }
}
