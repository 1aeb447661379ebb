//! SETTINGS parameters (RFC 7540 Section 6.5).

use crate::error::ErrorCode;

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 0x1000;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 0xffff;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 0x4000;
pub const MAX_MAX_FRAME_SIZE: u32 = 0xff_ffff;
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Size in bytes of one encoded parameter.
const PARAM_SIZE: usize = 6;

/// Negotiated connection parameters.
///
/// `None` stands for "no limit", which is what an endpoint assumes until
/// the peer advertises a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Merge a SETTINGS payload into these settings.
    ///
    /// Parameters absent from the payload keep their current value and
    /// unknown identifiers are ignored. On error the settings may be
    /// partially updated; the caller tears the connection down anyway.
    pub fn decode(&mut self, payload: &[u8]) -> Result<(), ErrorCode> {
        if payload.len() % PARAM_SIZE != 0 {
            return Err(ErrorCode::FrameSizeError);
        }
        for param in payload.chunks_exact(PARAM_SIZE) {
            let id = u16::from_be_bytes([param[0], param[1]]);
            let value = u32::from_be_bytes([param[2], param[3], param[4], param[5]]);
            self.apply(id, value)?;
        }
        Ok(())
    }

    /// Apply one parameter with RFC 7540 Section 6.5.2 validation.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), ErrorCode> {
        match id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = value,
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(ErrorCode::ProtocolError);
                }
                self.enable_push = value == 1;
            }
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > MAX_WINDOW_SIZE {
                    return Err(ErrorCode::FlowControlError);
                }
                self.initial_window_size = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(ErrorCode::ProtocolError);
                }
                self.max_frame_size = value;
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => {}
        }
        Ok(())
    }

    /// Append the SETTINGS payload advertising these settings to `out`.
    ///
    /// `ENABLE_PUSH` is only sent when push is disabled, which is the only
    /// value a server is allowed to see from us.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_param(out, settings_id::HEADER_TABLE_SIZE, self.header_table_size);
        if !self.enable_push {
            put_param(out, settings_id::ENABLE_PUSH, 0);
        }
        if let Some(n) = self.max_concurrent_streams {
            put_param(out, settings_id::MAX_CONCURRENT_STREAMS, n);
        }
        put_param(out, settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size);
        put_param(out, settings_id::MAX_FRAME_SIZE, self.max_frame_size);
        if let Some(n) = self.max_header_list_size {
            put_param(out, settings_id::MAX_HEADER_LIST_SIZE, n);
        }
    }
}

fn put_param(out: &mut Vec<u8>, id: u16, value: u32) {
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}
