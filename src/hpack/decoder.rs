//! HPACK decompressor.
//!
//! The decoder is a byte-wise state machine, so a header block can be fed
//! in fragments split anywhere (HEADERS followed by CONTINUATION frames,
//! or one byte at a time).

use std::mem;

use tracing::trace;

use super::dynamic_table::DynamicTable;
use super::huffman::HuffmanDecoder;
use super::static_table::{self, STATIC_TABLE_LEN};
use super::H2Header;
use crate::codec::MAX_HEADER_BLOCK_SIZE;
use crate::error::ErrorCode;
use crate::message::MessageHead;
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// Header fields that are meaningful only for one HTTP/1 connection and
/// must not appear in HTTP/2 (RFC 7540 Section 8.1.2.2).
pub(crate) const CONNECTION_SPECIFIC: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Cap on the decoded size of one header list (RFC 7540 Section 6.5.2
/// accounting), whatever SETTINGS_MAX_HEADER_LIST_SIZE says. Indexed
/// fields let a small block expand to far more than its encoded size.
pub const MAX_DECODED_LIST_SIZE: usize = MAX_HEADER_BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Representation {
    Indexed,
    Incremental,
    WithoutIndexing,
    NeverIndexed,
    SizeUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Name,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Expecting the first octet of a field representation.
    Prefix,
    /// Continuation octets of an index or size integer.
    Index,
    /// Expecting the length octet of a string literal.
    StrPrefix(Target),
    /// Continuation octets of a string length.
    StrLength(Target),
    StrData(Target),
}

/// Accumulator for an HPACK integer (RFC 7541 Section 5.1).
#[derive(Debug, Clone, Copy, Default)]
struct Integer {
    value: usize,
    shift: u32,
}

impl Integer {
    /// Feed the prefix octet; yields the value if it fits in the prefix.
    fn start(&mut self, byte: u8, prefix_bits: u8) -> Option<usize> {
        let max = (1usize << prefix_bits) - 1;
        let value = byte as usize & max;
        if value < max {
            return Some(value);
        }
        self.value = max;
        self.shift = 0;
        None
    }

    /// Feed a continuation octet; yields the value on the last one.
    fn next(&mut self, byte: u8) -> Result<Option<usize>, ErrorCode> {
        if self.shift > 28 {
            return Err(ErrorCode::CompressionError);
        }
        let increment = ((byte & 0x7f) as usize)
            .checked_shl(self.shift)
            .ok_or(ErrorCode::CompressionError)?;
        self.value = self
            .value
            .checked_add(increment)
            .ok_or(ErrorCode::CompressionError)?;
        self.shift += 7;
        Ok((byte & 0x80 == 0).then_some(self.value))
    }
}

/// HPACK decoder holding the receive-side dynamic table of a connection.
///
/// Errors returned by [`decode`](Self::decode) are always
/// COMPRESSION_ERROR and fatal to the connection. Problems with the
/// decoded fields themselves (bad pseudo-headers, forbidden fields) only
/// doom the stream: they are remembered and reported by
/// [`end`](Self::end), while decoding carries on so the dynamic table
/// stays in step with the peer's encoder.
#[derive(Debug)]
pub struct HeaderDecoder {
    table: DynamicTable,
    max_table_size: usize,
    max_header_list_size: Option<usize>,

    step: Step,
    representation: Representation,
    integer: Integer,
    huffman: bool,
    huffman_decoder: HuffmanDecoder,
    remaining: usize,
    buffer: Vec<u8>,
    name: Option<String>,

    is_response: bool,
    is_trailer: bool,
    fields_seen: bool,
    regular_seen: bool,
    list_size: usize,
    head: MessageHead,
    content_length: Option<u64>,
    fault: Option<ErrorCode>,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}

impl HeaderDecoder {
    /// `max_table_size` is the SETTINGS_HEADER_TABLE_SIZE we advertise: the
    /// largest table the peer's encoder may ask for.
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            max_table_size,
            max_header_list_size: None,
            step: Step::Prefix,
            representation: Representation::Indexed,
            integer: Integer::default(),
            huffman: false,
            huffman_decoder: HuffmanDecoder::new(),
            remaining: 0,
            buffer: Vec::new(),
            name: None,
            is_response: false,
            is_trailer: false,
            fields_seen: false,
            regular_seen: false,
            list_size: 0,
            head: MessageHead::default(),
            content_length: None,
            fault: None,
        }
    }

    pub fn set_max_header_list_size(&mut self, size: Option<usize>) {
        self.max_header_list_size = size;
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Begin a new header block. The dynamic table is kept.
    pub fn start(&mut self, is_response: bool, is_trailer: bool) {
        self.step = Step::Prefix;
        self.name = None;
        self.is_response = is_response;
        self.is_trailer = is_trailer;
        self.fields_seen = false;
        self.regular_seen = false;
        self.list_size = 0;
        self.head = MessageHead::default();
        self.content_length = None;
        self.fault = None;
    }

    /// Consume the next fragment of the header block.
    pub fn decode(&mut self, mut data: &[u8]) -> Result<(), ErrorCode> {
        while !data.is_empty() {
            if let Step::StrData(target) = self.step {
                let (chunk, rest) = data.split_at(self.remaining.min(data.len()));
                data = rest;
                if self.huffman {
                    self.huffman_decoder.decode(chunk, &mut self.buffer)?;
                } else {
                    self.buffer.extend_from_slice(chunk);
                }
                self.remaining -= chunk.len();
                if self.remaining == 0 {
                    self.end_string(target)?;
                }
                continue;
            }

            let byte = data[0];
            data = &data[1..];
            match self.step {
                Step::Prefix => self.entry_prefix(byte)?,
                Step::Index => {
                    if let Some(value) = self.integer.next(byte)? {
                        self.on_index(value)?;
                    }
                }
                Step::StrPrefix(target) => {
                    self.huffman = byte & 0x80 != 0;
                    match self.integer.start(byte, 7) {
                        Some(len) => self.on_string_length(target, len)?,
                        None => self.step = Step::StrLength(target),
                    }
                }
                Step::StrLength(target) => {
                    if let Some(len) = self.integer.next(byte)? {
                        self.on_string_length(target, len)?;
                    }
                }
                // consumed in bulk above
                Step::StrData(_) => {}
            }
        }
        Ok(())
    }

    /// Finish the header block and hand out the message head.
    ///
    /// Ending in the middle of a field is a COMPRESSION_ERROR; any other
    /// error is a stream error for the stream that carried the block.
    pub fn end(&mut self) -> Result<MessageHead, ErrorCode> {
        if self.step != Step::Prefix {
            return Err(ErrorCode::CompressionError);
        }
        if let Some(code) = self.fault {
            return Err(code);
        }
        let head = mem::take(&mut self.head);
        if self.is_trailer {
            return Ok(head);
        }

        let complete = if self.is_response {
            head.status.is_some()
        } else if head.is_connect() {
            head.authority.is_some() && head.scheme.is_none() && head.path.is_none()
        } else {
            head.method.is_some()
                && head.scheme.is_some()
                && head.path.as_deref().map_or(false, |p| !p.is_empty())
        };
        if !complete {
            return Err(ErrorCode::ProtocolError);
        }
        Ok(head)
    }

    /// The `content-length` of the last decoded block, if it declared one.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn entry_prefix(&mut self, byte: u8) -> Result<(), ErrorCode> {
        let (representation, prefix_bits) = if byte & 0x80 != 0 {
            (Representation::Indexed, 7)
        } else if byte & 0x40 != 0 {
            (Representation::Incremental, 6)
        } else if byte & 0x20 != 0 {
            (Representation::SizeUpdate, 5)
        } else if byte & 0x10 != 0 {
            (Representation::NeverIndexed, 4)
        } else {
            (Representation::WithoutIndexing, 4)
        };

        // Size updates are only allowed at the start of a block.
        if representation == Representation::SizeUpdate && self.fields_seen {
            return Err(ErrorCode::CompressionError);
        }

        self.representation = representation;
        match self.integer.start(byte, prefix_bits) {
            Some(value) => self.on_index(value),
            None => {
                self.step = Step::Index;
                Ok(())
            }
        }
    }

    fn on_index(&mut self, value: usize) -> Result<(), ErrorCode> {
        self.step = Step::Prefix;
        match self.representation {
            Representation::SizeUpdate => {
                if value > self.max_table_size {
                    return Err(ErrorCode::CompressionError);
                }
                let evicted = self.table.resize(value);
                trace!(size = value, evicted = evicted.len(), "hpack table size update");
                Ok(())
            }
            Representation::Indexed => {
                if value == 0 {
                    return Err(ErrorCode::CompressionError);
                }
                if self.fault.is_some() {
                    // The block is already rejected: check the index, skip the copy.
                    self.fields_seen = true;
                    return self.check_index(value);
                }
                let (name, value) = self.lookup(value)?;
                self.field(name, value);
                Ok(())
            }
            _ => {
                if value == 0 {
                    self.step = Step::StrPrefix(Target::Name);
                } else if self.fault.is_some() && self.representation != Representation::Incremental {
                    self.check_index(value)?;
                    self.name = Some(String::new());
                    self.step = Step::StrPrefix(Target::Value);
                } else {
                    let (name, _) = self.lookup(value)?;
                    self.name = Some(name);
                    self.step = Step::StrPrefix(Target::Value);
                }
                Ok(())
            }
        }
    }

    fn on_string_length(&mut self, target: Target, len: usize) -> Result<(), ErrorCode> {
        if len > MAX_HEADER_BLOCK_SIZE {
            return Err(ErrorCode::CompressionError);
        }
        self.buffer.clear();
        self.remaining = len;
        if len == 0 {
            return self.end_string(target);
        }
        self.step = Step::StrData(target);
        Ok(())
    }

    fn end_string(&mut self, target: Target) -> Result<(), ErrorCode> {
        if self.huffman {
            self.huffman_decoder.finish()?;
        }
        let string = String::from_utf8(mem::take(&mut self.buffer))
            .map_err(|_| ErrorCode::CompressionError)?;

        match target {
            Target::Name => {
                self.name = Some(string);
                self.step = Step::StrPrefix(Target::Value);
            }
            Target::Value => {
                self.step = Step::Prefix;
                let name = self.name.take().unwrap_or_default();
                if self.representation == Representation::Incremental {
                    self.table.add(name.clone(), string.clone());
                }
                self.field(name, string);
            }
        }
        Ok(())
    }

    fn lookup(&self, index: usize) -> Result<(String, String), ErrorCode> {
        if index <= STATIC_TABLE_LEN {
            let (name, value) = static_table::get(index)?;
            return Ok((name.to_string(), value.to_string()));
        }
        let entry = self.table.get(index - STATIC_TABLE_LEN)?;
        Ok((entry.name.clone(), entry.value.clone()))
    }

    fn check_index(&self, index: usize) -> Result<(), ErrorCode> {
        if index <= STATIC_TABLE_LEN {
            static_table::get(index)?;
        } else {
            self.table.get(index - STATIC_TABLE_LEN)?;
        }
        Ok(())
    }

    /// Record one decoded field into the message head.
    ///
    /// Past the list size limit fields are no longer kept; the block is
    /// faulted but decoding goes on so the table stays in sync.
    fn field(&mut self, name: String, value: String) {
        self.fields_seen = true;
        self.list_size = self.list_size.saturating_add(name.len() + value.len() + 32);
        let limit = self
            .max_header_list_size
            .map_or(MAX_DECODED_LIST_SIZE, |max| max.min(MAX_DECODED_LIST_SIZE));
        if self.list_size > limit {
            self.fault(ErrorCode::ProtocolError);
        }
        if self.fault.is_some() {
            return;
        }

        let valid = match name.strip_prefix(':') {
            Some(pseudo) => self.pseudo_field(pseudo, value),
            None => self.regular_field(name, value),
        };
        if !valid {
            self.fault(ErrorCode::ProtocolError);
        }
    }

    fn pseudo_field(&mut self, name: &str, value: String) -> bool {
        if self.is_trailer || self.regular_seen {
            return false;
        }
        let slot = match (self.is_response, name) {
            (false, "method") => &mut self.head.method,
            (false, "scheme") => &mut self.head.scheme,
            (false, "authority") => &mut self.head.authority,
            (false, "path") => &mut self.head.path,
            (true, "status") => {
                let status = if value.len() == 3 && value.bytes().all(|b| b.is_ascii_digit()) {
                    value.parse::<u16>().ok()
                } else {
                    None
                };
                return match (self.head.status, status) {
                    (None, Some(status)) => {
                        self.head.status = Some(status);
                        true
                    }
                    _ => false,
                };
            }
            _ => return false,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    fn regular_field(&mut self, name: String, value: String) -> bool {
        self.regular_seen = true;
        if name.bytes().any(|b| b.is_ascii_uppercase()) || CONNECTION_SPECIFIC.contains(&name.as_str()) {
            return false;
        }
        if name == "te" && value != "trailers" {
            return false;
        }
        if name == "content-length" && !self.is_trailer {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            let Ok(length) = value.parse::<u64>() else {
                return false;
            };
            if self.content_length.map_or(false, |n| n != length) {
                return false;
            }
            self.content_length = Some(length);
        }
        self.head.headers.push(H2Header { name, value });
        true
    }

    fn fault(&mut self, code: ErrorCode) {
        if self.fault.is_none() {
            trace!(code = %code, "header block rejected");
            self.fault = Some(code);
        }
    }
}
