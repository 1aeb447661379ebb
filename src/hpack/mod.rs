//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! [`HeaderDecoder`] and [`HeaderEncoder`] each own one side of a
//! connection's compression state (the receive-side and send-side dynamic
//! tables). Both must see every header block of the connection in wire
//! order, or the two ends of the connection fall out of sync.

pub mod decoder;
pub mod dynamic_table;
pub mod encoder;
pub mod huffman;
pub mod static_table;

pub use decoder::HeaderDecoder;
pub use dynamic_table::{DynamicTable, TableEntry};
pub use encoder::HeaderEncoder;

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Write an HPACK integer (RFC 7541 Section 5.1) whose first octet
/// carries `pattern` in the bits above the `prefix_bits`-bit prefix.
pub(crate) fn encode_integer(out: &mut Vec<u8>, value: usize, prefix_bits: u8, pattern: u8) {
    let max_first = (1usize << prefix_bits) - 1;

    if value < max_first {
        out.push(pattern | value as u8);
        return;
    }
    out.push(pattern | max_first as u8);
    let mut remaining = value - max_first;
    while remaining >= 128 {
        out.push((remaining & 0x7f) as u8 | 0x80);
        remaining >>= 7;
    }
    out.push(remaining as u8);
}
