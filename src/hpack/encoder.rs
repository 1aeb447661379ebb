//! HPACK compressor.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::trace;

use super::decoder::CONNECTION_SPECIFIC;
use super::dynamic_table::{DynamicTable, TableEntry, ENTRY_OVERHEAD};
use super::static_table::{STATIC_TABLE, STATIC_TABLE_LEN};
use super::{encode_integer, huffman};
use crate::message::MessageHead;
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// Upper bound on the send-side table, whatever size the peer allows.
const MAX_ENCODER_TABLE_SIZE: usize = 0x10000;

/// Fields that are sent as never-indexed literals (RFC 7541 Section 7.1.3).
const NEVER_INDEXED: [&str; 2] = ["authorization", "proxy-authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRef {
    Static(usize),
    /// Sequence number of a dynamic table entry.
    Dynamic(u64),
}

/// Everything known to be in the peer's tables for one header name.
#[derive(Debug, Default)]
struct NameEntry {
    static_index: Option<usize>,
    dynamic: Option<u64>,
    values: HashMap<String, FieldRef>,
}

impl NameEntry {
    fn is_empty(&self) -> bool {
        self.static_index.is_none() && self.dynamic.is_none() && self.values.is_empty()
    }
}

/// HPACK encoder holding the send-side dynamic table of a connection.
///
/// The name map mirrors the static table plus every live dynamic entry, so
/// each field costs one hash lookup to pick its representation.
#[derive(Debug)]
pub struct HeaderEncoder {
    table: DynamicTable,
    names: HashMap<String, NameEntry>,
    use_huffman: bool,
    // (smallest, final) table size to announce at the next block start
    pending_size_update: Option<(usize, usize)>,
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HeaderEncoder {
    pub fn new(use_huffman: bool) -> Self {
        let mut names: HashMap<String, NameEntry> = HashMap::new();
        for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
            let entry = names.entry(name.to_string()).or_default();
            entry.static_index.get_or_insert(i + 1);
            entry
                .values
                .entry(value.to_string())
                .or_insert(FieldRef::Static(i + 1));
        }

        Self {
            table: DynamicTable::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            names,
            use_huffman,
            pending_size_update: None,
        }
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Follow a change of the peer's SETTINGS_HEADER_TABLE_SIZE.
    ///
    /// The table is resized at once; the size update is written at the
    /// start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        let size = size.min(MAX_ENCODER_TABLE_SIZE);
        if size == self.table.capacity() && self.pending_size_update.is_none() {
            return;
        }
        let oldest = self.table.oldest_seq();
        let evicted = self.table.resize(size);
        self.forget(oldest, &evicted);
        self.pending_size_update = Some(match self.pending_size_update {
            Some((min, _)) => (min.min(size), size),
            None => (size, size),
        });
        trace!(size, evicted = evicted.len(), "hpack encoder table resized");
    }

    /// Encode a message head as one header block.
    ///
    /// Pseudo-headers come first (`:status` for a response, the request
    /// pseudo-headers otherwise); `is_tail` encodes trailers, which carry
    /// only regular fields. Connection-specific fields are dropped and
    /// names are lowercased.
    pub fn encode(&mut self, is_response: bool, is_tail: bool, head: &MessageHead, out: &mut Vec<u8>) {
        if let Some((min, size)) = self.pending_size_update.take() {
            if min < size {
                encode_integer(out, min, 5, 0x20);
            }
            encode_integer(out, size, 5, 0x20);
        }

        if !is_tail {
            if is_response {
                let status = head.status.unwrap_or(200).to_string();
                self.field(":status", &status, out);
            } else {
                let pseudo = [
                    (":method", &head.method),
                    (":scheme", &head.scheme),
                    (":authority", &head.authority),
                    (":path", &head.path),
                ];
                for (name, value) in pseudo {
                    if let Some(value) = value {
                        self.field(name, value, out);
                    }
                }
            }
        }

        for header in &head.headers {
            let name: Cow<'_, str> = if header.name.bytes().any(|b| b.is_ascii_uppercase()) {
                Cow::Owned(header.name.to_ascii_lowercase())
            } else {
                Cow::Borrowed(&header.name)
            };
            if name.starts_with(':')
                || CONNECTION_SPECIFIC.contains(&name.as_ref())
                || (name == "te" && header.value != "trailers")
            {
                continue;
            }
            self.field(&name, &header.value, out);
        }
    }

    fn field(&mut self, name: &str, value: &str, out: &mut Vec<u8>) {
        let mut name_index = None;
        if let Some(entry) = self.names.get(name) {
            match entry.values.get(value) {
                Some(FieldRef::Static(index)) => {
                    encode_integer(out, *index, 7, 0x80);
                    return;
                }
                Some(FieldRef::Dynamic(seq)) => {
                    if let Some(index) = self.table.seq_to_index(*seq) {
                        encode_integer(out, STATIC_TABLE_LEN + index, 7, 0x80);
                        return;
                    }
                }
                None => {}
            }
            name_index = entry.static_index.or_else(|| {
                entry
                    .dynamic
                    .and_then(|seq| self.table.seq_to_index(seq))
                    .map(|index| STATIC_TABLE_LEN + index)
            });
        }

        if NEVER_INDEXED.contains(&name) {
            self.literal(out, name_index, name, value, 4, 0x10);
        } else if name.len() + value.len() + ENTRY_OVERHEAD > self.table.capacity() {
            self.literal(out, name_index, name, value, 4, 0x00);
        } else {
            self.literal(out, name_index, name, value, 6, 0x40);
            self.insert(name, value);
        }
    }

    fn literal(
        &self,
        out: &mut Vec<u8>,
        name_index: Option<usize>,
        name: &str,
        value: &str,
        prefix_bits: u8,
        pattern: u8,
    ) {
        match name_index {
            Some(index) => encode_integer(out, index, prefix_bits, pattern),
            None => {
                out.push(pattern);
                self.string(out, name);
            }
        }
        self.string(out, value);
    }

    /// String literal, Huffman coded when that is shorter.
    fn string(&self, out: &mut Vec<u8>, s: &str) {
        let bytes = s.as_bytes();
        let huffman_len = huffman::encoded_len(bytes);
        if self.use_huffman && huffman_len < bytes.len() {
            encode_integer(out, huffman_len, 7, 0x80);
            huffman::encode(bytes, out);
        } else {
            encode_integer(out, bytes.len(), 7, 0x00);
            out.extend_from_slice(bytes);
        }
    }

    fn insert(&mut self, name: &str, value: &str) {
        let oldest = self.table.oldest_seq();
        let seq = self.table.next_seq();
        let evicted = self.table.add(name.to_string(), value.to_string());
        self.forget(oldest, &evicted);

        let entry = self.names.entry(name.to_string()).or_default();
        entry.dynamic = Some(seq);
        entry.values.insert(value.to_string(), FieldRef::Dynamic(seq));
    }

    /// Drop map references to evicted entries; `oldest` is the sequence
    /// number of the first of them.
    fn forget(&mut self, oldest: u64, evicted: &[TableEntry]) {
        for (seq, evicted) in (oldest..).zip(evicted) {
            let Some(entry) = self.names.get_mut(&evicted.name) else {
                continue;
            };
            if entry.dynamic == Some(seq) {
                entry.dynamic = None;
            }
            if entry.values.get(&evicted.value) == Some(&FieldRef::Dynamic(seq)) {
                entry.values.remove(&evicted.value);
            }
            if entry.is_empty() {
                self.names.remove(&evicted.name);
            }
        }
    }
}
