//! HPACK dynamic table (RFC 7541 Section 2.3.2 and 4).

use std::collections::VecDeque;

use crate::error::ErrorCode;

/// Per-entry overhead counted against the table capacity.
pub const ENTRY_OVERHEAD: usize = 32;

/// An owned header field held by the dynamic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub value: String,
}

impl TableEntry {
    /// Size as defined by RFC 7541 Section 4.1.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// FIFO table of recently used header fields, bounded by byte size.
///
/// Index 1 is the most recently inserted entry. Every insertion also gets
/// a sequence number that never changes while the entry lives, which lets
/// the encoder remember entries across later insertions and evictions.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    // Newest entry at the front.
    entries: VecDeque<TableEntry>,
    size: usize,
    capacity: usize,
    inserted: u64,
}

impl DynamicTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            capacity,
            inserted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Change the capacity, evicting from the tail until the table fits.
    /// Returns the evicted entries, oldest first.
    pub fn resize(&mut self, capacity: usize) -> Vec<TableEntry> {
        self.capacity = capacity;
        self.evict_to(capacity)
    }

    /// Insert a field at the head, evicting old entries to make room.
    ///
    /// An entry larger than the whole capacity empties the table and is
    /// not inserted; this is not an error. Returns the evicted entries,
    /// oldest first.
    pub fn add(&mut self, name: String, value: String) -> Vec<TableEntry> {
        let entry = TableEntry { name, value };
        let entry_size = entry.size();
        self.inserted += 1;

        if entry_size > self.capacity {
            return self.evict_to(0);
        }

        let evicted = self.evict_to(self.capacity - entry_size);
        self.size += entry_size;
        self.entries.push_front(entry);
        evicted
    }

    /// Look up a 1-based dynamic index. Stale or out-of-range indices are a
    /// COMPRESSION_ERROR.
    pub fn get(&self, index: usize) -> Result<&TableEntry, ErrorCode> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or(ErrorCode::CompressionError)
    }

    /// Sequence number that will be given to the next inserted entry.
    pub fn next_seq(&self) -> u64 {
        self.inserted
    }

    /// Sequence number of the oldest live entry.
    pub fn oldest_seq(&self) -> u64 {
        self.inserted - self.entries.len() as u64
    }

    /// Map a sequence number to its current 1-based dynamic index, or
    /// `None` if that entry has been evicted (or never existed).
    pub fn seq_to_index(&self, seq: u64) -> Option<usize> {
        if seq < self.oldest_seq() || seq >= self.inserted {
            return None;
        }
        Some((self.inserted - seq) as usize)
    }

    fn evict_to(&mut self, target: usize) -> Vec<TableEntry> {
        let mut evicted = Vec::new();
        while self.size > target {
            match self.entries.pop_back() {
                Some(entry) => {
                    self.size -= entry.size();
                    evicted.push(entry);
                }
                None => break,
            }
        }
        evicted
    }
}
