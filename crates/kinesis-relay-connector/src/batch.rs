//! Size-bounded batching of encoded records.
//!
//! Every batch is eventually framed as a JSON-style array, `[r1,r2,...]`, and
//! sent as a single `PutRecord` payload. The packer keeps a running aggregate
//! for the open batch:
//!
//! ```text
//! aggregate = 2                      // '[' and ']'
//!           + Σ (record.len() + 1)   // record plus its ',' separator
//! ```
//!
//! When adding the next record would push the aggregate past the threshold,
//! the open batch is sealed and a new one starts with that record. A record
//! that is larger than the threshold on its own still gets a batch of its own;
//! records are never split or dropped.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::traits::SinkRecord;

/// Bytes added by the `[` `]` array framing.
pub const WRAPPER_OVERHEAD: usize = 2;

/// Bytes accounted for each record's `,` separator.
pub const SEPARATOR_OVERHEAD: usize = 1;

/// Default batch threshold in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 37_000;

/// An ordered group of records delivered in one `PutRecord` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    records: Vec<SinkRecord>,
    aggregate_size: usize,
}

impl Batch {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            aggregate_size: WRAPPER_OVERHEAD,
        }
    }

    fn push(&mut self, record: SinkRecord, accounted: usize) {
        self.aggregate_size += accounted;
        self.records.push(record);
    }

    pub fn records(&self) -> &[SinkRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SinkRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Running size used for the threshold check (framed length + 1).
    pub fn aggregate_size(&self) -> usize {
        self.aggregate_size
    }

    /// Serialize as `[` + comma-joined records + `]`.
    pub fn framed(&self) -> Bytes {
        let body: usize = self.records.iter().map(|r| r.encoded_len()).sum();
        let mut buf = BytesMut::with_capacity(
            body + WRAPPER_OVERHEAD + self.records.len().saturating_sub(1),
        );
        buf.put_u8(b'[');
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                buf.put_u8(b',');
            }
            buf.put_slice(&record.value);
        }
        buf.put_u8(b']');
        buf.freeze()
    }

    /// The first record, used as the key-resolution context.
    pub fn first(&self) -> Option<&SinkRecord> {
        self.records.first()
    }
}

/// Groups records into batches bounded by a byte threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPacker {
    threshold: usize,
}

impl BatchPacker {
    /// Create a packer. A zero threshold is treated as one byte, which
    /// degrades to one record per batch.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Lazily pack `records` into batches, preserving order.
    pub fn pack<I>(&self, records: I) -> Batches<I::IntoIter>
    where
        I: IntoIterator<Item = SinkRecord>,
    {
        Batches {
            input: records.into_iter(),
            threshold: self.threshold,
            current: Batch::new(),
            done: false,
        }
    }
}

impl Default for BatchPacker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Iterator over sealed batches produced by [`BatchPacker::pack`].
#[derive(Debug)]
pub struct Batches<I> {
    input: I,
    threshold: usize,
    current: Batch,
    done: bool,
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = SinkRecord>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.done {
            return None;
        }

        for record in self.input.by_ref() {
            let len = record.encoded_len() + SEPARATOR_OVERHEAD;

            if WRAPPER_OVERHEAD + len > self.threshold {
                warn!(
                    record_bytes = record.encoded_len(),
                    threshold = self.threshold,
                    "record exceeds batch threshold, sending it in its own batch"
                );
            }

            if !self.current.is_empty() && self.current.aggregate_size + len > self.threshold {
                let sealed = std::mem::replace(&mut self.current, Batch::new());
                self.current.push(record, len);
                trace!(
                    records = sealed.len(),
                    aggregate_size = sealed.aggregate_size,
                    "sealed batch"
                );
                return Some(sealed);
            }

            self.current.push(record, len);
        }

        self.done = true;
        if self.current.is_empty() {
            None
        } else {
            let sealed = std::mem::replace(&mut self.current, Batch::new());
            trace!(
                records = sealed.len(),
                aggregate_size = sealed.aggregate_size,
                "sealed final batch"
            );
            Some(sealed)
        }
    }
}
