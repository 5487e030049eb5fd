//! Per-direction TCP byte-stream reassembly.
//!
//! [`StreamReassembler`] restores strict byte order for one direction of a
//! connection. Segments that arrive ahead of the expected sequence number are
//! parked until the gap fills; retransmitted and overlapping bytes are trimmed
//! so the frame decoder never sees a byte twice. The parking area is bounded:
//! a segment that would push it past the configured window is dropped.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Outcome of feeding one segment into a [`StreamReassembler`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reassembled {
    /// Contiguous chunks now ready for decoding, in stream order.
    pub ready: Vec<Bytes>,
    /// Whether the segment was discarded because the window was full.
    pub dropped: bool,
}

/// Restores byte order for one direction of a TCP connection.
#[derive(Debug)]
pub struct StreamReassembler {
    next_seq: Option<u32>,
    delivered: u64,
    pending: BTreeMap<u64, Bytes>,
    pending_bytes: usize,
    window: usize,
}

impl StreamReassembler {
    /// Create a reassembler parking at most `window` out-of-order bytes.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            next_seq: None,
            delivered: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            window,
        }
    }

    /// Total bytes delivered in order so far.
    #[must_use]
    pub fn delivered(&self) -> u64 { self.delivered }

    /// Bytes parked while waiting for a gap to fill.
    #[must_use]
    pub fn pending_bytes(&self) -> usize { self.pending_bytes }

    /// Feed a segment.
    ///
    /// `seq` is the TCP sequence number of the segment; `None` delivers the
    /// payload as-is. A SYN consumes one sequence number ahead of its data.
    pub fn push(&mut self, seq: Option<u32>, syn: bool, payload: Bytes) -> Reassembled {
        let Some(seq) = seq else {
            self.delivered += payload.len() as u64;
            return Reassembled {
                ready: if payload.is_empty() { Vec::new() } else { vec![payload] },
                dropped: false,
            };
        };
        let data_seq = if syn { seq.wrapping_add(1) } else { seq };
        let next = match self.next_seq {
            Some(next) => next,
            None => {
                self.next_seq = Some(data_seq);
                data_seq
            }
        };
        if payload.is_empty() {
            return Reassembled::default();
        }

        #[expect(
            clippy::cast_possible_wrap,
            reason = "TCP sequence arithmetic is defined modulo 2^32"
        )]
        let delta = i64::from(data_seq.wrapping_sub(next) as i32);
        let mut out = Reassembled::default();
        if delta <= 0 {
            let skip = delta.unsigned_abs();
            if skip >= payload.len() as u64 {
                return out;
            }
            #[expect(clippy::cast_possible_truncation, reason = "skip < payload length")]
            self.deliver(payload.slice(skip as usize..), &mut out);
            self.drain_pending(&mut out);
        } else {
            let offset = self.delivered + delta.unsigned_abs();
            out.dropped = !self.park(offset, payload);
        }
        out
    }

    fn deliver(&mut self, chunk: Bytes, out: &mut Reassembled) {
        #[expect(clippy::cast_possible_truncation, reason = "sequence numbers wrap at 2^32")]
        let advance = chunk.len() as u32;
        self.next_seq = self.next_seq.map(|next| next.wrapping_add(advance));
        self.delivered += chunk.len() as u64;
        out.ready.push(chunk);
    }

    fn park(&mut self, offset: u64, payload: Bytes) -> bool {
        let existing = self.pending.get(&offset).map_or(0, Bytes::len);
        if payload.len() <= existing {
            return true;
        }
        let growth = payload.len() - existing;
        if self.pending_bytes + growth > self.window {
            return false;
        }
        self.pending_bytes += growth;
        self.pending.insert(offset, payload);
        true
    }

    fn drain_pending(&mut self, out: &mut Reassembled) {
        while let Some(entry) = self.pending.first_entry() {
            let offset = *entry.key();
            if offset > self.delivered {
                break;
            }
            let chunk = entry.remove();
            self.pending_bytes -= chunk.len();
            let skip = self.delivered - offset;
            if skip < chunk.len() as u64 {
                #[expect(clippy::cast_possible_truncation, reason = "skip < chunk length")]
                self.deliver(chunk.slice(skip as usize..), out);
            }
        }
    }
}
