//! The writer's sliding-window message store.
//!
//! All messages live in one growable sequence with three contiguous
//! regions, delimited by two indices:
//!
//! ```text
//! [ garbage … )[ inflight … )[ buffer … )
//! 0            inflight_start buffer_start   len
//! ```
//!
//! Only the indices move: acknowledging advances `inflight_start`, sending
//! advances `buffer_start`, and the garbage prefix is compacted away in
//! bulk once it crosses a threshold. Random deletion never happens, which
//! keeps seqNos strictly increasing across the live regions.

use std::time::SystemTime;

use bytes::Bytes;

use ydbx_core::Codec;

use crate::options::{GarbageCollectionOptions, MAX_BATCH_SIZE};
use crate::seqno::SeqNoMode;

/// One message in the window. `data` is the wire payload (compressed when
/// the effective codec says so); cloning is cheap.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub seq_no: i64,
    pub created_at: SystemTime,
    pub data: Bytes,
    /// Codec `data` is actually encoded with.
    pub codec: Codec,
    pub uncompressed_size: usize,
    pub metadata: Vec<(String, Vec<u8>)>,
}

/// Snapshot of the window's cached counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub buffer_length: usize,
    pub inflight_length: usize,
    pub garbage_length: usize,
    pub buffer_size: usize,
    pub inflight_size: usize,
    pub garbage_size: usize,
}

/// What an init-response reconciliation did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Messages dropped because the server had already persisted them.
    pub acknowledged: usize,
    /// Messages moved back to the buffer for (re)send.
    pub survivors: usize,
    /// Highest seqNo in the window after renumbering, or the server's
    /// `last_seq_no` when nothing survived.
    pub last_assigned: i64,
}

pub struct MessageStore {
    messages: Vec<StoredMessage>,
    inflight_start: usize,
    buffer_start: usize,
    buffer_size: usize,
    inflight_size: usize,
    garbage_size: usize,
    gc: GarbageCollectionOptions,
}

impl MessageStore {
    pub fn new(gc: GarbageCollectionOptions) -> Self {
        MessageStore {
            messages: Vec::new(),
            inflight_start: 0,
            buffer_start: 0,
            buffer_size: 0,
            inflight_size: 0,
            garbage_size: 0,
            gc,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn buffer_len(&self) -> usize {
        self.messages.len() - self.buffer_start
    }

    pub fn inflight_len(&self) -> usize {
        self.buffer_start - self.inflight_start
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn inflight_size(&self) -> usize {
        self.inflight_size
    }

    pub fn garbage_size(&self) -> usize {
        self.garbage_size
    }

    /// Nothing buffered and nothing awaiting an ack.
    pub fn is_drained(&self) -> bool {
        self.buffer_len() == 0 && self.inflight_len() == 0
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            buffer_length: self.buffer_len(),
            inflight_length: self.inflight_len(),
            garbage_length: self.inflight_start,
            buffer_size: self.buffer_size,
            inflight_size: self.inflight_size,
            garbage_size: self.garbage_size,
        }
    }

    /// Append a message to the buffer region.
    pub fn push(&mut self, message: StoredMessage) {
        self.buffer_size += message.data.len();
        self.messages.push(message);
    }

    /// Slice the next batch off the buffer and move it in flight.
    ///
    /// The batch is a buffer prefix bounded by `max_count` messages,
    /// [`MAX_BATCH_SIZE`] total bytes, and a single effective codec. The
    /// first message is always taken, even when it alone exceeds the byte
    /// cap. Empty result means nothing to send (or `max_count == 0`).
    pub fn next_batch(&mut self, max_count: usize) -> Vec<StoredMessage> {
        if max_count == 0 || self.buffer_len() == 0 {
            return Vec::new();
        }
        let start = self.buffer_start;
        let codec = self.messages[start].codec;
        let mut total = self.messages[start].data.len();
        let mut end = start + 1;
        while end < self.messages.len() && end - start < max_count {
            let message = &self.messages[end];
            if message.codec != codec || total + message.data.len() > MAX_BATCH_SIZE {
                break;
            }
            total += message.data.len();
            end += 1;
        }
        let batch = self.messages[start..end].to_vec();
        self.buffer_start = end;
        self.buffer_size -= total;
        self.inflight_size += total;
        batch
    }

    /// Acknowledge the in-flight prefix up to and including `seq_no`.
    /// Returns `false` for stale acks (already collected or never known).
    pub fn ack(&mut self, seq_no: i64) -> bool {
        if self.inflight_len() == 0 || seq_no < self.messages[self.inflight_start].seq_no {
            return false;
        }
        let mut acked = false;
        while self.inflight_start < self.buffer_start
            && self.messages[self.inflight_start].seq_no <= seq_no
        {
            let size = self.messages[self.inflight_start].data.len();
            self.inflight_size -= size;
            self.garbage_size += size;
            self.inflight_start += 1;
            acked = true;
        }
        acked
    }

    /// Compact the garbage prefix once it crosses a GC threshold. Returns
    /// whether a compaction ran.
    pub fn collect_garbage(&mut self) -> bool {
        if self.inflight_start == 0 {
            return false;
        }
        if self.inflight_start <= self.gc.max_garbage_count
            && self.garbage_size <= self.gc.max_garbage_size
        {
            return false;
        }
        self.messages.drain(..self.inflight_start);
        self.buffer_start -= self.inflight_start;
        self.inflight_start = 0;
        self.garbage_size = 0;
        true
    }

    /// Reconcile the window against an init response.
    ///
    /// Messages the server already persisted (`seq_no <= last_seq_no`) are
    /// dropped as acknowledged; everything still in flight returns to the
    /// buffer for resend. In auto mode survivors are renumbered
    /// consecutively from `last_seq_no + 1` — except on the very first
    /// init, where local seqNos are provisional and nothing was ever sent,
    /// so no message is mistaken for persisted. The garbage prefix is
    /// compacted unconditionally.
    pub fn reconcile(
        &mut self,
        last_seq_no: i64,
        mode: Option<SeqNoMode>,
        first_init: bool,
    ) -> ReconcileOutcome {
        let auto = mode != Some(SeqNoMode::Manual);
        let mut acknowledged = 0;
        if !(auto && first_init) {
            while self.inflight_start < self.messages.len()
                && self.messages[self.inflight_start].seq_no <= last_seq_no
            {
                let size = self.messages[self.inflight_start].data.len();
                if self.inflight_start < self.buffer_start {
                    self.inflight_size -= size;
                } else {
                    self.buffer_size -= size;
                }
                self.garbage_size += size;
                self.inflight_start += 1;
                acknowledged += 1;
            }
            if self.buffer_start < self.inflight_start {
                self.buffer_start = self.inflight_start;
            }
        }

        // Still-in-flight messages were never acknowledged; resend them.
        if self.inflight_start < self.buffer_start {
            self.buffer_size += self.inflight_size;
            self.inflight_size = 0;
            self.buffer_start = self.inflight_start;
        }

        let mut last_assigned = last_seq_no;
        if auto {
            let mut next = last_seq_no + 1;
            for message in &mut self.messages[self.buffer_start..] {
                message.seq_no = next;
                next += 1;
            }
            last_assigned = next - 1;
        } else if let Some(last) = self.messages.last() {
            last_assigned = last.seq_no.max(last_seq_no);
        }

        if self.inflight_start > 0 {
            self.messages.drain(..self.inflight_start);
            self.buffer_start -= self.inflight_start;
            self.inflight_start = 0;
            self.garbage_size = 0;
        }

        ReconcileOutcome {
            acknowledged,
            survivors: self.messages.len() - self.buffer_start,
            last_assigned,
        }
    }

    /// Buffered seqNos, for diagnostics and tests.
    pub fn buffered_seq_nos(&self) -> Vec<i64> {
        self.messages[self.buffer_start..]
            .iter()
            .map(|m| m.seq_no)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(seq_no: i64, size: usize) -> StoredMessage {
        StoredMessage {
            seq_no,
            created_at: SystemTime::UNIX_EPOCH,
            data: Bytes::from(vec![0u8; size]),
            codec: Codec::Raw,
            uncompressed_size: size,
            metadata: Vec::new(),
        }
    }

    fn store() -> MessageStore {
        MessageStore::new(GarbageCollectionOptions::default())
    }

    /// The §8 bookkeeping invariant: cached sizes sum to the real total.
    fn assert_sizes_consistent(store: &MessageStore) {
        let total: usize = store.messages.iter().map(|m| m.data.len()).sum();
        assert_eq!(
            store.buffer_size + store.inflight_size + store.garbage_size,
            total
        );
        assert_eq!(store.buffer_len(), store.messages.len() - store.buffer_start);
        assert_eq!(store.inflight_len(), store.buffer_start - store.inflight_start);
    }

    #[test]
    fn push_and_batch_move_regions() {
        let mut store = store();
        for seq_no in 1..=5 {
            store.push(message(seq_no, 10));
        }
        assert_eq!(store.buffer_len(), 5);
        assert_eq!(store.buffer_size(), 50);
        assert_sizes_consistent(&store);

        let batch = store.next_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].seq_no, 1);
        assert_eq!(store.buffer_len(), 2);
        assert_eq!(store.inflight_len(), 3);
        assert_eq!(store.inflight_size(), 30);
        assert_sizes_consistent(&store);
    }

    #[test]
    fn batch_respects_byte_cap_but_always_takes_one() {
        let mut store = store();
        store.push(message(1, MAX_BATCH_SIZE + 1));
        store.push(message(2, 10));

        // An oversized message still goes out, alone.
        let batch = store.next_batch(100);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].seq_no, 1);

        let batch = store.next_batch(100);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].seq_no, 2);
        assert_sizes_consistent(&store);
    }

    #[test]
    fn batch_splits_at_byte_boundary() {
        let mut store = store();
        // Three messages of 20 MiB: the first two fit under 50 MiB, the
        // third starts the next batch.
        for seq_no in 1..=3 {
            store.push(message(seq_no, 20 * 1024 * 1024));
        }
        let batch = store.next_batch(100);
        assert_eq!(batch.len(), 2);
        let batch = store.next_batch(100);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn batch_splits_on_codec_change() {
        let mut store = store();
        let mut compressed = message(1, 10);
        compressed.codec = Codec::Gzip;
        store.push(compressed);
        store.push(message(2, 10));

        let batch = store.next_batch(10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].codec, Codec::Gzip);
        let batch = store.next_batch(10);
        assert_eq!(batch[0].codec, Codec::Raw);
    }

    #[test]
    fn ack_advances_the_prefix_monotonically() {
        let mut store = store();
        for seq_no in 1..=4 {
            store.push(message(seq_no, 10));
        }
        store.next_batch(4);
        assert_eq!(store.inflight_len(), 4);

        assert!(store.ack(2));
        assert_eq!(store.inflight_len(), 2);
        assert_eq!(store.garbage_size(), 20);
        assert_sizes_consistent(&store);

        // Stale ack is ignored; nothing is downgraded.
        assert!(!store.ack(1));
        assert_eq!(store.inflight_len(), 2);

        assert!(store.ack(4));
        assert!(store.is_drained());
        assert_sizes_consistent(&store);
    }

    #[test]
    fn garbage_collection_compacts_past_thresholds() {
        let mut store = MessageStore::new(GarbageCollectionOptions {
            max_garbage_count: 2,
            max_garbage_size: usize::MAX,
        });
        for seq_no in 1..=5 {
            store.push(message(seq_no, 10));
        }
        store.next_batch(5);
        store.ack(2);
        // Two garbage entries: at the threshold, not over it.
        assert!(!store.collect_garbage());
        assert_eq!(store.len(), 5);

        store.ack(3);
        assert!(store.collect_garbage());
        assert_eq!(store.len(), 2);
        assert_eq!(store.garbage_size(), 0);
        assert_eq!(store.inflight_len(), 2);
        assert_sizes_consistent(&store);

        store.ack(5);
        store.ack(4); // already gone
        assert!(store.is_drained());
    }

    #[test]
    fn first_init_renumbers_everything_in_auto_mode() {
        let mut store = store();
        for seq_no in 1..=3 {
            store.push(message(seq_no, 10));
        }
        let outcome = store.reconcile(42, Some(SeqNoMode::Auto), true);
        assert_eq!(outcome.acknowledged, 0);
        assert_eq!(outcome.survivors, 3);
        assert_eq!(outcome.last_assigned, 45);
        assert_eq!(store.buffered_seq_nos(), vec![43, 44, 45]);
        assert_sizes_consistent(&store);
    }

    #[test]
    fn reconnect_reconcile_drops_persisted_and_renumbers() {
        let mut store = store();
        for seq_no in 43..=46 {
            store.push(message(seq_no, 10));
        }
        store.next_batch(3); // 43, 44, 45 in flight; 46 buffered
        let outcome = store.reconcile(44, Some(SeqNoMode::Auto), false);
        // 43 and 44 were persisted; 45 and 46 return to the buffer.
        assert_eq!(outcome.acknowledged, 2);
        assert_eq!(outcome.survivors, 2);
        assert_eq!(outcome.last_assigned, 46);
        assert_eq!(store.buffered_seq_nos(), vec![45, 46]);
        assert_eq!(store.inflight_len(), 0);
        assert_eq!(store.garbage_size(), 0);
        assert_sizes_consistent(&store);
    }

    #[test]
    fn manual_mode_preserves_user_seq_nos() {
        let mut store = store();
        for seq_no in [10, 11, 12] {
            store.push(message(seq_no, 10));
        }
        store.next_batch(3);
        let outcome = store.reconcile(10, Some(SeqNoMode::Manual), false);
        assert_eq!(outcome.acknowledged, 1);
        assert_eq!(outcome.survivors, 2);
        // No renumbering: gaps and values survive untouched.
        assert_eq!(store.buffered_seq_nos(), vec![11, 12]);
        assert_sizes_consistent(&store);
    }

    #[test]
    fn manual_first_init_deduplicates_already_written() {
        let mut store = store();
        for seq_no in [10, 11, 12] {
            store.push(message(seq_no, 10));
        }
        // Server already has everything up to 12 from a previous run.
        let outcome = store.reconcile(12, Some(SeqNoMode::Manual), true);
        assert_eq!(outcome.acknowledged, 3);
        assert_eq!(outcome.survivors, 0);
        assert!(store.is_drained());
        assert_sizes_consistent(&store);
    }
}
