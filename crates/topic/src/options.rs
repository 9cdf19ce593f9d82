//! Writer configuration and the user-facing message type.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use ydbx_core::Codec;

/// Server-enforced cap on one write request; batches never exceed it.
pub const MAX_BATCH_SIZE: usize = 50 * 1024 * 1024;

/// Server-enforced cap on a single message payload.
pub const MAX_PAYLOAD_SIZE: usize = 48 * 1024 * 1024;

/// How messages are routed to a partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Partitioning {
    /// Pin every message to one partition.
    PartitionId(i64),
    /// Let the server hash a group id to a partition.
    MessageGroupId(String),
}

/// Transaction this writer's batches belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionIdentity {
    pub id: String,
    pub session_id: String,
}

/// When the acknowledged prefix of the window is compacted away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarbageCollectionOptions {
    /// Compact once this many acknowledged messages accumulate.
    pub max_garbage_count: usize,
    /// Compact once acknowledged messages hold this many bytes.
    pub max_garbage_size: usize,
}

impl Default for GarbageCollectionOptions {
    fn default() -> Self {
        GarbageCollectionOptions {
            max_garbage_count: 1000,
            max_garbage_size: 100 * 1024 * 1024,
        }
    }
}

/// Configuration for a [`TopicWriter`](crate::TopicWriter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Topic path to write to.
    pub topic: String,
    /// Producer identity; the server deduplicates by `(producer_id, seqNo)`.
    pub producer_id: String,
    pub partitioning: Option<Partitioning>,
    /// Payload compression; RAW sends bytes untouched.
    pub codec: Codec,
    /// Buffered bytes that trigger an eager send.
    pub max_buffer_bytes: usize,
    /// Cap on unacknowledged messages on the wire.
    pub max_inflight_count: usize,
    /// Periodic send of whatever the buffer holds.
    pub flush_interval: Duration,
    /// How often a fresh auth token is pushed onto the stream.
    pub update_token_interval: Duration,
    /// How long a graceful close waits for outstanding acks.
    pub graceful_shutdown_timeout: Duration,
    pub garbage_collection: GarbageCollectionOptions,
    /// Write inside a transaction.
    pub tx: Option<TransactionIdentity>,
}

impl WriterOptions {
    pub fn new(topic: impl Into<String>, producer_id: impl Into<String>) -> Self {
        WriterOptions {
            topic: topic.into(),
            producer_id: producer_id.into(),
            partitioning: None,
            codec: Codec::Raw,
            max_buffer_bytes: 256 * 1024 * 1024,
            max_inflight_count: 1000,
            flush_interval: Duration::from_millis(1000),
            update_token_interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(30),
            garbage_collection: GarbageCollectionOptions::default(),
            tx: None,
        }
    }

    pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    pub fn with_max_inflight_count(mut self, max_inflight_count: usize) -> Self {
        self.max_inflight_count = max_inflight_count;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_update_token_interval(mut self, update_token_interval: Duration) -> Self {
        self.update_token_interval = update_token_interval;
        self
    }

    pub fn with_graceful_shutdown_timeout(mut self, graceful_shutdown_timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = graceful_shutdown_timeout;
        self
    }

    pub fn with_garbage_collection(mut self, garbage_collection: GarbageCollectionOptions) -> Self {
        self.garbage_collection = garbage_collection;
        self
    }

    pub fn with_tx(mut self, tx: TransactionIdentity) -> Self {
        self.tx = Some(tx);
        self
    }
}

/// A message handed to [`TopicWriter::write`](crate::TopicWriter::write).
///
/// The first written message pins the writer's seqNo mode: an explicit
/// `seq_no` means every later message must carry one too (manual mode), an
/// absent one means the writer numbers everything itself (auto mode).
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub data: Bytes,
    pub seq_no: Option<i64>,
    /// Stamped at write time when not supplied.
    pub created_at: Option<SystemTime>,
    pub metadata: Vec<(String, Vec<u8>)>,
}

impl TopicMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        TopicMessage {
            data: data.into(),
            seq_no: None,
            created_at: None,
            metadata: Vec::new(),
        }
    }

    pub fn with_seq_no(mut self, seq_no: i64) -> Self {
        self.seq_no = Some(seq_no);
        self
    }

    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.metadata.push((key.into(), value));
        self
    }
}
