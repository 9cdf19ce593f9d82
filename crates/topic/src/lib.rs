//! Topic writer for the ydbx SDK.
//!
//! [`TopicWriter`] is a high-throughput producer: user messages are
//! validated, numbered and compressed synchronously into a sliding-window
//! store, batched under size and in-flight caps onto one write stream, and
//! acknowledged in seqNo order. Transient stream failures reconnect with
//! backoff and resend the unacknowledged window; the server deduplicates
//! by `(producer_id, seqNo)`, making delivery effectively at-least-once
//! with idempotent replay.

pub mod options;
pub mod seqno;
pub mod store;
mod stream;
pub mod writer;

pub use options::{
    GarbageCollectionOptions, Partitioning, TopicMessage, TransactionIdentity, WriterOptions,
    MAX_BATCH_SIZE, MAX_PAYLOAD_SIZE,
};
pub use seqno::{SeqNoManager, SeqNoMode};
pub use store::{MessageStore, ReconcileOutcome, StoreCounters, StoredMessage};
pub use writer::{
    AckStatus, MessageAck, TopicClient, TopicWriter, WriterEvent, WriterState,
};
