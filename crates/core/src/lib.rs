//! Core building blocks for the ydbx client SDK.
//!
//! This crate is transport-agnostic: it knows nothing about gRPC or the wire
//! protocol. It provides the pieces every session and writer in the SDK leans
//! on:
//!
//! - [`Error`] / [`Result`]: the error taxonomy shared across the workspace,
//!   including retryability classification
//! - [`retry`]: bounded and unbounded retry driving with exponential backoff
//!   and jitter
//! - [`ctx`]: cancellation contexts with deadlines and any-of composition
//! - [`codec`]: the compression codec registry used by the topic writer

pub mod codec;
pub mod ctx;
pub mod error;
pub mod retry;

pub use codec::{Codec, CodecRegistry, Compression, MIN_RAW_SIZE};
pub use ctx::Ctx;
pub use error::{Error, Result, TransportKind};
pub use retry::{retry, retry_with_observer, RetryConfig, RetryKind};
