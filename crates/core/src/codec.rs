//! Compression codec registry
//!
//! The topic writer compresses message payloads before they enter the
//! sliding window. Codecs are looked up by their wire id; RAW, GZIP and
//! ZSTD are built in, and applications may register their own under ids
//! from [`Codec::CUSTOM_BASE`] up.
//!
//! Payloads below a per-codec `min_raw_size` threshold are sent raw: the
//! space savings on tiny messages never pay for the CPU spent.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default threshold below which payloads skip compression.
pub const MIN_RAW_SIZE: usize = 1024;

/// A compression codec, identified on the wire by a numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// Identity: payload bytes travel untouched
    Raw,
    /// DEFLATE with a gzip wrapper
    Gzip,
    /// Zstandard
    Zstd,
    /// Application-registered codec; ids below [`Codec::CUSTOM_BASE`] are
    /// reserved for the protocol
    Custom(u32),
}

impl Codec {
    /// First id available to application-defined codecs.
    pub const CUSTOM_BASE: u32 = 10_000;

    /// The wire id of this codec.
    pub fn id(self) -> u32 {
        match self {
            Codec::Raw => 1,
            Codec::Gzip => 2,
            Codec::Zstd => 4,
            Codec::Custom(id) => id,
        }
    }

    /// Map a wire id back to a codec. Unknown reserved ids yield `None`.
    pub fn from_id(id: u32) -> Option<Codec> {
        match id {
            1 => Some(Codec::Raw),
            2 => Some(Codec::Gzip),
            4 => Some(Codec::Zstd),
            id if id >= Codec::CUSTOM_BASE => Some(Codec::Custom(id)),
            _ => None,
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Raw
    }
}

/// A compress/decompress pair for one codec.
pub trait Compression: Send + Sync {
    /// Compress `data` into a fresh buffer.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Decompress `data` into a fresh buffer.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

struct RawCompression;

impl Compression for RawCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

struct GzipCompression;

impl Compression for GzipCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Codec(format!("gzip compress: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Codec(format!("gzip decompress: {e}")))?;
        Ok(out)
    }
}

struct ZstdCompression {
    level: i32,
}

impl Compression for ZstdCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::encode_all(data, self.level)
            .map_err(|e| Error::Codec(format!("zstd compress: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(data).map_err(|e| Error::Codec(format!("zstd decompress: {e}")))
    }
}

struct CodecEntry {
    compression: Arc<dyn Compression>,
    min_raw_size: usize,
}

/// Registry mapping codec ids to their implementations.
pub struct CodecRegistry {
    entries: HashMap<u32, CodecEntry>,
}

impl Default for CodecRegistry {
    /// Registry with RAW, GZIP and ZSTD registered at the default
    /// [`MIN_RAW_SIZE`] threshold.
    fn default() -> Self {
        let mut registry = CodecRegistry {
            entries: HashMap::new(),
        };
        registry.register(Codec::Raw, Arc::new(RawCompression), 0);
        registry.register(Codec::Gzip, Arc::new(GzipCompression), MIN_RAW_SIZE);
        registry.register(
            Codec::Zstd,
            Arc::new(ZstdCompression {
                level: zstd::DEFAULT_COMPRESSION_LEVEL,
            }),
            MIN_RAW_SIZE,
        );
        registry
    }
}

impl CodecRegistry {
    /// Register (or replace) a codec implementation.
    pub fn register(
        &mut self,
        codec: Codec,
        compression: Arc<dyn Compression>,
        min_raw_size: usize,
    ) {
        self.entries.insert(
            codec.id(),
            CodecEntry {
                compression,
                min_raw_size,
            },
        );
    }

    /// Adjust the skip-compression threshold for a registered codec.
    pub fn set_min_raw_size(&mut self, codec: Codec, min_raw_size: usize) {
        if let Some(entry) = self.entries.get_mut(&codec.id()) {
            entry.min_raw_size = min_raw_size;
        }
    }

    /// Whether the given wire id has a registered implementation.
    pub fn supports(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Encode `data` for the wire. Returns the bytes together with the
    /// codec they are actually encoded with: payloads below the codec's
    /// threshold travel as [`Codec::Raw`].
    pub fn encode(&self, codec: Codec, data: &[u8]) -> Result<(Bytes, Codec)> {
        if codec == Codec::Raw {
            return Ok((Bytes::copy_from_slice(data), Codec::Raw));
        }
        let entry = self
            .entries
            .get(&codec.id())
            .ok_or(Error::UnsupportedCodec(codec.id()))?;
        if data.len() < entry.min_raw_size {
            return Ok((Bytes::copy_from_slice(data), Codec::Raw));
        }
        let compressed = entry.compression.compress(data)?;
        Ok((Bytes::from(compressed), codec))
    }

    /// Decode wire bytes carrying the given codec id. Unknown ids fail
    /// with [`Error::UnsupportedCodec`].
    pub fn decode(&self, id: u32, data: &[u8]) -> Result<Bytes> {
        let entry = self.entries.get(&id).ok_or(Error::UnsupportedCodec(id))?;
        Ok(Bytes::from(entry.compression.decompress(data)?))
    }
}
