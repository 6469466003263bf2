//! Encoder pools.
//!
//! # Design Decisions
//! - A bounded free-list; `acquire` never blocks and builds a new encoder on a miss
//! - Returned encoders are reset before they go back on the list
//! - A full list drops the returned encoder

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};

use crate::compression::encoder::{Encoder, Encoding};

pub const GZIP_MIN_LEVEL: u32 = 1;
pub const GZIP_MAX_LEVEL: u32 = 9;
pub const BROTLI_MIN_LEVEL: u32 = 0;
pub const BROTLI_MAX_LEVEL: u32 = 11;

const DEFAULT_CAPACITY: usize = 256;

/// Clamp `level` into the range the encoding supports.
pub fn clamp_level(encoding: Encoding, level: u32) -> u32 {
    match encoding {
        Encoding::Gzip => level.clamp(GZIP_MIN_LEVEL, GZIP_MAX_LEVEL),
        Encoding::Brotli => level.clamp(BROTLI_MIN_LEVEL, BROTLI_MAX_LEVEL),
    }
}

struct PoolInner {
    encoding: Encoding,
    level: u32,
    free_tx: Sender<Encoder>,
    free_rx: Receiver<Encoder>,
}

/// Pool of encoders of one kind and level.
#[derive(Clone)]
pub struct EncoderPool {
    inner: Arc<PoolInner>,
}

impl EncoderPool {
    pub fn new(encoding: Encoding, level: u32) -> Self {
        Self::with_capacity(encoding, level, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(encoding: Encoding, level: u32, capacity: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        Self {
            inner: Arc::new(PoolInner {
                encoding,
                level: clamp_level(encoding, level),
                free_tx,
                free_rx,
            }),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    /// Effective (clamped) level.
    pub fn level(&self) -> u32 {
        self.inner.level
    }

    /// Number of idle encoders.
    pub fn idle(&self) -> usize {
        self.inner.free_rx.len()
    }

    pub fn acquire(&self) -> PooledEncoder {
        let encoder = self
            .inner
            .free_rx
            .try_recv()
            .unwrap_or_else(|_| Encoder::new(self.inner.encoding, self.inner.level));
        PooledEncoder {
            encoder: Some(encoder),
            pool: self.inner.clone(),
        }
    }
}

/// An encoder on loan from an [`EncoderPool`]; reset and returned on drop.
pub struct PooledEncoder {
    encoder: Option<Encoder>,
    pool: Arc<PoolInner>,
}

impl PooledEncoder {
    fn encoder(&mut self) -> io::Result<&mut Encoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("encoder already returned to pool"))
    }

    pub fn encoding(&self) -> Encoding {
        self.pool.encoding
    }

    pub fn encode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        self.encoder()?.encode(data)
    }

    pub fn finish(&mut self) -> io::Result<Bytes> {
        self.encoder()?.finish()
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.reset();
            let _ = self.pool.free_tx.try_send(encoder);
        }
    }
}

/// One pool per encoding.
#[derive(Clone)]
pub struct EncoderPools {
    gzip: EncoderPool,
    brotli: EncoderPool,
}

impl EncoderPools {
    pub fn new(gzip_level: u32, brotli_level: u32) -> Self {
        Self {
            gzip: EncoderPool::new(Encoding::Gzip, gzip_level),
            brotli: EncoderPool::new(Encoding::Brotli, brotli_level),
        }
    }

    pub fn get(&self, encoding: Encoding) -> &EncoderPool {
        match encoding {
            Encoding::Gzip => &self.gzip,
            Encoding::Brotli => &self.brotli,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_levels_are_clamped() {
        assert_eq!(EncoderPool::new(Encoding::Gzip, 0).level(), 1);
        assert_eq!(EncoderPool::new(Encoding::Gzip, 42).level(), 9);
        assert_eq!(EncoderPool::new(Encoding::Brotli, 0).level(), 0);
        assert_eq!(EncoderPool::new(Encoding::Brotli, 12).level(), 11);
    }

    #[test]
    fn test_encoder_returns_to_pool() {
        let pool = EncoderPool::new(Encoding::Gzip, 6);
        assert_eq!(pool.idle(), 0);
        {
            let mut encoder = pool.acquire();
            encoder.encode(b"abandoned midway").unwrap();
        }
        assert_eq!(pool.idle(), 1);

        let mut encoder = pool.acquire();
        assert_eq!(pool.idle(), 0);
        let mut out = encoder.encode(b"reused").unwrap().to_vec();
        out.extend_from_slice(&encoder.finish().unwrap());
        let mut decoded = String::new();
        GzDecoder::new(&out[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "reused");
    }

    #[test]
    fn test_full_pool_drops_extra_encoders() {
        let pool = EncoderPool::with_capacity(Encoding::Brotli, 4, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
