//! Resettable streaming encoders.
//!
//! Both encoders accumulate compressed output in memory and hand it back per
//! chunk, so one encoder can be parked in a pool and reused across responses.

use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use parking_lot::Mutex;

/// gzip member header: magic, CM=deflate, no flags, no mtime, XFL=0, OS=unknown.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LG_WINDOW: u32 = 22;

/// Content codings this gateway produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Brotli,
}

impl Encoding {
    /// Token used in `Content-Encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Brotli => "br",
        }
    }

    /// Pick an encoding from an `Accept-Encoding` value. Brotli wins over
    /// gzip; q-values are not interpreted.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        if accept_encoding.contains("br") {
            Some(Encoding::Brotli)
        } else if accept_encoding.contains("gzip") {
            Some(Encoding::Gzip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pooled encoder of either kind.
pub enum Encoder {
    Gzip(GzipEncoder),
    Brotli(BrotliEncoder),
}

impl Encoder {
    pub fn new(encoding: Encoding, level: u32) -> Self {
        match encoding {
            Encoding::Gzip => Encoder::Gzip(GzipEncoder::new(level)),
            Encoding::Brotli => Encoder::Brotli(BrotliEncoder::new(level)),
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Encoder::Gzip(_) => Encoding::Gzip,
            Encoder::Brotli(_) => Encoding::Brotli,
        }
    }

    /// Feed `data`; returns whatever compressed output is ready (possibly empty).
    pub fn encode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Encoder::Gzip(e) => e.encode(data),
            Encoder::Brotli(e) => e.encode(data),
        }
    }

    /// Terminate the stream and return the remaining output.
    pub fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            Encoder::Gzip(e) => e.finish(),
            Encoder::Brotli(e) => e.finish(),
        }
    }

    /// Discard any state so the encoder can start a new stream.
    pub fn reset(&mut self) {
        match self {
            Encoder::Gzip(e) => e.reset(),
            Encoder::Brotli(e) => e.reset(),
        }
    }
}

/// gzip framing around a raw deflate stream. `flate2::write::GzEncoder`
/// cannot be reset onto a new sink, so pooled encoders frame it by hand.
pub struct GzipEncoder {
    level: Compression,
    deflate: DeflateEncoder<Vec<u8>>,
    crc: Crc,
    header_written: bool,
}

impl GzipEncoder {
    pub fn new(level: u32) -> Self {
        let level = Compression::new(level);
        Self {
            level,
            deflate: DeflateEncoder::new(Vec::new(), level),
            crc: Crc::new(),
            header_written: false,
        }
    }

    fn take_output(&mut self, mut out: Vec<u8>) -> Vec<u8> {
        if !self.header_written {
            let mut framed = GZIP_HEADER.to_vec();
            framed.append(&mut out);
            out = framed;
            self.header_written = true;
        }
        out.append(self.deflate.get_mut());
        out
    }

    pub fn encode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        self.crc.update(data);
        self.deflate.write_all(data)?;
        Ok(Bytes::from(self.take_output(Vec::new())))
    }

    pub fn finish(&mut self) -> io::Result<Bytes> {
        self.deflate.try_finish()?;
        let mut out = self.take_output(Vec::new());
        out.extend_from_slice(&self.crc.sum().to_le_bytes());
        out.extend_from_slice(&self.crc.amount().to_le_bytes());
        Ok(Bytes::from(out))
    }

    pub fn reset(&mut self) {
        if self.deflate.reset(Vec::new()).is_err() {
            self.deflate = DeflateEncoder::new(Vec::new(), self.level);
        }
        self.crc.reset();
        self.header_written = false;
    }
}

/// Output buffer shared between the brotli writer and its owner.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn take(&self) -> Vec<u8> {
        mem::take(&mut *self.0.lock())
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct BrotliEncoder {
    quality: u32,
    sink: SharedSink,
    writer: Option<brotli::CompressorWriter<SharedSink>>,
}

impl BrotliEncoder {
    pub fn new(quality: u32) -> Self {
        let sink = SharedSink::default();
        Self {
            quality,
            writer: Some(Self::writer(&sink, quality)),
            sink,
        }
    }

    fn writer(sink: &SharedSink, quality: u32) -> brotli::CompressorWriter<SharedSink> {
        brotli::CompressorWriter::new(sink.clone(), BROTLI_BUFFER_SIZE, quality, BROTLI_LG_WINDOW)
    }

    pub fn encode(&mut self, data: &[u8]) -> io::Result<Bytes> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("brotli stream already finished"))?;
        writer.write_all(data)?;
        Ok(Bytes::from(self.sink.take()))
    }

    pub fn finish(&mut self) -> io::Result<Bytes> {
        if let Some(writer) = self.writer.take() {
            // into_inner terminates the stream into the sink.
            let _ = writer.into_inner();
        }
        Ok(Bytes::from(self.sink.take()))
    }

    pub fn reset(&mut self) {
        // A fresh sink keeps a dropped writer from appending to the next stream.
        self.sink = SharedSink::default();
        self.writer = Some(Self::writer(&self.sink, self.quality));
    }
}
