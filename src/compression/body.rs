//! Response body that streams through a pooled encoder.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::HeaderMap;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::compression::pool::PooledEncoder;

enum Phase {
    Streaming,
    /// Encoder finished; only trailers (if any) remain.
    Finished,
}

/// Wraps an upstream body, compressing each data frame as it arrives.
///
/// Empty frames are skipped so an empty write never produces encoder output.
/// The encoder is returned to its pool as soon as the stream is finished.
pub struct CompressionBody {
    inner: Body,
    encoder: Option<PooledEncoder>,
    phase: Phase,
    trailers: Option<HeaderMap>,
}

impl CompressionBody {
    pub fn new(inner: Body, encoder: PooledEncoder) -> Self {
        Self {
            inner,
            encoder: Some(encoder),
            phase: Phase::Streaming,
            trailers: None,
        }
    }

    fn finish(&mut self) -> Result<Bytes, axum::Error> {
        self.phase = Phase::Finished;
        match self.encoder.take() {
            Some(mut encoder) => encoder.finish().map_err(axum::Error::new),
            None => Ok(Bytes::new()),
        }
    }
}

impl HttpBody for CompressionBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if let Phase::Finished = this.phase {
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        if data.is_empty() {
                            continue;
                        }
                        let Some(encoder) = this.encoder.as_mut() else {
                            continue;
                        };
                        let out = encoder.encode(&data).map_err(axum::Error::new)?;
                        if !out.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(out))));
                        }
                    }
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            this.trailers = Some(trailers);
                        }
                        let tail = this.finish()?;
                        if !tail.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(tail))));
                        }
                    }
                },
                Some(Err(e)) => {
                    // Abandon the stream; the encoder is reset on its way back.
                    this.encoder.take();
                    this.phase = Phase::Finished;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let tail = this.finish()?;
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(tail))));
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.phase, Phase::Finished) && self.trailers.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::encoder::Encoding;
    use crate::compression::pool::EncoderPool;
    use futures_util::stream;
    use http_body_util::BodyExt;
    use std::io::Read;

    #[tokio::test]
    async fn test_streamed_chunks_decode() {
        let pool = EncoderPool::new(Encoding::Gzip, 6);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"alpha ")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"beta")),
        ];
        let inner = Body::from_stream(stream::iter(chunks));
        let body = CompressionBody::new(inner, pool.acquire());

        let compressed = body.collect().await.unwrap().to_bytes();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "alpha beta");
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_still_terminates_stream() {
        let pool = EncoderPool::new(Encoding::Brotli, 4);
        let body = CompressionBody::new(Body::empty(), pool.acquire());
        let compressed = body.collect().await.unwrap().to_bytes();

        let mut decoded = Vec::new();
        brotli::Decompressor::new(&compressed[..], 4096)
            .read_to_end(&mut decoded)
            .unwrap();
        assert!(decoded.is_empty());
    }
}
