use crate::registry::BoxEncoder;
use bytes::{Buf, Bytes, BytesMut};
use compression_core::util::{PartialBuffer, WriteBuffer};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024;

pin_project! {
    /// The final byte-producing response body.
    ///
    /// `Pipe` routes a source stream through an encoder, `Identity` passes
    /// a source stream through untransformed, and `Buffered` yields one
    /// concrete chunk (a serialized payload, an already-encoded buffer, or
    /// an error body). Whichever variant holds the source stream owns it
    /// outright; dropping the body is the single release point on every
    /// exit path.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Source stream piped through a compression transform.
        Pipe {
            #[pin]
            inner: B,
            state: PipeState,
        },
        /// Source stream passed through unmodified.
        Identity {
            #[pin]
            inner: B,
        },
        /// A single pre-computed chunk.
        Buffered {
            data: Option<Bytes>,
        },
    }
}

impl<B> CompressionBody<B> {
    /// Pipes `inner` through `encoder`; ownership of the stream transfers
    /// here.
    pub fn compressed(inner: B, encoder: BoxEncoder) -> Self {
        Self::Pipe {
            inner,
            state: PipeState::new(encoder),
        }
    }

    /// Passes `inner` through without transformation.
    pub fn passthrough(inner: B) -> Self {
        Self::Identity { inner }
    }

    /// Yields `data` as a single chunk.
    pub fn buffered(data: Bytes) -> Self {
        Self::Buffered { data: Some(data) }
    }
}

/// Encoder and buffers for an active pipe.
pub struct PipeState {
    encoder: BoxEncoder,
    scratch: Vec<u8>,
    stage: PipeStage,
    pending_trailers: Option<http::HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeStage {
    /// Pulling frames from the source and feeding the encoder.
    Reading,
    /// Source exhausted; draining the encoder.
    Finishing,
    /// Emitting trailers buffered while finishing.
    Trailers,
    /// Nothing left to emit.
    Done,
}

impl PipeState {
    fn new(encoder: BoxEncoder) -> Self {
        Self {
            encoder,
            scratch: vec![0u8; OUTPUT_BUFFER_SIZE],
            stage: PipeStage::Reading,
            pending_trailers: None,
        }
    }

    pub(crate) fn stage(&self) -> PipeStage {
        self.stage
    }

    fn poll_pipe<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.stage {
                PipeStage::Done => return Poll::Ready(None),

                PipeStage::Trailers => {
                    self.stage = PipeStage::Done;
                    return match self.pending_trailers.take() {
                        Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        None => Poll::Ready(None),
                    };
                }

                PipeStage::Finishing => {
                    let mut output = WriteBuffer::new_initialized(self.scratch.as_mut_slice());
                    match self.encoder.finish(&mut output) {
                        Ok(done) => {
                            let written = output.written_len();
                            if done {
                                self.stage = if self.pending_trailers.is_some() {
                                    PipeStage::Trailers
                                } else {
                                    PipeStage::Done
                                };
                            }
                            if written > 0 {
                                let data = Bytes::copy_from_slice(&self.scratch[..written]);
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                        }
                        Err(e) => return Poll::Ready(Some(Err(io::Error::other(e)))),
                    }
                }

                PipeStage::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => self.stage = PipeStage::Finishing,
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(mut data) => {
                            let input = data.copy_to_bytes(data.remaining());
                            match self.encode_chunk(&input) {
                                Ok(Some(encoded)) => {
                                    return Poll::Ready(Some(Ok(Frame::data(encoded))));
                                }
                                // The encoder may buffer a small chunk
                                // entirely; keep reading in that case.
                                Ok(None) => {}
                                Err(e) => return Poll::Ready(Some(Err(e))),
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                                self.stage = PipeStage::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Feeds one input chunk through the encoder, returning whatever
    /// output it produced.
    fn encode_chunk(&mut self, input: &[u8]) -> io::Result<Option<Bytes>> {
        let mut input_buf = PartialBuffer::new(input);
        let mut encoded = BytesMut::new();

        loop {
            let mut output = WriteBuffer::new_initialized(self.scratch.as_mut_slice());
            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                encoded.extend_from_slice(&self.scratch[..written]);
            }
            if input_buf.written_len() >= input.len() {
                break;
            }
            // An encoder that consumes nothing and emits nothing would
            // loop forever; abort instead of dropping the rest of the
            // input.
            if written == 0 && input_buf.written_len() == 0 {
                return Err(io::Error::other("encoder made no progress"));
            }
        }

        if encoded.is_empty() {
            Ok(None)
        } else {
            Ok(Some(encoded.freeze()))
        }
    }
}

/// Encodes a complete buffer synchronously.
///
/// Used for text and structured payloads, whose length is known up front.
pub(crate) fn encode_buffer(mut encoder: BoxEncoder, input: &[u8]) -> io::Result<Bytes> {
    let mut scratch = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut input_buf = PartialBuffer::new(input);
    let mut encoded = BytesMut::new();

    loop {
        let mut output = WriteBuffer::new_initialized(scratch.as_mut_slice());
        encoder
            .encode(&mut input_buf, &mut output)
            .map_err(io::Error::other)?;
        let written = output.written_len();
        if written > 0 {
            encoded.extend_from_slice(&scratch[..written]);
        }
        if input_buf.written_len() >= input.len() {
            break;
        }
        if written == 0 && input_buf.written_len() == 0 {
            return Err(io::Error::other("encoder made no progress"));
        }
    }

    loop {
        let mut output = WriteBuffer::new_initialized(scratch.as_mut_slice());
        let done = encoder.finish(&mut output).map_err(io::Error::other)?;
        let written = output.written_len();
        if written > 0 {
            encoded.extend_from_slice(&scratch[..written]);
        }
        if done {
            break;
        }
    }

    Ok(encoded.freeze())
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Identity { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
            CompressionBodyProj::Pipe { inner, state } => state.poll_pipe(cx, inner),
            CompressionBodyProj::Buffered { data } => {
                Poll::Ready(data.take().map(|data| Ok(Frame::data(data))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Identity { inner } => inner.is_end_stream(),
            CompressionBody::Pipe { state, .. } => state.stage() == PipeStage::Done,
            CompressionBody::Buffered { data } => data.is_none(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Identity { inner } => inner.size_hint(),
            // Compressed size is unknown ahead of time.
            CompressionBody::Pipe { .. } => http_body::SizeHint::default(),
            CompressionBody::Buffered { data } => {
                let remaining = data.as_ref().map(|d| d.len() as u64).unwrap_or(0);
                http_body::SizeHint::with_exact(remaining)
            }
        }
    }
}
