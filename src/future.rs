use crate::body::CompressionBody;
use crate::config::CompressionConfig;
use crate::dispatch::DispatchOutcome;
use crate::error::Error;
use crate::finalize::finalize;
use crate::negotiate::{NegotiationResult, negotiate};
use crate::payload::ClassifiedPayload;
use http::{Response, header};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        config: Arc<CompressionConfig>,
        accept_encoding: Option<String>,
        opt_out: bool,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(
        inner: F,
        config: Arc<CompressionConfig>,
        accept_encoding: Option<String>,
        opt_out: bool,
    ) -> Self {
        Self {
            inner,
            config,
            accept_encoding,
            opt_out,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => Poll::Ready(Ok(transform_response(
                this.config,
                this.accept_encoding.as_deref(),
                *this.opt_out,
                response,
            ))),
        }
    }
}

/// Applies negotiation and compression to a finished inner response.
///
/// The response body here is always a live stream, so the buffered-payload
/// threshold is approximated through the declared `Content-Length`, when
/// present.
fn transform_response<B>(
    config: &CompressionConfig,
    accept_encoding: Option<&str>,
    opt_out: bool,
    response: Response<B>,
) -> Response<CompressionBody<B>> {
    let (parts, body) = response.into_parts();

    if opt_out {
        debug!("compression opted out by request");
        return finalize(
            parts,
            DispatchOutcome::Bypass(ClassifiedPayload::Stream(body)),
        );
    }

    let selected = match negotiate(accept_encoding, &config.registry, config.mode()) {
        Ok(NegotiationResult::Selected(name)) => name,
        Ok(NegotiationResult::Identity) => {
            return finalize(
                parts,
                DispatchOutcome::Bypass(ClassifiedPayload::Stream(body)),
            );
        }
        Ok(NegotiationResult::Unacceptable) => {
            // `body` drops here; the source stream is released without
            // ever being piped.
            return finalize(parts, DispatchOutcome::Rejected(Error::UnsupportedEncoding));
        }
        Err(e) => return finalize(parts, DispatchOutcome::Rejected(e)),
    };

    if has_content_encoding(&parts.headers)
        || has_content_range(&parts.headers)
        || is_below_threshold(&parts.headers, config.threshold)
    {
        return finalize(
            parts,
            DispatchOutcome::Bypass(ClassifiedPayload::Stream(body)),
        );
    }

    let Some(encoder) = config.registry.new_encoder(&selected) else {
        return finalize(parts, DispatchOutcome::Rejected(Error::UnsupportedEncoding));
    };

    finalize(
        parts,
        DispatchOutcome::Compressed {
            encoding: selected,
            body: CompressionBody::compressed(body, encoder),
        },
    )
}

/// Already-encoded responses pass through untouched.
fn has_content_encoding(headers: &header::HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_ENCODING)
}

/// Range responses must not be transformed.
fn has_content_range(headers: &header::HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_RANGE)
}

/// A declared length below the threshold skips compression; unknown
/// lengths compress.
fn is_below_threshold(headers: &header::HeaderMap, threshold: usize) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len < threshold)
}
