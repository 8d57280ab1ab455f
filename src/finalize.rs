use crate::body::CompressionBody;
use crate::dispatch::DispatchOutcome;
use crate::error::Error;
use crate::payload::ClassifiedPayload;
use http::{Response, header, response::Parts};

/// Commits a dispatch outcome to the outgoing response.
///
/// `content-encoding` is set only when actually compressing; a rejection
/// replaces the response entirely with a structured error, since nothing
/// has been written yet at this point.
pub fn finalize<B>(mut parts: Parts, outcome: DispatchOutcome<B>) -> Response<CompressionBody<B>> {
    match outcome {
        DispatchOutcome::Bypass(ClassifiedPayload::Stream(inner)) => {
            Response::from_parts(parts, CompressionBody::passthrough(inner))
        }
        DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes)) => {
            parts
                .headers
                .insert(header::CONTENT_LENGTH, header::HeaderValue::from(bytes.len()));
            Response::from_parts(parts, CompressionBody::buffered(bytes))
        }
        DispatchOutcome::Compressed { encoding, body } => {
            if let Ok(value) = header::HeaderValue::from_str(&encoding) {
                parts.headers.insert(header::CONTENT_ENCODING, value);
            }
            // The transformed length is unknown (streaming) or differs
            // from the original; either way the old value is wrong.
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.remove(header::ACCEPT_RANGES);
            add_vary_accept_encoding(&mut parts.headers);
            Response::from_parts(parts, body)
        }
        DispatchOutcome::Rejected(error) => error_response(&error),
    }
}

/// Builds a complete error response with a structured JSON body.
pub fn error_response<B>(error: &Error) -> Response<CompressionBody<B>> {
    let body = error.to_body();
    let mut response = Response::new(CompressionBody::buffered(body.clone()));
    *response.status_mut() = error.status_code();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, header::HeaderValue::from(body.len()));
    response
}

/// Adds `accept-encoding` to the `Vary` header unless already covered.
fn add_vary_accept_encoding(headers: &mut header::HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("accept-encoding"),
    );
}
