use crate::body::{CompressionBody, encode_buffer};
use crate::config::CompressionConfig;
use crate::error::Error;
use crate::finalize::finalize;
use crate::negotiate::{NegotiationResult, negotiate};
use crate::payload::{ClassifiedPayload, Payload, classify};
use http::{HeaderMap, HeaderName, Response, header};
use std::sync::Arc;
use tracing::debug;

/// The dispatcher's verdict for one response.
pub enum DispatchOutcome<B> {
    /// Send the payload unmodified.
    Bypass(ClassifiedPayload<B>),
    /// Send the payload through the named encoding.
    Compressed {
        /// The negotiated content-encoding name.
        encoding: String,
        /// The transformed body.
        body: CompressionBody<B>,
    },
    /// Abandon the response with an error.
    Rejected(Error),
}

/// Negotiates and applies compression for explicitly opted-in responses.
///
/// This is the selective-mode entry point; for applying compression to
/// every response of a service, see
/// [`CompressionLayer`](crate::CompressionLayer).
#[derive(Debug, Clone)]
pub struct Compressor {
    config: Arc<CompressionConfig>,
}

impl Compressor {
    /// Builds a compressor, sealing the configuration's encoder registry.
    pub fn new(mut config: CompressionConfig) -> Self {
        config.seal();
        Self {
            config: Arc::new(config),
        }
    }

    /// Decides how to transform a payload, given the request's raw
    /// `Accept-Encoding` value and opt-out signal.
    ///
    /// Exactly one outcome is produced. A stream payload rejected here is
    /// dropped before the outcome is returned, so its source is released
    /// exactly once on every path.
    pub fn dispatch<B>(
        &self,
        accept_encoding: Option<&str>,
        opt_out: bool,
        payload: Option<Payload<B>>,
    ) -> DispatchOutcome<B> {
        let config = &*self.config;

        // Opt-out wins over everything; the classifier still runs so
        // structured payloads become concrete bytes.
        if opt_out {
            debug!("compression opted out by request");
            return match self.classify(payload) {
                Ok(classified) => DispatchOutcome::Bypass(classified),
                Err(e) => DispatchOutcome::Rejected(e),
            };
        }

        let selected = match negotiate(accept_encoding, &config.registry, config.mode()) {
            Ok(NegotiationResult::Selected(name)) => name,
            Ok(NegotiationResult::Identity) => {
                return match self.classify(payload) {
                    Ok(classified) => DispatchOutcome::Bypass(classified),
                    Err(e) => DispatchOutcome::Rejected(e),
                };
            }
            Ok(NegotiationResult::Unacceptable) => {
                // `payload` drops here, releasing any source stream.
                return DispatchOutcome::Rejected(Error::UnsupportedEncoding);
            }
            Err(e) => return DispatchOutcome::Rejected(e),
        };

        let classified = match self.classify(payload) {
            Ok(classified) => classified,
            Err(e) => return DispatchOutcome::Rejected(e),
        };

        match classified {
            ClassifiedPayload::Stream(inner) => {
                let Some(encoder) = config.registry.new_encoder(&selected) else {
                    return DispatchOutcome::Rejected(Error::UnsupportedEncoding);
                };
                DispatchOutcome::Compressed {
                    encoding: selected,
                    body: CompressionBody::compressed(inner, encoder),
                }
            }
            ClassifiedPayload::Buffered(bytes) => {
                if bytes.len() < config.threshold {
                    debug!(
                        size = bytes.len(),
                        threshold = config.threshold,
                        "payload below threshold, bypassing"
                    );
                    return DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes));
                }
                let Some(encoder) = config.registry.new_encoder(&selected) else {
                    return DispatchOutcome::Rejected(Error::UnsupportedEncoding);
                };
                match encode_buffer(encoder, &bytes) {
                    Ok(encoded) => DispatchOutcome::Compressed {
                        encoding: selected,
                        body: CompressionBody::buffered(encoded),
                    },
                    Err(e) => DispatchOutcome::Rejected(Error::Encoder(e)),
                }
            }
        }
    }

    /// Compresses one response end to end: reads the request's headers,
    /// dispatches the payload, and finalizes headers and body.
    ///
    /// Rejections come back as complete error responses (406, 400, or 500
    /// with a structured JSON body), ready to send.
    pub fn compress<B, P>(
        &self,
        request_headers: &HeaderMap,
        response: Response<P>,
    ) -> Response<CompressionBody<B>>
    where
        P: Into<Option<Payload<B>>>,
    {
        let (parts, payload) = response.into_parts();
        let accept_encoding = header_str(request_headers, &header::ACCEPT_ENCODING);
        let opt_out = opt_out_requested(request_headers, &self.config.opt_out_header);
        let outcome = self.dispatch(accept_encoding, opt_out, payload.into());
        finalize(parts, outcome)
    }

    fn classify<B>(&self, payload: Option<Payload<B>>) -> Result<ClassifiedPayload<B>, Error> {
        classify(
            payload,
            self.config.serializer.as_ref(),
            self.config.text_values.as_deref(),
        )
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Whether the request carries a truthy opt-out signal.
pub(crate) fn opt_out_requested(headers: &HeaderMap, name: &HeaderName) -> bool {
    match headers.get(name) {
        None => false,
        Some(value) => match value.to_str() {
            Ok(v) => !v.eq_ignore_ascii_case("false") && v != "0",
            Err(_) => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::tests::{SourceBody, collect_data};
    use bytes::Bytes;
    use http_body::Frame;
    use http_body_util::Empty;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn compressor(config: CompressionConfig) -> Compressor {
        Compressor::new(config)
    }

    fn selective() -> Compressor {
        compressor(CompressionConfig::new().threshold(0))
    }

    /// A body that counts how many times it is dropped.
    struct DropCounted(Arc<AtomicUsize>);

    impl Drop for DropCounted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl http_body::Body for DropCounted {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            std::task::Poll::Ready(None)
        }
    }

    #[test]
    fn test_opt_out_bypasses_despite_header() {
        let compressor = selective();
        let outcome = compressor.dispatch::<Empty<Bytes>>(
            Some("gzip, br"),
            true,
            Some(Payload::text("do not compress")),
        );
        match outcome {
            DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes)) => {
                assert_eq!(bytes, Bytes::from("do not compress"));
            }
            _ => panic!("expected bypass"),
        }
    }

    #[test]
    fn test_opt_out_still_serializes_structured() {
        let compressor = selective();
        let payload = Payload::<Empty<Bytes>>::structured(&json!({"a": 1})).unwrap();
        let outcome = compressor.dispatch(Some("gzip"), true, Some(payload));
        match outcome {
            DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes)) => {
                let round_trip: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(round_trip, json!({"a": 1}));
            }
            _ => panic!("expected serialized bypass"),
        }
    }

    #[test]
    fn test_unacceptable_header_rejects() {
        let compressor = selective();
        let outcome = compressor.dispatch::<Empty<Bytes>>(
            Some("unsupported-token"),
            false,
            Some(Payload::text("payload")),
        );
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected(Error::UnsupportedEncoding)
        ));
    }

    #[test]
    fn test_rejected_stream_source_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let compressor = selective();
        let outcome = compressor.dispatch(
            Some("unsupported-token"),
            false,
            Some(Payload::stream(DropCounted(drops.clone()))),
        );
        assert!(matches!(outcome, DispatchOutcome::Rejected(_)));
        drop(outcome);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_compressed_stream_source_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let compressor = selective();
        let outcome = compressor.dispatch(
            Some("gzip"),
            false,
            Some(Payload::stream(DropCounted(drops.clone()))),
        );
        assert!(matches!(outcome, DispatchOutcome::Compressed { .. }));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(outcome);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity_header_bypasses() {
        let compressor = selective();
        let outcome =
            compressor.dispatch::<Empty<Bytes>>(Some("identity"), false, Some(Payload::text("x")));
        assert!(matches!(outcome, DispatchOutcome::Bypass(_)));
    }

    #[test]
    fn test_missing_header_selective_bypasses() {
        let compressor = selective();
        let outcome = compressor.dispatch::<Empty<Bytes>>(None, false, Some(Payload::text("x")));
        assert!(matches!(outcome, DispatchOutcome::Bypass(_)));
    }

    #[test]
    fn test_missing_header_global_rejects() {
        let compressor = compressor(CompressionConfig::new().global(true));
        let outcome = compressor.dispatch::<Empty<Bytes>>(None, false, Some(Payload::text("x")));
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected(Error::MissingAcceptEncoding)
        ));
    }

    #[test]
    fn test_missing_payload_rejects_invalid() {
        let compressor = selective();
        let outcome = compressor.dispatch::<Empty<Bytes>>(Some("gzip"), false, None);
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected(Error::InvalidPayload)
        ));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_buffered_below_threshold_bypasses() {
        let compressor = compressor(CompressionConfig::new().threshold(100));
        let outcome =
            compressor.dispatch::<Empty<Bytes>>(Some("gzip"), false, Some(Payload::text("tiny")));
        match outcome {
            DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes)) => {
                assert_eq!(bytes, Bytes::from("tiny"));
            }
            _ => panic!("expected bypass below threshold"),
        }
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_buffered_at_threshold_compresses() {
        use std::io::Read;

        let text = "a".repeat(100);
        let compressor = compressor(CompressionConfig::new().threshold(100));
        let outcome = compressor.dispatch::<Empty<Bytes>>(
            Some("gzip"),
            false,
            Some(Payload::text(text.clone())),
        );
        match outcome {
            DispatchOutcome::Compressed { encoding, mut body } => {
                assert_eq!(encoding, "gzip");
                let compressed = collect_data(&mut body);
                let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
                let mut decompressed = String::new();
                decoder.read_to_string(&mut decompressed).unwrap();
                assert_eq!(decompressed, text);
            }
            _ => panic!("expected compression at threshold"),
        }
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_stream_ignores_threshold() {
        let compressor = compressor(CompressionConfig::new().threshold(1_000_000));
        let inner = SourceBody::new(vec![Frame::data(Bytes::from("short stream"))]);
        let outcome = compressor.dispatch(Some("gzip"), false, Some(Payload::stream(inner)));
        assert!(matches!(outcome, DispatchOutcome::Compressed { .. }));
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "deflate"))]
    fn test_scan_order_over_quality() {
        let compressor = selective();
        let outcome = compressor.dispatch::<Empty<Bytes>>(
            Some("deflate;q=0.1, gzip;q=0.9"),
            false,
            Some(Payload::text("payload that is long enough")),
        );
        match outcome {
            DispatchOutcome::Compressed { encoding, .. } => assert_eq!(encoding, "deflate"),
            _ => panic!("expected compression"),
        }
    }

    #[test]
    fn test_custom_serializer_used() {
        struct Csv;
        impl crate::payload::Serializer for Csv {
            fn serialize(&self, value: &serde_json::Value) -> Result<Bytes, Error> {
                let row = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                Ok(Bytes::from(row))
            }
        }

        let compressor = Compressor::new(CompressionConfig::new().serializer(Csv));
        let payload = Payload::<Empty<Bytes>>::structured(&json!([1, 2, 3])).unwrap();
        let outcome = compressor.dispatch(None, false, Some(payload));
        match outcome {
            DispatchOutcome::Bypass(ClassifiedPayload::Buffered(bytes)) => {
                assert_eq!(bytes, Bytes::from("1,2,3"));
            }
            _ => panic!("expected bypass with csv bytes"),
        }
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn test_compress_deflate_round_trips_known_file() {
        use std::io::Read;

        let file = include_str!("negotiate.rs");
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, "deflate".parse().unwrap());

        let compressor = selective();
        let mut response = compressor.compress(
            &headers,
            Response::new(Payload::<Empty<Bytes>>::bytes(file)),
        );

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );
        let compressed = collect_data(response.body_mut());
        let mut decoder = flate2::read::DeflateDecoder::new(compressed.as_slice());
        let mut inflated = String::new();
        decoder.read_to_string(&mut inflated).unwrap();
        assert_eq!(inflated, file);
    }

    #[test]
    fn test_compress_without_payload_is_internal_error() {
        let compressor = selective();
        let mut response = compressor.compress(
            &HeaderMap::new(),
            Response::new(None::<Payload<Empty<Bytes>>>),
        );

        assert_eq!(response.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = collect_data(response.body_mut());
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Internal Server Error");
        assert_eq!(value["message"], "Internal server error");
        assert_eq!(value["statusCode"], 500);
    }

    #[test]
    fn test_opt_out_truthiness() {
        let name = HeaderName::from_static("x-no-compression");
        let mut headers = HeaderMap::new();
        assert!(!opt_out_requested(&headers, &name));

        headers.insert(&name, "1".parse().unwrap());
        assert!(opt_out_requested(&headers, &name));

        headers.insert(&name, "false".parse().unwrap());
        assert!(!opt_out_requested(&headers, &name));

        headers.insert(&name, "0".parse().unwrap());
        assert!(!opt_out_requested(&headers, &name));
    }

    #[test]
    fn test_dispatch_is_deterministic() {
        let compressor = selective();
        for _ in 0..2 {
            let outcome = compressor.dispatch::<Empty<Bytes>>(
                Some("unsupported-token"),
                false,
                Some(Payload::text("x")),
            );
            assert!(matches!(
                outcome,
                DispatchOutcome::Rejected(Error::UnsupportedEncoding)
            ));
        }
    }
}
