//! Negotiated HTTP response compression.
//!
//! This crate matches a client's `Accept-Encoding` header against a
//! configurable registry of encoders and transforms the outgoing response
//! body accordingly: live byte streams are piped through the selected
//! encoder, while text and structured payloads are serialized and encoded
//! in one buffered step.
//!
//! # Two deployment modes
//!
//! Applied globally through a Tower layer, compressing every response:
//!
//! ```ignore
//! use negotiated_compression::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .service(my_service);
//! ```
//!
//! Or invoked selectively, per response:
//!
//! ```ignore
//! use negotiated_compression::{CompressionConfig, Compressor, Payload};
//!
//! let compressor = Compressor::new(CompressionConfig::new());
//! let response = compressor.compress(
//!     request.headers(),
//!     http::Response::new(Payload::text("hello world")),
//! );
//! ```
//!
//! # Negotiation Rules
//!
//! Candidates are scanned in the client's left-to-right order and the
//! first one registered on the server wins; `;q=0` entries are treated as
//! explicitly rejected, `*` stands for the server's first preference not
//! rejected by name, and `identity` means "send uncompressed". Quality
//! values beyond the zero filter do not reorder candidates.
//!
//! Compression is skipped when the request opts out via
//! `x-no-compression`, when a buffered payload is smaller than the
//! configured threshold, or when the response is already encoded or a
//! range response.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to the negotiated encoding
//! - `Content-Length` is removed (transformed size is unknown)
//! - `Accept-Ranges` is removed
//! - `Vary` includes `Accept-Encoding`
//!
//! Failed negotiations produce complete error responses before any body
//! byte is written: 406 when no mutual encoding exists, 400 when the
//! header is missing in global mode, and 500 with a structured JSON body
//! when no payload was supplied or serialization fails.

#![deny(missing_docs)]

mod body;
mod config;
mod dispatch;
mod error;
mod finalize;
mod future;
mod layer;
mod negotiate;
mod payload;
mod registry;
mod service;

pub use body::CompressionBody;
pub use config::{CompressionConfig, DEFAULT_THRESHOLD};
pub use dispatch::{Compressor, DispatchOutcome};
pub use error::Error;
pub use finalize::{error_response, finalize};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use negotiate::{
    EncodingCandidate, IDENTITY, Mode, NegotiationResult, negotiate, parse_candidates,
};
pub use payload::{ClassifiedPayload, JsonSerializer, Payload, Serializer, TextValues, classify};
pub use registry::{BoxEncoder, EncoderFactory, EncoderRegistry};
pub use service::CompressionService;
