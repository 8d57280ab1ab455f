use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

/// Errors produced while negotiating or applying response compression.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Negotiation found no mutually supported content encoding.
    #[error("no acceptable content-encoding could be negotiated")]
    UnsupportedEncoding,

    /// The request carried no `Accept-Encoding` header while compression is
    /// applied globally.
    #[error("missing accept-encoding header")]
    MissingAcceptEncoding,

    /// No payload was supplied to compress. This is a programming error at
    /// the call site, not a negotiation outcome.
    #[error("no response payload was supplied")]
    InvalidPayload,

    /// Serializing a structured payload to bytes failed.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying compression transform failed.
    #[error("encoder failed: {0}")]
    Encoder(#[from] std::io::Error),

    /// An encoder registration was attempted after the registry was sealed.
    #[error("encoder registry is sealed, register encoders before serving")]
    RegistrySealed,

    /// An encoder was registered under a name that is not a valid
    /// `Content-Encoding` token.
    #[error("invalid encoding name: {0:?}")]
    InvalidEncodingName(String),
}

impl Error {
    /// The HTTP status this error maps to when surfaced as a response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnsupportedEncoding => StatusCode::NOT_ACCEPTABLE,
            Error::MissingAcceptEncoding => StatusCode::BAD_REQUEST,
            Error::InvalidPayload
            | Error::Serialization(_)
            | Error::Encoder(_)
            | Error::RegistrySealed
            | Error::InvalidEncodingName(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the structured JSON error body sent to clients.
    ///
    /// Server-side failures are reported with a generic message so internal
    /// details never leak into a response body.
    pub(crate) fn to_body(&self) -> Bytes {
        let status = self.status_code();
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("Unknown"),
            message: &message,
            status_code: status.as_u16(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(FALLBACK_BODY))
    }
}

/// Emitted when rendering the error body itself fails, so the response
/// body shape never degrades to an empty payload.
const FALLBACK_BODY: &[u8] =
    br#"{"error":"Internal Server Error","message":"Internal server error","statusCode":500}"#;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(rename = "statusCode")]
    status_code: u16,
}
