use crate::error::Error;
use bytes::Bytes;
use http_body_util::Empty;
use serde::Serialize;
use serde_json::Value;

/// Turns a structured value into response bytes.
///
/// The default implementation is [`JsonSerializer`]; servers with a
/// different wire representation can inject their own.
pub trait Serializer: Send + Sync {
    /// Serializes `value` to the bytes that will be sent (and possibly
    /// compressed).
    fn serialize(&self, value: &Value) -> Result<Bytes, Error>;
}

/// The default serializer, producing compact JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Bytes, Error> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

/// Hook extending which structured values are treated as ready-made text
/// instead of being serialized.
pub type TextValues = dyn Fn(&Value) -> Option<String> + Send + Sync;

/// A response body handed over for compression.
///
/// The three admissible shapes mirror what a handler can produce: a live
/// byte stream, ready-made text or bytes, or a structured value that still
/// needs serializing.
pub enum Payload<B = Empty<Bytes>> {
    /// A live byte stream implementing [`http_body::Body`].
    Stream(B),
    /// Ready-made text.
    Text(String),
    /// Ready-made bytes.
    Bytes(Bytes),
    /// A structured value, serialized by the configured [`Serializer`].
    Structured(Value),
}

impl<B> Payload<B> {
    /// A streaming payload; ownership of the body moves into the pipeline.
    pub fn stream(body: B) -> Self {
        Payload::Stream(body)
    }

    /// A text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    /// A raw bytes payload.
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Payload::Bytes(bytes.into())
    }

    /// A structured payload from any serializable value.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }
}

impl<B> std::fmt::Debug for Payload<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Stream(_) => f.write_str("Payload::Stream"),
            Payload::Text(text) => f.debug_tuple("Payload::Text").field(text).finish(),
            Payload::Bytes(bytes) => f.debug_tuple("Payload::Bytes").field(bytes).finish(),
            Payload::Structured(value) => {
                f.debug_tuple("Payload::Structured").field(value).finish()
            }
        }
    }
}

/// A payload after classification: either a stream to pipe or concrete
/// bytes to encode in one step.
pub enum ClassifiedPayload<B = Empty<Bytes>> {
    /// Pipe the stream through an encoder; length unknown up front.
    Stream(B),
    /// Concrete bytes, eligible for the size threshold check.
    Buffered(Bytes),
}

/// Classifies a payload and reduces it to a stream or concrete bytes.
///
/// An absent payload is a programming error at the call site and surfaces
/// as [`Error::InvalidPayload`]; serialization failures propagate, never
/// swallowed.
pub fn classify<B>(
    payload: Option<Payload<B>>,
    serializer: &dyn Serializer,
    text_values: Option<&TextValues>,
) -> Result<ClassifiedPayload<B>, Error> {
    match payload {
        None => Err(Error::InvalidPayload),
        Some(Payload::Stream(body)) => Ok(ClassifiedPayload::Stream(body)),
        Some(Payload::Text(text)) => Ok(ClassifiedPayload::Buffered(Bytes::from(text))),
        Some(Payload::Bytes(bytes)) => Ok(ClassifiedPayload::Buffered(bytes)),
        Some(Payload::Structured(value)) => {
            if let Some(text) = text_values.and_then(|recognize| recognize(&value)) {
                return Ok(ClassifiedPayload::Buffered(Bytes::from(text)));
            }
            Ok(ClassifiedPayload::Buffered(serializer.serialize(&value)?))
        }
    }
}
