use crate::error::Error;
use crate::negotiate::Mode;
use crate::payload::{JsonSerializer, Serializer, TextValues};
use crate::registry::{EncoderFactory, EncoderRegistry};
use http::HeaderName;

/// Default minimum payload size for compression, in bytes.
///
/// Compressing tiny payloads wastes CPU and can make them larger.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Configuration for negotiated response compression.
///
/// Built once at setup; [`Compressor::new`](crate::Compressor::new) and
/// [`CompressionLayer::with_config`](crate::CompressionLayer::with_config)
/// seal the registry when they take ownership, after which the
/// configuration is read-only and shared across requests.
pub struct CompressionConfig {
    pub(crate) global: bool,
    pub(crate) threshold: usize,
    pub(crate) registry: EncoderRegistry,
    pub(crate) serializer: Box<dyn Serializer>,
    pub(crate) text_values: Option<Box<TextValues>>,
    pub(crate) opt_out_header: HeaderName,
}

impl CompressionConfig {
    /// Creates a configuration with the default registry (brotli when
    /// compiled in, then gzip, then deflate), a 1 KiB threshold, JSON
    /// serialization, and the `x-no-compression` opt-out header.
    pub fn new() -> Self {
        Self {
            global: false,
            threshold: DEFAULT_THRESHOLD,
            registry: EncoderRegistry::default(),
            serializer: Box::new(JsonSerializer),
            text_values: None,
            opt_out_header: HeaderName::from_static("x-no-compression"),
        }
    }

    /// Selects global deployment: compression applies to every response
    /// and a missing `Accept-Encoding` header is a client error. When
    /// false (the default), a missing header simply skips compression.
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Sets the minimum byte size below which buffered payloads are never
    /// compressed.
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Registers or overrides an encoder. New names are appended to the
    /// server preference order.
    pub fn encoder(
        mut self,
        name: impl Into<String>,
        factory: EncoderFactory,
    ) -> Result<Self, Error> {
        self.registry.register(name, factory)?;
        Ok(self)
    }

    /// Replaces the encoder registry wholesale.
    pub fn registry(mut self, registry: EncoderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Injects a serializer for structured payloads.
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Extends which structured values are treated as ready-made text:
    /// when the hook returns `Some`, that text is used verbatim instead of
    /// running the serializer.
    pub fn text_values(
        mut self,
        recognize: impl Fn(&serde_json::Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.text_values = Some(Box::new(recognize));
        self
    }

    /// Changes the request header used as the compression opt-out signal.
    pub fn opt_out_header(mut self, name: HeaderName) -> Self {
        self.opt_out_header = name;
        self
    }

    pub(crate) fn mode(&self) -> Mode {
        if self.global { Mode::Global } else { Mode::Selective }
    }

    pub(crate) fn seal(&mut self) {
        self.registry.seal();
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompressionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionConfig")
            .field("global", &self.global)
            .field("threshold", &self.threshold)
            .field("registry", &self.registry)
            .field("opt_out_header", &self.opt_out_header)
            .finish_non_exhaustive()
    }
}
