use crate::config::CompressionConfig;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that negotiates and compresses HTTP response bodies.
///
/// This is the global deployment mode: every response of the wrapped
/// service goes through negotiation, and a request without an
/// `Accept-Encoding` header is answered with a 400. To let such requests
/// pass through uncompressed instead, build the layer from a configuration
/// with `global(false)`.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    config: Arc<CompressionConfig>,
}

impl CompressionLayer {
    /// Creates a layer with default settings and global mode enabled.
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::new().global(true))
    }

    /// Creates a layer from an explicit configuration, sealing its encoder
    /// registry.
    pub fn with_config(mut config: CompressionConfig) -> Self {
        config.seal();
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::clone(&self.config))
    }
}
