use crate::error::Error;
use compression_codecs::EncodeV2;
#[cfg(feature = "brotli")]
use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
#[cfg(feature = "deflate")]
use compression_codecs::deflate::DeflateEncoder;
#[cfg(feature = "gzip")]
use compression_codecs::gzip::GzipEncoder;
#[cfg(any(feature = "gzip", feature = "deflate"))]
use compression_core::Level;

/// A ready-to-use compression transform.
pub type BoxEncoder = Box<dyn EncodeV2 + Send>;

/// Constructs a fresh encoder for one response.
pub type EncoderFactory = Box<dyn Fn() -> BoxEncoder + Send + Sync>;

/// Ordered mapping from content-encoding name to encoder factory.
///
/// Entry order is the server's preference order, consulted when a client
/// sends a `*` wildcard. The registry is populated during setup and sealed
/// before the first request is negotiated; once sealed it is read-only, so
/// sharing it across concurrent requests needs no synchronization.
pub struct EncoderRegistry {
    entries: Vec<(String, EncoderFactory)>,
    sealed: bool,
}

impl EncoderRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            sealed: false,
        }
    }

    /// Adds or overrides an encoder under the given name.
    ///
    /// Names are canonicalized to lowercase. Fails once the registry has
    /// been sealed, or when the name is not a valid header token.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: EncoderFactory,
    ) -> Result<(), Error> {
        if self.sealed {
            return Err(Error::RegistrySealed);
        }
        let name = name.into().to_ascii_lowercase();
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        {
            return Err(Error::InvalidEncodingName(name));
        }
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = factory,
            None => self.entries.push((name, factory)),
        }
        Ok(())
    }

    /// Looks up the factory registered under `name`, case-insensitively.
    pub fn resolve(&self, name: &str) -> Option<&EncoderFactory> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, factory)| factory)
    }

    /// Constructs a fresh encoder for `name`, if registered.
    pub fn new_encoder(&self, name: &str) -> Option<BoxEncoder> {
        self.resolve(name).map(|factory| factory())
    }

    /// The registered encoding names in server preference order.
    pub fn preference_order(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Freezes the registry; subsequent `register` calls fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the registry has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl Default for EncoderRegistry {
    /// The default registry: brotli when compiled in, then gzip, then
    /// deflate.
    fn default() -> Self {
        #[cfg_attr(
            not(any(feature = "brotli", feature = "gzip", feature = "deflate")),
            allow(unused_mut)
        )]
        let mut registry = Self::empty();
        #[cfg(feature = "brotli")]
        registry
            .register("br", Box::new(|| Box::new(BrotliEncoder::new(BrotliParams::default()))))
            .ok();
        #[cfg(feature = "gzip")]
        registry
            .register("gzip", Box::new(|| Box::new(GzipEncoder::new(Level::Default.into()))))
            .ok();
        #[cfg(feature = "deflate")]
        registry
            .register("deflate", Box::new(|| Box::new(DeflateEncoder::new(Level::Default.into()))))
            .ok();
        registry
    }
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("encodings", &self.preference_order().collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}
