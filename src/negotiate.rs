use crate::registry::EncoderRegistry;
use crate::error::Error;
use tracing::debug;

/// The pseudo-encoding meaning "no transformation applied".
pub const IDENTITY: &str = "identity";

const WILDCARD: &str = "*";

/// How the middleware is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Compression applies to every response; a request without an
    /// `Accept-Encoding` header is a client error.
    Global,
    /// Compression is invoked explicitly per response; a request without
    /// an `Accept-Encoding` header simply skips compression.
    Selective,
}

/// One parsed `Accept-Encoding` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingCandidate {
    /// Canonical lowercase encoding name (`x-gzip` and `brotli` aliases
    /// are folded into `gzip` and `br`).
    pub name: String,
    /// Quality value in `[0, 1]`; `0` means explicitly rejected.
    pub quality: f32,
    /// Original left-to-right position in the header.
    pub client_order: usize,
}

/// Outcome of matching a request's `Accept-Encoding` header against the
/// server's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationResult {
    /// Compress with the named encoding.
    Selected(String),
    /// Send the body untransformed.
    Identity,
    /// No mutually supported encoding exists.
    Unacceptable,
}

/// Matches a raw `Accept-Encoding` header against the registry.
///
/// Candidates are scanned strictly in client left-to-right order and the
/// first name registered on the server wins: given `"hello,br"` with only
/// `br` registered, `br` is selected. Quality values only filter out
/// explicitly rejected (`;q=0`) entries; this is deliberately not full
/// RFC 9110 quality-ranked negotiation.
///
/// A `*` candidate stands for the first entry of the server's preference
/// order that the client did not reject by name.
pub fn negotiate(
    header: Option<&str>,
    registry: &EncoderRegistry,
    mode: Mode,
) -> Result<NegotiationResult, Error> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return match mode {
            Mode::Global => Err(Error::MissingAcceptEncoding),
            Mode::Selective => Ok(NegotiationResult::Identity),
        };
    };

    let candidates = parse_candidates(header);
    let rejected: Vec<&str> = candidates
        .iter()
        .filter(|c| c.quality == 0.0)
        .map(|c| c.name.as_str())
        .collect();

    for candidate in &candidates {
        if candidate.quality == 0.0 {
            continue;
        }
        match candidate.name.as_str() {
            IDENTITY => {
                debug!(header, "negotiated identity");
                return Ok(NegotiationResult::Identity);
            }
            WILDCARD => {
                if let Some(name) = registry
                    .preference_order()
                    .find(|name| !rejected.contains(name))
                {
                    debug!(header, encoding = name, "negotiated via wildcard");
                    return Ok(NegotiationResult::Selected(name.to_string()));
                }
            }
            name => {
                if registry.resolve(name).is_some() {
                    debug!(header, encoding = name, "negotiated encoding");
                    return Ok(NegotiationResult::Selected(name.to_string()));
                }
            }
        }
    }

    debug!(header, "no mutually supported encoding");
    Ok(NegotiationResult::Unacceptable)
}

/// Parses a header value into candidates, preserving client order.
pub fn parse_candidates(header: &str) -> Vec<EncodingCandidate> {
    header
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .enumerate()
        .map(|(client_order, part)| {
            let (name, quality) = split_quality(part);
            EncodingCandidate {
                name: canonical_name(name),
                quality,
                client_order,
            }
        })
        .collect()
}

/// Splits an entry like `"br;q=0.8"` into its name and quality.
///
/// A missing or malformed quality parameter defaults to `1.0`; parsed
/// values are clamped to `[0, 1]`.
fn split_quality(entry: &str) -> (&str, f32) {
    let mut parts = entry.splitn(2, ';');
    let name = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            if q.starts_with("q=") || q.starts_with("Q=") {
                q[2..].parse::<f32>().ok()
            } else {
                None
            }
        })
        .map(|q| q.clamp(0.0, 1.0))
        .unwrap_or(1.0);

    (name, quality)
}

fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "x-gzip" => "gzip".to_string(),
        "brotli" => "br".to_string(),
        _ => lower,
    }
}
